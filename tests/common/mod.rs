//! Shared fixtures for the engine integration tests
//!
//! The scenario used throughout: one consumer `C1` whose key-wrap client XORs
//! every key byte with a fixed offset, and one resource data group holding
//! `/3D/model.bin` under AES-256-GCM.

#![allow(dead_code)]

use lib3mf_securecontent::crypto::{Aes256GcmCipher, ClientError, FnKeyWrapper, SecureContext};
use lib3mf_securecontent::model::{
    Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore,
};
use lib3mf_securecontent::{KeyStorePackageWriter, Result};
use std::io::Cursor;

/// Part encrypted by the fixtures
pub const MODEL_PATH: &str = "/3D/model.bin";

/// Plaintext of the encrypted part
pub const MODEL_BYTES: &[u8] = b"solid cube\nfacet normal 0 0 1\nendsolid cube\n";

/// XOR offset applied by the test key-wrap client
pub const XOR_OFFSET: u8 = 0x5A;

/// Key-wrap client XORing with [`XOR_OFFSET`] in both directions
pub fn xor_wrapper() -> FnKeyWrapper {
    FnKeyWrapper::new(
        |key, _| Ok(key.iter().map(|b| b ^ XOR_OFFSET).collect()),
        |key, _| Ok(key.iter().map(|b| b ^ XOR_OFFSET).collect()),
    )
}

/// Key-wrap client whose every call fails
pub fn offline_wrapper() -> FnKeyWrapper {
    FnKeyWrapper::new(
        |_, _| Err(ClientError::new("key service offline")),
        |_, _| Err(ClientError::new("key service offline")),
    )
}

/// Content cipher plus the XOR client for `C1`
pub fn full_context() -> SecureContext {
    SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper("C1", xor_wrapper())
}

/// Keystore with consumer `C1` and group `G1` holding [`MODEL_PATH`]
pub fn model_keystore(compression: Compression) -> KeyStore {
    let mut keystore = KeyStore::new();
    keystore.add_consumer(Consumer::new("C1")).unwrap();
    let group = keystore.add_resource_data_group_with_key("G1", vec![0x42; 32]);
    keystore
        .add_access_right(group, "C1", KEKParams::default())
        .unwrap();
    keystore
        .add_resource_data(group, MODEL_PATH, EncryptionAlgorithm::Aes256Gcm, compression)
        .unwrap();
    keystore
}

/// Save a package holding the encrypted model part and a plaintext part
pub fn save_package(keystore: KeyStore, context: SecureContext) -> Result<(Vec<u8>, KeyStore)> {
    let mut writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore, context)?;
    writer.write_part(MODEL_PATH, MODEL_BYTES)?;
    writer.write_part("/Metadata/notes.txt", b"plain notes")?;
    let (cursor, keystore) = writer.close()?;
    Ok((cursor.into_inner(), keystore))
}

/// Rewrite one entry of a ZIP archive, copying all others unchanged
pub fn replace_entry(package: &[u8], name: &str, content: &[u8]) -> Vec<u8> {
    use std::io::{Read, Write};
    use zip::write::SimpleFileOptions;
    use zip::{ZipArchive, ZipWriter};

    let mut archive = ZipArchive::new(Cursor::new(package)).unwrap();
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let entry_name = file.name().to_string();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        out.start_file(entry_name.as_str(), SimpleFileOptions::default())
            .unwrap();
        if entry_name == name {
            out.write_all(content).unwrap();
        } else {
            out.write_all(&data).unwrap();
        }
    }
    out.finish().unwrap().into_inner()
}

/// Read one entry of a ZIP archive
pub fn read_entry(package: &[u8], name: &str) -> Vec<u8> {
    use std::io::Read;
    let mut archive = zip::ZipArchive::new(Cursor::new(package)).unwrap();
    let mut data = Vec::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    data
}
