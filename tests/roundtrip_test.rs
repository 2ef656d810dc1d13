//! Save/load round trips through the writer and reader engines

#![cfg(feature = "crypto")]

mod common;

use common::*;
use lib3mf_securecontent::crypto::{Aes256GcmCipher, FnKeyWrapper, SecureContext};
use lib3mf_securecontent::model::{Compression, KeyStore};
use lib3mf_securecontent::opc::{KEYSTORE_REL_TYPE_2019_07, MUST_PRESERVE_REL_TYPE, Package};
use lib3mf_securecontent::writer::write_keystore;
use lib3mf_securecontent::{Error, KeyStorePackageReader, KeyStorePackageWriter};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[test]
fn test_model_part_roundtrip() {
    let (package, _) = save_package(model_keystore(Compression::None), full_context()).unwrap();

    // Ciphertext on disk, never the plaintext
    let raw = read_entry(&package, "3D/model.bin");
    assert_eq!(raw.len(), MODEL_BYTES.len());
    assert_ne!(raw, MODEL_BYTES);

    let mut reader = KeyStorePackageReader::open(Cursor::new(package), full_context()).unwrap();
    assert_eq!(
        reader.read_part(MODEL_PATH).unwrap().as_deref(),
        Some(MODEL_BYTES)
    );
    assert_eq!(
        reader.read_part("/Metadata/notes.txt").unwrap().as_deref(),
        Some(&b"plain notes"[..])
    );
    assert!(reader.warnings().is_empty(), "{:?}", reader.warnings());
}

#[test]
fn test_compressed_part_roundtrip() {
    let payload = b"abcabcabc".repeat(10_000);
    let mut writer = KeyStorePackageWriter::new(
        Cursor::new(Vec::new()),
        model_keystore(Compression::Deflate),
        full_context(),
    )
    .unwrap();
    let mut part = writer.add_part(MODEL_PATH).unwrap();
    for chunk in payload.chunks(4096) {
        part.write_all(chunk).unwrap();
    }
    part.finish().unwrap();
    let (cursor, keystore) = writer.close().unwrap();
    assert!(keystore.resource_data()[0].is_compressed());

    let package = cursor.into_inner();
    assert!(read_entry(&package, "3D/model.bin").len() < payload.len() / 10);

    let mut reader = KeyStorePackageReader::open(Cursor::new(package), full_context()).unwrap();
    let mut stream = reader.open_part(MODEL_PATH).unwrap().unwrap();
    assert!(stream.is_encrypted());
    let mut plain = Vec::new();
    stream.read_to_end(&mut plain).unwrap();
    assert_eq!(plain, payload);
}

#[test]
fn test_flipped_tag_fails_load() {
    let (package, mut keystore) =
        save_package(model_keystore(Compression::None), full_context()).unwrap();

    keystore
        .find_resource_data_mut(MODEL_PATH)
        .unwrap()
        .cek_params
        .tag[0] ^= 0x01;
    let tampered = replace_entry(
        &package,
        "Secure/keystore.xml",
        &write_keystore(&keystore).unwrap(),
    );

    let mut reader = KeyStorePackageReader::open(Cursor::new(tampered), full_context()).unwrap();
    let err = reader.read_part(MODEL_PATH).unwrap_err();
    assert!(
        matches!(err, Error::CryptoOperationAborted(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_flipped_ciphertext_fails_load() {
    let (package, _) = save_package(model_keystore(Compression::None), full_context()).unwrap();
    let mut raw = read_entry(&package, "3D/model.bin");
    raw[3] ^= 0x80;
    let tampered = replace_entry(&package, "3D/model.bin", &raw);

    let mut reader = KeyStorePackageReader::open(Cursor::new(tampered), full_context()).unwrap();
    assert!(matches!(
        reader.read_part(MODEL_PATH),
        Err(Error::CryptoOperationAborted(_))
    ));
}

#[test]
fn test_flipped_compressed_ciphertext_fails_load() {
    let (package, _) = save_package(model_keystore(Compression::Deflate), full_context()).unwrap();
    let mut raw = read_entry(&package, "3D/model.bin");
    raw[0] ^= 0x80;
    let tampered = replace_entry(&package, "3D/model.bin", &raw);

    let mut reader = KeyStorePackageReader::open(Cursor::new(tampered), full_context()).unwrap();
    let err = reader.read_part(MODEL_PATH).unwrap_err();
    assert!(
        matches!(err, Error::CryptoOperationAborted(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_empty_keystore_adds_no_manifest() {
    let mut writer =
        KeyStorePackageWriter::new(Cursor::new(Vec::new()), KeyStore::new(), SecureContext::new())
            .unwrap();
    writer.write_part("/3D/model.bin", MODEL_BYTES).unwrap();
    let (cursor, _) = writer.close().unwrap();

    let mut package = Package::open(cursor).unwrap();
    assert!(!package.has_file("Secure/keystore.xml"));
    let rels = package.root_relationships().unwrap();
    assert!(rels.iter().all(|r| !r.is_keystore() && r.rel_type != MUST_PRESERVE_REL_TYPE));
    assert_eq!(package.get_file_binary(MODEL_PATH).unwrap(), MODEL_BYTES);
}

#[test]
fn test_manifest_relationships_registered() {
    let (package, _) = save_package(model_keystore(Compression::None), full_context()).unwrap();
    let mut package = Package::open(Cursor::new(package)).unwrap();
    let rels = package.root_relationships().unwrap();

    for rel_type in [KEYSTORE_REL_TYPE_2019_07, MUST_PRESERVE_REL_TYPE] {
        assert!(
            rels.iter()
                .any(|r| r.rel_type == rel_type && r.target == "/Secure/keystore.xml"),
            "missing relationship {rel_type}"
        );
    }
    assert_eq!(
        package.content_type("/Secure/keystore.xml").unwrap().as_deref(),
        Some("application/vnd.ms-package.3dmanufacturing-keystore+xml")
    );
}

#[test]
fn test_open_group_gets_fresh_iv_and_wrapped_key() {
    // Each wrap appends a counter byte, so consecutive wraps differ
    let counter = Arc::new(AtomicU8::new(0));
    let wrap_counter = Arc::clone(&counter);
    let wrapper = FnKeyWrapper::new(
        move |key, _| {
            let mut wrapped: Vec<u8> = key.iter().map(|b| b ^ XOR_OFFSET).collect();
            wrapped.push(wrap_counter.fetch_add(1, Ordering::SeqCst));
            Ok(wrapped)
        },
        |wrapped, _| Ok(wrapped[..wrapped.len() - 1].iter().map(|b| b ^ XOR_OFFSET).collect()),
    );
    let context = SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper("C1", wrapper);

    let (_, first) = save_package(model_keystore(Compression::None), context.clone()).unwrap();
    assert!(first.groups()[0].is_open());
    let (package, second) = save_package(first.clone(), context.clone()).unwrap();

    let iv_before = &first.resource_data()[0].cek_params.iv;
    let iv_after = &second.resource_data()[0].cek_params.iv;
    assert_ne!(iv_before, iv_after);
    assert_ne!(
        first.groups()[0].access_rights[0].cipher_value,
        second.groups()[0].access_rights[0].cipher_value
    );

    let mut reader = KeyStorePackageReader::open(Cursor::new(package), context).unwrap();
    assert_eq!(
        reader.read_part(MODEL_PATH).unwrap().as_deref(),
        Some(MODEL_BYTES)
    );
}

#[test]
fn test_loaded_keystore_resave_draws_fresh_iv() {
    let (package, _) = save_package(model_keystore(Compression::Deflate), full_context()).unwrap();
    let first_ciphertext = read_entry(&package, "3D/model.bin");

    let mut reader = KeyStorePackageReader::open(Cursor::new(package), full_context()).unwrap();
    reader.read_part(MODEL_PATH).unwrap();
    let loaded = reader.into_keystore();
    let group = &loaded.groups()[0];
    assert!(!group.is_open());
    assert!(group.has_key());
    let iv = loaded.resource_data()[0].cek_params.iv.clone();

    // Same plaintext under the same closed-group key must not repeat the keystream
    let (package, resaved) = save_package(loaded, full_context()).unwrap();
    assert_eq!(resaved.groups()[0].key_uuid, "G1");
    assert_ne!(resaved.resource_data()[0].cek_params.iv, iv);
    assert_eq!(resaved.resource_data()[0].cek_params.iv.len(), 12);
    assert_ne!(read_entry(&package, "3D/model.bin"), first_ciphertext);

    let mut reader = KeyStorePackageReader::open(Cursor::new(package), full_context()).unwrap();
    assert_eq!(
        reader.read_part(MODEL_PATH).unwrap().as_deref(),
        Some(MODEL_BYTES)
    );
}

#[test]
fn test_read_all_skips_metadata_and_manifest() {
    let (package, _) = save_package(model_keystore(Compression::None), full_context()).unwrap();
    let mut reader = KeyStorePackageReader::open(Cursor::new(package), full_context()).unwrap();
    let parts = reader.read_all().unwrap();

    let names: Vec<&str> = parts.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["/3D/model.bin", "/Metadata/notes.txt"]);
}
