//! RSA-OAEP key wrapping through a package saved to disk

#![cfg(feature = "crypto")]

mod common;

use common::*;
use lib3mf_securecontent::crypto::{Aes256GcmCipher, RsaOaepKeyWrap, SecureContext};
use lib3mf_securecontent::model::secure_content::{DIGEST_SHA256_URI, MGF1_SHA256_URI};
use lib3mf_securecontent::model::{
    Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore, WrappingAlgorithm,
};
use lib3mf_securecontent::{Error, KeyStorePackageReader, KeyStorePackageWriter};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use std::fs::File;
use tempfile::NamedTempFile;

struct TestKeys {
    private_pem: String,
    public_pem: String,
}

fn generate_keys() -> TestKeys {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    TestKeys {
        private_pem: private_key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
        public_pem: private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap(),
    }
}

fn rsa_keystore(public_pem: &str) -> KeyStore {
    let mut keystore = KeyStore::new();
    keystore
        .add_consumer(Consumer::new("printer-7").with_key_id("K7").with_key_value(public_pem))
        .unwrap();
    let group = keystore.add_resource_data_group();
    keystore
        .add_access_right(
            group,
            "printer-7",
            KEKParams {
                wrapping_algorithm: WrappingAlgorithm::RsaOaep,
                mgf_algorithm: Some(MGF1_SHA256_URI.to_string()),
                digest_method: Some(DIGEST_SHA256_URI.to_string()),
            },
        )
        .unwrap();
    keystore
        .add_resource_data(group, MODEL_PATH, EncryptionAlgorithm::Aes256Gcm, Compression::Deflate)
        .unwrap();
    keystore
}

#[test]
fn test_rsa_wrapped_package_on_disk() {
    let keys = generate_keys();
    let temp = NamedTempFile::new().unwrap();

    // The producer only holds the consumer's public key
    let producer = SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper(
            "printer-7",
            RsaOaepKeyWrap::from_public_key_pem(&keys.public_pem).unwrap(),
        );
    let mut writer =
        KeyStorePackageWriter::new(temp.reopen().unwrap(), rsa_keystore(&keys.public_pem), producer)
            .unwrap();
    writer.write_part(MODEL_PATH, MODEL_BYTES).unwrap();
    let (_, saved) = writer.close().unwrap();
    assert_eq!(saved.groups()[0].access_rights[0].cipher_value.len(), 128);

    let consumer = SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper(
            "printer-7",
            RsaOaepKeyWrap::from_private_key_pem(&keys.private_pem).unwrap(),
        );
    let mut reader = KeyStorePackageReader::open(File::open(temp.path()).unwrap(), consumer).unwrap();
    let loaded = reader.keystore();
    assert_eq!(
        loaded.consumer(0).unwrap().key_value.as_deref(),
        Some(keys.public_pem.trim())
    );
    let kek = &loaded.groups()[0].access_rights[0].kek_params;
    assert_eq!(kek.digest_method.as_deref(), Some(DIGEST_SHA256_URI));
    assert_eq!(
        reader.read_part(MODEL_PATH).unwrap().as_deref(),
        Some(MODEL_BYTES)
    );
}

#[test]
fn test_public_key_cannot_unwrap() {
    let keys = generate_keys();
    let temp = NamedTempFile::new().unwrap();
    let wrap_only = SecureContext::new()
        .with_content_cipher(Aes256GcmCipher::new())
        .with_key_wrapper(
            "printer-7",
            RsaOaepKeyWrap::from_public_key_pem(&keys.public_pem).unwrap(),
        );

    let mut writer = KeyStorePackageWriter::new(
        temp.reopen().unwrap(),
        rsa_keystore(&keys.public_pem),
        wrap_only.clone(),
    )
    .unwrap();
    writer.write_part(MODEL_PATH, MODEL_BYTES).unwrap();
    writer.close().unwrap();

    let mut reader = KeyStorePackageReader::open(File::open(temp.path()).unwrap(), wrap_only).unwrap();
    assert!(matches!(
        reader.read_part(MODEL_PATH),
        Err(Error::CryptoOperationAborted(_))
    ));
}
