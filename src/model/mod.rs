//! Keystore data model

mod keystore;
pub mod secure_content;

pub use keystore::KeyStore;
pub use secure_content::{
    AccessRight, CEKParams, Compression, Consumer, EncryptionAlgorithm, KEKParams, ResourceData,
    ResourceDataGroup, WrappingAlgorithm,
};
