//! # lib3mf-securecontent
//!
//! A pure Rust engine for the 3MF Secure Content extension: per-part
//! encryption of OPC (ZIP) packages driven by an embedded keystore manifest.
//!
//! The engine owns the keystore model and the stream plumbing. The actual
//! cryptography is delegated to clients registered in a
//! [`SecureContext`](crypto::SecureContext): one content cipher for part
//! payloads and one key-wrap client per consumer.
//!
//! ## Features
//!
//! - Pure Rust implementation with no unsafe code
//! - Keystore manifest (`Secure/keystore.xml`) parsing and writing
//! - Streaming encryption and decryption with optional zlib compression
//! - Key re-wrapping with stale-value fallback for unavailable consumers
//! - Strict and lenient reading of parts without a usable crypto client
//! - Reference AES-256-GCM and RSA-OAEP clients (feature `crypto`)
//!
//! ## Example
//!
//! ```
//! use lib3mf_securecontent::crypto::{Aes256GcmCipher, FnKeyWrapper, KeyWrapContext, SecureContext};
//! use lib3mf_securecontent::model::{Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore};
//! use lib3mf_securecontent::{KeyStorePackageReader, KeyStorePackageWriter};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let xor = |key: &[u8], _: &KeyWrapContext<'_>| Ok(key.iter().map(|b| b ^ 0x5A).collect());
//! let context = SecureContext::new()
//!     .with_content_cipher(Aes256GcmCipher::new())
//!     .with_key_wrapper("C1", FnKeyWrapper::new(xor, xor));
//!
//! let mut keystore = KeyStore::new();
//! keystore.add_consumer(Consumer::new("C1"))?;
//! let group = keystore.add_resource_data_group();
//! keystore.add_access_right(group, "C1", KEKParams::default())?;
//! keystore.add_resource_data(group, "/3D/model.bin", EncryptionAlgorithm::Aes256Gcm, Compression::None)?;
//!
//! let mut writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore, context.clone())?;
//! writer.write_part("/3D/model.bin", b"vertex data")?;
//! let (cursor, _) = writer.close()?;
//!
//! let mut reader = KeyStorePackageReader::open(Cursor::new(cursor.into_inner()), context)?;
//! assert_eq!(reader.read_part("/3D/model.bin")?.as_deref(), Some(&b"vertex data"[..]));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
mod keystore_reader;
mod keystore_writer;
pub mod model;
pub mod opc;
pub mod parser;
pub mod streaming;
pub mod writer;

pub use config::{ProgressCallback, ProgressIdentifier, ProgressStep, ReaderConfig, WriterConfig};
pub use crypto::SecureContext;
pub use error::{Error, Result, Warning, WarningKind};
pub use keystore_reader::KeyStorePackageReader;
pub use keystore_writer::{KeyStorePackageWriter, SecurePartWriter};
pub use model::KeyStore;
