//! XML writing for secure package parts
//!
//! Serializes the in-memory [`KeyStore`](crate::model::KeyStore) back into
//! the SecureContent keystore manifest.

mod keystore;

pub use keystore::{write_keystore, write_keystore_xml};
