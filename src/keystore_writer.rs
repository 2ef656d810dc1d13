//! Package writer engine
//!
//! Saves a package whose parts are encrypted according to a [`KeyStore`].
//! Construction runs the refresh pass (a fresh IV for every encrypted part,
//! re-wrapped keys for open groups), each
//! [`add_part`](KeyStorePackageWriter::add_part) intercepts the part stream,
//! and [`close`](KeyStorePackageWriter::close) emits the keystore manifest with
//! its relationships.
//!
//! # Example
//!
//! ```
//! use lib3mf_securecontent::crypto::{Aes256GcmCipher, FnKeyWrapper, KeyWrapContext, SecureContext};
//! use lib3mf_securecontent::model::{Compression, Consumer, EncryptionAlgorithm, KEKParams, KeyStore};
//! use lib3mf_securecontent::KeyStorePackageWriter;
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut keystore = KeyStore::new();
//! keystore.add_consumer(Consumer::new("C1"))?;
//! let group = keystore.add_resource_data_group();
//! keystore.add_access_right(group, "C1", KEKParams::default())?;
//! keystore.add_resource_data(group, "/3D/model.bin", EncryptionAlgorithm::Aes256Gcm, Compression::None)?;
//!
//! let xor = |key: &[u8], _: &KeyWrapContext<'_>| Ok(key.iter().map(|b| b ^ 0x5A).collect());
//! let context = SecureContext::new()
//!     .with_content_cipher(Aes256GcmCipher::new())
//!     .with_key_wrapper("C1", FnKeyWrapper::new(xor, xor));
//!
//! let mut writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore, context)?;
//! writer.write_part("/3D/model.bin", b"secret geometry")?;
//! let (cursor, keystore) = writer.close()?;
//! assert!(!cursor.into_inner().is_empty());
//! assert_eq!(keystore.resource_data()[0].cek_params.tag.len(), 16);
//! # Ok(())
//! # }
//! ```

use crate::config::{ProgressIdentifier, WriterConfig, report_progress};
use crate::crypto::{
    ContentEncryptionParams, SecureContext, check_size, random_bytes, unwrap_group_key, wrap_for,
};
use crate::error::{Error, Result, Warning, WarningKind};
use crate::model::KeyStore;
use crate::opc::{
    ENCRYPTEDFILE_REL_TYPE, KEYSTORE_CONTENT_TYPE, KEYSTORE_PATH, KEYSTORE_REL_TYPE_2019_07,
    MUST_PRESERVE_REL_TYPE, PackageWriter, PartStream, is_package_metadata, normalize_path,
};
use crate::streaming::{PartWriter, build_write_pipeline};
use crate::writer::write_keystore;
use std::collections::BTreeSet;
use std::io::{self, Seek, Write};

/// Writer engine for a secure package
pub struct KeyStorePackageWriter<W: Write + Seek> {
    package: PackageWriter<W>,
    keystore: KeyStore,
    context: SecureContext,
    config: WriterConfig,
    // Resource data paths (without leading '/') whose part was fully written
    written: BTreeSet<String>,
    warnings: Vec<Warning>,
    step: usize,
}

impl<W: Write + Seek> KeyStorePackageWriter<W> {
    /// Start a save pass with the default configuration
    pub fn new(writer: W, keystore: KeyStore, context: SecureContext) -> Result<Self> {
        Self::with_config(writer, keystore, context, WriterConfig::default())
    }

    /// Start a save pass
    ///
    /// Runs the refresh pass before any part is written. Fails with
    /// `MissingDekContext` when the keystore holds resource data and no
    /// content cipher is registered.
    pub fn with_config(
        writer: W,
        keystore: KeyStore,
        context: SecureContext,
        config: WriterConfig,
    ) -> Result<Self> {
        let mut engine = Self {
            package: PackageWriter::new(writer),
            keystore,
            context,
            config,
            written: BTreeSet::new(),
            warnings: Vec::new(),
            step: 0,
        };
        engine.refresh()?;
        Ok(engine)
    }

    fn refresh(&mut self) -> Result<()> {
        if let Some(first) = self.keystore.resource_data().first()
            && !self.context.has_content_cipher()
        {
            return Err(Error::MissingDekContext(first.path.clone()));
        }

        for group_index in 0..self.keystore.groups().len() {
            self.refresh_group(group_index)?;
        }

        let Some(cipher) = self.context.content_cipher() else {
            return Ok(());
        };
        for resource in self.keystore.resource_data() {
            let group = self.keystore.group(resource.group_index).ok_or_else(|| {
                Error::GroupNotFound(format!(
                    "group index {} for '{}'",
                    resource.group_index, resource.path
                ))
            })?;
            let cek = &resource.cek_params;
            let params = ContentEncryptionParams::for_encryption(
                cek.encryption_algorithm,
                group.key(),
                &cek.iv,
                &cek.aad,
                &resource.path,
                &group.key_uuid,
            )?;
            cipher.prepare(&params).map_err(|e| {
                Error::CryptoOperationAborted(format!(
                    "content cipher rejected parameters of '{}': {}",
                    resource.path, e
                ))
            })?;
        }
        Ok(())
    }

    fn refresh_group(&mut self, group_index: usize) -> Result<()> {
        let members: Vec<usize> = self.keystore.group_members(group_index).collect();
        let Some(group) = self.keystore.group(group_index) else {
            return Ok(());
        };
        let open = group.is_open();
        let has_new = group.access_rights.iter().any(|ar| ar.is_new());
        if members.is_empty() && !open && !has_new {
            return Ok(());
        }

        if !group.has_key() {
            // Closed group loaded without its key
            let key = unwrap_group_key(&self.keystore, group_index, &self.context)?;
            if let Some(group) = self.keystore.group_mut(group_index) {
                group.set_key(key);
            }
        }

        self.rewrap_access_rights(group_index, open)?;

        for index in members {
            let resource = &mut self.keystore.resource_data_mut()[index];
            let cek = &mut resource.cek_params;
            let iv_size = cek.encryption_algorithm.iv_size();
            if !cek.iv.is_empty() {
                check_size("IV", &resource.path, iv_size, cek.iv.len())?;
            }
            // Every member is re-encrypted in this pass, so an IV is never reused under its key
            cek.iv = random_bytes(iv_size);
        }
        Ok(())
    }

    fn rewrap_access_rights(&mut self, group_index: usize, open: bool) -> Result<()> {
        let Some(group) = self.keystore.group(group_index) else {
            return Ok(());
        };
        let key = group.key().to_vec();
        let key_uuid = group.key_uuid.clone();

        for ar_index in 0..group.access_rights.len() {
            let Some(access_right) = self
                .keystore
                .group(group_index)
                .and_then(|g| g.access_rights.get(ar_index))
            else {
                continue;
            };
            if !open && !access_right.is_new() {
                continue;
            }
            let is_new = access_right.is_new();
            let consumer_index = access_right.consumer_index;

            match wrap_for(&self.keystore, &self.context, access_right, &key, &key_uuid) {
                Ok(cipher_value) => {
                    if let Some(group) = self.keystore.group_mut(group_index) {
                        group.access_rights[ar_index].cipher_value = cipher_value;
                    }
                }
                Err(err @ (Error::MissingCryptoClient(_) | Error::CryptoOperationAborted(_)))
                    if !is_new =>
                {
                    let consumer_id = self
                        .keystore
                        .consumer(consumer_index)
                        .map(|c| c.consumer_id.clone())
                        .unwrap_or_default();
                    tracing::warn!(
                        consumer = %consumer_id,
                        key_uuid = %key_uuid,
                        error = %err,
                        "key re-wrap failed, keeping previous cipher value"
                    );
                    self.warnings.push(Warning::new(
                        WarningKind::StaleAccessRight,
                        consumer_id,
                        err.to_string(),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Start writing a part
    ///
    /// Parts bound to resource data are encrypted (and compressed when
    /// flagged) on the way into the package; other parts pass through.
    pub fn add_part(&mut self, path: &str) -> Result<SecurePartWriter<'_, W>> {
        report_progress(
            self.config.progress(),
            &mut self.step,
            ProgressIdentifier::WritePart,
        )?;
        if is_package_metadata(path) || normalize_path(path) == normalize_path(KEYSTORE_PATH) {
            return Err(Error::InvalidFormat(format!(
                "Part name '{}' is reserved for package metadata",
                path
            )));
        }

        let Some(resource) = self.keystore.find_resource_data(path).cloned() else {
            let stream = self.package.add_part(path)?;
            return Ok(SecurePartWriter {
                pipeline: PartWriter::Plain(stream),
                keystore: &mut self.keystore,
                written: &mut self.written,
                path: path.to_string(),
            });
        };

        tracing::debug!(path = %resource.path, compressed = resource.is_compressed(), "encrypting part");
        let stream = self.package.add_stored_part(path)?;
        let pipeline = build_write_pipeline(
            stream,
            &resource,
            self.keystore.group(resource.group_index),
            &self.context,
        )?;
        Ok(SecurePartWriter {
            pipeline,
            keystore: &mut self.keystore,
            written: &mut self.written,
            path: resource.path,
        })
    }

    /// Write a whole part from memory
    pub fn write_part(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut part = self.add_part(path)?;
        part.write_all(data)?;
        part.finish()
    }

    /// Declare a content type for an extension
    pub fn add_content_type_default(&mut self, extension: &str, content_type: &str) {
        self.package.add_content_type_default(extension, content_type);
    }

    /// Declare a content type for one part
    pub fn add_content_type_override(&mut self, path: &str, content_type: &str) {
        self.package.add_content_type_override(path, content_type);
    }

    /// Add a package-level relationship, returning its id
    pub fn add_root_relationship(&mut self, rel_type: &str, target: &str) -> String {
        self.package.add_root_relationship(rel_type, target)
    }

    /// Add a relationship sourced at `part`, returning its id
    pub fn add_part_relationship(&mut self, part: &str, rel_type: &str, target: &str) -> String {
        self.package.add_part_relationship(part, rel_type, target)
    }

    /// Keystore as refreshed for this pass
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Non-fatal events recorded so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Write the manifest and close the package
    ///
    /// Returns the underlying writer and the keystore carrying the final IVs,
    /// tags and cipher values. An empty keystore adds nothing to the package.
    pub fn close(mut self) -> Result<(W, KeyStore)> {
        let emit_manifest = !self.keystore.is_empty();
        if emit_manifest {
            if let Some(missing) = self
                .keystore
                .resource_data()
                .iter()
                .find(|rd| !self.written.contains(normalize_path(&rd.path)))
            {
                return Err(Error::InvalidSecureContent(format!(
                    "No part was written for resource data '{}'",
                    missing.path
                )));
            }

            report_progress(
                self.config.progress(),
                &mut self.step,
                ProgressIdentifier::WriteKeyStore,
            )?;
        }

        // Last cancellation point; nothing of the manifest is in the archive yet
        report_progress(self.config.progress(), &mut self.step, ProgressIdentifier::Done)?;

        if emit_manifest {
            for resource in self.keystore.resource_data() {
                self.package
                    .add_root_relationship(ENCRYPTEDFILE_REL_TYPE, &resource.path);
            }

            let manifest = write_keystore(&self.keystore)?;
            self.package.add_part(KEYSTORE_PATH)?.write_all(&manifest)?;
            self.package
                .add_content_type_override(KEYSTORE_PATH, KEYSTORE_CONTENT_TYPE);
            self.package
                .add_root_relationship(KEYSTORE_REL_TYPE_2019_07, KEYSTORE_PATH);
            self.package
                .add_root_relationship(MUST_PRESERVE_REL_TYPE, KEYSTORE_PATH);

            tracing::debug!(
                uuid = %self.keystore.uuid(),
                parts = self.keystore.resource_data().len(),
                "keystore written"
            );

            // Persisted now; later failures fall back to these values
            for index in 0..self.keystore.groups().len() {
                if let Some(group) = self.keystore.group_mut(index) {
                    for access_right in &mut group.access_rights {
                        if !access_right.cipher_value.is_empty() {
                            access_right.new = false;
                        }
                    }
                }
            }
        }

        let writer = self.package.finish()?;
        Ok((writer, self.keystore))
    }
}

/// Stream of one part being written through the engine
///
/// [`finish`](SecurePartWriter::finish) must be called: it flushes the
/// pipeline and records the authentication tag. A part dropped without it
/// makes [`KeyStorePackageWriter::close`] fail.
pub struct SecurePartWriter<'a, W: Write + Seek> {
    pipeline: PartWriter<PartStream<'a, W>>,
    keystore: &'a mut KeyStore,
    written: &'a mut BTreeSet<String>,
    path: String,
}

impl<W: Write + Seek> SecurePartWriter<'_, W> {
    /// Whether this part is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.pipeline.is_encrypted()
    }

    /// Flush every layer and store the part's tag in the keystore
    pub fn finish(self) -> Result<()> {
        let SecurePartWriter {
            pipeline,
            keystore,
            written,
            path,
        } = self;
        let (_, tag) = pipeline.finish()?;
        let Some(tag) = tag else {
            return Ok(());
        };
        let resource = keystore
            .find_resource_data_mut(&path)
            .ok_or_else(|| Error::InvalidSecureContent(format!("resource data '{}'", path)))?;
        check_size(
            "tag",
            &path,
            resource.cek_params.encryption_algorithm.tag_size(),
            tag.len(),
        )?;
        resource.cek_params.tag = tag;
        written.insert(normalize_path(&path).to_string());
        tracing::debug!(path = %path, "encrypted part finalized");
        Ok(())
    }
}

impl<W: Write + Seek> Write for SecurePartWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipeline.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipeline.flush()
    }
}

#[cfg(all(test, feature = "crypto"))]
mod tests {
    use super::*;
    use crate::crypto::{Aes256GcmCipher, ClientError, FnKeyWrapper};
    use crate::model::{Compression, Consumer, EncryptionAlgorithm, KEKParams};
    use std::io::Cursor;

    fn xor_wrapper() -> FnKeyWrapper {
        FnKeyWrapper::new(
            |key, _| Ok(key.iter().map(|b| b ^ 0x5A).collect()),
            |key, _| Ok(key.iter().map(|b| b ^ 0x5A).collect()),
        )
    }

    fn context() -> SecureContext {
        SecureContext::new()
            .with_content_cipher(Aes256GcmCipher::new())
            .with_key_wrapper("C1", xor_wrapper())
    }

    fn keystore() -> KeyStore {
        let mut ks = KeyStore::new();
        ks.add_consumer(Consumer::new("C1")).unwrap();
        let g = ks.add_resource_data_group();
        ks.add_access_right(g, "C1", KEKParams::default()).unwrap();
        ks.add_resource_data(g, "/3D/model.bin", EncryptionAlgorithm::Aes256Gcm, Compression::None)
            .unwrap();
        ks
    }

    #[test]
    fn test_refresh_assigns_iv_and_wraps_key() {
        let writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(), context()).unwrap();
        let ks = writer.keystore();
        assert_eq!(ks.resource_data()[0].cek_params.iv.len(), 12);
        let group = &ks.groups()[0];
        let expected: Vec<u8> = group.key().iter().map(|b| b ^ 0x5A).collect();
        assert_eq!(group.access_rights[0].cipher_value, expected);
    }

    #[test]
    fn test_missing_content_cipher() {
        let ctx = SecureContext::new().with_key_wrapper("C1", xor_wrapper());
        let result = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(), ctx);
        assert!(matches!(result, Err(Error::MissingDekContext(_))));
    }

    #[test]
    fn test_new_access_right_wrap_failure_is_fatal() {
        let refusing = FnKeyWrapper::new(
            |_, _| Err(ClientError::new("offline")),
            |_, _| Err(ClientError::new("offline")),
        );
        let ctx = SecureContext::new()
            .with_content_cipher(Aes256GcmCipher::new())
            .with_key_wrapper("C1", refusing);
        let result = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(), ctx);
        assert!(matches!(result, Err(Error::CryptoOperationAborted(_))));
    }

    #[test]
    fn test_unwritten_resource_data_fails_close() {
        let writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(), context()).unwrap();
        assert!(matches!(
            writer.close(),
            Err(Error::InvalidSecureContent(_))
        ));
    }

    #[test]
    fn test_reserved_part_names() {
        let mut writer =
            KeyStorePackageWriter::new(Cursor::new(Vec::new()), KeyStore::new(), SecureContext::new())
                .unwrap();
        assert!(writer.add_part("/Secure/keystore.xml").is_err());
        assert!(writer.add_part("/_rels/.rels").is_err());
    }

    #[test]
    fn test_close_sets_tag_and_clears_new_flag() {
        let mut writer = KeyStorePackageWriter::new(Cursor::new(Vec::new()), keystore(), context()).unwrap();
        let mut part = writer.add_part("3D/model.bin").unwrap();
        assert!(part.is_encrypted());
        part.write_all(b"payload").unwrap();
        part.finish().unwrap();
        let (_, ks) = writer.close().unwrap();
        assert_eq!(ks.resource_data()[0].cek_params.tag.len(), 16);
        assert!(!ks.groups()[0].access_rights[0].is_new());
    }
}
