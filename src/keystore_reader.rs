//! Package reader engine
//!
//! Opens a package, loads its keystore manifest when one is present and
//! decrypts parts on demand. Packages without a manifest read as plaintext.

use crate::config::{ProgressIdentifier, ReaderConfig, report_progress};
use crate::crypto::{SecureContext, unwrap_group_key};
use crate::error::{Error, Result, Warning, WarningKind};
use crate::model::KeyStore;
use crate::opc::{
    ENCRYPTEDFILE_REL_TYPE, KEYSTORE_CONTENT_TYPE, KEYSTORE_PATH, Package, is_package_metadata,
    normalize_path, parse_relationships,
};
use crate::parser::parse_keystore;
use crate::streaming::{PartReader, build_read_pipeline};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek};

/// Reader engine for a secure package
///
/// # Example
///
/// ```no_run
/// use lib3mf_securecontent::crypto::{Aes256GcmCipher, RsaOaepKeyWrap, SecureContext};
/// use lib3mf_securecontent::{KeyStorePackageReader, ReaderConfig};
/// use std::fs::File;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pem = std::fs::read_to_string("consumer.pem")?;
/// let context = SecureContext::new()
///     .with_content_cipher(Aes256GcmCipher::new())
///     .with_key_wrapper("C1", RsaOaepKeyWrap::from_private_key_pem(&pem)?);
///
/// let file = File::open("secure.3mf")?;
/// let config = ReaderConfig::new().with_strict_mode(false);
/// let mut reader = KeyStorePackageReader::open_with_config(file, context, config)?;
/// if let Some(model) = reader.read_part("/3D/3dmodel.model")? {
///     println!("{} bytes", model.len());
/// }
/// for warning in reader.warnings() {
///     eprintln!("{}", warning);
/// }
/// # Ok(())
/// # }
/// ```
pub struct KeyStorePackageReader<R: Read + Seek> {
    package: Package<R>,
    keystore: KeyStore,
    keystore_path: Option<String>,
    context: SecureContext,
    config: ReaderConfig,
    warnings: Vec<Warning>,
    step: usize,
}

impl<R: Read + Seek> KeyStorePackageReader<R> {
    /// Open a package with the default (strict) configuration
    pub fn open(reader: R, context: SecureContext) -> Result<Self> {
        Self::open_with_config(reader, context, ReaderConfig::default())
    }

    /// Open a package and load its keystore manifest
    pub fn open_with_config(reader: R, context: SecureContext, config: ReaderConfig) -> Result<Self> {
        let package = Package::open(reader)?;
        let mut engine = Self {
            package,
            keystore: KeyStore::new(),
            keystore_path: None,
            context,
            config,
            warnings: Vec::new(),
            step: 0,
        };
        report_progress(
            engine.config.progress(),
            &mut engine.step,
            ProgressIdentifier::ReadKeyStore,
        )?;
        engine.load_keystore()?;
        Ok(engine)
    }

    fn load_keystore(&mut self) -> Result<()> {
        let Some(path) = self.discover_keystore_path()? else {
            tracing::debug!("no keystore in package, reading as plaintext");
            return Ok(());
        };

        let xml = self.package.get_file(&path)?;
        let keystore = parse_keystore(&xml)?;

        for resource in keystore.resource_data() {
            if !self.package.has_file(&resource.path) {
                return Err(Error::InvalidSecureContent(format!(
                    "Referenced encrypted file '{}' does not exist in package",
                    resource.path
                )));
            }
        }

        match self.package.content_type(&path)? {
            Some(ref ct) if ct == KEYSTORE_CONTENT_TYPE => {}
            other => self.warn_structure(
                &path,
                format!(
                    "keystore content type is {:?}, expected '{}'",
                    other, KEYSTORE_CONTENT_TYPE
                ),
            ),
        }

        let targets = self.encrypted_file_targets()?;
        for resource in keystore.resource_data() {
            if !targets.contains(normalize_path(&resource.path)) {
                self.warn_structure(
                    &resource.path,
                    "encrypted part has no EncryptedFile relationship",
                );
            }
        }

        tracing::debug!(
            path = %path,
            uuid = %keystore.uuid(),
            consumers = keystore.consumers().len(),
            parts = keystore.resource_data().len(),
            "keystore loaded"
        );
        self.keystore = keystore;
        self.keystore_path = Some(path);
        Ok(())
    }

    fn discover_keystore_path(&mut self) -> Result<Option<String>> {
        if let Some(rel) = self
            .package
            .root_relationships()?
            .into_iter()
            .find(|r| r.is_keystore())
        {
            return Ok(Some(rel.target));
        }

        // Fallback for packages that omit the keystore relationship
        if self.package.has_file(KEYSTORE_PATH) {
            self.warn_structure(KEYSTORE_PATH, "keystore found without a keystore relationship");
            return Ok(Some(KEYSTORE_PATH.to_string()));
        }
        Ok(None)
    }

    /// Targets of EncryptedFile relationships in any `.rels` part
    fn encrypted_file_targets(&mut self) -> Result<HashSet<String>> {
        let mut targets = HashSet::new();
        let rels_parts: Vec<String> = self
            .package
            .file_names()
            .into_iter()
            .filter(|name| name.to_ascii_lowercase().ends_with(".rels"))
            .collect();
        for rels_part in rels_parts {
            let xml = self.package.get_file(&rels_part)?;
            for rel in parse_relationships(&xml, &rels_part)? {
                if rel.rel_type == ENCRYPTEDFILE_REL_TYPE {
                    targets.insert(normalize_path(&rel.target).to_string());
                }
            }
        }
        Ok(targets)
    }

    fn warn_structure(&mut self, path: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(path = %path, "{}", message);
        self.warnings
            .push(Warning::new(WarningKind::PackageStructure, path, message));
    }

    /// Loaded keystore; empty when the package has no manifest
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Take the keystore, including any group keys unwrapped so far
    ///
    /// Passing it to the writer engine re-saves the package without
    /// unwrapping those keys again.
    pub fn into_keystore(self) -> KeyStore {
        self.keystore
    }

    /// Part name of the keystore manifest, if any
    pub fn keystore_path(&self) -> Option<&str> {
        self.keystore_path.as_deref()
    }

    /// Names of all entries in the package
    pub fn part_names(&mut self) -> Vec<String> {
        self.package.file_names()
    }

    /// Whether a part is encrypted
    pub fn is_encrypted(&self, path: &str) -> bool {
        self.keystore.find_resource_data(path).is_some()
    }

    /// Content type declared for a part
    pub fn content_type(&mut self, path: &str) -> Result<Option<String>> {
        self.package.content_type(path)
    }

    /// Non-fatal events recorded so far
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Open a part for reading, decrypting it when it has resource data
    ///
    /// Returns `None` when the part is encrypted, no crypto client can
    /// decrypt it and strict mode is off; a warning is recorded instead.
    /// The tag is verified once the stream has been read to its end.
    pub fn open_part(&mut self, path: &str) -> Result<Option<PartReader<Box<dyn Read + '_>>>> {
        report_progress(
            self.config.progress(),
            &mut self.step,
            ProgressIdentifier::ReadPart,
        )?;

        let Some(resource) = self.keystore.find_resource_data(path).cloned() else {
            let raw = self.package.part_reader(path)?;
            return Ok(Some(PartReader::Plain(raw)));
        };

        let ready = if self.context.has_content_cipher() {
            self.ensure_group_key(resource.group_index)
        } else {
            Err(Error::MissingCryptoClient(format!(
                "no content cipher registered to decrypt '{}'",
                resource.path
            )))
        };
        match ready {
            Ok(()) => {}
            Err(Error::MissingCryptoClient(message)) if !self.config.strict() => {
                tracing::warn!(path = %resource.path, "{}", message);
                self.warnings.push(Warning::new(
                    WarningKind::MissingCryptoClient,
                    resource.path,
                    message,
                ));
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        tracing::debug!(path = %resource.path, compressed = resource.is_compressed(), "decrypting part");
        let raw = self.package.part_reader(path)?;
        let reader = build_read_pipeline(
            raw,
            &resource,
            self.keystore.group(resource.group_index),
            &self.context,
        )?;
        Ok(Some(reader))
    }

    /// Unwrap a group's key once and keep it for the rest of the pass
    fn ensure_group_key(&mut self, group_index: usize) -> Result<()> {
        let group = self
            .keystore
            .group(group_index)
            .ok_or_else(|| Error::GroupNotFound(format!("group index {}", group_index)))?;
        if group.has_key() {
            return Ok(());
        }
        let key = unwrap_group_key(&self.keystore, group_index, &self.context)?;
        if let Some(group) = self.keystore.group_mut(group_index) {
            group.set_key(key);
        }
        Ok(())
    }

    /// Read a whole part into memory
    ///
    /// `None` means the part was skipped, see [`open_part`](Self::open_part).
    pub fn read_part(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.open_part(path)? else {
            return Ok(None);
        };
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(Some(content))
    }

    /// Read every content part of the package
    ///
    /// Relationship parts, `[Content_Types].xml` and the keystore manifest
    /// are left out, as are parts skipped in non-strict mode.
    pub fn read_all(&mut self) -> Result<BTreeMap<String, Vec<u8>>> {
        let keystore_path = self.keystore_path.clone();
        let names: Vec<String> = self
            .package
            .file_names()
            .into_iter()
            .filter(|name| !name.ends_with('/') && !is_package_metadata(name))
            .filter(|name| {
                keystore_path
                    .as_deref()
                    .is_none_or(|ks| normalize_path(ks) != name.as_str())
            })
            .collect();

        let mut parts = BTreeMap::new();
        for name in names {
            if let Some(content) = self.read_part(&name)? {
                parts.insert(format!("/{}", name), content);
            }
        }

        report_progress(self.config.progress(), &mut self.step, ProgressIdentifier::Done)?;
        Ok(parts)
    }
}
