//! Secure Content extension types
//!
//! Records stored in the keystore manifest: consumers, resource data groups,
//! access rights and resource data. Cross references between records are
//! plain indices resolved through [`KeyStore`](super::KeyStore).

use std::fmt;

/// SecureContent namespace (2019/07)
pub const SECURE_CONTENT_NAMESPACE: &str =
    "http://schemas.microsoft.com/3dmanufacturing/securecontent/2019/07";

/// XML encryption namespace used for `xenc:CipherValue`
pub const XML_ENCRYPTION_NAMESPACE: &str = "http://www.w3.org/2001/04/xmlenc#";

/// AES-256-GCM content encryption algorithm URI
pub const AES256_GCM_URI: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

/// RSA-OAEP with MGF1 key wrapping algorithm URI (2001 version)
pub const RSA_OAEP_MGF1P_URI: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

/// RSA-OAEP key wrapping algorithm URI (2009 version)
pub const RSA_OAEP_URI: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";

/// MGF1 with SHA-1
pub const MGF1_SHA1_URI: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";
/// MGF1 with SHA-256
pub const MGF1_SHA256_URI: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha256";
/// MGF1 with SHA-384
pub const MGF1_SHA384_URI: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha384";
/// MGF1 with SHA-512
pub const MGF1_SHA512_URI: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha512";

/// SHA-1 digest method
pub const DIGEST_SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
/// SHA-256 digest method
pub const DIGEST_SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
/// SHA-384 digest method
pub const DIGEST_SHA384_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha384";
/// SHA-512 digest method
pub const DIGEST_SHA512_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

/// Valid MGF algorithms for kekparams
pub(crate) const VALID_MGF_ALGORITHMS: &[&str] = &[
    MGF1_SHA1_URI,
    MGF1_SHA256_URI,
    MGF1_SHA384_URI,
    MGF1_SHA512_URI,
];

/// Valid digest methods for kekparams
pub(crate) const VALID_DIGEST_METHODS: &[&str] = &[
    DIGEST_SHA1_URI,
    DIGEST_SHA256_URI,
    DIGEST_SHA384_URI,
    DIGEST_SHA512_URI,
];

/// Symmetric algorithm used to encrypt a part's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256 in Galois/Counter Mode
    #[default]
    Aes256Gcm,
}

impl EncryptionAlgorithm {
    /// Algorithm URI as written in `cekparams/@encryptionalgorithm`
    pub fn uri(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes256Gcm => AES256_GCM_URI,
        }
    }

    /// Resolve an algorithm from its URI
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            AES256_GCM_URI => Some(EncryptionAlgorithm::Aes256Gcm),
            _ => None,
        }
    }

    /// Content key size in bytes
    pub fn key_size(&self) -> usize {
        match self {
            EncryptionAlgorithm::Aes256Gcm => 32,
        }
    }

    /// Initialization vector size in bytes
    pub fn iv_size(&self) -> usize {
        match self {
            EncryptionAlgorithm::Aes256Gcm => 12,
        }
    }

    /// Authentication tag size in bytes
    pub fn tag_size(&self) -> usize {
        match self {
            EncryptionAlgorithm::Aes256Gcm => 16,
        }
    }
}

/// Asymmetric algorithm used to wrap a group's content key for a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrappingAlgorithm {
    /// RSA-OAEP with MGF1 (SHA-1), 2001 URI
    #[default]
    RsaOaepMgf1p,
    /// RSA-OAEP, 2009 URI, digest/MGF given by the kekparams
    RsaOaep,
}

impl WrappingAlgorithm {
    /// Algorithm URI as written in `kekparams/@wrappingalgorithm`
    pub fn uri(&self) -> &'static str {
        match self {
            WrappingAlgorithm::RsaOaepMgf1p => RSA_OAEP_MGF1P_URI,
            WrappingAlgorithm::RsaOaep => RSA_OAEP_URI,
        }
    }

    /// Resolve an algorithm from its URI
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            RSA_OAEP_MGF1P_URI => Some(WrappingAlgorithm::RsaOaepMgf1p),
            RSA_OAEP_URI => Some(WrappingAlgorithm::RsaOaep),
            _ => None,
        }
    }
}

/// Compression applied to a part's plaintext before encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Stored as-is
    #[default]
    None,
    /// zlib deflate
    Deflate,
}

impl Compression {
    /// Value as written in `cekparams/@compression`
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Deflate => "deflate",
        }
    }

    /// Parse a `cekparams/@compression` value
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Compression::None),
            "deflate" => Some(Compression::Deflate),
            _ => None,
        }
    }
}

/// Consumer information from SecureContent keystore
///
/// Represents an authorized consumer (party) that can unwrap protected content keys.
/// Each consumer has a unique identifier and optional key information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    /// Unique consumer identifier (alphanumeric, human-readable)
    pub consumer_id: String,
    /// Optional key identifier for identifying the KEK
    pub key_id: Option<String>,
    /// Optional public key value in PEM format
    pub key_value: Option<String>,
}

impl Consumer {
    /// Create a consumer with just an identifier
    pub fn new(consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            key_id: None,
            key_value: None,
        }
    }

    /// Set the key identifier
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the public key value (PEM)
    pub fn with_key_value(mut self, key_value: impl Into<String>) -> Self {
        self.key_value = Some(key_value.into());
        self
    }
}

/// Key Encryption Key parameters
///
/// Specifies the algorithm and parameters used to wrap (encrypt) the content key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KEKParams {
    /// Wrapping algorithm
    pub wrapping_algorithm: WrappingAlgorithm,
    /// Optional mask generation function URI
    pub mgf_algorithm: Option<String>,
    /// Optional message digest method URI
    pub digest_method: Option<String>,
}

/// Access right from SecureContent keystore
///
/// One consumer's wrapped copy of a group's content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRight {
    /// Zero-based index of the consumer in the keystore
    pub consumer_index: usize,
    /// Key encryption parameters (wrapping algorithm, MGF, digest)
    pub kek_params: KEKParams,
    /// Wrapped content key, as produced by the consumer's wrap client
    pub cipher_value: Vec<u8>,
    /// Created this session and never successfully wrapped/persisted
    pub(crate) new: bool,
}

impl AccessRight {
    /// Access right loaded from a manifest
    pub(crate) fn loaded(consumer_index: usize, kek_params: KEKParams, cipher_value: Vec<u8>) -> Self {
        Self {
            consumer_index,
            kek_params,
            cipher_value,
            new: false,
        }
    }

    /// Whether this access right was created in this session
    ///
    /// A failed key wrap is fatal for a new access right; existing ones keep
    /// their previous cipher value.
    pub fn is_new(&self) -> bool {
        self.new
    }
}

/// Resource data group from SecureContent keystore
///
/// One symmetric content key plus the access rights of the consumers
/// authorized to obtain it. The raw key lives only in process memory.
#[derive(Clone, PartialEq, Eq)]
pub struct ResourceDataGroup {
    /// UUID identifying the content key
    pub key_uuid: String,
    /// Access rights, one per authorized consumer
    pub access_rights: Vec<AccessRight>,
    key: Vec<u8>,
    open: bool,
}

impl ResourceDataGroup {
    /// Group freshly created with a newly generated key
    pub(crate) fn with_new_key(key_uuid: String, key: Vec<u8>) -> Self {
        Self {
            key_uuid,
            access_rights: Vec::new(),
            key,
            open: true,
        }
    }

    /// Group loaded from a manifest; its key must be unwrapped before use
    pub(crate) fn loaded(key_uuid: String) -> Self {
        Self {
            key_uuid,
            access_rights: Vec::new(),
            key: Vec::new(),
            open: false,
        }
    }

    /// Whether the key was (re)generated this session
    ///
    /// Every access right of an open group is re-wrapped and every member
    /// gets a fresh IV on each write pass.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the raw content key is available in memory
    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Find the access right granted to a consumer
    pub fn find_access_right(&self, consumer_index: usize) -> Option<&AccessRight> {
        self.access_rights
            .iter()
            .find(|ar| ar.consumer_index == consumer_index)
    }

    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
    }
}

impl fmt::Debug for ResourceDataGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDataGroup")
            .field("key_uuid", &self.key_uuid)
            .field("access_rights", &self.access_rights)
            .field("key", &if self.has_key() { "<redacted>" } else { "<none>" })
            .field("open", &self.open)
            .finish()
    }
}

/// Content Encryption Key parameters
///
/// Symmetric algorithm and per-part parameters used to encrypt the resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CEKParams {
    /// Encryption algorithm
    pub encryption_algorithm: EncryptionAlgorithm,
    /// Compression applied before encryption
    pub compression: Compression,
    /// Initialization vector
    pub iv: Vec<u8>,
    /// Authentication tag
    pub tag: Vec<u8>,
    /// Additional authenticated data (may be empty)
    pub aad: Vec<u8>,
}

/// Resource data from SecureContent keystore
///
/// Encryption metadata for exactly one encrypted part of the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    /// Path of the encrypted part in the OPC package (with leading `/`)
    pub path: String,
    /// Index of the owning resource data group
    pub group_index: usize,
    /// Content encryption parameters
    pub cek_params: CEKParams,
}

impl ResourceData {
    /// Whether the part is compressed before encryption
    pub fn is_compressed(&self) -> bool {
        self.cek_params.compression == Compression::Deflate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_uris_roundtrip() {
        assert_eq!(
            EncryptionAlgorithm::from_uri(AES256_GCM_URI),
            Some(EncryptionAlgorithm::Aes256Gcm)
        );
        assert_eq!(
            WrappingAlgorithm::from_uri(RSA_OAEP_URI),
            Some(WrappingAlgorithm::RsaOaep)
        );
        assert_eq!(WrappingAlgorithm::from_uri("http://example.com/rot13"), None);
    }

    #[test]
    fn test_aes_gcm_sizes() {
        let alg = EncryptionAlgorithm::Aes256Gcm;
        assert_eq!(alg.key_size(), 32);
        assert_eq!(alg.iv_size(), 12);
        assert_eq!(alg.tag_size(), 16);
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!(Compression::parse("deflate"), Some(Compression::Deflate));
        assert_eq!(Compression::parse("none"), Some(Compression::None));
        assert_eq!(Compression::parse("zstd"), None);
    }

    #[test]
    fn test_group_debug_redacts_key() {
        let group = ResourceDataGroup::with_new_key("uuid".to_string(), vec![0xAB; 32]);
        let text = format!("{:?}", group);
        assert!(text.contains("<redacted>"));
        assert!(!text.contains("171"));
    }
}
