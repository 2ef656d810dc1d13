//! Crypto client interfaces and registry
//!
//! The engine never encrypts or wraps anything itself. Applications register
//! one [`ContentCipher`] for part payloads and one [`KeyWrapClient`] per
//! consumer id in a [`SecureContext`], which is handed to the reader or
//! writer engine.
//!
//! With the `crypto` feature enabled, [`Aes256GcmCipher`] and
//! [`RsaOaepKeyWrap`] provide ready-made clients.

#[cfg(feature = "crypto")]
mod aes_gcm;
#[cfg(feature = "crypto")]
mod rsa_oaep;

#[cfg(feature = "crypto")]
pub use aes_gcm::Aes256GcmCipher;
#[cfg(feature = "crypto")]
pub use rsa_oaep::RsaOaepKeyWrap;

use crate::error::{Error, Result};
use crate::model::{AccessRight, Consumer, EncryptionAlgorithm, KEKParams, KeyStore};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an external crypto client
///
/// The engine maps it to [`Error::CryptoOperationAborted`], except for
/// re-wrapping an existing access right on save, where the old cipher value
/// is kept instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ClientError(pub String);

impl ClientError {
    /// Create a client error from a message
    pub fn new(message: impl Into<String>) -> Self {
        ClientError(message.into())
    }
}

/// Result type returned by crypto clients
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Context handed to a key-wrap client for one access right
#[derive(Debug, Clone, Copy)]
pub struct KeyWrapContext<'a> {
    /// Consumer the key is wrapped for
    pub consumer: &'a Consumer,
    /// Wrapping parameters of the access right
    pub kek_params: &'a KEKParams,
    /// UUID of the group whose key is wrapped
    pub key_uuid: &'a str,
}

/// Key-wrap client for one consumer
///
/// `wrap` encrypts a group's raw content key for the consumer, `unwrap`
/// recovers it from an access right's cipher value.
pub trait KeyWrapClient: Send + Sync {
    /// Wrap a raw content key
    fn wrap(&self, plain_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>>;

    /// Unwrap a cipher value back to the raw content key
    fn unwrap(&self, cipher_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>>;
}

type WrapFn = dyn Fn(&[u8], &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> + Send + Sync;

/// Key-wrap client built from a pair of closures
///
/// Any state the closures need is captured by them.
///
/// # Example
///
/// ```
/// use lib3mf_securecontent::crypto::{FnKeyWrapper, KeyWrapContext};
///
/// let xor = |key: &[u8], _: &KeyWrapContext<'_>| Ok(key.iter().map(|b| b ^ 0x5A).collect());
/// let client = FnKeyWrapper::new(xor, xor);
/// # let _ = client;
/// ```
pub struct FnKeyWrapper {
    wrap: Box<WrapFn>,
    unwrap: Box<WrapFn>,
}

impl FnKeyWrapper {
    /// Create a client from wrap and unwrap closures
    pub fn new<W, U>(wrap: W, unwrap: U) -> Self
    where
        W: Fn(&[u8], &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> + Send + Sync + 'static,
        U: Fn(&[u8], &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            wrap: Box::new(wrap),
            unwrap: Box::new(unwrap),
        }
    }
}

impl KeyWrapClient for FnKeyWrapper {
    fn wrap(&self, plain_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> {
        (self.wrap)(plain_key, ctx)
    }

    fn unwrap(&self, cipher_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> {
        (self.unwrap)(cipher_key, ctx)
    }
}

impl fmt::Debug for FnKeyWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnKeyWrapper")
    }
}

/// Direction of a content cipher session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    /// Encrypt and produce a tag
    Encrypt,
    /// Decrypt and verify the stored tag
    Decrypt,
}

/// Parameters of one part's content encryption
///
/// Buffer sizes are checked against the algorithm when the parameters are
/// built, so clients can rely on them.
#[derive(Clone)]
pub struct ContentEncryptionParams {
    /// Content algorithm
    pub algorithm: EncryptionAlgorithm,
    /// Raw content key of the part's group
    pub key: Vec<u8>,
    /// Initialization vector
    pub iv: Vec<u8>,
    /// Authentication tag (empty when encrypting)
    pub tag: Vec<u8>,
    /// Additional authenticated data
    pub aad: Vec<u8>,
    /// Part path
    pub path: String,
    /// UUID of the part's group
    pub key_uuid: String,
}

impl ContentEncryptionParams {
    /// Build parameters for encrypting a part; the tag is left empty
    pub(crate) fn for_encryption(
        algorithm: EncryptionAlgorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        path: &str,
        key_uuid: &str,
    ) -> Result<Self> {
        check_size("key", path, algorithm.key_size(), key.len())?;
        check_size("IV", path, algorithm.iv_size(), iv.len())?;
        Ok(Self {
            algorithm,
            key: key.to_vec(),
            iv: iv.to_vec(),
            tag: Vec::new(),
            aad: aad.to_vec(),
            path: path.to_string(),
            key_uuid: key_uuid.to_string(),
        })
    }

    /// Build parameters for decrypting a part, including its stored tag
    pub(crate) fn for_decryption(
        algorithm: EncryptionAlgorithm,
        key: &[u8],
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
        path: &str,
        key_uuid: &str,
    ) -> Result<Self> {
        check_size("tag", path, algorithm.tag_size(), tag.len())?;
        let mut params = Self::for_encryption(algorithm, key, iv, aad, path, key_uuid)?;
        params.tag = tag.to_vec();
        Ok(params)
    }
}

impl fmt::Debug for ContentEncryptionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentEncryptionParams")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .field("iv", &self.iv)
            .field("tag", &self.tag)
            .field("aad", &self.aad)
            .field("path", &self.path)
            .field("key_uuid", &self.key_uuid)
            .finish()
    }
}

pub(crate) fn check_size(what: &'static str, path: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidBufferSize {
            what,
            path: path.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Content encryption/decryption client
///
/// A single instance serves every part of a pass. Each part gets its own
/// [`ContentCipherSession`], so the payload streams through in bounded
/// chunks.
pub trait ContentCipher: Send + Sync {
    /// Validate parameters before any byte of a part is streamed
    ///
    /// Called once per encrypted part during the writer's refresh pass. It
    /// must not be used to derive a tag.
    fn prepare(&self, params: &ContentEncryptionParams) -> ClientResult<()> {
        let _ = params;
        Ok(())
    }

    /// Start a session for one part
    fn start(
        &self,
        params: &ContentEncryptionParams,
        direction: CipherDirection,
    ) -> ClientResult<Box<dyn ContentCipherSession>>;
}

/// Streaming state for one part
pub trait ContentCipherSession: Send {
    /// Transform `input`, appending the result to `output`
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> ClientResult<()>;

    /// Flush remaining bytes into `output`
    ///
    /// Returns the authentication tag when encrypting. When decrypting the
    /// stored tag is verified and `None` is returned; a mismatch is an error.
    fn finish(self: Box<Self>, output: &mut Vec<u8>) -> ClientResult<Option<Vec<u8>>>;
}

/// Crypto client registry of one engine instance
///
/// Holds the active content cipher and the key-wrap clients keyed by
/// consumer id. Cloning shares the registered clients.
#[derive(Clone, Default)]
pub struct SecureContext {
    content_cipher: Option<Arc<dyn ContentCipher>>,
    key_wrappers: BTreeMap<String, Arc<dyn KeyWrapClient>>,
}

impl SecureContext {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content cipher (builder style)
    pub fn with_content_cipher(mut self, cipher: impl ContentCipher + 'static) -> Self {
        self.set_content_cipher(Arc::new(cipher));
        self
    }

    /// Replace the active content cipher
    pub fn set_content_cipher(&mut self, cipher: Arc<dyn ContentCipher>) {
        self.content_cipher = Some(cipher);
    }

    /// Register a key-wrap client for a consumer (builder style)
    pub fn with_key_wrapper(
        mut self,
        consumer_id: impl Into<String>,
        client: impl KeyWrapClient + 'static,
    ) -> Self {
        self.register_key_wrapper(consumer_id, Arc::new(client));
        self
    }

    /// Register or replace the key-wrap client of a consumer
    pub fn register_key_wrapper(
        &mut self,
        consumer_id: impl Into<String>,
        client: Arc<dyn KeyWrapClient>,
    ) {
        self.key_wrappers.insert(consumer_id.into(), client);
    }

    /// Whether a content cipher is registered
    pub fn has_content_cipher(&self) -> bool {
        self.content_cipher.is_some()
    }

    /// The active content cipher
    pub fn content_cipher(&self) -> Option<&dyn ContentCipher> {
        self.content_cipher.as_deref()
    }

    /// Key-wrap client registered for a consumer
    pub fn key_wrapper(&self, consumer_id: &str) -> Option<&dyn KeyWrapClient> {
        self.key_wrappers.get(consumer_id).map(|c| c.as_ref())
    }
}

impl fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureContext")
            .field("content_cipher", &self.content_cipher.is_some())
            .field("key_wrappers", &self.key_wrappers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fill a buffer of `len` bytes from the OS random source
pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Wrap a group key for one access right
pub(crate) fn wrap_for(
    keystore: &KeyStore,
    context: &SecureContext,
    access_right: &AccessRight,
    key: &[u8],
    key_uuid: &str,
) -> Result<Vec<u8>> {
    let consumer = keystore
        .consumer(access_right.consumer_index)
        .ok_or_else(|| Error::ConsumerNotFound(format!("index {}", access_right.consumer_index)))?;
    let client = context.key_wrapper(&consumer.consumer_id).ok_or_else(|| {
        Error::MissingCryptoClient(format!(
            "no key-wrap client registered for consumer '{}'",
            consumer.consumer_id
        ))
    })?;
    let ctx = KeyWrapContext {
        consumer,
        kek_params: &access_right.kek_params,
        key_uuid,
    };
    client.wrap(key, &ctx).map_err(|e| {
        Error::CryptoOperationAborted(format!(
            "key wrap for consumer '{}' failed: {}",
            consumer.consumer_id, e
        ))
    })
}

/// Recover the raw key of a group through the first consumer with a registered client
pub(crate) fn unwrap_group_key(
    keystore: &KeyStore,
    group_index: usize,
    context: &SecureContext,
) -> Result<Vec<u8>> {
    let group = keystore
        .group(group_index)
        .ok_or_else(|| Error::GroupNotFound(format!("group index {}", group_index)))?;

    for access_right in &group.access_rights {
        let Some(consumer) = keystore.consumer(access_right.consumer_index) else {
            continue;
        };
        let Some(client) = context.key_wrapper(&consumer.consumer_id) else {
            continue;
        };
        tracing::debug!(consumer = %consumer.consumer_id, key_uuid = %group.key_uuid, "unwrapping group key");
        let ctx = KeyWrapContext {
            consumer,
            kek_params: &access_right.kek_params,
            key_uuid: &group.key_uuid,
        };
        let key = client
            .unwrap(&access_right.cipher_value, &ctx)
            .map_err(|e| {
                Error::CryptoOperationAborted(format!(
                    "key unwrap for consumer '{}' failed: {}",
                    consumer.consumer_id, e
                ))
            })?;
        check_size(
            "key",
            &group.key_uuid,
            EncryptionAlgorithm::Aes256Gcm.key_size(),
            key.len(),
        )?;
        return Ok(key);
    }

    Err(Error::MissingCryptoClient(format!(
        "no key-wrap client registered for any consumer of group '{}'",
        group.key_uuid
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Consumer;

    fn xor_wrapper(offset: u8) -> FnKeyWrapper {
        FnKeyWrapper::new(
            move |key, _| Ok(key.iter().map(|b| b ^ offset).collect()),
            move |key, _| Ok(key.iter().map(|b| b ^ offset).collect()),
        )
    }

    fn keystore() -> (KeyStore, usize) {
        let mut ks = KeyStore::new();
        ks.add_consumer(Consumer::new("C1")).unwrap();
        ks.add_consumer(Consumer::new("C2")).unwrap();
        let g = ks.add_resource_data_group_with_key("G1", vec![7u8; 32]);
        ks.add_access_right(g, "C1", KEKParams::default()).unwrap();
        ks.add_access_right(g, "C2", KEKParams::default()).unwrap();
        for ar in &mut ks.group_mut(g).unwrap().access_rights {
            ar.cipher_value = vec![7u8 ^ 0x33; 32];
        }
        (ks, g)
    }

    #[test]
    fn test_unwrap_uses_registered_consumer() {
        let (ks, g) = keystore();
        let ctx = SecureContext::new().with_key_wrapper("C2", xor_wrapper(0x33));
        assert_eq!(unwrap_group_key(&ks, g, &ctx).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn test_unwrap_without_client() {
        let (ks, g) = keystore();
        let ctx = SecureContext::new().with_key_wrapper("other", xor_wrapper(0x33));
        assert!(matches!(
            unwrap_group_key(&ks, g, &ctx),
            Err(Error::MissingCryptoClient(_))
        ));
    }

    #[test]
    fn test_unwrap_client_rejects() {
        let (ks, g) = keystore();
        let refusing = FnKeyWrapper::new(
            |_, _| Err(ClientError::new("declined")),
            |_, _| Err(ClientError::new("declined")),
        );
        let ctx = SecureContext::new().with_key_wrapper("C1", refusing);
        let err = unwrap_group_key(&ks, g, &ctx).unwrap_err();
        assert!(matches!(err, Error::CryptoOperationAborted(ref m) if m.contains("declined")));
    }

    #[test]
    fn test_unwrap_wrong_key_length() {
        let (ks, g) = keystore();
        let short = FnKeyWrapper::new(|k, _| Ok(k.to_vec()), |_, _| Ok(vec![1, 2, 3]));
        let ctx = SecureContext::new().with_key_wrapper("C1", short);
        assert!(matches!(
            unwrap_group_key(&ks, g, &ctx),
            Err(Error::InvalidBufferSize { what: "key", expected: 32, actual: 3, .. })
        ));
    }

    #[test]
    fn test_params_reject_short_iv() {
        let err = ContentEncryptionParams::for_encryption(
            EncryptionAlgorithm::Aes256Gcm,
            &[0u8; 32],
            &[0u8; 8],
            &[],
            "/3D/model.bin",
            "G1",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidBufferSize { what: "IV", actual: 8, .. }));
    }

    #[test]
    fn test_params_debug_redacts_key() {
        let params = ContentEncryptionParams::for_encryption(
            EncryptionAlgorithm::Aes256Gcm,
            &[0xEE; 32],
            &[0u8; 12],
            &[],
            "/a.bin",
            "G1",
        )
        .unwrap();
        assert!(format!("{:?}", params).contains("<redacted>"));
    }

    #[test]
    fn test_random_bytes_length() {
        let a = random_bytes(12);
        let b = random_bytes(12);
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
