//! RSA-OAEP key-wrap client
//!
//! Wraps group content keys for one consumer with the consumer's RSA key.
//! Digest and MGF1 hash follow the access right's `kekparams`.

use super::{ClientError, ClientResult, KeyWrapClient, KeyWrapContext};
use crate::model::WrappingAlgorithm;
use crate::model::secure_content::{
    DIGEST_SHA1_URI, DIGEST_SHA256_URI, DIGEST_SHA384_URI, DIGEST_SHA512_URI, MGF1_SHA1_URI,
    MGF1_SHA256_URI, MGF1_SHA384_URI, MGF1_SHA512_URI,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::digest::{Digest, DynDigest};
use sha2::{Sha256, Sha384, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashKind {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashKind {
    fn from_digest_uri(uri: &str) -> ClientResult<Self> {
        match uri {
            DIGEST_SHA1_URI => Ok(HashKind::Sha1),
            DIGEST_SHA256_URI => Ok(HashKind::Sha256),
            DIGEST_SHA384_URI => Ok(HashKind::Sha384),
            DIGEST_SHA512_URI => Ok(HashKind::Sha512),
            other => Err(ClientError::new(format!("unsupported digest method '{}'", other))),
        }
    }

    fn from_mgf_uri(uri: &str) -> ClientResult<Self> {
        match uri {
            MGF1_SHA1_URI => Ok(HashKind::Sha1),
            MGF1_SHA256_URI => Ok(HashKind::Sha256),
            MGF1_SHA384_URI => Ok(HashKind::Sha384),
            MGF1_SHA512_URI => Ok(HashKind::Sha512),
            other => Err(ClientError::new(format!("unsupported MGF algorithm '{}'", other))),
        }
    }
}

fn oaep_with_mgf<D>(mgf: HashKind) -> Oaep
where
    D: 'static + Digest + DynDigest + Send + Sync,
{
    match mgf {
        HashKind::Sha1 => Oaep::new_with_mgf_hash::<D, Sha1>(),
        HashKind::Sha256 => Oaep::new_with_mgf_hash::<D, Sha256>(),
        HashKind::Sha384 => Oaep::new_with_mgf_hash::<D, Sha384>(),
        HashKind::Sha512 => Oaep::new_with_mgf_hash::<D, Sha512>(),
    }
}

/// Build the OAEP padding an access right asks for
///
/// Digest and MGF1 default to SHA-1. `rsa-oaep-mgf1p` always uses MGF1 with SHA-1.
fn padding_for(ctx: &KeyWrapContext<'_>) -> ClientResult<Oaep> {
    let params = ctx.kek_params;
    let digest = match params.digest_method.as_deref() {
        Some(uri) => HashKind::from_digest_uri(uri)?,
        None => HashKind::Sha1,
    };
    let mgf = match (params.wrapping_algorithm, params.mgf_algorithm.as_deref()) {
        (WrappingAlgorithm::RsaOaepMgf1p, _) | (WrappingAlgorithm::RsaOaep, None) => HashKind::Sha1,
        (WrappingAlgorithm::RsaOaep, Some(uri)) => HashKind::from_mgf_uri(uri)?,
    };
    Ok(match digest {
        HashKind::Sha1 => oaep_with_mgf::<Sha1>(mgf),
        HashKind::Sha256 => oaep_with_mgf::<Sha256>(mgf),
        HashKind::Sha384 => oaep_with_mgf::<Sha384>(mgf),
        HashKind::Sha512 => oaep_with_mgf::<Sha512>(mgf),
    })
}

/// RSA-OAEP key-wrap client
///
/// Built from a public key it can only wrap (writing for a recipient); built
/// from a private key it can wrap and unwrap.
#[derive(Debug, Clone)]
pub struct RsaOaepKeyWrap {
    public_key: RsaPublicKey,
    private_key: Option<RsaPrivateKey>,
}

impl RsaOaepKeyWrap {
    /// Create a client from a PKCS#1 PEM private key
    pub fn from_private_key_pem(pem: &str) -> ClientResult<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| ClientError::new(format!("invalid RSA private key: {}", e)))?;
        Ok(Self {
            public_key: RsaPublicKey::from(&private_key),
            private_key: Some(private_key),
        })
    }

    /// Create a wrap-only client from an SPKI PEM public key
    ///
    /// This is the format stored in a consumer's `keyvalue`.
    pub fn from_public_key_pem(pem: &str) -> ClientResult<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| ClientError::new(format!("invalid RSA public key: {}", e)))?;
        Ok(Self {
            public_key,
            private_key: None,
        })
    }
}

impl KeyWrapClient for RsaOaepKeyWrap {
    fn wrap(&self, plain_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> {
        let padding = padding_for(ctx)?;
        let mut rng = rand::rngs::OsRng;
        self.public_key
            .encrypt(&mut rng, padding, plain_key)
            .map_err(|e| ClientError::new(format!("RSA-OAEP encryption failed: {}", e)))
    }

    fn unwrap(&self, cipher_key: &[u8], ctx: &KeyWrapContext<'_>) -> ClientResult<Vec<u8>> {
        let private_key = self.private_key.as_ref().ok_or_else(|| {
            ClientError::new(format!(
                "no private key available for consumer '{}'",
                ctx.consumer.consumer_id
            ))
        })?;
        let padding = padding_for(ctx)?;
        private_key
            .decrypt(padding, cipher_key)
            .map_err(|e| ClientError::new(format!("RSA-OAEP decryption failed: {}", e)))
    }
}
