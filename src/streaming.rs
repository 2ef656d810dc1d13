//! Stream pipeline for encrypted parts
//!
//! Wraps a raw part stream into the chain a part's resource data asks for.
//! On write, plaintext goes through zlib (when compressed) and then through
//! the content cipher before reaching the package. On read, the raw bytes are
//! decrypted first and then inflated.
//!
//! Everything is incremental: at most one chunk of [`CHUNK_SIZE`] bytes is
//! transformed at a time, so part size does not bound memory use.
//!
//! # Example
//!
//! ```
//! use lib3mf_securecontent::crypto::{Aes256GcmCipher, SecureContext};
//! use lib3mf_securecontent::model::{Compression, EncryptionAlgorithm, KeyStore};
//! use lib3mf_securecontent::streaming::{build_read_pipeline, build_write_pipeline};
//! use std::io::{Read, Write};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut keystore = KeyStore::new();
//! let group = keystore.add_resource_data_group();
//! keystore.add_resource_data(group, "/3D/mesh.bin", EncryptionAlgorithm::Aes256Gcm, Compression::Deflate)?;
//! keystore.find_resource_data_mut("/3D/mesh.bin").unwrap().cek_params.iv = vec![1; 12];
//!
//! let context = SecureContext::new().with_content_cipher(Aes256GcmCipher::new());
//! let resource = keystore.find_resource_data("/3D/mesh.bin").unwrap().clone();
//!
//! let mut writer = build_write_pipeline(Vec::new(), &resource, keystore.group(group), &context)?;
//! writer.write_all(b"vertex data")?;
//! let (raw, tag) = writer.finish()?;
//!
//! let mut resource = resource;
//! resource.cek_params.tag = tag.unwrap();
//! let mut reader = build_read_pipeline(&raw[..], &resource, keystore.group(group), &context)?;
//! let mut plain = Vec::new();
//! reader.read_to_end(&mut plain)?;
//! assert_eq!(plain, b"vertex data");
//! # Ok(())
//! # }
//! ```

use crate::crypto::{CipherDirection, ContentCipherSession, ContentEncryptionParams, SecureContext};
use crate::error::{Error, Result};
use crate::model::{ResourceData, ResourceDataGroup};
use flate2::Compression as ZlibLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::fmt;
use std::io::{self, Read, Write};

/// Largest number of bytes handed to the content cipher in one call
pub const CHUNK_SIZE: usize = 64 * 1024;

fn cipher_failure(path: &str, err: impl fmt::Display) -> Error {
    Error::CryptoOperationAborted(format!("content cipher failed for '{}': {}", path, err))
}

/// Writer that encrypts everything written to it
pub struct EncryptingWriter<W: Write> {
    inner: W,
    session: Option<Box<dyn ContentCipherSession>>,
    out: Vec<u8>,
    path: String,
}

impl<W: Write> EncryptingWriter<W> {
    /// Wrap `inner` with a started encryption session
    pub fn new(inner: W, session: Box<dyn ContentCipherSession>, path: impl Into<String>) -> Self {
        Self {
            inner,
            session: Some(session),
            out: Vec::with_capacity(CHUNK_SIZE),
            path: path.into(),
        }
    }

    /// Flush the cipher and return the inner writer and the authentication tag
    pub fn finish(mut self) -> Result<(W, Vec<u8>)> {
        let session = self
            .session
            .take()
            .ok_or_else(|| cipher_failure(&self.path, "session already finished"))?;
        self.out.clear();
        let tag = session
            .finish(&mut self.out)
            .map_err(|e| cipher_failure(&self.path, e))?
            .ok_or_else(|| cipher_failure(&self.path, "no authentication tag produced"))?;
        self.inner.write_all(&self.out)?;
        self.inner.flush()?;
        Ok((self.inner, tag))
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| cipher_failure(&self.path, "session already finished").into_io())?;
        let n = buf.len().min(CHUNK_SIZE);
        self.out.clear();
        session
            .update(&buf[..n], &mut self.out)
            .map_err(|e| cipher_failure(&self.path, e).into_io())?;
        self.inner.write_all(&self.out)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write side of a part's pipeline
pub enum PartWriter<W: Write> {
    /// No resource data; bytes pass through unchanged
    Plain(W),
    /// Encrypted
    Encrypted(EncryptingWriter<W>),
    /// Compressed, then encrypted
    Compressed(ZlibEncoder<EncryptingWriter<W>>),
}

impl<W: Write> PartWriter<W> {
    /// Whether bytes are encrypted before reaching the package
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, PartWriter::Plain(_))
    }

    /// Finish every layer, returning the raw writer and the tag of an encrypted part
    pub fn finish(self) -> Result<(W, Option<Vec<u8>>)> {
        match self {
            PartWriter::Plain(mut w) => {
                w.flush()?;
                Ok((w, None))
            }
            PartWriter::Encrypted(enc) => {
                let (w, tag) = enc.finish()?;
                Ok((w, Some(tag)))
            }
            PartWriter::Compressed(zlib) => {
                let (w, tag) = zlib.finish()?.finish()?;
                Ok((w, Some(tag)))
            }
        }
    }
}

impl<W: Write> Write for PartWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PartWriter::Plain(w) => w.write(buf),
            PartWriter::Encrypted(w) => w.write(buf),
            PartWriter::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PartWriter::Plain(w) => w.flush(),
            PartWriter::Encrypted(w) => w.flush(),
            PartWriter::Compressed(w) => w.flush(),
        }
    }
}

/// Reader that decrypts its inner stream
///
/// The cipher session is finished when the inner stream reaches EOF, so a
/// tag mismatch surfaces as an error from the final `read`.
pub struct DecryptingReader<R: Read> {
    inner: R,
    session: Option<Box<dyn ContentCipherSession>>,
    input: Vec<u8>,
    output: Vec<u8>,
    pos: usize,
    path: String,
}

impl<R: Read> DecryptingReader<R> {
    /// Wrap `inner` with a started decryption session
    pub fn new(inner: R, session: Box<dyn ContentCipherSession>, path: impl Into<String>) -> Self {
        Self {
            inner,
            session: Some(session),
            input: vec![0u8; CHUNK_SIZE],
            output: Vec::with_capacity(CHUNK_SIZE),
            pos: 0,
            path: path.into(),
        }
    }

    /// Consume the rest of the stream so the tag gets verified
    pub fn drain(&mut self) -> io::Result<()> {
        io::copy(self, &mut io::sink()).map(|_| ())
    }

    fn fill(&mut self) -> io::Result<()> {
        self.output.clear();
        self.pos = 0;
        let n = self.inner.read(&mut self.input)?;
        if n == 0 {
            if let Some(session) = self.session.take() {
                session
                    .finish(&mut self.output)
                    .map_err(|e| cipher_failure(&self.path, e).into_io())?;
            }
            return Ok(());
        }
        if let Some(session) = self.session.as_mut() {
            session
                .update(&self.input[..n], &mut self.output)
                .map_err(|e| cipher_failure(&self.path, e).into_io())?;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.output.len() {
                let n = (self.output.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.output[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.session.is_none() {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

/// Read side of a part's pipeline
pub enum PartReader<R: Read> {
    /// No resource data; bytes pass through unchanged
    Plain(R),
    /// Encrypted
    Encrypted(DecryptingReader<R>),
    /// Encrypted, then inflated
    Compressed(ZlibDecoder<DecryptingReader<R>>),
}

impl<R: Read> PartReader<R> {
    /// Whether the part is decrypted while reading
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, PartReader::Plain(_))
    }
}

impl<R: Read> Read for PartReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PartReader::Plain(r) => r.read(buf),
            PartReader::Encrypted(r) => r.read(buf),
            PartReader::Compressed(r) => {
                let n = match r.read(buf) {
                    Ok(n) => n,
                    Err(inflate_err) => {
                        // Tampered ciphertext inflates to garbage; report the tag failure instead
                        r.get_mut().drain()?;
                        return Err(inflate_err);
                    }
                };
                if n == 0 && !buf.is_empty() {
                    // zlib may stop before the ciphertext ends
                    r.get_mut().drain()?;
                }
                Ok(n)
            }
        }
    }
}

fn resolve_group<'a>(
    resource: &ResourceData,
    group: Option<&'a ResourceDataGroup>,
) -> Result<&'a ResourceDataGroup> {
    group.ok_or_else(|| {
        Error::GroupNotFound(format!(
            "group index {} for '{}'",
            resource.group_index, resource.path
        ))
    })
}

fn require_key<'a>(resource: &ResourceData, group: &'a ResourceDataGroup) -> Result<&'a [u8]> {
    if !group.has_key() {
        return Err(Error::MissingCryptoClient(format!(
            "content key of group '{}' is not available for '{}'",
            group.key_uuid, resource.path
        )));
    }
    Ok(group.key())
}

/// Build the encrypting (and compressing) writer for a part
///
/// Fails with `GroupNotFound` when `group` is absent and with
/// `MissingDekContext` when no content cipher is registered.
pub fn build_write_pipeline<W: Write>(
    raw: W,
    resource: &ResourceData,
    group: Option<&ResourceDataGroup>,
    context: &SecureContext,
) -> Result<PartWriter<W>> {
    let group = resolve_group(resource, group)?;
    let cipher = context
        .content_cipher()
        .ok_or_else(|| Error::MissingDekContext(resource.path.clone()))?;
    let key = require_key(resource, group)?;
    let cek = &resource.cek_params;
    let params = ContentEncryptionParams::for_encryption(
        cek.encryption_algorithm,
        key,
        &cek.iv,
        &cek.aad,
        &resource.path,
        &group.key_uuid,
    )?;
    let session = cipher
        .start(&params, CipherDirection::Encrypt)
        .map_err(|e| cipher_failure(&resource.path, e))?;

    let encrypting = EncryptingWriter::new(raw, session, resource.path.clone());
    Ok(if resource.is_compressed() {
        PartWriter::Compressed(ZlibEncoder::new(encrypting, ZlibLevel::default()))
    } else {
        PartWriter::Encrypted(encrypting)
    })
}

/// Build the decrypting (and inflating) reader for a part
///
/// Fails with `GroupNotFound` when `group` is absent and with
/// `MissingCryptoClient` when no content cipher is registered or the group's
/// key has not been unwrapped.
pub fn build_read_pipeline<R: Read>(
    raw: R,
    resource: &ResourceData,
    group: Option<&ResourceDataGroup>,
    context: &SecureContext,
) -> Result<PartReader<R>> {
    let group = resolve_group(resource, group)?;
    let cipher = context.content_cipher().ok_or_else(|| {
        Error::MissingCryptoClient(format!(
            "no content cipher registered to decrypt '{}'",
            resource.path
        ))
    })?;
    let key = require_key(resource, group)?;
    let cek = &resource.cek_params;
    let params = ContentEncryptionParams::for_decryption(
        cek.encryption_algorithm,
        key,
        &cek.iv,
        &cek.tag,
        &cek.aad,
        &resource.path,
        &group.key_uuid,
    )?;
    let session = cipher
        .start(&params, CipherDirection::Decrypt)
        .map_err(|e| cipher_failure(&resource.path, e))?;

    let decrypting = DecryptingReader::new(raw, session, resource.path.clone());
    Ok(if resource.is_compressed() {
        PartReader::Compressed(ZlibDecoder::new(decrypting))
    } else {
        PartReader::Encrypted(decrypting)
    })
}
