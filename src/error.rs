//! Error types for secure 3MF package handling
//!
//! This module provides the error taxonomy shared by the keystore model, the
//! stream pipeline and the package reader/writer engines. All errors include
//! error codes for categorization.
//!
//! # Error Codes
//!
//! Error codes follow the pattern: `E<category><number>`
//!
//! Categories:
//! - **E1xxx**: I/O and archive errors
//! - **E2xxx**: XML parsing and structure errors
//! - **E4xxx**: Invalid SecureContent keystore structure
//! - **E5xxx**: Secure content engine errors (crypto clients, key lifecycle)
//!
//! ## Common Error Codes
//!
//! - `E1001`: I/O error reading or writing a part
//! - `E1002`: ZIP archive format error
//! - `E1003`: Missing required file in archive
//! - `E2001`: XML parsing error
//! - `E4003`: Keystore violates the SecureContent rules
//! - `E5001`: No content encryption client registered
//! - `E5002`: No key-wrap client able to unwrap a required key
//! - `E5003`: IV / tag / key length does not match the algorithm
//! - `E5007`: An external crypto client rejected the operation
//! - `E5008`: The pass was cancelled through the progress callback

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for secure package operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when reading or writing secure 3MF packages
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred while reading or writing a stream
    ///
    /// **Error Code**: E1001
    #[error("[E1001] I/O error: {0}")]
    Io(#[source] io::Error),

    /// ZIP archive error
    ///
    /// **Error Code**: E1002
    ///
    /// **Common Causes**:
    /// - Corrupted ZIP file
    /// - Truncated archive
    #[error("[E1002] ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Missing required file in the package
    ///
    /// **Error Code**: E1003
    #[error("[E1003] Missing required file: {0}")]
    MissingFile(String),

    /// XML parsing error
    ///
    /// **Error Code**: E2001
    #[error("[E2001] XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute error
    ///
    /// **Error Code**: E2002
    #[error("[E2002] XML attribute error: {0}")]
    XmlAttr(String),

    /// Invalid XML structure
    ///
    /// **Error Code**: E2003
    ///
    /// **Common Causes**:
    /// - Missing required XML elements or attributes
    /// - Invalid element nesting
    #[error("[E2003] Invalid XML structure: {0}")]
    InvalidXml(String),

    /// Invalid OPC package format
    ///
    /// **Error Code**: E2004
    ///
    /// **Common Causes**:
    /// - Non-compliant OPC structure
    /// - Invalid part names or relationship targets
    #[error("[E2004] Invalid package format: {0}")]
    InvalidFormat(String),

    /// XML writing error
    ///
    /// **Error Code**: E2005
    #[error("[E2005] XML writing error: {0}")]
    XmlWrite(String),

    /// Invalid SecureContent keystore
    ///
    /// **Error Code**: E4003
    ///
    /// **Common Causes**:
    /// - Unknown encryption or key wrapping algorithm
    /// - Encrypted path pointing at an OPC relationship part
    /// - Referenced part doesn't exist in the package
    /// - Malformed base64 in cipher values, IVs or tags
    ///
    /// **Suggestions**:
    /// - Verify the keystore follows the 3MF SecureContent specification
    #[error("[E4003] Invalid SecureContent: {0}")]
    InvalidSecureContent(String),

    /// Encryption was required but no content encryption client is registered
    ///
    /// **Error Code**: E5001
    ///
    /// **Suggestions**:
    /// - Register a content cipher with `SecureContext::with_content_cipher`
    ///   before saving a package that contains resource data
    #[error("[E5001] No content encryption client registered (required for '{0}')")]
    MissingDekContext(String),

    /// No crypto client is available for a required consumer or decryption
    ///
    /// **Error Code**: E5002
    ///
    /// **Suggestions**:
    /// - Register a key-wrap client for one of the consumers holding an
    ///   access right to the part's resource data group
    /// - Relax strict mode to skip such parts with a warning
    #[error("[E5002] Missing crypto client: {0}")]
    MissingCryptoClient(String),

    /// A buffer length does not match the fixed size of the algorithm
    ///
    /// **Error Code**: E5003
    ///
    /// Signals a corrupted or tampered keystore, or a misbehaving client.
    #[error("[E5003] Invalid {what} size for '{path}': expected {expected} bytes, got {actual}")]
    InvalidBufferSize {
        /// What the buffer holds ("IV", "tag", "key")
        what: &'static str,
        /// Part path the buffer belongs to
        path: String,
        /// Size required by the algorithm
        expected: usize,
        /// Size found
        actual: usize,
    },

    /// A resource data entry references a group that does not exist
    ///
    /// **Error Code**: E5004
    #[error("[E5004] Resource data group not found: {0}")]
    GroupNotFound(String),

    /// Two keystore records share an identity that must be unique
    ///
    /// **Error Code**: E5005
    #[error("[E5005] Duplicate resource: {0}")]
    DuplicateResource(String),

    /// An access right references a consumer that does not exist
    ///
    /// **Error Code**: E5006
    #[error("[E5006] Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// An external crypto client actively rejected the operation
    ///
    /// **Error Code**: E5007
    ///
    /// Never retried by the engine.
    #[error("[E5007] Crypto operation aborted: {0}")]
    CryptoOperationAborted(String),

    /// The progress callback requested cancellation
    ///
    /// **Error Code**: E5008
    #[error("[E5008] Calculation aborted by progress callback")]
    CalculationAborted,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // Stream layers box engine errors into io::Error; unwrap them again
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Io(io::Error::new(kind, other)),
            None => Error::Io(io::Error::from(kind)),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlAttr(format!("Attribute parsing failed: {}", err))
    }
}

impl Error {
    /// Create an InvalidXml error with element context
    ///
    /// # Example
    /// ```ignore
    /// Error::invalid_xml_element("cekparams", "Missing 'encryptionalgorithm'")
    /// ```
    pub fn invalid_xml_element(element: &str, message: &str) -> Self {
        Error::InvalidXml(format!("Element '<{}>': {}", element, message))
    }

    /// Create an InvalidXml error for a missing required attribute
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        Error::InvalidXml(format!(
            "Element '<{}>' is missing required attribute '{}'. \
             Check the 3MF SecureContent specification for required attributes.",
            element, attribute
        ))
    }

    /// Create an InvalidFormat error with context about what structure is invalid
    pub fn invalid_format_context(context: &str, message: &str) -> Self {
        Error::InvalidFormat(format!("{}: {}", context, message))
    }

    /// Create an XmlWrite error
    pub fn xml_write(message: String) -> Self {
        Error::XmlWrite(message)
    }

    /// Box this error into an `io::Error` so it can cross a `Read`/`Write` boundary
    ///
    /// `From<io::Error>` recovers the original error on the other side.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }
}

/// Category of a non-fatal event recorded during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A part was skipped because no crypto client could decrypt it
    MissingCryptoClient,
    /// A key re-wrap failed for an existing access right; the old cipher value was kept
    StaleAccessRight,
    /// The package structure deviates from the SecureContent rules without being fatal
    PackageStructure,
}

/// A non-fatal event recorded by the reader or writer engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Category of the warning
    pub kind: WarningKind,
    /// Part path or consumer the warning is about
    pub path: String,
    /// Human readable description
    pub message: String,
}

impl Warning {
    /// Create a new warning
    pub fn new(kind: WarningKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.kind, self.path, self.message)
    }
}
