//! Reader and writer configuration

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Phase of a pass reported to the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressIdentifier {
    /// The keystore manifest is being read
    ReadKeyStore,
    /// A part is being read
    ReadPart,
    /// A part is being written
    WritePart,
    /// The keystore manifest is being written
    WriteKeyStore,
    /// The pass completed
    Done,
}

/// Progress report, delivered between parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStep {
    /// Monotonic step counter within the pass
    pub step: usize,
    /// Phase of the pass
    pub identifier: ProgressIdentifier,
}

/// Progress callback; returning `false` cancels the pass
pub type ProgressCallback = Arc<dyn Fn(ProgressStep) -> bool + Send + Sync>;

/// Invoke an optional progress callback, mapping cancellation to an error
pub(crate) fn report_progress(
    callback: Option<&ProgressCallback>,
    step: &mut usize,
    identifier: ProgressIdentifier,
) -> Result<()> {
    let Some(callback) = callback else {
        return Ok(());
    };
    *step += 1;
    if callback(ProgressStep {
        step: *step,
        identifier,
    }) {
        Ok(())
    } else {
        tracing::debug!(step = *step, ?identifier, "pass cancelled by progress callback");
        Err(Error::CalculationAborted)
    }
}

/// Configuration for reading secure packages
///
/// # Example
///
/// ```
/// use lib3mf_securecontent::ReaderConfig;
///
/// // Skip parts without a usable crypto client instead of failing the load
/// let config = ReaderConfig::new().with_strict_mode(false);
/// assert!(!config.strict());
/// ```
#[derive(Clone)]
pub struct ReaderConfig {
    strict: bool,
    progress: Option<ProgressCallback>,
}

impl ReaderConfig {
    /// Strict configuration without progress reporting
    pub fn new() -> Self {
        Self {
            strict: true,
            progress: None,
        }
    }

    /// Whether a missing crypto client fails the load (`true`) or skips the part with a warning
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Install a progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressStep) -> bool + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Strict mode flag
    pub fn strict(&self) -> bool {
        self.strict
    }

    pub(crate) fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("strict", &self.strict)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Configuration for writing secure packages
#[derive(Clone, Default)]
pub struct WriterConfig {
    progress: Option<ProgressCallback>,
}

impl WriterConfig {
    /// Configuration without progress reporting
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressStep) -> bool + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub(crate) fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }
}

impl fmt::Debug for WriterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterConfig")
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
