//! Connection options.
//!
//! Options control buffering and durability behavior. They are supplied when
//! a connection is opened and are not persisted; a root directory can be
//! reopened with different options.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Default number of points an inserter batches locally before pushing them
/// into the stream's write buffer.
pub const DEFAULT_INSERTER_BATCH_SIZE: usize = 1024;

/// Tunables for a [`Connection`](crate::connection::Connection).
///
/// # Example
///
/// ```rust
/// use strata::config::Options;
///
/// let options = Options {
///     inserter_batch_size: 256,
///     auto_flush_threshold: Some(100_000),
///     ..Options::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Points an inserter accumulates before taking the store's write lock.
    pub inserter_batch_size: usize,

    /// When set, a store flushes itself once its write buffer holds at
    /// least this many points.
    pub auto_flush_threshold: Option<usize>,

    /// Whether flushes fsync segment files and their directory.
    pub sync_on_flush: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            inserter_batch_size: DEFAULT_INSERTER_BATCH_SIZE,
            auto_flush_threshold: None,
            sync_on_flush: true,
        }
    }
}

impl Options {
    /// Validates option ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the batch size or auto-flush
    /// threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.inserter_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "inserter_batch_size",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.auto_flush_threshold == Some(0) {
            return Err(ConfigError::Invalid {
                field: "auto_flush_threshold",
                reason: "must be greater than 0 when set".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Loads and validates options from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let options: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        options.validate()?;
        Ok(options)
    }
}
