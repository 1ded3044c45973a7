//! Error types for the strata time-series database.

use std::path::PathBuf;

use thiserror::Error;

use crate::statement::ReturnType;
use crate::value::ValueKind;

/// The main error type for all strata operations.
///
/// Concern-specific errors are wrapped so callers can match on the failing
/// layer, while [`StrataError::kind`] flattens every error into the small
/// [`ErrorKind`] taxonomy reported across the C boundary.
#[derive(Error, Debug)]
pub enum StrataError {
    /// Error resolving, creating, or persisting streams.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Error parsing or planning a query.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error reading or writing durable data.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid connection options.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A value's kind disagrees with the stream or result it is used with.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The kind declared by the stream or requested by the caller.
        expected: ValueKind,
        /// The kind actually supplied.
        found: ValueKind,
    },

    /// An operation was attempted on a closed connection or a handle derived
    /// from one.
    #[error("{handle} used after close")]
    UseAfterClose {
        /// Which handle was used ("connection", "inserter", "statement").
        handle: &'static str,
    },
}

/// Errors raised by the stream catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A stream with the same identity exists with a different value kind.
    #[error("stream {selector} already exists with kind {existing} (requested {requested})")]
    AlreadyExists {
        /// Canonical identity of the stream.
        selector: String,
        /// The kind the existing stream was created with.
        existing: ValueKind,
        /// The kind the caller asked for.
        requested: ValueKind,
    },

    /// No stream matches the selector.
    #[error("no stream matches selector {selector}")]
    StreamNotFound {
        /// Canonical form of the selector that failed to resolve.
        selector: String,
    },

    /// The stream name is not acceptable.
    #[error("invalid stream name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A label key or value is not acceptable.
    #[error("invalid label {key}={value:?}: {reason}")]
    InvalidLabel {
        /// The label key.
        key: String,
        /// The label value.
        value: String,
        /// Why the label is invalid.
        reason: String,
    },

    /// The persisted catalog could not be understood.
    #[error("corrupted catalog '{}': {reason}", path.display())]
    Corrupted {
        /// Path of the catalog file.
        path: PathBuf,
        /// Description of what was invalid.
        reason: String,
    },
}

/// Errors raised while parsing or planning a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The query string is malformed.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// Byte offset into the query string.
        position: usize,
        /// What the parser expected or rejected.
        message: String,
    },

    /// The query wraps the selector in a function that is not an aggregate.
    #[error("unsupported aggregate function '{name}'")]
    AggregateUnsupported {
        /// The unknown function name.
        name: String,
    },

    /// The requested time range has `start > end`.
    #[error("invalid time range: start {start} > end {end}")]
    InvalidRange {
        /// Range start.
        start: u64,
        /// Range end.
        end: u64,
    },

    /// The caller pulled a result of the wrong shape from a statement.
    #[error("statement returns {actual} results, not {requested}")]
    WrongReturnType {
        /// The shape the statement produces.
        actual: ReturnType,
        /// The shape the caller asked for.
        requested: ReturnType,
    },
}

/// Errors raised by the durable segment layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A directory could not be created, listed, or synced.
    #[error("failed to access directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading a file failed.
    #[error("failed to read '{}': {source}", path.display())]
    ReadFailed {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or publishing a file failed.
    #[error("failed to write '{}': {source}", path.display())]
    WriteFailed {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping a segment failed.
    #[error("memory mapping failed for '{}': {source}", path.display())]
    MemoryMap {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A segment file failed validation.
    #[error("segment '{}' is corrupted: {reason}", path.display())]
    CorruptedSegment {
        /// The segment path.
        path: PathBuf,
        /// Description of the corruption.
        reason: String,
    },

    /// Catalog metadata could not be serialized.
    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised when validating [`Options`](crate::config::Options).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An option value is out of range.
    #[error("invalid option {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// The options file could not be read.
    #[error("failed to read options file '{}': {source}", path.display())]
    Read {
        /// The options file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The options file is not valid JSON for [`Options`](crate::config::Options).
    #[error("failed to parse options file '{}': {source}", path.display())]
    Parse {
        /// The options file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Flat classification of every [`StrataError`].
///
/// The discriminants are stable and double as status codes at the C
/// boundary, where `0` means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Malformed query or selector string.
    Syntax = 1,
    /// Selector resolved to no stream.
    StreamNotFound = 2,
    /// Create collided with an existing identity of a different kind.
    AlreadyExists = 3,
    /// Value kind disagreement.
    TypeMismatch = 4,
    /// `start > end`.
    InvalidRange = 5,
    /// Unknown aggregate function.
    AggregateUnsupported = 6,
    /// Segment or catalog I/O failure.
    Io = 7,
    /// Operation on a closed connection, inserter, or statement.
    UseAfterClose = 8,
    /// Input rejected by validation.
    InvalidArgument = 9,
}

impl ErrorKind {
    /// Returns the status code used at the C boundary.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl StrataError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Catalog(err) => match err {
                CatalogError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
                CatalogError::StreamNotFound { .. } => ErrorKind::StreamNotFound,
                CatalogError::InvalidName { .. } | CatalogError::InvalidLabel { .. } => {
                    ErrorKind::InvalidArgument
                }
                CatalogError::Corrupted { .. } => ErrorKind::Io,
            },
            Self::Query(err) => match err {
                QueryError::Syntax { .. } => ErrorKind::Syntax,
                QueryError::AggregateUnsupported { .. } => ErrorKind::AggregateUnsupported,
                QueryError::InvalidRange { .. } => ErrorKind::InvalidRange,
                QueryError::WrongReturnType { .. } => ErrorKind::InvalidArgument,
            },
            Self::Storage(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::InvalidArgument,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::UseAfterClose { .. } => ErrorKind::UseAfterClose,
        }
    }
}

/// Type alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: StrataError = QueryError::Syntax {
            position: 3,
            message: "expected '='".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Syntax);

        let err: StrataError = CatalogError::StreamNotFound {
            selector: "cpu".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::StreamNotFound);

        let err = StrataError::TypeMismatch {
            expected: ValueKind::UnsignedInteger,
            found: ValueKind::Float,
        };
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.kind().code(), 4);
    }

    #[test]
    fn test_display_includes_context() {
        let err: StrataError = QueryError::InvalidRange { start: 10, end: 5 }.into();
        assert_eq!(
            err.to_string(),
            "query error: invalid time range: start 10 > end 5"
        );

        let err = StrataError::UseAfterClose { handle: "statement" };
        assert_eq!(err.to_string(), "statement used after close");
    }
}
