//! Error types for the execution core

use thiserror::Error;

use crate::query::error::{QueryError, QueryErrorKind};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage errors
///
/// Raised by the storage collaborators (file readers, shards) and converted
/// into execution errors once they cross into a cursor.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Read request outside the file
    #[error("Read out of bounds: offset {offset} + len {len} exceeds file size {size}")]
    OutOfBounds {
        /// Requested offset
        offset: u64,
        /// Requested length
        len: usize,
        /// Actual file size
        size: u64,
    },

    /// File handle used after close
    #[error("File already closed: {0}")]
    FileClosed(String),

    /// Series or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Data is corrupted
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Stored column type differs from the requested one
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl From<StorageError> for QueryError {
    fn from(e: StorageError) -> Self {
        let kind = match e {
            StorageError::NotFound(_) => QueryErrorKind::NotFound,
            _ => QueryErrorKind::ExecutionError,
        };
        QueryError::new(kind, e.to_string()).with_source(e)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path of the file
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Parsing the configuration file failed
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// Path of the file
        path: String,
        /// Parser message
        message: String,
    },

    /// A value is outside its allowed range
    #[error("{field} value {value} is invalid: {reason}")]
    Invalid {
        /// Field name being validated
        field: &'static str,
        /// The invalid value
        value: String,
        /// Why it is rejected
        reason: &'static str,
    },
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
