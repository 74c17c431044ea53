//! Cache error types

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache operation errors
///
/// These only surface from the storage, lock and configuration layers. The
/// [`ObjectCache`](crate::ObjectCache) facade turns them into `false`/`None`
/// outcomes after logging them.
#[derive(Error, Debug)]
pub enum CacheError {
    /// File read/write failed
    #[error("IO error on {path} ({operation}): {source}")]
    Io {
        path: PathBuf,
        operation: IoOperation,
        source: std::io::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error for {path}: {message}")]
    Deserialization { path: PathBuf, message: String },

    /// Advisory lock could not be taken
    #[error("Lock error on {path}: {message}")]
    Lock { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {message}")]
    Validation { field: String, message: String },
}

/// IO operation type for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
    Delete,
    Lock,
}

impl fmt::Display for IoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOperation::Read => "read",
            IoOperation::Write => "write",
            IoOperation::Delete => "delete",
            IoOperation::Lock => "lock",
        };
        f.write_str(name)
    }
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, operation: IoOperation, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
