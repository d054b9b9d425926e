//! Error types for the package artifact store

use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for package storage operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Identity errors
    #[error("Invalid package identity: {reason}")]
    InvalidIdentity { reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Signed URLs unavailable: {reason}")]
    SigningUnavailable { reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for an `InvalidConfig` error
    pub fn config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidIdentity` error
    pub fn identity(reason: impl Into<String>) -> Self {
        Error::InvalidIdentity {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Storage` error
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Returns true if a caller may reasonably retry the operation.
    ///
    /// The storage layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. } | Error::StorageUnavailable { .. } | Error::Io(_)
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. } | Error::SigningUnavailable { .. }
        )
    }

    /// Returns a retry delay hint in milliseconds, if applicable
    pub fn retry_delay_hint_ms(&self) -> Option<u64> {
        match self {
            Error::Storage { .. } => Some(100),
            Error::StorageUnavailable { .. } => Some(5000),
            Error::Io(_) => Some(100),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
