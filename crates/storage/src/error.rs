//! Error types for storage backends.

use thiserror::Error;

/// Errors returned by `StorageBackend` implementations.
///
/// Backends never retry internally; every failure is handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// `get` found nothing stored under the key.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// The backend could not be reached or dropped the request.
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    /// Local I/O failed while serving the request.
    #[error("IO error at {path}: {message}")]
    IoError { path: String, message: String },

    /// The key cannot be stored by this backend.
    #[error("Invalid key: {key}")]
    InvalidKey { key: String },

    /// Backend configuration is unusable.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A stored object could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StorageError {
    /// Shorthand for an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(key: impl Into<String>) -> Self {
        StorageError::NotFound { key: key.into() }
    }

    /// True for transport failures a caller might choose to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}
