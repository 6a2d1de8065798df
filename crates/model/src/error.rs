//! Error types for model operations.

use thiserror::Error;

/// Errors that can occur while building or validating model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid chunk address: {0}")]
    InvalidAddress(String),

    #[error("Invalid directory id: {0}")]
    InvalidDirectoryId(String),

    #[error("Chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("Data map covers {covered} bytes but records size {size}")]
    DataMapSizeMismatch { covered: u64, size: u64 },

    #[error("Data map chunk {index} is {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("{name} is a {actual}, not a {expected}")]
    WrongFileType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Json(err.to_string())
    }
}
