//! Error types for file operations.

use rusty_drive_model::ModelError;
use rusty_drive_storage::StorageError;
use thiserror::Error;

use crate::executor::ExecutorError;
use crate::memory_pool::MemoryPoolError;
use crate::registry::FileId;

/// Errors from `File`, `ChunkBuffer` and `FileRegistry` operations.
///
/// `Clone` so that one deferred flush outcome can be handed to every close
/// ticket that was coalesced into it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    /// The operation needs an open file.
    #[error("File is not open: {name}")]
    NotOpen { name: String },

    /// `open` was called on a file that is already open.
    #[error("File is already open: {name}")]
    AlreadyOpen { name: String },

    /// A deferred flush for this file is executing right now.
    #[error("Flush in progress for {name}")]
    FlushInProgress { name: String },

    /// Directories have no byte content to open.
    #[error("{name} is a directory")]
    IsDirectory { name: String },

    /// No file is registered under this id.
    #[error("Unknown file id: {0}")]
    UnknownFile(FileId),

    /// The backend holds nothing under the requested key.
    #[error("Not found in storage: {key}")]
    NotFound { key: String },

    /// The backend could not be reached.
    #[error("Storage backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Unflushed content outgrew the memory and disk ceilings.
    #[error("Usage exceeded: {unflushed} unflushed bytes over limit of {limit}")]
    UsageExceeded { unflushed: u64, limit: u64 },

    /// A write or truncate would take the content past what a data map can hold.
    #[error("File too large: {requested} bytes requested, maximum is {max}")]
    FileTooLarge { requested: u64, max: u64 },

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Fetched bytes do not hash to the address they were fetched by.
    #[error("Chunk content does not match address {address}")]
    ChunkMismatch { address: String },

    /// A resident chunk was missing from the memory pool.
    #[error("Memory pool error: {0}")]
    MemoryPool(String),

    /// The on-disk staging area failed.
    #[error("Staging error: {0}")]
    Staging(String),

    /// The async bridge failed.
    #[error("Executor error: {0}")]
    Executor(String),

    /// Model invariant violated.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Options could not be loaded or are invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for VfsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => VfsError::NotFound { key },
            StorageError::Unavailable { message } => VfsError::BackendUnavailable { message },
            other => VfsError::Storage(other),
        }
    }
}

impl From<MemoryPoolError> for VfsError {
    fn from(err: MemoryPoolError) -> Self {
        VfsError::MemoryPool(err.to_string())
    }
}

impl From<ExecutorError> for VfsError {
    fn from(err: ExecutorError) -> Self {
        VfsError::Executor(err.to_string())
    }
}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        VfsError::Staging(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert_eq!(
            VfsError::from(StorageError::not_found("abc")),
            VfsError::NotFound {
                key: "abc".to_string()
            }
        );
        assert!(matches!(
            VfsError::from(StorageError::unavailable("down")),
            VfsError::BackendUnavailable { .. }
        ));
        assert!(matches!(
            VfsError::from(StorageError::InvalidKey {
                key: "../x".to_string()
            }),
            VfsError::Storage(_)
        ));
    }

    #[test]
    fn test_usage_exceeded_message() {
        let err = VfsError::UsageExceeded {
            unflushed: 4096,
            limit: 2048,
        };
        assert_eq!(
            err.to_string(),
            "Usage exceeded: 4096 unflushed bytes over limit of 2048"
        );
    }
}
