//! The storage backend interface used by the flush path and directory layer.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::StorageError;

/// How a backend delivers `put` and `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The call completes durably before it returns.
    Synchronous,
    /// The call only submits the request; completion arrives later.
    Submitted,
}

/// Pending confirmation for a submitted `put` or `delete`.
#[derive(Debug)]
pub struct Acknowledgement {
    key: String,
    rx: oneshot::Receiver<Result<(), StorageError>>,
}

impl Acknowledgement {
    /// Pair an acknowledgement with the sender the backend answers through.
    ///
    /// # Arguments
    /// * `key` - Key the request was submitted for
    ///
    /// # Returns
    /// The acknowledgement and the sender that resolves it.
    pub fn channel(key: impl Into<String>) -> (Self, oneshot::Sender<Result<(), StorageError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                key: key.into(),
                rx,
            },
            tx,
        )
    }

    /// Key the request was submitted for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait until the backend confirms the request.
    ///
    /// A backend that drops the request without answering is reported as
    /// `StorageError::Unavailable`.
    pub async fn durable(self) -> Result<(), StorageError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(StorageError::unavailable(format!(
                "no response for {}",
                self.key
            ))),
        }
    }
}

/// Outcome of a `put` or `delete` call.
#[derive(Debug)]
pub enum Completion {
    /// The object landed (or was removed) before the call returned.
    Durable,
    /// The request was submitted; await the acknowledgement for durability.
    Submitted(Acknowledgement),
}

impl Completion {
    /// True if no further waiting is needed.
    pub fn is_durable(&self) -> bool {
        matches!(self, Completion::Durable)
    }

    /// Wait for durability, whichever way the backend delivers it.
    pub async fn wait(self) -> Result<(), StorageError> {
        match self {
            Completion::Durable => Ok(()),
            Completion::Submitted(ack) => ack.durable().await,
        }
    }
}

/// Put/Get/Delete over content-addressed objects.
///
/// Two shapes implement this trait and report which one they are through
/// `delivery()`:
///
/// - Direct backends complete `put`/`delete` before returning
///   (`Completion::Durable`).
/// - Network backends only submit `put`/`delete`
///   (`Completion::Submitted`); callers must await the acknowledgement before
///   treating the object as stored.
///
/// `get` is future-returning for both shapes. A missing key is
/// `StorageError::NotFound`; transport failure is `StorageError::Unavailable`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Delivery contract of `put` and `delete`.
    fn delivery(&self) -> Delivery;

    /// Store `data` under `key`.
    ///
    /// # Arguments
    /// * `key` - Object key
    /// * `data` - Object bytes
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<Completion, StorageError>;

    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove the object stored under `key`.
    ///
    /// Deleting a key that holds nothing is not an error.
    async fn delete(&self, key: &str) -> Result<Completion, StorageError>;
}
