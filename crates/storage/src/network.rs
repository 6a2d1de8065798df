//! Network backends: asynchronous stores answered through callbacks.
//!
//! A `NetworkClient` submits a request and answers later by calling the
//! response callback it was handed. `NetworkBackend` turns those callbacks into
//! futures:
//!
//! ```text
//! caller              NetworkBackend              client / transport
//! ──────              ──────────────              ──────────────────
//!   put(key) ───────► submit(on_response) ──────► queued
//!   ◄── Completion::Submitted(ack)
//!   ack.durable() ... on_response(Ok) ◄────────── served
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::direct::DirectStore;
use crate::error::StorageError;
use crate::traits::{Acknowledgement, Completion, Delivery, StorageBackend};

/// One-shot response callback for a network request.
pub type Response<T> = Box<dyn FnOnce(Result<T, StorageError>) + Send + 'static>;

/// Callback-based client for a network store.
///
/// Each method returns once the request is submitted. An `Err` return means
/// submission itself failed and `on_response` will never be called.
pub trait NetworkClient: Send + Sync {
    fn put(&self, key: &str, data: Vec<u8>, on_response: Response<()>) -> Result<(), StorageError>;

    fn get(&self, key: &str, on_response: Response<Vec<u8>>) -> Result<(), StorageError>;

    fn delete(&self, key: &str, on_response: Response<()>) -> Result<(), StorageError>;
}

/// `StorageBackend` over a `NetworkClient`.
///
/// `put` and `delete` return `Completion::Submitted`; `get` awaits the
/// response callback.
pub struct NetworkBackend<C: NetworkClient> {
    client: C,
}

impl<C: NetworkClient> NetworkBackend<C> {
    /// Wrap a network client.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Access the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: NetworkClient> StorageBackend for NetworkBackend<C> {
    fn delivery(&self) -> Delivery {
        Delivery::Submitted
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<Completion, StorageError> {
        let (ack, tx) = Acknowledgement::channel(key);
        let bytes: usize = data.len();
        self.client.put(
            key,
            data,
            Box::new(move |result| {
                // Ignore send errors - caller may have dropped the acknowledgement
                let _ = tx.send(result);
            }),
        )?;
        tracing::trace!(key, bytes, "network put submitted");
        Ok(Completion::Submitted(ack))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let (tx, rx) = oneshot::channel::<Result<Vec<u8>, StorageError>>();
        self.client.get(
            key,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(StorageError::unavailable(format!("no response for {}", key))),
        }
    }

    async fn delete(&self, key: &str) -> Result<Completion, StorageError> {
        let (ack, tx) = Acknowledgement::channel(key);
        self.client.delete(
            key,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        tracing::trace!(key, "network delete submitted");
        Ok(Completion::Submitted(ack))
    }
}

// ============================================================================
// Loopback client
// ============================================================================

/// Request queued on the loopback worker.
enum Request {
    Put {
        key: String,
        data: Vec<u8>,
        on_response: Response<()>,
    },
    Get {
        key: String,
        on_response: Response<Vec<u8>>,
    },
    Delete {
        key: String,
        on_response: Response<()>,
    },
}

impl Request {
    /// Answer the request without serving it.
    fn fail(self, err: StorageError) {
        match self {
            Request::Put { on_response, .. } | Request::Delete { on_response, .. } => {
                on_response(Err(err))
            }
            Request::Get { on_response, .. } => on_response(Err(err)),
        }
    }
}

struct LoopbackShared {
    queue: Mutex<VecDeque<Request>>,
    cvar: Condvar,
    shutdown: AtomicBool,
    connected: AtomicBool,
}

impl LoopbackShared {
    /// Set a flag and wake the worker. The queue lock is held across both so
    /// the worker cannot miss the wakeup between its flag check and its wait.
    fn signal(&self, flag: &AtomicBool, value: bool) {
        let _queue = self.queue.lock();
        flag.store(value, Ordering::SeqCst);
        self.cvar.notify_all();
    }
}

/// Network client served by a background worker thread over a `DirectStore`.
///
/// Requests are answered in submission order on the worker thread, after an
/// optional artificial latency. Disconnecting makes new submissions fail and
/// answers already-queued requests with `Unavailable`.
pub struct LoopbackClient {
    shared: Arc<LoopbackShared>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackClient {
    /// Create a loopback client with no added latency.
    ///
    /// # Arguments
    /// * `store` - Store that serves the requests
    pub fn new<S: DirectStore + 'static>(store: Arc<S>) -> Result<Self, StorageError> {
        Self::with_latency(store, Duration::ZERO)
    }

    /// Create a loopback client that waits `latency` before serving each request.
    pub fn with_latency<S: DirectStore + 'static>(
        store: Arc<S>,
        latency: Duration,
    ) -> Result<Self, StorageError> {
        let shared = Arc::new(LoopbackShared {
            queue: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        });
        let shared_clone: Arc<LoopbackShared> = shared.clone();

        let thread: JoinHandle<()> = std::thread::Builder::new()
            .name("drive-loopback".to_string())
            .spawn(move || loopback_worker(shared_clone, store, latency))
            .map_err(|e| StorageError::unavailable(format!("failed to spawn worker: {}", e)))?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Simulate losing (`false`) or regaining (`true`) the connection.
    pub fn set_connected(&self, connected: bool) {
        self.shared.signal(&self.shared.connected, connected);
    }

    /// Number of requests waiting to be served.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    fn submit(&self, request: Request) -> Result<(), StorageError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("loopback disconnected"));
        }
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("loopback shut down"));
        }
        self.shared.queue.lock().push_back(request);
        self.shared.cvar.notify_one();
        Ok(())
    }
}

impl NetworkClient for LoopbackClient {
    fn put(&self, key: &str, data: Vec<u8>, on_response: Response<()>) -> Result<(), StorageError> {
        self.submit(Request::Put {
            key: key.to_string(),
            data,
            on_response,
        })
    }

    fn get(&self, key: &str, on_response: Response<Vec<u8>>) -> Result<(), StorageError> {
        self.submit(Request::Get {
            key: key.to_string(),
            on_response,
        })
    }

    fn delete(&self, key: &str, on_response: Response<()>) -> Result<(), StorageError> {
        self.submit(Request::Delete {
            key: key.to_string(),
            on_response,
        })
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.shared.signal(&self.shared.shutdown, true);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn loopback_worker<S: DirectStore>(shared: Arc<LoopbackShared>, store: Arc<S>, latency: Duration) {
    loop {
        let request: Request = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(request) = queue.pop_front() {
                    break request;
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                shared.cvar.wait(&mut queue);
            }
        };

        if shared.shutdown.load(Ordering::SeqCst) {
            request.fail(StorageError::unavailable("loopback shut down"));
            continue;
        }

        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if !shared.connected.load(Ordering::SeqCst) {
            request.fail(StorageError::unavailable("loopback disconnected"));
            continue;
        }

        match request {
            Request::Put {
                key,
                data,
                on_response,
            } => on_response(store.put(&key, &data)),
            Request::Get { key, on_response } => on_response(store.get(&key)),
            Request::Delete { key, on_response } => on_response(store.delete(&key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::MemoryStore;

    #[tokio::test]
    async fn test_put_is_submitted_then_acknowledged() {
        let store = Arc::new(MemoryStore::new());
        let backend = NetworkBackend::new(LoopbackClient::new(store.clone()).unwrap());
        assert_eq!(backend.delivery(), Delivery::Submitted);

        let completion: Completion = backend.put("k", b"value".to_vec()).await.unwrap();
        assert!(!completion.is_durable());
        completion.wait().await.unwrap();

        assert!(store.contains("k"));
        assert_eq!(backend.get("k").await.unwrap(), b"value");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let backend = NetworkBackend::new(LoopbackClient::new(store).unwrap());

        let err: StorageError = backend.get("missing").await.unwrap_err();
        assert_eq!(err, StorageError::not_found("missing"));
    }

    #[tokio::test]
    async fn test_disconnected_submission_fails() {
        let store = Arc::new(MemoryStore::new());
        let backend = NetworkBackend::new(LoopbackClient::new(store).unwrap());
        backend.client().set_connected(false);

        assert!(backend.put("k", vec![1]).await.unwrap_err().is_transient());
        assert!(backend.get("k").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_disconnect_while_queued_fails_acknowledgement() {
        let store = Arc::new(MemoryStore::new());
        let client = LoopbackClient::with_latency(store.clone(), Duration::from_millis(50)).unwrap();
        let backend = NetworkBackend::new(client);

        let completion: Completion = backend.put("k", vec![1, 2, 3]).await.unwrap();
        backend.client().set_connected(false);

        let err: StorageError = completion.wait().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_drop_joins_idle_worker() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let store = Arc::new(MemoryStore::new());
            for _ in 0..500 {
                let client = LoopbackClient::new(store.clone()).unwrap();
                client.set_connected(false);
                client.set_connected(true);
                drop(client);
            }
            let _ = tx.send(());
        });

        assert!(
            rx.recv_timeout(Duration::from_secs(30)).is_ok(),
            "loopback worker missed its shutdown wakeup"
        );
    }

    #[tokio::test]
    async fn test_dropped_callback_is_unavailable() {
        struct Blackhole;

        impl NetworkClient for Blackhole {
            fn put(&self, _: &str, _: Vec<u8>, _: Response<()>) -> Result<(), StorageError> {
                Ok(())
            }
            fn get(&self, _: &str, _: Response<Vec<u8>>) -> Result<(), StorageError> {
                Ok(())
            }
            fn delete(&self, _: &str, _: Response<()>) -> Result<(), StorageError> {
                Ok(())
            }
        }

        let backend = NetworkBackend::new(Blackhole);
        assert!(backend.get("k").await.unwrap_err().is_transient());
        let completion: Completion = backend.delete("k").await.unwrap();
        assert!(completion.wait().await.unwrap_err().is_transient());
    }
}
