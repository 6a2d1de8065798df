//! Dedicated async runtime for bridging synchronous file operations to async storage.
//!
//! File reads run synchronously on the caller's thread, but a cache miss has to
//! reach an async `StorageBackend`. The executor owns its own Tokio runtime on a
//! background thread, so callers block on a plain oneshot channel rather than on
//! a runtime they might already be running inside of.
//!
//! # Architecture
//!
//! ```text
//! Caller Thread                  Executor Thread
//! ─────────────                  ───────────────
//!     │                               │
//!     │ submit(future) ──────────────►│
//!     │                               │ spawn task
//!     │ blocking_recv() ◄─────────────│ send result
//!     │                               │
//! ```
//!
//! The same runtime also hosts deferred flush tasks (see `scheduler`).

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during executor operations.
#[derive(Debug, Clone)]
pub enum ExecutorError {
    /// The runtime thread could not be started.
    Startup(String),
    /// The executor has been shut down or the background thread died.
    Shutdown,
    /// The operation timed out.
    Timeout {
        /// The timeout duration that was exceeded.
        duration: Duration,
    },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::Startup(msg) => write!(f, "Executor failed to start: {}", msg),
            ExecutorError::Shutdown => write!(f, "Executor has been shut down"),
            ExecutorError::Timeout { duration } => {
                write!(f, "Operation timed out after {:?}", duration)
            }
        }
    }
}

impl std::error::Error for ExecutorError {}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the async executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of Tokio worker threads.
    pub worker_threads: usize,
    /// Channel buffer size for work submission.
    pub queue_size: usize,
    /// Default timeout for blocking operations (None = no timeout).
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            queue_size: 1024,
            default_timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// Set the number of worker threads.
    ///
    /// # Arguments
    /// * `worker_threads` - Number of Tokio worker threads
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Set the submission queue size.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set default timeout for blocking operations.
    ///
    /// # Arguments
    /// * `timeout` - Default timeout duration (None = no timeout)
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

// ============================================================================
// Async Executor
// ============================================================================

/// Async executor that runs in a dedicated background thread.
///
/// Synchronous callers submit work via a channel and block on a typed oneshot
/// receiver. Timers and deferred tasks are spawned through `handle`.
pub struct AsyncExecutor {
    /// Channel to submit async work.
    tx: mpsc::Sender<BoxFuture<'static, ()>>,
    /// Handle to the runtime, for timers and direct spawns.
    handle: Handle,
    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
    /// Handle to the background thread.
    thread: Option<JoinHandle<()>>,
    /// Whether the executor is still running.
    running: Arc<AtomicBool>,
    /// Default timeout for blocking operations.
    default_timeout: Option<Duration>,
}

impl AsyncExecutor {
    /// Start an executor with a dedicated runtime thread.
    ///
    /// # Arguments
    /// * `config` - Executor configuration
    ///
    /// # Returns
    /// The running executor, or `ExecutorError::Startup` if the thread or
    /// runtime could not be created.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let (tx, rx) = mpsc::channel::<BoxFuture<'static, ()>>(config.queue_size.max(1));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<Handle, String>>();
        let cancel_token = CancellationToken::new();
        let token_clone: CancellationToken = cancel_token.clone();
        let worker_threads: usize = config.worker_threads.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone: Arc<AtomicBool> = running.clone();

        let thread: JoinHandle<()> = std::thread::Builder::new()
            .name("drive-async-executor".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(worker_threads)
                    .thread_name("drive-io-worker")
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        running_clone.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rt.handle().clone()));

                rt.block_on(async move {
                    let mut rx: mpsc::Receiver<BoxFuture<'static, ()>> = rx;

                    loop {
                        tokio::select! {
                            biased;

                            _ = token_clone.cancelled() => break,
                            item = rx.recv() => {
                                match item {
                                    Some(work) => {
                                        tokio::spawn(work);
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                });

                running_clone.store(false, Ordering::Release);
            })
            .map_err(|e| ExecutorError::Startup(e.to_string()))?;

        let handle: Handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(msg)) => return Err(ExecutorError::Startup(msg)),
            Err(_) => return Err(ExecutorError::Startup("runtime thread exited".to_string())),
        };

        tracing::debug!(worker_threads, "async executor started");

        Ok(Self {
            tx,
            handle,
            cancel_token,
            thread: Some(thread),
            running,
            default_timeout: config.default_timeout,
        })
    }

    /// Start an executor with default settings.
    pub fn with_defaults() -> Result<Self, ExecutorError> {
        Self::new(ExecutorConfig::default())
    }

    /// Handle to the executor's runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Execute an async operation and block until complete.
    ///
    /// Must not be called from inside an async context: the caller blocks on a
    /// channel until the executor's runtime finishes the work.
    ///
    /// # Arguments
    /// * `future` - The async operation to execute
    ///
    /// # Returns
    /// Ok(result) on success, Err on executor shutdown or default timeout.
    pub fn block_on<F, T>(&self, future: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self.default_timeout {
            Some(timeout) => self.block_on_timeout(future, timeout),
            None => self.submit_and_wait(future),
        }
    }

    /// Execute an async operation with an explicit timeout.
    ///
    /// # Returns
    /// Ok(result) on success, Err(Timeout) if deadline exceeded.
    pub fn block_on_timeout<F, T>(&self, future: F, timeout: Duration) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let wrapped = async move {
            match tokio::time::timeout(timeout, future).await {
                Ok(value) => Ok(value),
                Err(_) => Err(ExecutorError::Timeout { duration: timeout }),
            }
        };
        self.submit_and_wait(wrapped)?
    }

    /// Submit work and wait on its typed result channel.
    fn submit_and_wait<F, T>(&self, future: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_running() {
            return Err(ExecutorError::Shutdown);
        }

        let (result_tx, result_rx) = oneshot::channel::<T>();
        let work: BoxFuture<'static, ()> = async move {
            let result: T = future.await;
            // Ignore send errors - caller may have dropped
            let _ = result_tx.send(result);
        }
        .boxed();

        if self.tx.blocking_send(work).is_err() {
            return Err(ExecutorError::Shutdown);
        }

        result_rx.blocking_recv().map_err(|_| ExecutorError::Shutdown)
    }

    /// Check if the executor is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.cancel_token.is_cancelled()
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.cancel_token.cancel();

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
