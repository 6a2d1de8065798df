//! Registry of files by id, and the deferred close that flushes them.
//!
//! The registry owns every `File`. Callers and deferred tasks refer to a file
//! by its `FileId`; a scheduled close captures a weak handle to the registry
//! plus `(FileId, generation)`, never the file itself.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use rusty_drive_model::{ChunkAddress, DirectoryId, MetaData};
use rusty_drive_storage::StorageBackend;
use tokio::sync::oneshot;

use crate::buffer::{ChunkBuffer, FetchFn, FlushedContent};
use crate::error::VfsError;
use crate::executor::{AsyncExecutor, ExecutorError};
use crate::file::{CloseAction, File, FileState, FlushReport, OpenAction};
use crate::options::VfsOptions;
use crate::scheduler::{RuntimeScheduler, Scheduler, TaskHandle};

// ============================================================================
// Ids and tickets
// ============================================================================

/// Stable identifier of a file held by a `FileRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u64);

impl FileId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file-{}", self.0)
    }
}

/// How a close finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The file was clean; nothing was persisted.
    Detached,
    /// The deferred flush ran and persisted the content.
    Flushed(FlushReport),
}

type CloseResult = Result<CloseOutcome, VfsError>;

/// Receipt for a `close` call.
///
/// Resolves when the close is final: at once for a clean file, or when the
/// deferred flush has run. Closes that were coalesced all resolve with the
/// one flush that finally ran.
#[derive(Debug)]
pub struct CloseTicket {
    file: FileId,
    rx: oneshot::Receiver<CloseResult>,
}

impl CloseTicket {
    fn ready(file: FileId, result: CloseResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { file, rx }
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    /// Wait for the close to finish.
    pub async fn wait(self) -> CloseResult {
        self.rx.await.unwrap_or_else(|_| Err(abandoned(self.file)))
    }

    /// Block the current thread until the close finishes. Not for async contexts.
    pub fn blocking_wait(self) -> CloseResult {
        let file: FileId = self.file;
        self.rx.blocking_recv().unwrap_or_else(|_| Err(abandoned(file)))
    }

    /// The outcome, if the close has finished.
    pub fn try_result(&mut self) -> Option<CloseResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(abandoned(self.file))),
        }
    }
}

fn abandoned(file: FileId) -> VfsError {
    VfsError::Executor(format!("deferred close of {} was dropped before it ran", file))
}

// ============================================================================
// Registry state
// ============================================================================

/// A file plus its pending-close bookkeeping.
struct Slot {
    file: File,
    task: Option<TaskHandle>,
    waiters: Vec<oneshot::Sender<CloseResult>>,
    last_flush: Option<Result<FlushReport, VfsError>>,
}

impl Slot {
    fn new(file: File) -> Self {
        Self {
            file,
            task: None,
            waiters: Vec::new(),
            last_flush: None,
        }
    }
}

/// State deferred tasks reach through a `Weak`.
struct Shared {
    files: DashMap<FileId, Arc<Mutex<Slot>>>,
    storage: Arc<dyn StorageBackend>,
}

impl Shared {
    fn slot(&self, id: FileId) -> Option<Arc<Mutex<Slot>>> {
        self.files.get(&id).map(|entry| entry.value().clone())
    }
}

/// Owner of every file, its open buffers and its deferred closes.
pub struct FileRegistry {
    shared: Arc<Shared>,
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<AsyncExecutor>,
    options: VfsOptions,
    next_id: AtomicU64,
}

impl FileRegistry {
    /// Create a registry.
    ///
    /// # Arguments
    /// * `storage` - Backend that flushes put chunks to and reads fetch from
    /// * `scheduler` - Where deferred closes are queued
    /// * `executor` - Runtime used to call the async backend from sync operations
    /// * `options` - Ceilings, chunk size, inactivity delay and staging location
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        scheduler: Arc<dyn Scheduler>,
        executor: Arc<AsyncExecutor>,
        options: VfsOptions,
    ) -> Result<Self, VfsError> {
        options.validate()?;
        tracing::info!(
            memory_usage_max = options.memory_usage_max,
            disk_usage_max = options.disk_usage_max,
            chunk_size = options.chunk_size,
            inactivity_delay_ms = options.inactivity_delay_ms,
            delivery = ?storage.delivery(),
            "file registry created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                files: DashMap::new(),
                storage,
            }),
            scheduler,
            executor,
            options,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create a registry with its own executor and timer-based scheduler.
    pub fn with_runtime(
        storage: Arc<dyn StorageBackend>,
        options: VfsOptions,
    ) -> Result<Self, VfsError> {
        let executor: Arc<AsyncExecutor> = Arc::new(AsyncExecutor::new(options.executor.clone())?);
        let scheduler: Arc<dyn Scheduler> = Arc::new(RuntimeScheduler::for_executor(&executor));
        Self::new(storage, scheduler, executor, options)
    }

    pub fn options(&self) -> &VfsOptions {
        &self.options
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.shared.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.files.is_empty()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Create a new, unopened file or directory.
    pub fn create(&self, name: impl Into<String>, is_directory: bool) -> FileId {
        self.register(File::create(name, is_directory))
    }

    /// Register an entry loaded from a directory listing.
    pub fn insert(&self, meta_data: MetaData) -> FileId {
        self.register(File::from_meta_data(meta_data))
    }

    fn register(&self, file: File) -> FileId {
        let id = FileId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(file = %id, name = file.name(), "file registered");
        self.shared.files.insert(id, Arc::new(Mutex::new(Slot::new(file))));
        id
    }

    /// Forget a file. Fails if it is open or has a close in flight.
    pub fn remove(&self, id: FileId) -> Result<MetaData, VfsError> {
        let slot: Arc<Mutex<Slot>> = self.slot(id)?;
        {
            let guard = slot.lock();
            match guard.file.state() {
                FileState::Unopened | FileState::Closed => {}
                FileState::Flushing => {
                    return Err(VfsError::FlushInProgress {
                        name: guard.file.name().to_string(),
                    })
                }
                FileState::Open | FileState::ClosePending { .. } => {
                    return Err(VfsError::AlreadyOpen {
                        name: guard.file.name().to_string(),
                    })
                }
            }
        }
        self.shared.files.remove(&id);
        let meta_data: MetaData = slot.lock().file.meta_data().clone();
        tracing::debug!(file = %id, "file removed");
        Ok(meta_data)
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Open a file for content I/O.
    ///
    /// Reopening a file whose close is still pending cancels the scheduled
    /// flush and carries on with the retained buffer.
    pub fn open(&self, id: FileId) -> Result<(), VfsError> {
        let slot: Arc<Mutex<Slot>> = self.slot(id)?;
        let mut guard = slot.lock();
        let action: OpenAction = guard.file.open(
            self.fetch_fn(),
            self.options.memory_usage(),
            self.options.disk_usage(),
            &self.options.staging_dir,
            self.options.chunk_size,
        )?;
        if action == OpenAction::Reattached {
            if let Some(task) = guard.task.take() {
                task.cancel();
            }
        }
        Ok(())
    }

    /// Read into `buf` from `offset`.
    pub fn read(&self, id: FileId, buf: &mut [u8], offset: u64) -> Result<usize, VfsError> {
        self.with_file(id, |file| file.read(buf, offset))
    }

    /// Write `data` at `offset`.
    pub fn write(&self, id: FileId, data: &[u8], offset: u64) -> Result<usize, VfsError> {
        self.with_file(id, |file| file.write(data, offset))
    }

    /// Set a file's content length.
    pub fn truncate(&self, id: FileId, new_size: u64) -> Result<(), VfsError> {
        self.with_file(id, |file| file.truncate(new_size))
    }

    /// Close a file.
    ///
    /// A dirty file is flushed by a task scheduled after the inactivity
    /// delay; this call does not wait for it.
    pub fn close(&self, id: FileId) -> Result<CloseTicket, VfsError> {
        let slot: Arc<Mutex<Slot>> = self.slot(id)?;
        let mut guard = slot.lock();

        let generation: u64 = match guard.file.close()? {
            CloseAction::Detached => return Ok(CloseTicket::ready(id, Ok(CloseOutcome::Detached))),
            CloseAction::Deferred { generation } => generation,
        };

        if let Some(previous) = guard.task.take() {
            previous.cancel();
        }
        let (tx, rx) = oneshot::channel();
        guard.waiters.push(tx);

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let delay = self.options.inactivity_delay();
        let handle: TaskHandle = self
            .scheduler
            .schedule_after(delay, run_deferred_close(shared, id, generation).boxed());
        guard.task = Some(handle);
        tracing::debug!(file = %id, generation, delay_ms = delay.as_millis() as u64, "deferred close scheduled");

        Ok(CloseTicket { file: id, rx })
    }

    /// Persist an open file's content now, without closing it.
    pub fn flush(&self, id: FileId) -> Result<FlushReport, VfsError> {
        let slot: Arc<Mutex<Slot>> = self.slot(id)?;
        let mut buffer: ChunkBuffer = slot.lock().file.begin_sync()?;

        let storage: Arc<dyn StorageBackend> = self.shared.storage.clone();
        let flushed: Result<(ChunkBuffer, Result<FlushedContent, VfsError>), ExecutorError> =
            self.executor.block_on(async move {
                let result = buffer.flush(storage.as_ref()).await;
                (buffer, result)
            });

        let mut guard = slot.lock();
        let outcome: Result<FlushReport, VfsError> = match flushed {
            Ok((buffer, result)) => guard.file.finish_sync(buffer, result),
            Err(e) => {
                guard.file.abandon_sync();
                Err(e.into())
            }
        };
        log_flush(id, &outcome);
        guard.last_flush = Some(outcome.clone());
        outcome
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Snapshot of a file's attributes.
    pub fn meta_data(&self, id: FileId) -> Result<MetaData, VfsError> {
        Ok(self.slot(id)?.lock().file.meta_data().clone())
    }

    pub fn state(&self, id: FileId) -> Result<FileState, VfsError> {
        Ok(self.slot(id)?.lock().file.state())
    }

    /// Record a file's position in the directory tree.
    pub fn set_directory_ids(
        &self,
        id: FileId,
        grandparent: Option<DirectoryId>,
        parent: Option<DirectoryId>,
    ) -> Result<(), VfsError> {
        self.slot(id)?.lock().file.set_directory_ids(grandparent, parent);
        Ok(())
    }

    /// Outcome of the most recent flush of a file, if any ran.
    pub fn last_flush(&self, id: FileId) -> Result<Option<Result<FlushReport, VfsError>>, VfsError> {
        Ok(self.slot(id)?.lock().last_flush.clone())
    }

    fn slot(&self, id: FileId) -> Result<Arc<Mutex<Slot>>, VfsError> {
        self.shared.slot(id).ok_or(VfsError::UnknownFile(id))
    }

    fn with_file<T>(
        &self,
        id: FileId,
        op: impl FnOnce(&mut File) -> Result<T, VfsError>,
    ) -> Result<T, VfsError> {
        let slot: Arc<Mutex<Slot>> = self.slot(id)?;
        let mut guard = slot.lock();
        op(&mut guard.file)
    }

    /// Retrieval callback handed to each buffer: a blocking `get` on the
    /// storage backend, run on the registry's executor.
    fn fetch_fn(&self) -> FetchFn {
        let storage: Arc<dyn StorageBackend> = self.shared.storage.clone();
        let executor: Weak<AsyncExecutor> = Arc::downgrade(&self.executor);

        Arc::new(move |address: &ChunkAddress| {
            let executor: Arc<AsyncExecutor> = executor.upgrade().ok_or(ExecutorError::Shutdown)?;
            let storage: Arc<dyn StorageBackend> = storage.clone();
            let key: String = address.to_string();
            tracing::trace!(key = %key, "fetching chunk");
            let data: Vec<u8> = executor.block_on(async move { storage.get(&key).await })??;
            Ok(data)
        })
    }
}

impl fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRegistry")
            .field("files", &self.shared.files.len())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// Deferred close
// ============================================================================

/// Body of a scheduled close: flush if `generation` is still current, then
/// hand the outcome to every waiting ticket.
async fn run_deferred_close(shared: Weak<Shared>, id: FileId, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        tracing::debug!(file = %id, generation, "registry gone before deferred close");
        return;
    };
    let Some(slot) = shared.slot(id) else {
        return;
    };

    let begin = slot.clone();
    let buffer: Option<ChunkBuffer> =
        match lock_off_runtime(move || begin.lock().file.begin_flush(generation)).await {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::error!(file = %id, generation, error = %e, "deferred close could not start");
                return;
            }
        };
    let Some(mut buffer) = buffer else {
        return;
    };

    tracing::debug!(
        file = %id,
        generation,
        unflushed = buffer.unflushed_bytes(),
        resident = buffer.memory_stats().current_size,
        staged = buffer.staged_bytes(),
        over_ceiling = buffer.is_over_ceiling(),
        "deferred close flushing"
    );
    let result: Result<FlushedContent, VfsError> = buffer.flush(shared.storage.as_ref()).await;
    drop(buffer);

    let finish = slot.clone();
    let completed = lock_off_runtime(move || {
        let mut guard = finish.lock();
        let outcome: Result<FlushReport, VfsError> = guard.file.complete_flush(generation, result);
        guard.last_flush = Some(outcome.clone());
        guard.task = None;
        (outcome, std::mem::take(&mut guard.waiters))
    })
    .await;
    let (outcome, waiters) = match completed {
        Ok(completed) => completed,
        Err(e) => {
            tracing::error!(file = %id, generation, error = %e, "deferred close could not complete");
            return;
        }
    };

    log_flush(id, &outcome);
    for waiter in waiters {
        let _ = waiter.send(outcome.clone().map(CloseOutcome::Flushed));
    }
}

/// Run `op`, which takes a slot lock, on the blocking pool.
///
/// A slot lock can be held by a caller that is itself waiting on this runtime
/// (a read fetching a chunk), so runtime workers must never park on one.
async fn lock_off_runtime<T, F>(op: F) -> Result<T, VfsError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| VfsError::Executor(e.to_string()))
}

fn log_flush(id: FileId, outcome: &Result<FlushReport, VfsError>) {
    match outcome {
        Ok(report) => tracing::info!(
            file = %id,
            generation = report.generation,
            size = report.size,
            chunks = report.chunk_count,
            chunks_put = report.chunks_put,
            bytes_put = report.bytes_put,
            "flush complete"
        ),
        Err(e) => tracing::error!(file = %id, error = %e, "flush failed"),
    }
}
