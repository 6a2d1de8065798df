//! Open-file buffering for rusty-drive.
//!
//! This crate provides the in-process representation of an open file whose
//! content lives in a content-addressed chunk store. Reads and writes land in
//! a per-file buffer bounded by a memory ceiling and a disk staging ceiling;
//! closing a dirty file schedules a deferred flush that puts the changed
//! chunks and records the new data map.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: FileRegistry (files by id, deferred close, explicit flush)
//! Layer 2: File (attributes + open/read/write/truncate/close state machine)
//! Layer 1: Primitives (ChunkBuffer, MemoryPool, StagingArea, Scheduler, AsyncExecutor)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rusty_drive_storage::{DirectBackend, MemoryStore, StorageBackend};
//! use rusty_drive_vfs::{FileRegistry, VfsOptions};
//!
//! let storage: Arc<dyn StorageBackend> = Arc::new(DirectBackend::new(MemoryStore::new()));
//! let registry = FileRegistry::with_runtime(storage, VfsOptions::default())?;
//!
//! let id = registry.create("foo", false);
//! registry.open(id)?;
//! registry.write(id, b"output text", 0)?;
//! let ticket = registry.close(id)?;
//! let outcome = ticket.blocking_wait()?;
//! ```

pub mod buffer;
pub mod chunking;
pub mod error;
pub mod executor;
pub mod file;
pub mod memory_pool;
pub mod options;
pub mod registry;
pub mod scheduler;
pub mod staging;

pub use buffer::{ChunkBuffer, FetchFn, FlushedContent};
pub use chunking::{split_range, ChunkLayout, ChunkSpan, MAX_CHUNK_COUNT};
pub use error::VfsError;
pub use executor::{AsyncExecutor, ExecutorConfig, ExecutorError};
pub use file::{CloseAction, File, FileState, FlushReport, OpenAction};
pub use memory_pool::{MemoryPool, MemoryPoolConfig, MemoryPoolError, MemoryPoolStats, PoolBlock};
pub use options::{
    DiskUsage, MemoryUsage, VfsOptions, DEFAULT_DISK_USAGE_MAX, DEFAULT_INACTIVITY_DELAY,
    DEFAULT_MEMORY_USAGE_MAX,
};
pub use registry::{CloseOutcome, CloseTicket, FileId, FileRegistry};
pub use scheduler::{ManualScheduler, RuntimeScheduler, Scheduler, Task, TaskHandle};
pub use staging::StagingArea;
