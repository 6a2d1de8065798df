//! One file: its attributes plus, while open, its editable content.
//!
//! ```text
//!            open                 close (dirty)
//! Unopened ───────► Open ──────────────────────► ClosePending { generation }
//!    Closed ──────►  │  ◄──────────────────────────┘ open (re-attach)
//!                    │ close (clean)                │ begin_flush(generation)
//!                    ▼                              ▼
//!                  Closed ◄──── complete_flush ── Flushing
//! ```
//!
//! Every dirty close bumps the close generation. A deferred task only flushes
//! if it still holds the current generation, so reopening or closing again
//! before the task starts supersedes it.

use std::path::Path;
use std::time::SystemTime;

use rusty_drive_model::{DataMap, DirectoryId, MetaData};

use crate::buffer::{ChunkBuffer, FetchFn, FlushedContent};
use crate::error::VfsError;
use crate::options::{DiskUsage, MemoryUsage};

/// Lifecycle state of a `File`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Never opened.
    Unopened,
    /// Content buffer attached; reads and writes allowed.
    Open,
    /// Closed while dirty; the buffer waits for the deferred flush.
    ClosePending { generation: u64 },
    /// The deferred flush is running.
    Flushing,
    /// Buffer released.
    Closed,
}

/// What `File::close` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Nothing to persist; the buffer was released immediately.
    Detached,
    /// A flush for this generation should be scheduled.
    Deferred { generation: u64 },
}

/// What `File::open` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAction {
    /// A new buffer was attached over the persisted content.
    Attached,
    /// A pending close was superseded and its buffer taken back.
    Reattached,
}

/// Outcome of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Close generation the flush ran for (0 for an explicit flush of an open file).
    pub generation: u64,
    /// Content length that was persisted.
    pub size: u64,
    /// Chunks in the new data map.
    pub chunk_count: usize,
    /// Distinct chunks submitted to storage.
    pub chunks_put: usize,
    /// Bytes submitted to storage.
    pub bytes_put: u64,
}

/// A file or directory entry and its open-session state.
#[derive(Debug)]
pub struct File {
    meta_data: MetaData,
    buffer: Option<ChunkBuffer>,
    content_changed: bool,
    close_generation: u64,
    state: FileState,
    grandparent_directory_id: Option<DirectoryId>,
    parent_directory_id: Option<DirectoryId>,
}

impl File {
    /// Create a new, unopened entry stamped now.
    ///
    /// A new regular file counts as changed, so that even an empty file is
    /// persisted by its first close.
    pub fn create(name: impl Into<String>, is_directory: bool) -> Self {
        Self::with_meta_data(MetaData::new(name, is_directory), !is_directory)
    }

    /// Wrap attributes loaded from a directory listing.
    pub fn from_meta_data(meta_data: MetaData) -> Self {
        Self::with_meta_data(meta_data, false)
    }

    fn with_meta_data(meta_data: MetaData, content_changed: bool) -> Self {
        Self {
            meta_data,
            buffer: None,
            content_changed,
            close_generation: 0,
            state: FileState::Unopened,
            grandparent_directory_id: None,
            parent_directory_id: None,
        }
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    pub fn name(&self) -> &str {
        self.meta_data.name()
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == FileState::Open
    }

    /// True if content changed since the last successful flush.
    pub fn content_changed(&self) -> bool {
        self.content_changed
    }

    pub fn close_generation(&self) -> u64 {
        self.close_generation
    }

    /// The attached buffer, while open or pending close.
    pub fn buffer(&self) -> Option<&ChunkBuffer> {
        self.buffer.as_ref()
    }

    pub fn grandparent_directory_id(&self) -> Option<&DirectoryId> {
        self.grandparent_directory_id.as_ref()
    }

    pub fn parent_directory_id(&self) -> Option<&DirectoryId> {
        self.parent_directory_id.as_ref()
    }

    /// Record where this entry sits in the directory tree.
    pub fn set_directory_ids(
        &mut self,
        grandparent: Option<DirectoryId>,
        parent: Option<DirectoryId>,
    ) {
        self.grandparent_directory_id = grandparent;
        self.parent_directory_id = parent;
    }

    // ========================================================================
    // Open / Read / Write / Truncate
    // ========================================================================

    /// Attach an editable buffer.
    ///
    /// # Arguments
    /// * `fetch` - Retrieval callback for persisted chunks
    /// * `memory` - Memory ceiling for unflushed content
    /// * `disk` - Disk staging ceiling for unflushed content
    /// * `staging_location` - Directory the staging area is created under
    /// * `chunk_size` - Granularity for content with no persisted chunks
    ///
    /// # Returns
    /// `Reattached` if a pending close was superseded (its buffer, with any
    /// unflushed data, is used again); `Attached` otherwise.
    pub fn open(
        &mut self,
        fetch: FetchFn,
        memory: MemoryUsage,
        disk: DiskUsage,
        staging_location: &Path,
        chunk_size: u64,
    ) -> Result<OpenAction, VfsError> {
        let data_map: DataMap = match self.meta_data.data_map() {
            Some(map) => map.clone(),
            None => {
                return Err(VfsError::IsDirectory {
                    name: self.name().to_string(),
                })
            }
        };

        match self.state {
            FileState::Open => Err(VfsError::AlreadyOpen {
                name: self.name().to_string(),
            }),
            FileState::Flushing => Err(VfsError::FlushInProgress {
                name: self.name().to_string(),
            }),
            FileState::ClosePending { generation } if self.buffer.is_some() => {
                self.close_generation += 1;
                self.state = FileState::Open;
                tracing::debug!(
                    file = self.name(),
                    superseded = generation,
                    "reopened before deferred close"
                );
                Ok(OpenAction::Reattached)
            }
            FileState::Unopened | FileState::Closed | FileState::ClosePending { .. } => {
                let mut buffer: ChunkBuffer = ChunkBuffer::open(
                    &data_map,
                    fetch,
                    memory,
                    disk,
                    staging_location,
                    chunk_size,
                )?;
                // A failed flush leaves the attributes ahead of the data map.
                if buffer.size() != self.meta_data.size() {
                    buffer.truncate(self.meta_data.size())?;
                }
                self.buffer = Some(buffer);
                self.state = FileState::Open;
                tracing::debug!(file = self.name(), size = self.meta_data.size(), "file opened");
                Ok(OpenAction::Attached)
            }
        }
    }

    /// Read into `buf` from `offset`.
    ///
    /// # Returns
    /// Bytes read; 0 at or past the end of the file.
    pub fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, VfsError> {
        let count: usize = self.open_buffer()?.read(buf, offset)?;
        self.meta_data.touch_access(SystemTime::now());
        Ok(count)
    }

    /// Write `data` at `offset`.
    ///
    /// # Returns
    /// `data.len()`. Exceeding the usage ceilings is only reported by the flush.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<usize, VfsError> {
        let buffer: &mut ChunkBuffer = self.open_buffer()?;
        let written: usize = buffer.write(data, offset)?;
        let size: u64 = buffer.size();
        self.record_change(size);
        Ok(written)
    }

    /// Set the content length.
    pub fn truncate(&mut self, new_size: u64) -> Result<(), VfsError> {
        self.open_buffer()?.truncate(new_size)?;
        self.record_change(new_size);
        Ok(())
    }

    fn open_buffer(&mut self) -> Result<&mut ChunkBuffer, VfsError> {
        match (&self.state, self.buffer.as_mut()) {
            (FileState::Open, Some(buffer)) => Ok(buffer),
            _ => Err(VfsError::NotOpen {
                name: self.meta_data.name().to_string(),
            }),
        }
    }

    fn record_change(&mut self, size: u64) {
        self.meta_data.set_size(size);
        self.meta_data.touch_write(SystemTime::now());
        self.content_changed = true;
    }

    // ========================================================================
    // Close / Flush
    // ========================================================================

    /// Begin releasing the buffer.
    ///
    /// Clean files detach at once. Dirty files move to `ClosePending` under a
    /// new generation; closing again while pending re-arms with another one.
    pub fn close(&mut self) -> Result<CloseAction, VfsError> {
        match self.state {
            FileState::Open if !self.content_changed => {
                self.buffer = None;
                self.state = FileState::Closed;
                tracing::debug!(file = self.name(), "clean close");
                Ok(CloseAction::Detached)
            }
            FileState::Open | FileState::ClosePending { .. } => {
                self.close_generation += 1;
                let generation: u64 = self.close_generation;
                self.state = FileState::ClosePending { generation };
                tracing::debug!(file = self.name(), generation, "close deferred");
                Ok(CloseAction::Deferred { generation })
            }
            FileState::Unopened | FileState::Flushing | FileState::Closed => Err(VfsError::NotOpen {
                name: self.name().to_string(),
            }),
        }
    }

    /// Start the deferred flush for `generation`.
    ///
    /// # Returns
    /// The buffer to flush, or None if the generation was superseded.
    pub fn begin_flush(&mut self, generation: u64) -> Option<ChunkBuffer> {
        match self.state {
            FileState::ClosePending { generation: current } if current == generation => {
                let buffer: ChunkBuffer = self.buffer.take()?;
                self.state = FileState::Flushing;
                Some(buffer)
            }
            _ => {
                tracing::trace!(
                    file = self.name(),
                    generation,
                    current = self.close_generation,
                    "stale deferred close ignored"
                );
                None
            }
        }
    }

    /// Finish the deferred flush and release the file.
    ///
    /// On success the new data map becomes the persisted content. On failure
    /// the buffered changes are gone, but the attributes keep the size the
    /// caller last saw and the file stays marked as changed.
    pub fn complete_flush(
        &mut self,
        generation: u64,
        result: Result<FlushedContent, VfsError>,
    ) -> Result<FlushReport, VfsError> {
        self.state = FileState::Closed;
        self.buffer = None;
        self.apply_flush(generation, result)
    }

    /// Take the buffer of an open file for an explicit flush.
    pub fn begin_sync(&mut self) -> Result<ChunkBuffer, VfsError> {
        if self.state != FileState::Open {
            return Err(VfsError::NotOpen {
                name: self.name().to_string(),
            });
        }
        let buffer: ChunkBuffer = self.buffer.take().ok_or_else(|| VfsError::NotOpen {
            name: self.name().to_string(),
        })?;
        self.state = FileState::Flushing;
        Ok(buffer)
    }

    /// Give the buffer back after an explicit flush. The file stays open.
    pub fn finish_sync(
        &mut self,
        buffer: ChunkBuffer,
        result: Result<FlushedContent, VfsError>,
    ) -> Result<FlushReport, VfsError> {
        self.buffer = Some(buffer);
        self.state = FileState::Open;
        self.apply_flush(0, result)
    }

    /// An explicit flush lost its buffer (the executor went away mid-flight).
    pub fn abandon_sync(&mut self) {
        self.buffer = None;
        self.state = FileState::Closed;
    }

    fn apply_flush(
        &mut self,
        generation: u64,
        result: Result<FlushedContent, VfsError>,
    ) -> Result<FlushReport, VfsError> {
        let flushed: FlushedContent = result?;
        let report = FlushReport {
            generation,
            size: flushed.data_map.size,
            chunk_count: flushed.data_map.chunk_count(),
            chunks_put: flushed.chunks_put,
            bytes_put: flushed.bytes_put,
        };
        self.meta_data.set_data_map(flushed.data_map)?;
        self.content_changed = false;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rusty_drive_model::{ChunkAddress, FileType};
    use rusty_drive_storage::{DirectBackend, MemoryStore};
    use tempfile::TempDir;

    use super::*;

    fn no_fetch() -> FetchFn {
        Arc::new(|address: &ChunkAddress| {
            Err(VfsError::NotFound {
                key: address.to_string(),
            })
        })
    }

    fn open(file: &mut File, dir: &TempDir) -> Result<OpenAction, VfsError> {
        file.open(
            no_fetch(),
            MemoryUsage(4096),
            DiskUsage(4096),
            dir.path(),
            1024,
        )
    }

    #[test]
    fn test_operations_require_open() {
        let mut file = File::create("foo", false);
        let mut buf: [u8; 4] = [0; 4];
        assert!(matches!(file.read(&mut buf, 0), Err(VfsError::NotOpen { .. })));
        assert!(matches!(file.write(b"x", 0), Err(VfsError::NotOpen { .. })));
        assert!(matches!(file.truncate(1), Err(VfsError::NotOpen { .. })));
        assert!(matches!(file.close(), Err(VfsError::NotOpen { .. })));
    }

    #[test]
    fn test_double_open_rejected() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create("foo", false);
        assert_eq!(open(&mut file, &dir).unwrap(), OpenAction::Attached);
        assert!(matches!(open(&mut file, &dir), Err(VfsError::AlreadyOpen { .. })));
    }

    #[test]
    fn test_directory_cannot_be_opened() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create("docs", true);
        assert_eq!(file.meta_data().file_type(), FileType::Directory);
        assert!(!file.content_changed());
        assert!(matches!(open(&mut file, &dir), Err(VfsError::IsDirectory { .. })));
    }

    #[test]
    fn test_clean_close_detaches() {
        let dir = TempDir::new().unwrap();
        let mut file = File::from_meta_data(MetaData::new("loaded", false));
        open(&mut file, &dir).unwrap();
        let mut buf: [u8; 8] = [0; 8];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 0);

        assert_eq!(file.close().unwrap(), CloseAction::Detached);
        assert_eq!(file.state(), FileState::Closed);
        assert!(file.buffer().is_none());
    }

    #[test]
    fn test_close_generations_supersede() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create("foo", false);
        open(&mut file, &dir).unwrap();
        file.write(b"abc", 0).unwrap();

        assert_eq!(file.close().unwrap(), CloseAction::Deferred { generation: 1 });
        assert_eq!(open(&mut file, &dir).unwrap(), OpenAction::Reattached);
        let mut buf: [u8; 3] = [0; 3];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 3);
        assert_eq!(&buf, b"abc");

        assert_eq!(file.close().unwrap(), CloseAction::Deferred { generation: 3 });
        assert!(file.begin_flush(1).is_none());
        assert_eq!(file.state(), FileState::ClosePending { generation: 3 });
        assert!(file.begin_flush(3).is_some());
        assert_eq!(file.state(), FileState::Flushing);
        assert!(matches!(open(&mut file, &dir), Err(VfsError::FlushInProgress { .. })));
    }

    #[tokio::test]
    async fn test_flush_commits_data_map() {
        let dir = TempDir::new().unwrap();
        let backend = DirectBackend::new(MemoryStore::new());
        let mut file = File::create("foo", false);
        open(&mut file, &dir).unwrap();
        file.write(b"output text", 0).unwrap();

        let CloseAction::Deferred { generation } = file.close().unwrap() else {
            panic!("dirty close must be deferred");
        };
        let mut buffer: ChunkBuffer = file.begin_flush(generation).unwrap();
        let result = buffer.flush(&backend).await;
        drop(buffer);

        let report: FlushReport = file.complete_flush(generation, result).unwrap();
        assert_eq!(report.size, 11);
        assert_eq!(report.chunk_count, 1);
        assert!(!file.content_changed());
        assert_eq!(file.state(), FileState::Closed);
        assert_eq!(file.meta_data().data_map().unwrap().size, 11);
        assert_eq!(file.meta_data().size(), 11);
    }

    #[test]
    fn test_failed_flush_keeps_size_and_change_flag() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create("foo", false);
        open(&mut file, &dir).unwrap();
        file.truncate(500).unwrap();
        let CloseAction::Deferred { generation } = file.close().unwrap() else {
            panic!("dirty close must be deferred");
        };
        file.begin_flush(generation).unwrap();

        let err = file
            .complete_flush(
                generation,
                Err(VfsError::BackendUnavailable {
                    message: "down".to_string(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, VfsError::BackendUnavailable { .. }));
        assert!(file.content_changed());
        assert_eq!(file.meta_data().size(), 500);

        // Reopening rebuilds the buffer at the size callers last saw.
        open(&mut file, &dir).unwrap();
        let mut buf: Vec<u8> = vec![1; 600];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 500);
        assert!(buf[..500].iter().all(|&b| b == 0));
    }
}
