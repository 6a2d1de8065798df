//! Editable content of one open file, backed by content-addressed chunks.
//!
//! A `ChunkBuffer` serves reads and writes at arbitrary offsets over three
//! tiers, checked in this order for every chunk:
//!
//! ```text
//! MemoryPool      resident blocks, dirty or clean          (memory ceiling)
//! StagingArea     dirty blocks spilled to disk             (disk ceiling)
//! persisted       chunk list of the data map at open time  (fetched on miss)
//! ```
//!
//! A chunk that is in none of the tiers is a hole and reads as zeros.
//! Nothing is written to the storage backend until `flush`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rusty_drive_model::{ChunkAddress, ChunkDetails, DataMap, ModelError};
use rusty_drive_storage::{Completion, StorageBackend};

use crate::chunking::{split_range, ChunkLayout, ChunkSpan};
use crate::error::VfsError;
use crate::memory_pool::{MemoryPool, MemoryPoolConfig, MemoryPoolStats};
use crate::options::{DiskUsage, MemoryUsage};
use crate::staging::StagingArea;

/// Retrieval callback: fetch the bytes stored under a chunk address.
///
/// Called synchronously on the thread doing the read or write that missed.
pub type FetchFn = Arc<dyn Fn(&ChunkAddress) -> Result<Vec<u8>, VfsError> + Send + Sync>;

/// Result of a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedContent {
    /// Data map describing the content that is now durable.
    pub data_map: DataMap,
    /// Distinct chunks submitted to the backend.
    pub chunks_put: usize,
    /// Bytes submitted to the backend.
    pub bytes_put: u64,
}

/// Buffered, editable content of one open file.
pub struct ChunkBuffer {
    layout: ChunkLayout,
    size: u64,
    persisted: Vec<ChunkDetails>,
    pool: MemoryPool,
    staging: StagingArea,
    fetch: FetchFn,
    memory_limit: u64,
    disk_limit: u64,
    overflowed: bool,
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("chunk_size", &self.layout.chunk_size)
            .field("size", &self.size)
            .field("persisted_chunks", &self.persisted.len())
            .field("pool", &self.pool.stats())
            .field("staged_bytes", &self.staging.used())
            .finish()
    }
}

impl ChunkBuffer {
    /// Attach a buffer to a file's persisted content.
    ///
    /// Nothing is fetched here; persisted chunks are pulled through `fetch`
    /// the first time a read or write touches them.
    ///
    /// # Arguments
    /// * `data_map` - Persisted content of the file
    /// * `fetch` - Retrieval callback for persisted chunks
    /// * `memory` - Ceiling on bytes resident in memory
    /// * `disk` - Ceiling on bytes spilled to the staging area
    /// * `staging_location` - Directory the private staging area is created under
    /// * `chunk_size` - Granularity for content that has no persisted chunks yet
    pub fn open(
        data_map: &DataMap,
        fetch: FetchFn,
        memory: MemoryUsage,
        disk: DiskUsage,
        staging_location: &Path,
        chunk_size: u64,
    ) -> Result<Self, VfsError> {
        data_map.validate()?;
        let chunk_size: u64 = if data_map.chunks.is_empty() {
            chunk_size
        } else {
            data_map.chunk_size
        };
        if chunk_size == 0 {
            return Err(ModelError::ZeroChunkSize.into());
        }

        Ok(Self {
            layout: ChunkLayout::new(chunk_size),
            size: data_map.size,
            persisted: data_map.chunks.clone(),
            pool: MemoryPool::new(MemoryPoolConfig::with_max_size(memory.0)),
            staging: StagingArea::new(staging_location, disk.0),
            fetch,
            memory_limit: memory.0,
            disk_limit: disk.0,
            overflowed: false,
        })
    }

    /// Logical content length.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes not yet durable: dirty resident blocks plus everything staged.
    pub fn unflushed_bytes(&self) -> u64 {
        self.pool.dirty_size() + self.staging.used()
    }

    /// Combined memory and disk ceiling.
    pub fn usage_limit(&self) -> u64 {
        self.memory_limit.saturating_add(self.disk_limit)
    }

    /// True if unflushed bytes are past the combined ceiling; the next flush
    /// will fail.
    pub fn is_over_ceiling(&self) -> bool {
        self.unflushed_bytes() > self.usage_limit()
    }

    pub fn memory_stats(&self) -> MemoryPoolStats {
        self.pool.stats()
    }

    /// Bytes currently spilled to disk.
    pub fn staged_bytes(&self) -> u64 {
        self.staging.used()
    }

    // ========================================================================
    // Read / Write / Truncate
    // ========================================================================

    /// Copy content starting at `offset` into `buf`.
    ///
    /// # Returns
    /// Bytes copied: `min(buf.len(), size - offset)`, or 0 at or past the end.
    pub fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, VfsError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let count: usize = (buf.len() as u64).min(self.size - offset) as usize;

        let mut pos: usize = 0;
        for span in split_range(self.layout, offset, count) {
            self.read_span(span, &mut buf[pos..pos + span.len])?;
            pos += span.len;
        }
        Ok(count)
    }

    /// Write `data` at `offset`, extending the content if needed.
    ///
    /// Always accepts the whole write. If the ceilings cannot hold the result
    /// the excess stays in memory and the next flush reports it.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<usize, VfsError> {
        if data.is_empty() {
            return Ok(0);
        }
        let end: u64 = self.check_growth(offset.checked_add(data.len() as u64))?;
        if end > self.size {
            self.materialize_tail(self.size)?;
        }

        let mut pos: usize = 0;
        for span in split_range(self.layout, offset, data.len()) {
            self.load_for_write(span.chunk_index)?;
            let src: &[u8] = &data[pos..pos + span.len];
            let start: usize = span.offset_in_chunk as usize;
            self.pool.modify_in_place(span.chunk_index, |block| {
                let stop: usize = start + src.len();
                if block.len() < stop {
                    block.resize(stop, 0);
                }
                block[start..stop].copy_from_slice(src);
            })?;
            pos += span.len;
            self.enforce_ceilings()?;
        }

        self.size = self.size.max(end);
        tracing::trace!(offset, len = data.len(), size = self.size, "buffer write");
        Ok(data.len())
    }

    /// Set the content length. Growth reads as zeros; shrinking discards the tail.
    pub fn truncate(&mut self, new_size: u64) -> Result<(), VfsError> {
        self.check_growth(Some(new_size))?;
        if new_size < self.size {
            let keep: u64 = self.layout.chunk_count(new_size);
            self.pool.remove_from(keep);
            self.staging.remove_from(keep)?;
            self.persisted.truncate(keep as usize);

            if keep > 0 {
                let last: u64 = keep - 1;
                let tail_len: usize = self.layout.chunk_len(last, new_size) as usize;
                self.cut_chunk(last, tail_len)?;
            }
        } else if new_size > self.size {
            self.materialize_tail(self.size)?;
        }

        self.size = new_size;
        self.enforce_ceilings()?;
        tracing::trace!(size = new_size, "buffer truncate");
        Ok(())
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Persist every chunk of the current content and build its data map.
    ///
    /// Fails with `UsageExceeded`, before anything is submitted, if the
    /// unflushed bytes are past the combined ceiling. Unchanged persisted
    /// chunks are reused; every other chunk is put once per distinct address.
    /// Acknowledgements from a network backend are awaited before returning.
    ///
    /// On success the buffer treats the returned data map as its persisted
    /// content, so it can keep serving the file.
    pub async fn flush(&mut self, storage: &dyn StorageBackend) -> Result<FlushedContent, VfsError> {
        let unflushed: u64 = self.unflushed_bytes();
        let limit: u64 = self.usage_limit();
        if unflushed > limit {
            tracing::warn!(unflushed, limit, "flush refused, usage ceiling exceeded");
            return Err(VfsError::UsageExceeded { unflushed, limit });
        }

        let count: u64 = self.layout.chunk_count(self.size);
        let mut chunks: Vec<ChunkDetails> = Vec::with_capacity(count as usize);
        let mut submitted: HashSet<ChunkAddress> = HashSet::new();
        let mut pending: Vec<Completion> = Vec::new();
        let mut zero_addresses: HashMap<u64, ChunkAddress> = HashMap::new();
        let mut chunks_put: usize = 0;
        let mut bytes_put: u64 = 0;

        for index in 0..count {
            let expected: u64 = self.layout.chunk_len(index, self.size);

            let (address, data): (ChunkAddress, Option<Vec<u8>>) = match self.unflushed_chunk(index)? {
                Some(mut data) => {
                    data.resize(expected as usize, 0);
                    (ChunkAddress::of(&data), Some(data))
                }
                None => match self.persisted.get(index as usize) {
                    Some(details) if details.size == expected => {
                        chunks.push(details.clone());
                        continue;
                    }
                    Some(details) => {
                        return Err(ModelError::ChunkSizeMismatch {
                            index: index as usize,
                            expected,
                            actual: details.size,
                        }
                        .into())
                    }
                    // Holes: every zero chunk of one length shares an address.
                    None => {
                        let address: &ChunkAddress = zero_addresses
                            .entry(expected)
                            .or_insert_with(|| ChunkAddress::of(&vec![0; expected as usize]));
                        (address.clone(), None)
                    }
                },
            };

            if submitted.insert(address.clone()) {
                let data: Vec<u8> = data.unwrap_or_else(|| vec![0; expected as usize]);
                let completion: Completion = storage.put(address.as_str(), data).await?;
                pending.push(completion);
                chunks_put += 1;
                bytes_put += expected;
            }
            chunks.push(ChunkDetails {
                address,
                size: expected,
            });
        }

        futures::future::try_join_all(pending.into_iter().map(Completion::wait)).await?;

        let data_map: DataMap = DataMap::from_chunks(self.layout.chunk_size, chunks)?;
        self.rebase(&data_map)?;
        tracing::debug!(
            size = data_map.size,
            chunks = data_map.chunk_count(),
            chunks_put,
            bytes_put,
            "buffer flushed"
        );

        Ok(FlushedContent {
            data_map,
            chunks_put,
            bytes_put,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Reject growth past what one data map can describe.
    ///
    /// `end` is `None` when the requested end overflowed `u64`.
    fn check_growth(&self, end: Option<u64>) -> Result<u64, VfsError> {
        let max: u64 = self.layout.max_size();
        match end {
            Some(end) if end <= max || end <= self.size => Ok(end),
            _ => Err(VfsError::FileTooLarge {
                requested: end.unwrap_or(u64::MAX),
                max,
            }),
        }
    }

    fn read_span(&mut self, span: ChunkSpan, dst: &mut [u8]) -> Result<(), VfsError> {
        let index: u64 = span.chunk_index;
        let offset: usize = span.offset_in_chunk as usize;

        if let Some(data) = self.pool.get(index) {
            copy_padded(data, offset, dst);
            return Ok(());
        }
        if let Some(data) = self.staging.read_chunk(index)? {
            copy_padded(&data, offset, dst);
            return Ok(());
        }
        if let Some(details) = self.persisted.get(index as usize).cloned() {
            let data: Vec<u8> = self.fetch_chunk(&details)?;
            copy_padded(&data, offset, dst);
            self.pool.insert(index, data, false);
            return self.enforce_ceilings();
        }

        dst.fill(0);
        Ok(())
    }

    /// Make chunk `index` resident so it can be modified in place.
    fn load_for_write(&mut self, index: u64) -> Result<(), VfsError> {
        if self.pool.contains(index) {
            return Ok(());
        }
        if let Some(data) = self.staging.read_chunk(index)? {
            self.staging.remove_chunk(index)?;
            self.pool.insert(index, data, true);
            return Ok(());
        }
        if let Some(details) = self.persisted.get(index as usize).cloned() {
            let data: Vec<u8> = self.fetch_chunk(&details)?;
            self.pool.insert(index, data, false);
            return Ok(());
        }
        self.pool.insert(index, Vec::new(), true);
        Ok(())
    }

    /// Before growing past `old_size`, make sure a short persisted last chunk
    /// is held as dirty data so the flush can pad it to full length.
    fn materialize_tail(&mut self, old_size: u64) -> Result<(), VfsError> {
        if self.layout.within_chunk_offset(old_size) == 0 {
            return Ok(());
        }
        let index: u64 = self.layout.chunk_index_of(old_size);
        if self.pool.is_dirty(index) || self.staging.contains(index) {
            return Ok(());
        }
        if (index as usize) < self.persisted.len() {
            self.load_for_write(index)?;
            self.pool.modify_in_place(index, |_| {})?;
        }
        Ok(())
    }

    /// Shorten chunk `index` to `len` bytes wherever it currently lives.
    fn cut_chunk(&mut self, index: u64, len: usize) -> Result<(), VfsError> {
        if let Some(data) = self.pool.get(index) {
            if data.len() > len {
                self.pool.modify_in_place(index, |block| block.truncate(len))?;
            }
            return Ok(());
        }
        if let Some(mut data) = self.staging.read_chunk(index)? {
            if data.len() > len {
                data.truncate(len);
                self.staging.write_chunk(index, &data)?;
            }
            return Ok(());
        }
        let longer: bool = self
            .persisted
            .get(index as usize)
            .map(|details| details.size > len as u64)
            .unwrap_or(false);
        if longer {
            self.load_for_write(index)?;
            self.pool.modify_in_place(index, |block| block.truncate(len))?;
        }
        Ok(())
    }

    /// Shed resident blocks until the pool is back under its ceiling.
    ///
    /// Clean blocks go first. Dirty blocks are spilled oldest first while the
    /// staging area has room; if none fits, the pool stays over its ceiling.
    fn enforce_ceilings(&mut self) -> Result<(), VfsError> {
        while self.pool.needs_eviction() {
            if let Some(index) = self.pool.lru_candidate(false) {
                self.pool.remove(index);
                tracing::trace!(chunk = index, "clean block dropped");
                continue;
            }

            let spill: Option<(u64, u64)> = self.pool.dirty_by_age().into_iter().find_map(|index| {
                let len: u64 = self.pool.block_len(index)?;
                self.staging.has_room(index, len).then_some((index, len))
            });
            let Some((index, len)) = spill else {
                if !self.overflowed {
                    self.overflowed = true;
                    tracing::warn!(
                        resident = self.pool.current_size(),
                        staged = self.staging.used(),
                        memory_limit = self.memory_limit,
                        disk_limit = self.disk_limit,
                        "usage ceilings full, holding excess in memory"
                    );
                }
                break;
            };

            if let Some(block) = self.pool.remove(index) {
                self.staging.write_chunk(index, &block.data)?;
                tracing::debug!(chunk = index, bytes = len, staged = self.staging.used(), "chunk spilled to disk");
            }
        }
        Ok(())
    }

    /// Latest unflushed bytes of chunk `index`, if it has any.
    fn unflushed_chunk(&mut self, index: u64) -> Result<Option<Vec<u8>>, VfsError> {
        if self.pool.is_dirty(index) {
            return Ok(self.pool.get(index).map(<[u8]>::to_vec));
        }
        self.staging.read_chunk(index)
    }

    fn fetch_chunk(&self, details: &ChunkDetails) -> Result<Vec<u8>, VfsError> {
        let data: Vec<u8> = (self.fetch)(&details.address)?;
        if data.len() as u64 != details.size || ChunkAddress::of(&data) != details.address {
            return Err(VfsError::ChunkMismatch {
                address: details.address.to_string(),
            });
        }
        Ok(data)
    }

    /// Adopt a freshly flushed data map as the persisted content.
    fn rebase(&mut self, data_map: &DataMap) -> Result<(), VfsError> {
        for index in self.pool.dirty_indices() {
            self.pool.mark_clean(index);
        }
        self.staging.remove_from(0)?;
        self.persisted = data_map.chunks.clone();
        self.overflowed = false;

        // Resident blocks may be shorter than the chunk they now stand for.
        let short: Vec<u64> = self
            .pool
            .resident_indices()
            .into_iter()
            .filter(|&index| self.pool.block_len(index) != Some(self.layout.chunk_len(index, self.size)))
            .collect();
        for index in short {
            self.pool.remove(index);
        }
        Ok(())
    }
}

/// Copy `src[offset..]` into `dst`, zero-filling whatever `src` does not cover.
fn copy_padded(src: &[u8], offset: usize, dst: &mut [u8]) {
    let available: usize = src.len().saturating_sub(offset).min(dst.len());
    if available > 0 {
        dst[..available].copy_from_slice(&src[offset..offset + available]);
    }
    dst[available..].fill(0);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use rusty_drive_storage::{DirectBackend, DirectStore, MemoryStore};
    use tempfile::TempDir;

    use super::*;
    use crate::chunking::MAX_CHUNK_COUNT;

    const CHUNK: u64 = 100;

    fn no_fetch() -> FetchFn {
        Arc::new(|address: &ChunkAddress| {
            Err(VfsError::NotFound {
                key: address.to_string(),
            })
        })
    }

    fn fetch_from(store: Arc<MemoryStore>) -> FetchFn {
        Arc::new(move |address: &ChunkAddress| {
            Ok(store.get(address.as_str())?)
        })
    }

    fn buffer(dir: &TempDir, memory: u64, disk: u64) -> ChunkBuffer {
        ChunkBuffer::open(
            &DataMap::new(CHUNK).unwrap(),
            no_fetch(),
            MemoryUsage(memory),
            DiskUsage(disk),
            dir.path(),
            CHUNK,
        )
        .unwrap()
    }

    fn read_all(buffer: &mut ChunkBuffer) -> Vec<u8> {
        let mut out: Vec<u8> = vec![0; buffer.size() as usize];
        let n: usize = buffer.read(&mut out, 0).unwrap();
        out.truncate(n);
        out
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_write_read_across_chunks() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 10_000, 10_000);
        let data: Vec<u8> = pattern(350);

        assert_eq!(buffer.write(&data, 0).unwrap(), 350);
        assert_eq!(buffer.size(), 350);
        assert_eq!(read_all(&mut buffer), data);

        let mut middle: Vec<u8> = vec![0; 120];
        assert_eq!(buffer.read(&mut middle, 90).unwrap(), 120);
        assert_eq!(middle, data[90..210].to_vec());
    }

    #[test]
    fn test_sparse_write_reads_zeros_in_gap() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 10_000, 10_000);
        buffer.write(b"tail", 250).unwrap();

        let content: Vec<u8> = read_all(&mut buffer);
        assert_eq!(content.len(), 254);
        assert!(content[..250].iter().all(|&b| b == 0));
        assert_eq!(&content[250..], b"tail");
    }

    #[test]
    fn test_truncate_shrink_then_grow_zero_fills() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 10_000, 10_000);
        buffer.write(&[7; 250], 0).unwrap();

        buffer.truncate(120).unwrap();
        assert_eq!(read_all(&mut buffer), vec![7; 120]);

        buffer.truncate(300).unwrap();
        let content: Vec<u8> = read_all(&mut buffer);
        assert_eq!(&content[..120], &[7; 120][..]);
        assert!(content[120..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dirty_blocks_spill_to_staging() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 200, 1_000);
        let data: Vec<u8> = pattern(500);
        buffer.write(&data, 0).unwrap();

        assert!(buffer.memory_stats().current_size <= 200);
        assert_eq!(buffer.staged_bytes(), 300);
        assert_eq!(buffer.unflushed_bytes(), 500);
        assert!(!buffer.is_over_ceiling());
        assert_eq!(read_all(&mut buffer), data);
    }

    #[test]
    fn test_overflow_accepted_then_flagged() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 100, 100);
        assert_eq!(buffer.write(&pattern(800), 0).unwrap(), 800);
        assert_eq!(buffer.size(), 800);
        assert!(buffer.is_over_ceiling());
    }

    #[tokio::test]
    async fn test_flush_refuses_over_ceiling_without_putting() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());
        let mut buffer = buffer(&dir, 100, 100);
        buffer.write(&pattern(800), 0).unwrap();

        let err = buffer.flush(&backend).await.unwrap_err();
        assert!(matches!(err, VfsError::UsageExceeded { limit: 200, .. }));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_builds_data_map_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());
        let mut buffer = buffer(&dir, 10_000, 10_000);
        // Three identical full chunks and a short tail.
        buffer.write(&[9; 330], 0).unwrap();

        let flushed: FlushedContent = buffer.flush(&backend).await.unwrap();
        assert_eq!(flushed.data_map.size, 330);
        assert_eq!(flushed.data_map.chunk_count(), 4);
        assert_eq!(flushed.chunks_put, 2);
        assert_eq!(flushed.bytes_put, 130);
        assert_eq!(store.len(), 2);
        assert_eq!(buffer.unflushed_bytes(), 0);
        assert_eq!(read_all(&mut buffer), vec![9; 330]);
    }

    #[tokio::test]
    async fn test_reopen_fetches_lazily_and_reuses_unchanged_chunks() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());
        let data: Vec<u8> = pattern(250);

        let mut first = buffer(&dir, 10_000, 10_000);
        first.write(&data, 0).unwrap();
        let data_map: DataMap = first.flush(&backend).await.unwrap().data_map;
        drop(first);

        let fetched: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let counter = fetched.clone();
        let inner: FetchFn = fetch_from(store.clone());
        let fetch: FetchFn = Arc::new(move |address: &ChunkAddress| {
            *counter.lock().entry(address.to_string()).or_insert(0) += 1;
            inner(address)
        });

        let mut second = ChunkBuffer::open(
            &data_map,
            fetch,
            MemoryUsage(10_000),
            DiskUsage(10_000),
            dir.path(),
            CHUNK,
        )
        .unwrap();
        assert!(fetched.lock().is_empty());

        second.write(b"XY", 10).unwrap();
        assert_eq!(fetched.lock().len(), 1);

        let puts_before: u64 = store.put_count();
        let flushed: FlushedContent = second.flush(&backend).await.unwrap();
        assert_eq!(flushed.chunks_put, 1);
        assert_eq!(store.put_count(), puts_before + 1);
        assert_eq!(flushed.data_map.chunks[1], data_map.chunks[1]);
        assert_eq!(flushed.data_map.chunks[2], data_map.chunks[2]);

        let mut expected: Vec<u8> = data.clone();
        expected[10..12].copy_from_slice(b"XY");
        assert_eq!(read_all(&mut second), expected);
    }

    #[tokio::test]
    async fn test_growing_past_short_persisted_tail_pads_it() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());

        let mut first = buffer(&dir, 10_000, 10_000);
        first.write(&[1; 150], 0).unwrap();
        let data_map: DataMap = first.flush(&backend).await.unwrap().data_map;

        let mut second = ChunkBuffer::open(
            &data_map,
            fetch_from(store.clone()),
            MemoryUsage(10_000),
            DiskUsage(10_000),
            dir.path(),
            CHUNK,
        )
        .unwrap();
        second.write(b"end", 297).unwrap();
        let flushed: FlushedContent = second.flush(&backend).await.unwrap();
        assert_eq!(flushed.data_map.size, 300);
        assert!(flushed.data_map.validate().is_ok());

        let content: Vec<u8> = read_all(&mut second);
        assert_eq!(&content[..150], &[1; 150][..]);
        assert!(content[150..297].iter().all(|&b| b == 0));
        assert_eq!(&content[297..], b"end");
    }

    #[test]
    fn test_write_past_addressable_end_rejected() {
        let dir = TempDir::new().unwrap();
        let mut buffer = buffer(&dir, 10_000, 10_000);
        buffer.write(b"keep", 0).unwrap();

        let err: VfsError = buffer.write(b"0123456789", u64::MAX - 4).unwrap_err();
        assert_eq!(
            err,
            VfsError::FileTooLarge {
                requested: u64::MAX,
                max: CHUNK * MAX_CHUNK_COUNT,
            }
        );

        let max: u64 = CHUNK * MAX_CHUNK_COUNT;
        assert!(matches!(
            buffer.write(b"ab", max - 1),
            Err(VfsError::FileTooLarge { .. })
        ));
        assert_eq!(buffer.size(), 4);
        assert_eq!(read_all(&mut buffer), b"keep".to_vec());
    }

    #[tokio::test]
    async fn test_truncate_past_addressable_end_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());
        let mut buffer = buffer(&dir, 10_000, 10_000);
        buffer.write(&[3; 150], 0).unwrap();

        assert!(matches!(
            buffer.truncate(u64::MAX),
            Err(VfsError::FileTooLarge { .. })
        ));
        assert_eq!(buffer.size(), 150);

        let max: u64 = CHUNK * MAX_CHUNK_COUNT;
        buffer.truncate(max).unwrap();
        buffer.truncate(10).unwrap();
        let flushed: FlushedContent = buffer.flush(&backend).await.unwrap();
        assert_eq!(flushed.data_map.size, 10);
    }

    #[tokio::test]
    async fn test_sparse_truncate_flushes_one_zero_chunk() {
        const MIB: u64 = 1024 * 1024;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = DirectBackend::new(store.clone());
        let mut buffer = ChunkBuffer::open(
            &DataMap::new(MIB).unwrap(),
            no_fetch(),
            MemoryUsage(4 * MIB),
            DiskUsage(4 * MIB),
            dir.path(),
            MIB,
        )
        .unwrap();

        buffer.truncate(1024 * MIB).unwrap();
        assert_eq!(buffer.unflushed_bytes(), 0);

        let started = std::time::Instant::now();
        let flushed: FlushedContent = buffer.flush(&backend).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(flushed.data_map.chunk_count(), 1024);
        assert_eq!(flushed.chunks_put, 1);
        assert_eq!(flushed.bytes_put, MIB);
        assert_eq!(store.put_count(), 1);
        let zero: ChunkAddress = ChunkAddress::of(&vec![0; MIB as usize]);
        assert!(flushed.data_map.addresses().all(|address| *address == zero));

        // A short tail is a second zero length, so a second put.
        buffer.truncate(1024 * MIB + 10).unwrap();
        let flushed: FlushedContent = buffer.flush(&backend).await.unwrap();
        assert_eq!(flushed.chunks_put, 1);
        assert_eq!(flushed.bytes_put, 10);
        assert_eq!(flushed.data_map.chunk_count(), 1025);
    }

    #[test]
    fn test_fetch_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let good: Vec<u8> = vec![5; 100];
        let data_map = DataMap::from_chunks(
            CHUNK,
            vec![ChunkDetails {
                address: ChunkAddress::of(&good),
                size: 100,
            }],
        )
        .unwrap();
        let fetch: FetchFn = Arc::new(|_: &ChunkAddress| Ok(vec![6; 100]));
        let mut buffer = ChunkBuffer::open(
            &data_map,
            fetch,
            MemoryUsage(1_000),
            DiskUsage(1_000),
            dir.path(),
            CHUNK,
        )
        .unwrap();

        let mut out: Vec<u8> = vec![0; 10];
        assert!(matches!(
            buffer.read(&mut out, 0),
            Err(VfsError::ChunkMismatch { .. })
        ));
    }
}
