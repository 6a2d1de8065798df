//! Mapping byte ranges of a file onto fixed-size chunks.

/// Most chunks one file's data map may hold (1 TiB at the default chunk size).
pub const MAX_CHUNK_COUNT: u64 = 1 << 20;

/// Fixed chunk granularity of one file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

impl ChunkLayout {
    /// Create a layout. `chunk_size` must be non-zero.
    pub fn new(chunk_size: u64) -> Self {
        debug_assert!(chunk_size > 0);
        Self { chunk_size }
    }

    /// Index of the chunk containing byte `offset`.
    pub fn chunk_index_of(&self, offset: u64) -> u64 {
        offset / self.chunk_size
    }

    /// Position of byte `offset` inside its chunk.
    pub fn within_chunk_offset(&self, offset: u64) -> u64 {
        offset % self.chunk_size
    }

    /// First byte of chunk `index`.
    pub fn chunk_start(&self, index: u64) -> u64 {
        index * self.chunk_size
    }

    /// Number of chunks needed to hold `size` bytes.
    pub fn chunk_count(&self, size: u64) -> u64 {
        size.div_ceil(self.chunk_size)
    }

    /// Largest content length this layout can describe.
    pub fn max_size(&self) -> u64 {
        self.chunk_size.saturating_mul(MAX_CHUNK_COUNT)
    }

    /// Length of chunk `index` in a file of `size` bytes (0 past the end).
    pub fn chunk_len(&self, index: u64, size: u64) -> u64 {
        let start: u64 = self.chunk_start(index);
        if start >= size {
            0
        } else {
            (size - start).min(self.chunk_size)
        }
    }
}

/// The part of a file range that falls inside one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub chunk_index: u64,
    pub offset_in_chunk: u64,
    pub len: usize,
}

/// Split `[file_offset, file_offset + len)` into per-chunk spans, in order.
pub fn split_range(layout: ChunkLayout, mut file_offset: u64, len: usize) -> Vec<ChunkSpan> {
    let mut remaining: u64 = len as u64;
    let mut spans: Vec<ChunkSpan> = Vec::new();

    while remaining > 0 {
        let offset_in_chunk: u64 = layout.within_chunk_offset(file_offset);
        let take: u64 = (layout.chunk_size - offset_in_chunk).min(remaining);
        spans.push(ChunkSpan {
            chunk_index: layout.chunk_index_of(file_offset),
            offset_in_chunk,
            len: take as usize,
        });
        file_offset += take;
        remaining -= take;
    }
    spans
}
