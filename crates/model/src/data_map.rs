//! Data maps: the ordered chunk list that stands in for a file's content.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::hash::{ChunkAddress, DEFAULT_CHUNK_SIZE};

/// One persisted chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDetails {
    /// Content address of the chunk bytes.
    pub address: ChunkAddress,
    /// Length of the chunk in bytes.
    pub size: u64,
}

/// Ordered list of chunk references describing a file's full content.
///
/// Chunk `i` covers bytes `[i * chunk_size, min((i + 1) * chunk_size, size))`,
/// so every chunk but the last is exactly `chunk_size` long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMap {
    /// Granularity the content was split at.
    pub chunk_size: u64,
    /// Logical content length in bytes.
    pub size: u64,
    /// Chunks in file order.
    pub chunks: Vec<ChunkDetails>,
}

impl Default for DataMap {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            size: 0,
            chunks: Vec::new(),
        }
    }
}

impl DataMap {
    /// Create an empty data map for the given chunk size.
    ///
    /// # Arguments
    /// * `chunk_size` - Split granularity in bytes (must be non-zero)
    pub fn new(chunk_size: u64) -> Result<Self, ModelError> {
        if chunk_size == 0 {
            return Err(ModelError::ZeroChunkSize);
        }
        Ok(Self {
            chunk_size,
            size: 0,
            chunks: Vec::new(),
        })
    }

    /// Build a data map from an ordered chunk list and check its layout.
    ///
    /// # Arguments
    /// * `chunk_size` - Split granularity the chunks were produced with
    /// * `chunks` - Chunks in file order
    pub fn from_chunks(chunk_size: u64, chunks: Vec<ChunkDetails>) -> Result<Self, ModelError> {
        let size: u64 = chunks.iter().map(|c| c.size).sum();
        let map = Self {
            chunk_size,
            size,
            chunks,
        };
        map.validate()?;
        Ok(map)
    }

    /// True if the map describes zero bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of chunks recorded.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Get the chunk at `index`, if any.
    pub fn chunk(&self, index: usize) -> Option<&ChunkDetails> {
        self.chunks.get(index)
    }

    /// Iterate the addresses of all chunks in order.
    pub fn addresses(&self) -> impl Iterator<Item = &ChunkAddress> {
        self.chunks.iter().map(|c| &c.address)
    }

    /// Check that the chunk sizes tile `size` exactly at `chunk_size` granularity.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.chunk_size == 0 {
            return Err(ModelError::ZeroChunkSize);
        }

        let covered: u64 = self.chunks.iter().map(|c| c.size).sum();
        if covered != self.size {
            return Err(ModelError::DataMapSizeMismatch {
                covered,
                size: self.size,
            });
        }

        let last: usize = self.chunks.len().saturating_sub(1);
        for (index, chunk) in self.chunks.iter().enumerate() {
            let too_long: bool = chunk.size > self.chunk_size;
            let short_in_middle: bool = index < last && chunk.size != self.chunk_size;
            if too_long || short_in_middle || chunk.size == 0 {
                return Err(ModelError::ChunkSizeMismatch {
                    index,
                    expected: self.chunk_size,
                    actual: chunk.size,
                });
            }
        }
        Ok(())
    }
}
