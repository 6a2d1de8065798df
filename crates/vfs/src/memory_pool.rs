//! In-memory chunk blocks for one open file, with LRU ordering.
//!
//! The pool only accounts and orders; deciding what happens to an evicted
//! block (drop it, or spill it to disk) is left to the owning `ChunkBuffer`.
//!
//! ```text
//! MemoryPool
//!   blocks:    HashMap<chunk_index, PoolBlock { data, dirty }>
//!   lru_state: LruState { lru_order (front = oldest), current_size, max_size }
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during memory pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryPoolError {
    /// No block is resident for this chunk.
    BlockNotFound(u64),
}

impl fmt::Display for MemoryPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPoolError::BlockNotFound(index) => write!(f, "Block not found: chunk {}", index),
        }
    }
}

impl std::error::Error for MemoryPoolError {}

// ============================================================================
// Blocks and configuration
// ============================================================================

/// One resident chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBlock {
    /// Chunk bytes. May be shorter than the chunk; the tail reads as zeros.
    pub data: Vec<u8>,
    /// True if the bytes differ from anything persisted or staged.
    pub dirty: bool,
}

impl PoolBlock {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Configuration for a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPoolConfig {
    /// Ceiling on resident bytes before eviction is due.
    pub max_size: u64,
}

impl MemoryPoolConfig {
    pub fn with_max_size(max_size: u64) -> Self {
        Self { max_size }
    }
}

// ============================================================================
// LRU State
// ============================================================================

/// Recency order and size accounting.
#[derive(Debug)]
struct LruState {
    /// LRU order: front = oldest (evict first), back = newest.
    lru_order: VecDeque<u64>,
    /// Current total size of all blocks in bytes.
    current_size: u64,
    /// Pool configuration.
    config: MemoryPoolConfig,
}

impl LruState {
    fn new(config: MemoryPoolConfig) -> Self {
        Self {
            lru_order: VecDeque::new(),
            current_size: 0,
            config,
        }
    }

    /// Move a block to the back of the LRU queue (most recently used).
    fn touch(&mut self, index: u64) {
        self.lru_order.retain(|&i| i != index);
        self.lru_order.push_back(index);
    }

    fn remove(&mut self, index: u64, size: u64) {
        self.lru_order.retain(|&i| i != index);
        self.current_size = self.current_size.saturating_sub(size);
    }

    /// Update size tracking after a block modification.
    fn update_size(&mut self, old_size: u64, new_size: u64) {
        if new_size > old_size {
            self.current_size += new_size - old_size;
        } else if old_size > new_size {
            self.current_size = self.current_size.saturating_sub(old_size - new_size);
        }
    }

    fn needs_eviction(&self) -> bool {
        self.current_size > self.config.max_size
    }
}

// ============================================================================
// Memory Pool Stats
// ============================================================================

/// Statistics about the memory pool state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryPoolStats {
    /// Number of resident blocks.
    pub total_blocks: usize,
    /// Number of blocks holding unflushed changes.
    pub dirty_blocks: usize,
    /// Bytes held by dirty blocks.
    pub dirty_size: u64,
    /// Bytes held by all blocks.
    pub current_size: u64,
    /// Configured ceiling.
    pub max_size: u64,
}

impl MemoryPoolStats {
    /// Calculate pool utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.current_size as f64 / self.max_size as f64) * 100.0
        }
    }

    /// Number of clean blocks (droppable without spilling).
    pub fn clean_blocks(&self) -> usize {
        self.total_blocks - self.dirty_blocks
    }
}

// ============================================================================
// Memory Pool
// ============================================================================

/// Resident chunk blocks of one open file.
#[derive(Debug)]
pub struct MemoryPool {
    blocks: HashMap<u64, PoolBlock>,
    lru_state: LruState,
}

impl MemoryPool {
    /// Create a new memory pool with the given configuration.
    pub fn new(config: MemoryPoolConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            lru_state: LruState::new(config),
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        self.blocks.contains_key(&index)
    }

    /// Borrow a block's bytes and mark it most recently used.
    pub fn get(&mut self, index: u64) -> Option<&[u8]> {
        if self.blocks.contains_key(&index) {
            self.lru_state.touch(index);
        }
        self.blocks.get(&index).map(|b| b.data.as_slice())
    }

    /// Insert or replace a block.
    ///
    /// # Arguments
    /// * `index` - Chunk index
    /// * `data` - Chunk bytes
    /// * `dirty` - True if the bytes are not persisted anywhere
    pub fn insert(&mut self, index: u64, data: Vec<u8>, dirty: bool) {
        let block = PoolBlock { data, dirty };
        let new_size: u64 = block.size();
        match self.blocks.insert(index, block) {
            Some(old) => self.lru_state.update_size(old.size(), new_size),
            None => self.lru_state.update_size(0, new_size),
        }
        self.lru_state.touch(index);
    }

    /// Length of a resident block.
    pub fn block_len(&self, index: u64) -> Option<u64> {
        self.blocks.get(&index).map(|b| b.size())
    }

    /// Indices of all resident blocks, ascending.
    pub fn resident_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.blocks.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Modify a block in place and mark it dirty.
    ///
    /// # Returns
    /// Ok(new_len) on success, Err if the block is not resident.
    pub fn modify_in_place<F>(&mut self, index: u64, modifier: F) -> Result<usize, MemoryPoolError>
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let block: &mut PoolBlock = self
            .blocks
            .get_mut(&index)
            .ok_or(MemoryPoolError::BlockNotFound(index))?;
        let old_size: u64 = block.size();
        modifier(&mut block.data);
        block.dirty = true;
        let new_size: u64 = block.size();
        let new_len: usize = block.data.len();

        self.lru_state.update_size(old_size, new_size);
        self.lru_state.touch(index);
        Ok(new_len)
    }

    /// Remove a block, returning it if it was resident.
    pub fn remove(&mut self, index: u64) -> Option<PoolBlock> {
        let block: PoolBlock = self.blocks.remove(&index)?;
        self.lru_state.remove(index, block.size());
        Some(block)
    }

    /// Remove every block at or beyond `first_index`.
    pub fn remove_from(&mut self, first_index: u64) {
        let doomed: Vec<u64> = self
            .blocks
            .keys()
            .copied()
            .filter(|&i| i >= first_index)
            .collect();
        for index in doomed {
            self.remove(index);
        }
    }

    /// Least recently used block whose dirty flag equals `dirty`.
    pub fn lru_candidate(&self, dirty: bool) -> Option<u64> {
        self.lru_state
            .lru_order
            .iter()
            .copied()
            .find(|i| self.blocks.get(i).map(|b| b.dirty == dirty).unwrap_or(false))
    }

    /// Dirty blocks from least to most recently used.
    pub fn dirty_by_age(&self) -> Vec<u64> {
        self.lru_state
            .lru_order
            .iter()
            .copied()
            .filter(|&i| self.is_dirty(i))
            .collect()
    }

    /// Mark a block as matching persisted content.
    pub fn mark_clean(&mut self, index: u64) {
        if let Some(block) = self.blocks.get_mut(&index) {
            block.dirty = false;
        }
    }

    pub fn is_dirty(&self, index: u64) -> bool {
        self.blocks.get(&index).map(|b| b.dirty).unwrap_or(false)
    }

    /// Indices of dirty blocks, ascending.
    pub fn dirty_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.dirty)
            .map(|(&i, _)| i)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// True once resident bytes exceed the ceiling.
    pub fn needs_eviction(&self) -> bool {
        self.lru_state.needs_eviction()
    }

    pub fn current_size(&self) -> u64 {
        self.lru_state.current_size
    }

    pub fn max_size(&self) -> u64 {
        self.lru_state.config.max_size
    }

    /// Bytes held by dirty blocks.
    pub fn dirty_size(&self) -> u64 {
        self.blocks.values().filter(|b| b.dirty).map(|b| b.size()).sum()
    }

    pub fn stats(&self) -> MemoryPoolStats {
        MemoryPoolStats {
            total_blocks: self.blocks.len(),
            dirty_blocks: self.blocks.values().filter(|b| b.dirty).count(),
            dirty_size: self.dirty_size(),
            current_size: self.lru_state.current_size,
            max_size: self.lru_state.config.max_size,
        }
    }
}
