//! On-disk staging area for chunks spilled out of memory.
//!
//! Each open file gets its own private directory under the configured staging
//! location, created on first spill and removed when the area is dropped:
//!
//! ```text
//! staging_dir/
//! └── open-XXXXXX/        # one per open session (tempfile)
//!     ├── chunk4          # spilled chunk 4
//!     └── chunk7          # spilled chunk 7
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::VfsError;

/// Bounded spill space for one open file's dirty chunks.
#[derive(Debug)]
pub struct StagingArea {
    /// Parent directory the private area is created under.
    parent: PathBuf,
    /// Private directory, created lazily.
    dir: Option<TempDir>,
    /// Staged chunk index -> staged length.
    staged: BTreeMap<u64, u64>,
    /// Bytes currently staged.
    used: u64,
    /// Ceiling on staged bytes.
    max_size: u64,
}

impl StagingArea {
    /// Create a staging area.
    ///
    /// # Arguments
    /// * `parent` - Directory the private area will be created under
    /// * `max_size` - Ceiling on staged bytes
    pub fn new(parent: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            parent: parent.into(),
            dir: None,
            staged: BTreeMap::new(),
            used: 0,
            max_size,
        }
    }

    /// True if `bytes` more could be staged for chunk `index` without
    /// passing the ceiling. Restaging a chunk reuses its current space.
    pub fn has_room(&self, index: u64, bytes: u64) -> bool {
        let existing: u64 = self.staged.get(&index).copied().unwrap_or(0);
        self.used - existing + bytes <= self.max_size
    }

    /// Write a chunk to the staging area.
    ///
    /// The caller is expected to have checked `has_room`; the ceiling is an
    /// accounting limit, not enforced here.
    pub fn write_chunk(&mut self, index: u64, data: &[u8]) -> Result<(), VfsError> {
        let chunk_path: PathBuf = self.chunk_path(index)?;

        // Write atomically
        let temp_path: PathBuf = chunk_path.with_extension("tmp");
        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &chunk_path)?;

        let old: u64 = self.staged.insert(index, data.len() as u64).unwrap_or(0);
        self.used = self.used - old + data.len() as u64;
        tracing::trace!(chunk = index, bytes = data.len(), used = self.used, "chunk staged");
        Ok(())
    }

    /// Read a staged chunk.
    ///
    /// # Returns
    /// Chunk data if staged, None otherwise.
    pub fn read_chunk(&self, index: u64) -> Result<Option<Vec<u8>>, VfsError> {
        if !self.staged.contains_key(&index) {
            return Ok(None);
        }
        let dir: &TempDir = self
            .dir
            .as_ref()
            .ok_or_else(|| VfsError::Staging(format!("chunk {} staged without a directory", index)))?;
        Ok(Some(std::fs::read(Self::file_in(dir.path(), index))?))
    }

    /// Remove a staged chunk.
    ///
    /// # Returns
    /// The staged length if the chunk was present.
    pub fn remove_chunk(&mut self, index: u64) -> Result<Option<u64>, VfsError> {
        let Some(len) = self.staged.remove(&index) else {
            return Ok(None);
        };
        self.used -= len;
        if let Some(dir) = &self.dir {
            match std::fs::remove_file(Self::file_in(dir.path(), index)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(len))
    }

    /// Remove every staged chunk at or beyond `first_index`.
    pub fn remove_from(&mut self, first_index: u64) -> Result<(), VfsError> {
        let doomed: Vec<u64> = self.staged.range(first_index..).map(|(&i, _)| i).collect();
        for index in doomed {
            self.remove_chunk(index)?;
        }
        Ok(())
    }

    pub fn contains(&self, index: u64) -> bool {
        self.staged.contains_key(&index)
    }

    /// Staged chunk indices, ascending.
    pub fn indices(&self) -> Vec<u64> {
        self.staged.keys().copied().collect()
    }

    /// Bytes currently staged.
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Path of the private directory, once created.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    /// Get path to a chunk file, creating the private directory if needed.
    fn chunk_path(&mut self, index: u64) -> Result<PathBuf, VfsError> {
        if self.dir.is_none() {
            std::fs::create_dir_all(&self.parent)?;
            let dir: TempDir = tempfile::Builder::new()
                .prefix("open-")
                .tempdir_in(&self.parent)?;
            tracing::debug!(path = %dir.path().display(), "staging area created");
            self.dir = Some(dir);
        }
        match &self.dir {
            Some(dir) => Ok(Self::file_in(dir.path(), index)),
            None => Err(VfsError::Staging("staging directory missing".to_string())),
        }
    }

    fn file_in(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("chunk{}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_created_lazily() {
        let root = TempDir::new().unwrap();
        let mut area = StagingArea::new(root.path().join("staging"), 1024);
        assert!(area.path().is_none());

        area.write_chunk(0, b"hello").unwrap();
        let path: PathBuf = area.path().unwrap().to_path_buf();
        assert!(path.starts_with(root.path().join("staging")));
        assert!(path.join("chunk0").exists());
        assert!(!path.join("chunk0.tmp").exists());
    }

    #[test]
    fn test_write_read_remove() {
        let root = TempDir::new().unwrap();
        let mut area = StagingArea::new(root.path(), 1024);

        area.write_chunk(2, b"abc").unwrap();
        assert_eq!(area.read_chunk(2).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(area.read_chunk(3).unwrap(), None);
        assert_eq!(area.used(), 3);

        assert_eq!(area.remove_chunk(2).unwrap(), Some(3));
        assert_eq!(area.used(), 0);
        assert_eq!(area.remove_chunk(2).unwrap(), None);
    }

    #[test]
    fn test_has_room_counts_restaging() {
        let root = TempDir::new().unwrap();
        let mut area = StagingArea::new(root.path(), 10);

        area.write_chunk(0, &[0; 8]).unwrap();
        assert!(!area.has_room(1, 8));
        assert!(area.has_room(1, 2));
        // Replacing chunk 0 frees its 8 bytes first.
        assert!(area.has_room(0, 10));

        area.write_chunk(0, &[1; 4]).unwrap();
        assert_eq!(area.used(), 4);
    }

    #[test]
    fn test_remove_from() {
        let root = TempDir::new().unwrap();
        let mut area = StagingArea::new(root.path(), 1024);
        for i in 0..4 {
            area.write_chunk(i, &[i as u8; 4]).unwrap();
        }
        area.remove_from(1).unwrap();
        assert_eq!(area.indices(), vec![0]);
        assert_eq!(area.used(), 4);
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let path: PathBuf = {
            let mut area = StagingArea::new(root.path(), 1024);
            area.write_chunk(0, b"gone soon").unwrap();
            area.path().unwrap().to_path_buf()
        };
        assert!(!path.exists());
    }
}
