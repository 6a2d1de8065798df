//! Direct backends: synchronous key/value stores.
//!
//! Every call on a `DirectStore` completes before it returns. `DirectBackend`
//! adapts one to the `StorageBackend` interface, reporting
//! `Completion::Durable` for every `put` and `delete`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::traits::{Completion, Delivery, StorageBackend};

/// A synchronous key/value store.
pub trait DirectStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous value.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Fetch the bytes stored under `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: DirectStore + ?Sized> DirectStore for Arc<S> {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, data)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key)
    }
}

/// `StorageBackend` over a `DirectStore`.
pub struct DirectBackend<S: DirectStore> {
    store: S,
}

impl<S: DirectStore> DirectBackend<S> {
    /// Wrap a direct store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: DirectStore> StorageBackend for DirectBackend<S> {
    fn delivery(&self) -> Delivery {
        Delivery::Synchronous
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<Completion, StorageError> {
        self.store.put(key, &data)?;
        tracing::trace!(key, bytes = data.len(), "direct put");
        Ok(Completion::Durable)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.store.get(key)
    }

    async fn delete(&self, key: &str) -> Result<Completion, StorageError> {
        self.store.delete(key)?;
        tracing::trace!(key, "direct delete");
        Ok(Completion::Durable)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process store, mainly for tests.
///
/// Can be switched offline to exercise `Unavailable` handling, and counts
/// accepted puts so tests can check deduplication.
#[derive(Debug)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
    put_count: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            put_count: AtomicU64::new(0),
        }
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the store offline (`false`) or bring it back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Total number of successful `put` calls.
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable("memory store offline"))
        }
    }
}

impl DirectStore for MemoryStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check_available()?;
        self.objects.write().insert(key.to_string(), data.to_vec());
        self.put_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_available()?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.objects.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// Local directory store
// ============================================================================

/// Store that keeps one file per key under a root directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader never
/// sees a partially written object.
#[derive(Debug)]
pub struct LocalStore {
    root_path: PathBuf,
}

impl LocalStore {
    /// Create a local store rooted at `root_path`.
    ///
    /// # Arguments
    /// * `root_path` - Root directory (must be absolute; created if missing)
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the path is relative, `IoError` if it cannot be created.
    pub fn new(root_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root: PathBuf = root_path.into();
        if !root.is_absolute() {
            return Err(StorageError::InvalidConfig {
                message: format!("LocalStore root must be absolute: {}", root.display()),
            });
        }
        std::fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self { root_path: root })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Get the full path for a stored object.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid: bool = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root_path.join(key))
    }
}

impl DirectStore for LocalStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path: PathBuf = self.object_path(key)?;

        // Write atomically
        let temp_path: PathBuf = path.with_extension("tmp");
        std::fs::write(&temp_path, data).map_err(|e| io_error(&temp_path, e))?;
        std::fs::rename(&temp_path, &path).map_err(|e| io_error(&path, e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path: PathBuf = self.object_path(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path: PathBuf = self.object_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::IoError {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
