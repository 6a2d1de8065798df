//! Configuration for open-file buffering and deferred close.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusty_drive_model::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::VfsError;
use crate::executor::ExecutorConfig;

/// Default in-memory ceiling per open file (64MB).
pub const DEFAULT_MEMORY_USAGE_MAX: u64 = 64 * 1024 * 1024;

/// Default on-disk staging ceiling per open file (1GB).
pub const DEFAULT_DISK_USAGE_MAX: u64 = 1024 * 1024 * 1024;

/// Default wait between a dirty close and its flush.
pub const DEFAULT_INACTIVITY_DELAY: Duration = Duration::from_secs(5);

/// Memory ceiling for one open file's unflushed content, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage(pub u64);

/// Disk staging ceiling for one open file's unflushed content, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage(pub u64);

/// Options shared by every file a `FileRegistry` manages.
///
/// Loadable from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsOptions {
    /// Ceiling on unflushed bytes held in memory per open file.
    pub memory_usage_max: u64,
    /// Ceiling on unflushed bytes spilled to disk per open file.
    pub disk_usage_max: u64,
    /// Split granularity for new content.
    pub chunk_size: u64,
    /// Wait between a dirty close and its flush, in milliseconds.
    pub inactivity_delay_ms: u64,
    /// Directory under which each open file gets a private staging area.
    pub staging_dir: PathBuf,
    /// Runtime used to reach async storage from synchronous calls.
    pub executor: ExecutorConfig,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            memory_usage_max: DEFAULT_MEMORY_USAGE_MAX,
            disk_usage_max: DEFAULT_DISK_USAGE_MAX,
            chunk_size: DEFAULT_CHUNK_SIZE,
            inactivity_delay_ms: DEFAULT_INACTIVITY_DELAY.as_millis() as u64,
            staging_dir: std::env::temp_dir().join("rusty-drive-staging"),
            executor: ExecutorConfig::default(),
        }
    }
}

impl VfsOptions {
    /// Parse options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, VfsError> {
        let options: VfsOptions =
            serde_json::from_str(json).map_err(|e| VfsError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Read options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, VfsError> {
        let json: String = std::fs::read_to_string(path)
            .map_err(|e| VfsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reject options no file could work with.
    pub fn validate(&self) -> Result<(), VfsError> {
        if self.chunk_size == 0 {
            return Err(VfsError::Config("chunk_size must be non-zero".to_string()));
        }
        if self.memory_usage_max == 0 {
            return Err(VfsError::Config(
                "memory_usage_max must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage(self.memory_usage_max)
    }

    pub fn disk_usage(&self) -> DiskUsage {
        DiskUsage(self.disk_usage_max)
    }

    pub fn inactivity_delay(&self) -> Duration {
        Duration::from_millis(self.inactivity_delay_ms)
    }

    /// Set both usage ceilings.
    pub fn with_usage(mut self, memory: MemoryUsage, disk: DiskUsage) -> Self {
        self.memory_usage_max = memory.0;
        self.disk_usage_max = disk.0;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_inactivity_delay(mut self, delay: Duration) -> Self {
        self.inactivity_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = VfsOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(options.inactivity_delay(), DEFAULT_INACTIVITY_DELAY);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = VfsOptions::from_json_str(
            r#"{"memory_usage_max": 1048576, "inactivity_delay_ms": 50}"#,
        )
        .unwrap();
        assert_eq!(options.memory_usage(), MemoryUsage(1048576));
        assert_eq!(options.disk_usage(), DiskUsage(DEFAULT_DISK_USAGE_MAX));
        assert_eq!(options.inactivity_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = VfsOptions::from_json_str(r#"{"chunk_size": 0}"#).unwrap_err();
        assert!(matches!(err, VfsError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let options = VfsOptions::default()
            .with_usage(MemoryUsage(10), DiskUsage(20))
            .with_chunk_size(4)
            .with_inactivity_delay(Duration::from_millis(10))
            .with_staging_dir("/tmp/x");
        assert_eq!(options.memory_usage_max, 10);
        assert_eq!(options.disk_usage_max, 20);
        assert_eq!(options.chunk_size, 4);
        assert_eq!(options.inactivity_delay_ms, 10);
        assert_eq!(options.staging_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("drive.json");
        std::fs::write(&path, r#"{"chunk_size": 4096}"#).unwrap();
        assert_eq!(VfsOptions::from_json_file(&path).unwrap().chunk_size, 4096);
        assert!(VfsOptions::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}
