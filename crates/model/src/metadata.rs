//! Per-entry attributes for files, directories and symlinks.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::data_map::DataMap;
use crate::error::ModelError;
use crate::hash::DirectoryId;

/// Size reported for a directory entry.
pub const DIRECTORY_SIZE: u64 = 4096;

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
}

impl FileType {
    /// Get the string representation of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::RegularFile => "regular_file",
            FileType::Directory => "directory",
            FileType::Symlink => "symlink",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an entry's payload handle is.
///
/// Files and symlinks always carry a data map, directories always carry the id
/// of their listing. Keeping this a sum type means an entry can never hold both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    DataMap(DataMap),
    Directory(DirectoryId),
}

/// Attributes of one filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    name: String,
    file_type: FileType,
    creation_time: SystemTime,
    last_status_time: SystemTime,
    last_write_time: SystemTime,
    last_access_time: SystemTime,
    size: u64,
    allocation_size: u64,
    content: Content,
}

impl MetaData {
    /// Create attributes for a new regular file or directory, stamped now.
    ///
    /// # Arguments
    /// * `name` - Entry name
    /// * `is_directory` - True for a directory, false for a regular file
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        let file_type: FileType = if is_directory {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        Self::with_type(name, file_type, SystemTime::now())
    }

    /// Create attributes for a new entry of any type at a given instant.
    ///
    /// All four timestamps are set to `now`. Regular files and symlinks get an
    /// empty data map; directories get a freshly generated directory id.
    pub fn with_type(name: impl Into<String>, file_type: FileType, now: SystemTime) -> Self {
        let name: String = name.into();
        let (content, size): (Content, u64) = match file_type {
            FileType::Directory => (
                Content::Directory(DirectoryId::generate(&name, now)),
                DIRECTORY_SIZE,
            ),
            FileType::RegularFile | FileType::Symlink => (Content::DataMap(DataMap::default()), 0),
        };

        Self {
            name,
            file_type,
            creation_time: now,
            last_status_time: now,
            last_write_time: now,
            last_access_time: now,
            size,
            allocation_size: size,
            content,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    pub fn last_status_time(&self) -> SystemTime {
        self.last_status_time
    }

    pub fn last_write_time(&self) -> SystemTime {
        self.last_write_time
    }

    pub fn last_access_time(&self) -> SystemTime {
        self.last_access_time
    }

    /// Logical content length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes reserved for the entry. Always equal to `size`.
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    /// The data map, for files and symlinks.
    pub fn data_map(&self) -> Option<&DataMap> {
        match &self.content {
            Content::DataMap(map) => Some(map),
            Content::Directory(_) => None,
        }
    }

    /// The listing id, for directories.
    pub fn directory_id(&self) -> Option<&DirectoryId> {
        match &self.content {
            Content::DataMap(_) => None,
            Content::Directory(id) => Some(id),
        }
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Record a read at `now`. Only the access time moves.
    pub fn touch_access(&mut self, now: SystemTime) {
        self.last_access_time = self.last_access_time.max(now);
    }

    /// Record a content change at `now`.
    ///
    /// Write, status and access times all take the same value. Timestamps
    /// never move backwards, so the value is the latest of `now` and the
    /// three stored times.
    pub fn touch_write(&mut self, now: SystemTime) -> SystemTime {
        let stamp: SystemTime = now
            .max(self.last_write_time)
            .max(self.last_status_time)
            .max(self.last_access_time);
        self.last_write_time = stamp;
        self.last_status_time = stamp;
        self.last_access_time = stamp;
        stamp
    }

    /// Set the logical size. Allocation size follows it.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.allocation_size = size;
    }

    /// Replace the data map after a successful flush.
    ///
    /// # Returns
    /// `ModelError::WrongFileType` if this entry is a directory.
    pub fn set_data_map(&mut self, data_map: DataMap) -> Result<(), ModelError> {
        match &mut self.content {
            Content::DataMap(existing) => {
                *existing = data_map;
                Ok(())
            }
            Content::Directory(_) => Err(ModelError::WrongFileType {
                name: self.name.clone(),
                expected: FileType::RegularFile.as_str(),
                actual: self.file_type.as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_new_file_invariants() {
        let meta = MetaData::new("foo", false);
        assert_eq!(meta.name(), "foo");
        assert_eq!(meta.file_type(), FileType::RegularFile);
        assert_eq!(meta.size(), 0);
        assert_eq!(meta.allocation_size(), 0);
        assert_eq!(meta.creation_time(), meta.last_status_time());
        assert_eq!(meta.creation_time(), meta.last_write_time());
        assert_eq!(meta.creation_time(), meta.last_access_time());
        assert!(meta.data_map().is_some());
        assert!(meta.directory_id().is_none());
    }

    #[test]
    fn test_new_directory_invariants() {
        let meta = MetaData::new("docs", true);
        assert!(meta.is_directory());
        assert!(meta.data_map().is_none());
        assert!(meta.directory_id().is_some());
        assert_eq!(meta.size(), DIRECTORY_SIZE);
        assert_eq!(meta.allocation_size(), DIRECTORY_SIZE);
    }

    #[test]
    fn test_touch_write_sets_three_times() {
        let created = SystemTime::now();
        let mut meta = MetaData::with_type("foo", FileType::RegularFile, created);
        let later = created + Duration::from_secs(5);

        let stamp: SystemTime = meta.touch_write(later);
        assert_eq!(stamp, later);
        assert_eq!(meta.last_write_time(), later);
        assert_eq!(meta.last_status_time(), later);
        assert_eq!(meta.last_access_time(), later);
        assert_eq!(meta.creation_time(), created);
    }

    #[test]
    fn test_timestamps_never_move_backwards() {
        let created = SystemTime::now();
        let mut meta = MetaData::with_type("foo", FileType::RegularFile, created);
        let earlier = created - Duration::from_secs(60);

        meta.touch_access(earlier);
        meta.touch_write(earlier);
        assert_eq!(meta.last_access_time(), created);
        assert_eq!(meta.last_write_time(), created);
    }

    #[test]
    fn test_set_size_keeps_allocation_equal() {
        let mut meta = MetaData::new("foo", false);
        meta.set_size(500);
        assert_eq!(meta.size(), 500);
        assert_eq!(meta.allocation_size(), 500);
    }

    #[test]
    fn test_directory_rejects_data_map() {
        let mut meta = MetaData::new("docs", true);
        let err = meta.set_data_map(DataMap::default()).unwrap_err();
        assert!(matches!(err, ModelError::WrongFileType { .. }));
        assert!(meta.data_map().is_none());
    }

    #[test]
    fn test_symlink_carries_data_map() {
        let meta = MetaData::with_type("link", FileType::Symlink, SystemTime::now());
        assert!(meta.data_map().is_some());
        assert!(meta.directory_id().is_none());
    }
}
