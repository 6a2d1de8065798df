//! Data model for rusty-drive.
//!
//! This crate holds the plain values every other layer passes around:
//! - `MetaData` - per-entry attributes and the payload handle
//! - `DataMap` / `ChunkDetails` - ordered chunk references for a file's content
//! - `ChunkAddress` / `DirectoryId` - content addresses and listing ids
//!
//! Everything here is serde-serializable so that a directory layer can persist
//! entries without knowing their internals.

pub mod data_map;
pub mod error;
pub mod hash;
pub mod metadata;

pub use data_map::{ChunkDetails, DataMap};
pub use error::ModelError;
pub use hash::{ChunkAddress, DirectoryId, HashAlgorithm, DEFAULT_CHUNK_SIZE};
pub use metadata::{Content, FileType, MetaData, DIRECTORY_SIZE};
