//! Content addressing for chunks and directory identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ModelError;

/// Length in hex characters of a SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Default chunk size (1MB = 1024 * 1024 bytes).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Counter mixed into generated directory ids so that two directories created
/// with the same name in the same instant still differ.
static DIRECTORY_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Supported hashing algorithms for chunk content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    /// Get the string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Hash `data` and return the lowercase hex digest.
    pub fn hash_hex(&self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content address of a chunk: the hex digest of its bytes.
///
/// Two chunks with identical bytes always share an address, which is what
/// deduplicates storage across files and versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkAddress(String);

impl ChunkAddress {
    /// Compute the address of a chunk's content.
    ///
    /// # Arguments
    /// * `data` - Chunk bytes
    pub fn of(data: &[u8]) -> Self {
        Self(HashAlgorithm::Sha256.hash_hex(data))
    }

    /// Parse an address from its hex form.
    ///
    /// # Arguments
    /// * `hex_str` - 64 character hex digest
    ///
    /// # Returns
    /// The address, or `ModelError::InvalidAddress` if the string is not a digest.
    pub fn from_hex(hex_str: &str) -> Result<Self, ModelError> {
        if !is_digest_hex(hex_str) {
            return Err(ModelError::InvalidAddress(hex_str.to_string()));
        }
        Ok(Self(hex_str.to_ascii_lowercase()))
    }

    /// The hex digest, usable directly as a storage key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChunkAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(String);

impl DirectoryId {
    /// Generate a fresh identifier for a new directory.
    ///
    /// # Arguments
    /// * `name` - Directory name
    /// * `created` - Creation instant of the directory
    pub fn generate(name: &str, created: SystemTime) -> Self {
        let nanos: u128 = created
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter: u64 = DIRECTORY_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse an identifier from its hex form.
    pub fn from_hex(hex_str: &str) -> Result<Self, ModelError> {
        if !is_digest_hex(hex_str) {
            return Err(ModelError::InvalidDirectoryId(hex_str.to_string()));
        }
        Ok(Self(hex_str.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
