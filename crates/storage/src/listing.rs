//! Put/Get/Delete of serialized directory listings.

use std::sync::Arc;

use rusty_drive_model::DirectoryId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::traits::{Completion, StorageBackend};

/// Key prefix for directory listings, keeping them apart from chunk keys.
const LISTING_PREFIX: &str = "listing-";

/// Stores directory listings through any `StorageBackend`.
///
/// The listing type is opaque here: anything serde can encode is stored as
/// JSON under a key derived from its `DirectoryId`.
#[derive(Clone)]
pub struct ListingStore {
    backend: Arc<dyn StorageBackend>,
}

impl ListingStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Storage key for a directory's listing.
    pub fn listing_key(id: &DirectoryId) -> String {
        format!("{}{}", LISTING_PREFIX, id)
    }

    /// Serialize and store a listing.
    ///
    /// # Returns
    /// The backend's completion; network backends only guarantee submission.
    pub async fn put_listing<T>(&self, id: &DirectoryId, listing: &T) -> Result<Completion, StorageError>
    where
        T: Serialize + Sync,
    {
        let data: Vec<u8> = serde_json::to_vec(listing)?;
        let key: String = Self::listing_key(id);
        tracing::debug!(key = %key, bytes = data.len(), "storing directory listing");
        self.backend.put(&key, data).await
    }

    /// Fetch and decode a listing.
    pub async fn get_listing<T>(&self, id: &DirectoryId) -> Result<T, StorageError>
    where
        T: DeserializeOwned,
    {
        let data: Vec<u8> = self.backend.get(&Self::listing_key(id)).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Remove a listing.
    pub async fn delete_listing(&self, id: &DirectoryId) -> Result<Completion, StorageError> {
        self.backend.delete(&Self::listing_key(id)).await
    }
}
