//! Contract tests run against every backend shape.
//!
//! Each test builds the same scenario over a direct memory store, a direct
//! local-directory store and a loopback network store, and checks that callers
//! written against `StorageBackend` see identical results once they honour the
//! returned `Completion`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rusty_drive_model::{ChunkAddress, DirectoryId};
use rusty_drive_storage::{
    Completion, Delivery, DirectBackend, ListingStore, LocalStore, LoopbackClient, MemoryStore,
    NetworkBackend, StorageBackend, StorageError,
};
use tempfile::TempDir;

/// Backends under test, plus anything that must outlive them.
struct Backends {
    _dir: TempDir,
    all: Vec<(&'static str, Arc<dyn StorageBackend>)>,
}

fn create_backends() -> Backends {
    let dir: TempDir = TempDir::new().unwrap();
    let local = LocalStore::new(dir.path().join("objects")).unwrap();
    let network_store = Arc::new(MemoryStore::new());
    let client = LoopbackClient::with_latency(network_store, Duration::from_millis(5)).unwrap();

    let memory: Arc<dyn StorageBackend> = Arc::new(DirectBackend::new(MemoryStore::new()));
    let local: Arc<dyn StorageBackend> = Arc::new(DirectBackend::new(local));
    let network: Arc<dyn StorageBackend> = Arc::new(NetworkBackend::new(client));

    Backends {
        _dir: dir,
        all: vec![("memory", memory), ("local", local), ("network", network)],
    }
}

// ============================================================================
// Put / Get / Delete
// ============================================================================

#[tokio::test]
async fn test_chunk_round_trip_on_every_backend() {
    let backends = create_backends();
    let data: Vec<u8> = b"output text".to_vec();
    let address = ChunkAddress::of(&data);

    for (name, backend) in &backends.all {
        let completion: Completion = backend.put(address.as_str(), data.clone()).await.unwrap();
        match backend.delivery() {
            Delivery::Synchronous => assert!(completion.is_durable(), "{name}"),
            Delivery::Submitted => assert!(!completion.is_durable(), "{name}"),
        }
        completion.wait().await.unwrap();

        let fetched: Vec<u8> = backend.get(address.as_str()).await.unwrap();
        assert_eq!(fetched, data, "{name}");
        assert_eq!(ChunkAddress::of(&fetched), address, "{name}");
    }
}

#[tokio::test]
async fn test_missing_key_is_not_found_on_every_backend() {
    let backends = create_backends();
    let address = ChunkAddress::of(b"never stored");

    for (name, backend) in &backends.all {
        let err: StorageError = backend.get(address.as_str()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}: {err}");
    }
}

#[tokio::test]
async fn test_delete_then_get_on_every_backend() {
    let backends = create_backends();
    let address = ChunkAddress::of(b"short lived");

    for (name, backend) in &backends.all {
        backend
            .put(address.as_str(), b"short lived".to_vec())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        backend.delete(address.as_str()).await.unwrap().wait().await.unwrap();

        let err: StorageError = backend.get(address.as_str()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

// ============================================================================
// Directory listings
// ============================================================================

#[tokio::test]
async fn test_listing_store_on_every_backend() {
    let backends = create_backends();
    let id = DirectoryId::generate("projects", SystemTime::now());
    let listing: Vec<String> = vec!["a.txt".to_string(), "b.txt".to_string()];

    for (name, backend) in &backends.all {
        let store = ListingStore::new(backend.clone());
        store.put_listing(&id, &listing).await.unwrap().wait().await.unwrap();

        let back: Vec<String> = store.get_listing(&id).await.unwrap();
        assert_eq!(back, listing, "{name}");
    }
}
