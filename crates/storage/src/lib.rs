//! Storage abstraction for rusty-drive content-addressed objects.
//!
//! This crate provides one Put/Get/Delete interface, `StorageBackend`, with two
//! structurally different implementations:
//!
//! - **Direct** - `DirectBackend` over a synchronous `DirectStore`
//!   (`MemoryStore`, `LocalStore`). Calls are complete when they return.
//! - **Network** - `NetworkBackend` over a callback-based `NetworkClient`
//!   (`LoopbackClient`). `put`/`delete` only submit; await the returned
//!   `Acknowledgement` before treating an object as stored.
//!
//! # Directory listings
//!
//! The `listing` module stores serialized directory listings through the same
//! interface, so the directory layer never depends on a concrete backend.

mod direct;
mod error;
pub mod listing;
mod network;
mod traits;

pub use direct::{DirectBackend, DirectStore, LocalStore, MemoryStore};
pub use error::StorageError;
pub use listing::ListingStore;
pub use network::{LoopbackClient, NetworkBackend, NetworkClient, Response};
pub use traits::{Acknowledgement, Completion, Delivery, StorageBackend};
