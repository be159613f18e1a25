//! Generic caching layer for parsed application data and offline support.
//!
//! This module provides a resource-agnostic cache that:
//! - Partitions entries into namespaces, each with its own TTL and item cap
//! - Keeps a resident in-memory tier backed by a durable key/value tier
//! - Purges expired entries lazily and evicts the oldest entry at capacity
//! - Provides basic offline mode (serve stale cache when the origin fails)

mod layer;
mod storage;
mod store;
mod traits;

pub use layer::SyncOutcome;
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage};
pub use store::{CacheEntry, CacheError, CacheStore, NamespaceStats, STORAGE_PREFIX};
pub use traits::{CacheResult, CacheSource, DurableStorage, StorageError};
