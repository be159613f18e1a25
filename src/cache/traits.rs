//! Core traits and types for the caching system.

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Epoch millis when the data was cached (if from cache)
  pub cached_at: Option<i64>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data that is within its TTL.
  pub fn from_cache(data: T, cached_at: i64) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result served because the origin failed.
  pub fn offline(data: T, cached_at: i64) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// True when the caller should signal degraded data.
  pub fn is_degraded(&self) -> bool {
    self.source == CacheSource::Offline
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - origin failed, serving cached data that may be expired
  Offline,
}

/// Errors raised by a durable storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("storage quota exceeded: {used} + {requested} > {quota} bytes")]
  QuotaExceeded {
    used: usize,
    requested: usize,
    quota: usize,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage backend error: {0}")]
  Backend(String),
}

/// Synchronous string key/value store used as the second cache tier.
///
/// Implementations must be safe to share between tasks; the cache never
/// holds its own lock while calling into storage for longer than one call.
pub trait DurableStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

  fn delete(&self, key: &str) -> Result<(), StorageError>;

  /// All keys currently stored, in no particular order.
  fn keys(&self) -> Result<Vec<String>, StorageError>;
}
