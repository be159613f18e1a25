//! Origin-aware cache operations that sit on top of the synchronous store.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use tracing::{debug, warn};

use super::store::{decode, CacheStore};
use super::traits::CacheResult;

/// What `sync_with_server` ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Nothing was cached before; the fresh value is now stored
  Stored,
  /// The cached value already matched the origin
  Unchanged,
  /// The cached value differed and the update call succeeded
  Reconciled,
  /// The cached value differed and the update call failed (logged)
  ReconcileFailed,
  /// The origin could not be read; the cache was left untouched
  FetchFailed,
}

impl CacheStore {
  /// Serve from cache when fresh, otherwise fetch and store.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. On network failure, return whatever is cached, even expired (offline mode)
  /// 4. With nothing cached, the fetch error is returned
  pub async fn preload_data<T, F, Fut>(
    &self,
    namespace: &str,
    key: &str,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    // Captured before `get_entry` so lazy purging cannot discard the fallback
    let fallback = self.peek_any(namespace, key)?;

    if let Some(entry) = self.get_entry(namespace, key)? {
      let data = decode(namespace, key, entry.data)?;
      return Ok(CacheResult::from_cache(data, entry.timestamp));
    }

    match fetcher().await {
      Ok(data) => {
        // Last writer wins if another set landed while we were suspended
        self.set(namespace, key, &data)?;
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match fallback {
        Some(entry) => {
          warn!(namespace, key, error = %e, "Origin fetch failed, serving stale cache");
          let data = decode(namespace, key, entry.data)?;
          Ok(CacheResult::offline(data, entry.timestamp))
        }
        None => Err(e),
      },
    }
  }

  /// Refresh `key` from the origin and push the fresh value back through
  /// `updater` when it differs from what was cached.
  ///
  /// Fetch and update failures are logged, never returned.
  pub async fn sync_with_server<T, F, FFut, U, UFut>(
    &self,
    namespace: &str,
    key: &str,
    fetcher: F,
    updater: U,
  ) -> Result<SyncOutcome>
  where
    T: Serialize,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<T>>,
    U: FnOnce(T) -> UFut,
    UFut: Future<Output = Result<()>>,
  {
    let previous = self.peek_any(namespace, key)?;

    let fresh = match fetcher().await {
      Ok(fresh) => fresh,
      Err(e) => {
        warn!(namespace, key, error = %e, "Sync fetch failed");
        return Ok(SyncOutcome::FetchFailed);
      }
    };

    let fresh_value = serde_json::to_value(&fresh)?;
    self.set_value(namespace, key, fresh_value.clone())?;

    let Some(previous) = previous else {
      return Ok(SyncOutcome::Stored);
    };
    if previous.data == fresh_value {
      debug!(namespace, key, "Cached value matches origin");
      return Ok(SyncOutcome::Unchanged);
    }

    match updater(fresh).await {
      Ok(()) => Ok(SyncOutcome::Reconciled),
      Err(e) => {
        warn!(namespace, key, error = %e, "Sync update failed");
        Ok(SyncOutcome::ReconcileFailed)
      }
    }
  }
}
