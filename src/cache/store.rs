//! Tiered key/value cache: an in-memory map per namespace in front of durable storage.

use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::traits::DurableStorage;
use crate::clock::Clock;
use crate::config::NamespaceConfig;

/// Prefix shared by every durable key the store owns.
pub const STORAGE_PREFIX: &str = "cache_";

/// Errors a caller of the cache can act on.
///
/// Durable-storage failures are deliberately absent: they are logged and the
/// store degrades to memory-only behavior.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("unknown cache namespace: {0}")]
  UnknownNamespace(String),

  #[error("failed to encode value for {namespace}/{key}: {source}")]
  Encode {
    namespace: String,
    key: String,
    source: serde_json::Error,
  },

  #[error("cached value for {namespace}/{key} has an unexpected shape: {source}")]
  Decode {
    namespace: String,
    key: String,
    source: serde_json::Error,
  },
}

/// A resident cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub data: Value,
  /// Epoch millis at which the entry was written
  pub timestamp: i64,
}

/// Durable mirror layout: `{ "data": ..., "timestamp": ... }`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
  data: Value,
  timestamp: i64,
}

#[derive(Debug, Default)]
struct NamespaceState {
  /// Insertion ordered; overwrites keep their slot
  entries: IndexMap<String, CacheEntry>,
  hits: u64,
  misses: u64,
  evictions: u64,
}

/// Counters for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceStats {
  pub name: String,
  pub resident: usize,
  pub max_items: usize,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
}

/// Process-wide cache owning every namespace map and its durable mirror.
///
/// Cloning is cheap and yields a handle to the same state, so one instance is
/// constructed at startup and handed to each resource adapter.
#[derive(Clone)]
pub struct CacheStore {
  namespaces: Arc<IndexMap<String, NamespaceConfig>>,
  state: Arc<Mutex<HashMap<String, NamespaceState>>>,
  storage: Arc<dyn DurableStorage>,
  clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore")
      .field("namespaces", &self.namespaces)
      .finish_non_exhaustive()
  }
}

impl CacheStore {
  pub fn new(
    namespaces: IndexMap<String, NamespaceConfig>,
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      namespaces: Arc::new(namespaces),
      state: Arc::new(Mutex::new(HashMap::new())),
      storage,
      clock,
    }
  }

  /// Durable key for an entry: `cache_{namespace}_{key}`.
  pub fn storage_key(namespace: &str, key: &str) -> String {
    format!("{}{}_{}", STORAGE_PREFIX, namespace, key)
  }

  pub fn namespace_names(&self) -> impl Iterator<Item = &str> {
    self.namespaces.keys().map(String::as_str)
  }

  pub fn now_millis(&self) -> i64 {
    self.clock.now_millis()
  }

  fn policy(&self, namespace: &str) -> Result<NamespaceConfig, CacheError> {
    self
      .namespaces
      .get(namespace)
      .copied()
      .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
  }

  fn lock_state(&self) -> MutexGuard<'_, HashMap<String, NamespaceState>> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn is_fresh(policy: &NamespaceConfig, timestamp: i64, now: i64) -> bool {
    now.saturating_sub(timestamp) <= i64::try_from(policy.max_age_ms).unwrap_or(i64::MAX)
  }

  /// Insert or overwrite `key` with the current time as its timestamp.
  pub fn set<T: Serialize>(&self, namespace: &str, key: &str, data: &T) -> Result<(), CacheError> {
    let value = serde_json::to_value(data).map_err(|source| CacheError::Encode {
      namespace: namespace.to_string(),
      key: key.to_string(),
      source,
    })?;
    self.set_value(namespace, key, value)
  }

  pub fn set_value(&self, namespace: &str, key: &str, data: Value) -> Result<(), CacheError> {
    let policy = self.policy(namespace)?;
    let entry = CacheEntry {
      key: key.to_string(),
      data,
      timestamp: self.clock.now_millis(),
    };

    let mut state = self.lock_state();
    let ns = state.entry(namespace.to_string()).or_default();
    self.make_room(namespace, &policy, ns, key, entry.timestamp);
    self.persist(namespace, &entry);
    ns.entries.insert(key.to_string(), entry);
    Ok(())
  }

  /// Purge expired entries, then evict the oldest resident if `key` would
  /// push the namespace over its cap.
  fn make_room(
    &self,
    namespace: &str,
    policy: &NamespaceConfig,
    ns: &mut NamespaceState,
    key: &str,
    now: i64,
  ) {
    let mut expired = Vec::new();
    ns.entries.retain(|k, e| {
      let keep = Self::is_fresh(policy, e.timestamp, now);
      if !keep {
        expired.push(k.clone());
      }
      keep
    });
    if !expired.is_empty() {
      debug!(namespace, count = expired.len(), "Purged expired entries");
      for k in &expired {
        self.remove_durable(namespace, k);
      }
    }

    if ns.entries.contains_key(key) || ns.entries.len() < policy.max_items {
      return;
    }

    // Strict `<` keeps the first-encountered entry on timestamp ties
    let mut oldest: Option<(&String, i64)> = None;
    for (k, e) in &ns.entries {
      match oldest {
        Some((_, ts)) if e.timestamp >= ts => {}
        _ => oldest = Some((k, e.timestamp)),
      }
    }
    if let Some(victim) = oldest.map(|(k, _)| k.clone()) {
      ns.entries.shift_remove(&victim);
      ns.evictions += 1;
      debug!(namespace, key = %victim, "Evicted oldest entry");
      self.remove_durable(namespace, &victim);
    }
  }

  fn persist(&self, namespace: &str, entry: &CacheEntry) {
    let stored = StoredEntry {
      data: entry.data.clone(),
      timestamp: entry.timestamp,
    };
    let storage_key = Self::storage_key(namespace, &entry.key);
    let result = serde_json::to_string(&stored)
      .map_err(super::traits::StorageError::from)
      .and_then(|raw| self.storage.set(&storage_key, &raw));
    if let Err(e) = result {
      warn!(
        key = %storage_key,
        error = %e,
        "Failed to persist cache entry, keeping it in memory only"
      );
    }
  }

  fn remove_durable(&self, namespace: &str, key: &str) {
    let storage_key = Self::storage_key(namespace, key);
    if let Err(e) = self.storage.delete(&storage_key) {
      warn!(key = %storage_key, error = %e, "Failed to delete durable cache entry");
    }
  }

  /// Read the durable mirror without judging freshness. Corrupt payloads are
  /// deleted and reported as absent.
  fn read_durable(&self, namespace: &str, key: &str) -> Option<StoredEntry> {
    let storage_key = Self::storage_key(namespace, key);
    let raw = match self.storage.get(&storage_key) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(key = %storage_key, error = %e, "Failed to read durable cache entry");
        return None;
      }
    };
    match serde_json::from_str::<StoredEntry>(&raw) {
      Ok(stored) => Some(stored),
      Err(e) => {
        warn!(key = %storage_key, error = %e, "Discarding corrupt durable cache entry");
        self.remove_durable(namespace, key);
        None
      }
    }
  }

  /// Fresh data for `key`, decoded as `T`.
  pub fn get<T: DeserializeOwned>(
    &self,
    namespace: &str,
    key: &str,
  ) -> Result<Option<T>, CacheError> {
    self
      .get_entry(namespace, key)?
      .map(|entry| decode(namespace, key, entry.data))
      .transpose()
  }

  /// Fresh entry for `key`, reading through to durable storage on a memory miss.
  pub fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    let policy = self.policy(namespace)?;
    let now = self.clock.now_millis();

    let mut state = self.lock_state();
    let ns = state.entry(namespace.to_string()).or_default();

    if let Some(entry) = ns.entries.get(key) {
      if Self::is_fresh(&policy, entry.timestamp, now) {
        ns.hits += 1;
        return Ok(Some(entry.clone()));
      }
      debug!(namespace, key, "Dropping expired entry on access");
      ns.entries.shift_remove(key);
    }

    let Some(stored) = self.read_durable(namespace, key) else {
      ns.misses += 1;
      return Ok(None);
    };

    if !Self::is_fresh(&policy, stored.timestamp, now) {
      debug!(namespace, key, "Deleting expired durable entry");
      self.remove_durable(namespace, key);
      ns.misses += 1;
      return Ok(None);
    }

    let entry = CacheEntry {
      key: key.to_string(),
      data: stored.data,
      timestamp: stored.timestamp,
    };
    debug!(namespace, key, "Promoting durable entry into memory");
    self.make_room(namespace, &policy, ns, key, now);
    ns.entries.insert(key.to_string(), entry.clone());
    ns.hits += 1;
    Ok(Some(entry))
  }

  /// Whatever is cached for `key`, expired or not, without side effects.
  pub fn peek_any(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
    self.policy(namespace)?;
    {
      let state = self.lock_state();
      if let Some(entry) = state.get(namespace).and_then(|ns| ns.entries.get(key)) {
        return Ok(Some(entry.clone()));
      }
    }
    let storage_key = Self::storage_key(namespace, key);
    let stored = match self.storage.get(&storage_key) {
      Ok(Some(raw)) => serde_json::from_str::<StoredEntry>(&raw).ok(),
      Ok(None) => None,
      Err(e) => {
        warn!(key = %storage_key, error = %e, "Failed to read durable cache entry");
        None
      }
    };
    Ok(stored.map(|s| CacheEntry {
      key: key.to_string(),
      data: s.data,
      timestamp: s.timestamp,
    }))
  }

  /// True iff `get` would return data. Durable hits are not promoted.
  pub fn has(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
    let policy = self.policy(namespace)?;
    let now = self.clock.now_millis();
    {
      let state = self.lock_state();
      if let Some(entry) = state.get(namespace).and_then(|ns| ns.entries.get(key)) {
        if Self::is_fresh(&policy, entry.timestamp, now) {
          return Ok(true);
        }
      }
    }
    Ok(
      self
        .read_durable(namespace, key)
        .is_some_and(|stored| Self::is_fresh(&policy, stored.timestamp, now)),
    )
  }

  /// Remove `key` from both tiers.
  pub fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
    self.policy(namespace)?;
    let mut state = self.lock_state();
    if let Some(ns) = state.get_mut(namespace) {
      ns.entries.shift_remove(key);
    }
    self.remove_durable(namespace, key);
    Ok(())
  }

  /// Remove every entry of `namespace` from both tiers.
  pub fn clear(&self, namespace: &str) -> Result<(), CacheError> {
    self.policy(namespace)?;
    let mut state = self.lock_state();
    if let Some(ns) = state.get_mut(namespace) {
      ns.entries.clear();
    }
    for storage_key in self.durable_storage_keys(namespace) {
      if let Err(e) = self.storage.delete(&storage_key) {
        warn!(key = %storage_key, error = %e, "Failed to delete durable cache entry");
      }
    }
    debug!(namespace, "Cleared namespace");
    Ok(())
  }

  /// Every durable key under `cache_{namespace}_`.
  fn durable_storage_keys(&self, namespace: &str) -> Vec<String> {
    let prefix = format!("{}{}_", STORAGE_PREFIX, namespace);
    match self.storage.keys() {
      Ok(keys) => keys
        .into_iter()
        .filter(|k| k.starts_with(&prefix))
        .collect(),
      Err(e) => {
        warn!(namespace, error = %e, "Failed to list durable cache keys");
        Vec::new()
      }
    }
  }

  /// Cache keys present only in (or also in) the durable tier.
  pub fn durable_keys(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
    self.policy(namespace)?;
    let prefix_len = STORAGE_PREFIX.len() + namespace.len() + 1;
    let mut keys: Vec<String> = self
      .durable_storage_keys(namespace)
      .into_iter()
      .map(|k| k[prefix_len..].to_string())
      .collect();
    keys.sort();
    Ok(keys)
  }

  /// Resident keys in insertion order; durable-only entries are not listed.
  pub fn keys(&self, namespace: &str) -> Result<Vec<String>, CacheError> {
    self.policy(namespace)?;
    let state = self.lock_state();
    Ok(
      state
        .get(namespace)
        .map(|ns| ns.entries.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  /// Resident entry count.
  pub fn size(&self, namespace: &str) -> Result<usize, CacheError> {
    self.policy(namespace)?;
    let state = self.lock_state();
    Ok(state.get(namespace).map_or(0, |ns| ns.entries.len()))
  }

  pub fn stats(&self) -> Vec<NamespaceStats> {
    let state = self.lock_state();
    self
      .namespaces
      .iter()
      .map(|(name, policy)| {
        let ns = state.get(name);
        NamespaceStats {
          name: name.clone(),
          resident: ns.map_or(0, |ns| ns.entries.len()),
          max_items: policy.max_items,
          hits: ns.map_or(0, |ns| ns.hits),
          misses: ns.map_or(0, |ns| ns.misses),
          evictions: ns.map_or(0, |ns| ns.evictions),
        }
      })
      .collect()
  }
}

pub(crate) fn decode<T: DeserializeOwned>(
  namespace: &str,
  key: &str,
  data: Value,
) -> Result<T, CacheError> {
  serde_json::from_value(data).map_err(|source| CacheError::Decode {
    namespace: namespace.to_string(),
    key: key.to_string(),
    source,
  })
}
