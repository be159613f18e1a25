//! Durable storage backends: SQLite, in-memory with quota, and no-op.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{DurableStorage, StorageError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Storage implementation that doesn't persist anything.
/// Used when the durable tier is disabled - the cache runs memory-only.
pub struct NoopStorage;

impl DurableStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
    Ok(None) // Always miss
  }

  fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<(), StorageError> {
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(Vec::new())
  }
}

/// In-memory key/value store with a fixed byte quota, mirroring browser storage.
pub struct MemoryStorage {
  entries: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      quota_bytes: None,
    }
  }

  /// Quota counts key and value bytes together.
  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }

  pub fn used_bytes(&self) -> usize {
    lock(&self.entries)
      .iter()
      .map(|(k, v)| k.len() + v.len())
      .sum()
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl DurableStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(lock(&self.entries).get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut entries = lock(&self.entries);
    if let Some(quota) = self.quota_bytes {
      let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let requested = key.len() + value.len();
      if used + requested > quota {
        return Err(StorageError::QuotaExceeded {
          used,
          requested,
          quota,
        });
      }
    }
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StorageError> {
    lock(&self.entries).remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    Ok(lock(&self.entries).keys().cloned().collect())
  }
}

/// SQLite-based key/value storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open (or create) the database file at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StorageError::Backend(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StorageError::Backend(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    Self::with_connection(conn)
  }

  /// Database that lives only as long as this value.
  pub fn in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StorageError::Backend(format!("Failed to open in-memory database: {}", e)))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StorageError> {
    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| StorageError::Backend(format!("Failed to run cache migrations: {}", e)))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl DurableStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = lock(&self.conn);
    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| StorageError::Backend(format!("Failed to read {}: {}", key, e)))
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = lock(&self.conn);
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| StorageError::Backend(format!("Failed to write {}: {}", key, e)))?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StorageError> {
    let conn = lock(&self.conn);
    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| StorageError::Backend(format!("Failed to delete {}: {}", key, e)))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = lock(&self.conn);
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store")
      .map_err(|e| StorageError::Backend(format!("Failed to prepare key scan: {}", e)))?;

    let keys = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| StorageError::Backend(format!("Failed to scan keys: {}", e)))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}
