//! Storage port and its backends.
//!
//! Everything persistent (cached responses, offline write queues) goes through
//! the `Store` trait, one namespace per purpose. Each call is a single key
//! operation; nothing above this layer relies on multi-key transactions.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// A stored value together with its key and write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  pub key: String,
  pub value: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

/// Trait for persistent key-value backends.
pub trait Store: Send + Sync {
  /// Get the value stored under `key`.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

  /// Store `value` under `key`, overwriting in place.
  ///
  /// Overwriting keeps the entry's original position in `list` order.
  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

  /// Remove a key. Returns whether anything was deleted.
  fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

  /// Entries whose key starts with `prefix`, in insertion order.
  fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<StoredEntry>>;

  /// Names of all non-empty namespaces.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace in full. Returns the number of entries removed.
  fn drop_namespace(&self, namespace: &str) -> Result<usize>;

  /// Whether written values can be read back. False for stores that discard
  /// everything.
  fn is_persistent(&self) -> bool {
    true
  }
}

/// Storage implementation that doesn't store anything.
/// Used when no persistent store is available - all operations are no-ops.
pub struct NoopStore;

impl Store for NoopStore {
  fn get(&self, _namespace: &str, _key: &str) -> Result<Option<Vec<u8>>> {
    Ok(None) // Always miss
  }

  fn put(&self, _namespace: &str, _key: &str, _value: &[u8]) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _namespace: &str, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn list(&self, _namespace: &str, _prefix: &str) -> Result<Vec<StoredEntry>> {
    Ok(Vec::new())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn drop_namespace(&self, _namespace: &str) -> Result<usize> {
    Ok(0)
  }

  fn is_persistent(&self) -> bool {
    false
  }
}

/// Process-local store, mostly for tests.
#[derive(Default)]
pub struct MemoryStore {
  namespaces: Mutex<BTreeMap<String, Vec<StoredEntry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Store for MemoryStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(
      namespaces
        .get(namespace)
        .and_then(|entries| entries.iter().find(|e| e.key == key))
        .map(|e| e.value.clone()),
    )
  }

  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
    let mut namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    let entries = namespaces.entry(namespace.to_string()).or_default();
    let stored_at = Utc::now();

    match entries.iter_mut().find(|e| e.key == key) {
      Some(existing) => {
        existing.value = value.to_vec();
        existing.stored_at = stored_at;
      }
      None => entries.push(StoredEntry {
        key: key.to_string(),
        value: value.to_vec(),
        stored_at,
      }),
    }
    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    let mut namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(entries) = namespaces.get_mut(namespace) else {
      return Ok(false);
    };

    let before = entries.len();
    entries.retain(|e| e.key != key);
    let removed = entries.len() != before;
    if entries.is_empty() {
      namespaces.remove(namespace);
    }
    Ok(removed)
  }

  fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<StoredEntry>> {
    let namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(
      namespaces
        .get(namespace)
        .map(|entries| {
          entries
            .iter()
            .filter(|e| e.key.starts_with(prefix))
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(namespaces.keys().cloned().collect())
  }

  fn drop_namespace(&self, namespace: &str) -> Result<usize> {
    let mut namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(namespaces.remove(namespace).map(|e| e.len()).unwrap_or(0))
  }
}

/// SQLite-based store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("till").join("store.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the key-value table.
///
/// `seq` records insertion order; upserts keep the original row and so the
/// original position.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    value BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (namespace, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_store_entries_namespace
    ON store_entries(namespace, seq);
"#;

impl Store for SqliteStore {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM store_entries WHERE namespace = ? AND entry_key = ?",
        params![namespace, key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}/{}: {}", namespace, key, e))
  }

  fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO store_entries (namespace, entry_key, value, stored_at)
         VALUES (?, ?, ?, datetime('now'))
         ON CONFLICT (namespace, entry_key)
         DO UPDATE SET value = excluded.value, stored_at = excluded.stored_at",
        params![namespace, key, value],
      )
      .map_err(|e| eyre!("Failed to write {}/{}: {}", namespace, key, e))?;

    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM store_entries WHERE namespace = ? AND entry_key = ?",
        params![namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete {}/{}: {}", namespace, key, e))?;

    Ok(removed > 0)
  }

  fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT entry_key, value, stored_at FROM store_entries
         WHERE namespace = ?1 AND substr(entry_key, 1, length(?2)) = ?2
         ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare listing: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map(params![namespace, prefix], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to list {}: {}", namespace, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry in {}: {}", namespace, e))?;

    rows
      .into_iter()
      .map(|(key, value, stored_at)| {
        Ok(StoredEntry {
          key,
          value,
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT namespace FROM store_entries ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace: {}", e))?;

    Ok(names)
  }

  fn drop_namespace(&self, namespace: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM store_entries WHERE namespace = ?",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to drop namespace {}: {}", namespace, e))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
