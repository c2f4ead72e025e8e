//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::CachedEntry;
use crate::net::Response;

const CURRENT_GENERATION_KEY: &str = "current_generation";
const INSTALLED_GENERATION_KEY: &str = "installed_generation";

/// Trait for durable cache storage backends.
///
/// A backend holds any number of named generations, each a key→response map,
/// plus the pointers naming the current generation and the one installed
/// and waiting for activation.
pub trait CacheStorage: Send + Sync {
  /// Open a generation, creating it if absent.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// Check whether a generation exists.
  fn has_generation(&self, name: &str) -> Result<bool>;

  /// All generation names.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Look up an entry by exact key.
  fn get_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>>;

  /// Insert or replace an entry.
  fn put_entry(&self, generation: &str, key: &str, response: &Response) -> Result<()>;

  /// Keys stored in a generation, sorted.
  fn entry_keys(&self, generation: &str) -> Result<Vec<String>>;

  /// Name of the current generation, if one has been activated.
  fn current_generation(&self) -> Result<Option<String>>;

  /// Point the current generation at `name`.
  fn set_current_generation(&self, name: &str) -> Result<()>;

  /// Name of the generation that finished installing but is not yet current.
  fn installed_generation(&self) -> Result<Option<String>>;

  /// Record (or with `None`, clear) the installed generation.
  fn set_installed_generation(&self, name: Option<&str>) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache generations
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, one per (generation, request key)
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

-- Worker bookkeeping (current generation pointer)
CREATE TABLE IF NOT EXISTS worker_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn has_generation(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<String> = conn
      .query_row(
        "SELECT name FROM cache_generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
        params![generation, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: BTreeMap<String, String> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_entry(&self, generation: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (generation, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![generation, key, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn entry_keys(&self, generation: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE generation = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }

  fn current_generation(&self) -> Result<Option<String>> {
    self.read_state(CURRENT_GENERATION_KEY)
  }

  fn set_current_generation(&self, name: &str) -> Result<()> {
    self.write_state(CURRENT_GENERATION_KEY, Some(name))
  }

  fn installed_generation(&self) -> Result<Option<String>> {
    self.read_state(INSTALLED_GENERATION_KEY)
  }

  fn set_installed_generation(&self, name: Option<&str>) -> Result<()> {
    self.write_state(INSTALLED_GENERATION_KEY, name)
  }
}

impl SqliteStorage {
  fn read_state(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT value FROM worker_state WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  /// Store `value` under `key`, deleting the row for `None`.
  fn write_state(&self, key: &str, value: Option<&str>) -> Result<()> {
    let conn = self.lock()?;

    let written = match value {
      Some(value) => conn.execute(
        "INSERT OR REPLACE INTO worker_state (key, value) VALUES (?, ?)",
        params![key, value],
      ),
      None => conn.execute("DELETE FROM worker_state WHERE key = ?", params![key]),
    };
    written.map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> Response {
    let mut response = Response::new(200, body);
    response
      .headers
      .insert("content-type".to_string(), "text/html".to_string());
    response
  }

  #[test]
  fn test_put_and_get_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage
      .put_entry("v1", "https://app.test/index.html", &response("<html>"))
      .unwrap();

    let entry = storage
      .get_entry("v1", "https://app.test/index.html")
      .unwrap()
      .unwrap();
    assert_eq!(entry.response, response("<html>"));

    // Other generations do not see the entry
    storage.open_generation("v2").unwrap();
    assert!(storage
      .get_entry("v2", "https://app.test/index.html")
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_replaces_existing_key() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put_entry("v1", "k", &response("old")).unwrap();
    storage.put_entry("v1", "k", &response("new")).unwrap();

    assert_eq!(storage.entry_keys("v1").unwrap(), vec!["k".to_string()]);
    let entry = storage.get_entry("v1", "k").unwrap().unwrap();
    assert_eq!(entry.response.body, b"new".to_vec());
  }

  #[test]
  fn test_open_generation_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.open_generation("v1").unwrap();
    assert_eq!(storage.generation_names().unwrap(), vec!["v1".to_string()]);
    assert!(storage.has_generation("v1").unwrap());
    assert!(!storage.has_generation("v2").unwrap());
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put_entry("v1", "k", &response("x")).unwrap();

    assert!(storage.delete_generation("v1").unwrap());
    assert!(!storage.delete_generation("v1").unwrap());
    assert!(storage.generation_names().unwrap().is_empty());
    assert!(storage.entry_keys("v1").unwrap().is_empty());
  }

  #[test]
  fn test_current_generation_pointer() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.current_generation().unwrap(), None);

    storage.set_current_generation("v1").unwrap();
    storage.set_current_generation("v2").unwrap();
    assert_eq!(storage.current_generation().unwrap(), Some("v2".to_string()));
  }

  #[test]
  fn test_installed_generation_marker() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert_eq!(storage.installed_generation().unwrap(), None);

    storage.set_installed_generation(Some("v2")).unwrap();
    storage.set_current_generation("v1").unwrap();
    assert_eq!(storage.installed_generation().unwrap(), Some("v2".to_string()));
    assert_eq!(storage.current_generation().unwrap(), Some("v1".to_string()));

    storage.set_installed_generation(None).unwrap();
    assert_eq!(storage.installed_generation().unwrap(), None);
    assert_eq!(storage.current_generation().unwrap(), Some("v1".to_string()));
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
