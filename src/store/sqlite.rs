//! SQLite-backed key-value store.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::KeyValueStore;
use crate::error::{StorageError, StorageResult};

/// Schema for the key-value table.
const STORE_SCHEMA: &str = r#"
PRAGMA synchronous = FULL;

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-based store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> StorageResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> StorageResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    tracing::debug!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("shipsync").join("store.db"))
  }

  fn run_migrations(&self) -> StorageResult<()> {
    let conn = self.conn()?;
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

impl KeyValueStore for SqliteStore {
  fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
    let conn = self.conn()?;
    let value = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()?;
    Ok(value)
  }

  fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv (key, value, written_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn delete(&self, key: &str) -> StorageResult<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
    Ok(())
  }

  fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")?;
    let keys = stmt
      .query_map(params![prefix.chars().count() as i64, prefix], |row| {
        row.get::<_, String>(0)
      })?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn test_roundtrip_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.write("queue", b"[1,2]").unwrap();
      store.write("queue", b"[1,2,3]").unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.read("queue").unwrap(), Some(b"[1,2,3]".to_vec()));
    assert_eq!(store.read("missing").unwrap(), None);
  }

  #[test]
  fn test_list_keys_and_delete() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
    store.write("cache:b", b"x").unwrap();
    store.write("cache:a", b"x").unwrap();
    store.write("cachet", b"x").unwrap();
    store.write("queue", b"x").unwrap();

    assert_eq!(store.list_keys("cache:").unwrap(), vec!["cache:a", "cache:b"]);

    store.delete("cache:a").unwrap();
    store.delete("cache:a").unwrap();
    assert_eq!(store.list_keys("cache:").unwrap(), vec!["cache:b"]);
  }
}
