//! Durable key-value storage backing the response cache and the pending queue.
//!
//! The store is the single source of truth: both the cache and the queue write
//! through it before reporting success, so an app kill right after a successful
//! call never loses data.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StorageResult;

/// Trait for durable storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Read the value stored under `key`.
  fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

  /// Store `value` under `key`, replacing any previous value.
  fn write(&self, key: &str, value: &[u8]) -> StorageResult<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn delete(&self, key: &str) -> StorageResult<()>;

  /// List every key starting with `prefix`, in ascending order.
  fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
