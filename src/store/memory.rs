//! In-process store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::KeyValueStore;
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
struct Shared {
  data: Mutex<BTreeMap<String, Vec<u8>>>,
  fail_writes: AtomicBool,
}

/// Store that keeps everything in memory.
///
/// Clones share the same contents, so dropping every engine built on one
/// handle and reopening from a clone behaves like a process restart over the
/// same device storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
  shared: Arc<Shared>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent write and delete fail (or succeed again).
  pub fn set_fail_writes(&self, fail: bool) {
    self.shared.fail_writes.store(fail, Ordering::SeqCst);
  }

  fn check_writable(&self) -> StorageResult<()> {
    if self.shared.fail_writes.load(Ordering::SeqCst) {
      return Err(StorageError::WriteRejected("store is read-only".into()));
    }
    Ok(())
  }

  fn data(&self) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
    self.shared.data.lock().map_err(|_| StorageError::LockPoisoned)
  }
}

impl KeyValueStore for MemoryStore {
  fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
    Ok(self.data()?.get(key).cloned())
  }

  fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
    self.check_writable()?;
    self.data()?.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, key: &str) -> StorageResult<()> {
    self.check_writable()?;
    self.data()?.remove(key);
    Ok(())
  }

  fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
    Ok(
      self
        .data()?
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clones_share_contents() {
    let store = MemoryStore::new();
    let other = store.clone();
    store.write("cache:a", b"1").unwrap();
    assert_eq!(other.read("cache:a").unwrap(), Some(b"1".to_vec()));
  }

  #[test]
  fn test_list_keys_filters_by_prefix() {
    let store = MemoryStore::new();
    store.write("cache:b", b"").unwrap();
    store.write("cache:a", b"").unwrap();
    store.write("queue", b"").unwrap();
    assert_eq!(store.list_keys("cache:").unwrap(), vec!["cache:a", "cache:b"]);
  }

  #[test]
  fn test_failing_writes_leave_data_untouched() {
    let store = MemoryStore::new();
    store.write("k", b"old").unwrap();
    store.set_fail_writes(true);
    assert!(store.write("k", b"new").is_err());
    assert!(store.delete("k").is_err());
    assert_eq!(store.read("k").unwrap(), Some(b"old".to_vec()));
  }
}
