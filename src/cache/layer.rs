//! Response cache with write-through persistence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::key::cache_key;
use crate::clock::Clock;
use crate::envelope::{self, RecordKind};
use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use crate::transport::Method;

/// Store key prefix for cache records.
pub const CACHE_PREFIX: &str = "cache:";

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Fresh iff `now - stored_at < ttl`.
  pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - self.stored_at < ttl
  }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload {
  pub payload: Value,
  pub stored_at: DateTime<Utc>,
  pub fresh: bool,
}

/// Maps request fingerprints to their last successful response.
///
/// Lookups hit an in-memory index and never block on the network or the
/// store. Writes go to the store first; the index only changes once the
/// record is durable. Stale entries are kept as a degraded-mode fallback
/// until [`clear`](Self::clear) or [`sweep`](Self::sweep) removes them.
pub struct ResponseCache {
  store: Arc<dyn KeyValueStore>,
  entries: RwLock<HashMap<String, CacheEntry>>,
  ttl: Duration,
  clock: Arc<dyn Clock>,
}

impl ResponseCache {
  /// Load every persisted cache record from `store`.
  ///
  /// Records that fail to decode are logged, deleted and skipped.
  pub fn open(
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
  ) -> StorageResult<Self> {
    let mut entries = HashMap::new();

    for store_key in store.list_keys(CACHE_PREFIX)? {
      let Some(bytes) = store.read(&store_key)? else {
        continue;
      };
      match envelope::decode::<CacheEntry>(&store_key, RecordKind::Cache, &bytes) {
        Ok(entry) => {
          entries.insert(entry.key.clone(), entry);
        }
        Err(e) => {
          tracing::warn!(key = %store_key, error = %e, "dropping corrupt cache record");
          if let Err(e) = store.delete(&store_key) {
            tracing::warn!(key = %store_key, error = %e, "failed to delete corrupt cache record");
          }
        }
      }
    }

    tracing::debug!(entries = entries.len(), "loaded response cache");

    Ok(Self {
      store,
      entries: RwLock::new(entries),
      ttl,
      clock,
    })
  }

  /// Fingerprint of a request; see [`cache_key`].
  pub fn key(method: Method, path: &str, params: Option<&Value>) -> String {
    cache_key(method, path, params)
  }

  /// Look up `key`, flagging whether the entry is still fresh.
  pub fn get(&self, key: &str) -> Option<CachedPayload> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    let entry = entries.get(key)?;
    Some(CachedPayload {
      payload: entry.payload.clone(),
      stored_at: entry.stored_at,
      fresh: entry.is_fresh_at(self.clock.now(), self.ttl),
    })
  }

  /// Store `payload` under `key`, replacing any previous entry.
  pub fn put(&self, key: &str, payload: Value) -> StorageResult<()> {
    let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
    let entry = CacheEntry {
      key: key.to_string(),
      payload,
      stored_at: self.clock.now(),
    };

    let bytes = envelope::encode(RecordKind::Cache, &entry)?;
    self.store.write(&store_key(key), &bytes)?;
    entries.insert(key.to_string(), entry);
    Ok(())
  }

  /// Remove every entry. Returns how many were removed.
  pub fn clear(&self) -> StorageResult<usize> {
    self.remove_where(|_| true)
  }

  /// Remove entries stored more than `max_age` ago. Returns how many were
  /// removed.
  pub fn sweep(&self, max_age: Duration) -> StorageResult<usize> {
    let now = self.clock.now();
    self.remove_where(|entry| now - entry.stored_at > max_age)
  }

  fn remove_where(&self, doomed: impl Fn(&CacheEntry) -> bool) -> StorageResult<usize> {
    let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
    let keys: Vec<String> = entries
      .values()
      .filter(|e| doomed(e))
      .map(|e| e.key.clone())
      .collect();

    // Delete one at a time so a failure leaves memory matching disk
    for key in &keys {
      self.store.delete(&store_key(key))?;
      entries.remove(key);
    }

    if !keys.is_empty() {
      tracing::info!(removed = keys.len(), "evicted cache entries");
    }
    Ok(keys.len())
  }

  pub fn len(&self) -> usize {
    self.entries.read().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn store_key(key: &str) -> String {
  format!("{}{}", CACHE_PREFIX, key)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::MemoryStore;
  use chrono::TimeZone;
  use serde_json::json;

  fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
  }

  fn cache_with(store: &MemoryStore, clock: &Arc<ManualClock>) -> ResponseCache {
    ResponseCache::open(Arc::new(store.clone()), Duration::hours(24), clock.clone()).unwrap()
  }

  #[test]
  fn test_missing_key() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);
    assert!(cache.get("nope").is_none());
    assert!(cache.is_empty());
  }

  #[test]
  fn test_freshness_boundary() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);

    cache.put("k", json!({"un_number": "UN1090"})).unwrap();
    assert!(cache.get("k").unwrap().fresh);

    clock.advance(Duration::hours(24) - Duration::milliseconds(1));
    assert!(cache.get("k").unwrap().fresh);

    // Exactly stored_at + ttl is stale
    clock.advance(Duration::milliseconds(1));
    let stale = cache.get("k").unwrap();
    assert!(!stale.fresh);
    assert_eq!(stale.payload, json!({"un_number": "UN1090"}));
  }

  #[test]
  fn test_put_overwrites_and_resets_stored_at() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);

    cache.put("k", json!(1)).unwrap();
    clock.advance(Duration::hours(30));
    assert!(!cache.get("k").unwrap().fresh);

    cache.put("k", json!(2)).unwrap();
    let hit = cache.get("k").unwrap();
    assert!(hit.fresh);
    assert_eq!(hit.payload, json!(2));
    assert_eq!(hit.stored_at, start() + Duration::hours(30));
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn test_entries_survive_reopen() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    cache_with(&store, &clock).put("k", json!([1, 2, 3])).unwrap();

    let reopened = cache_with(&store, &clock);
    assert_eq!(reopened.get("k").unwrap().payload, json!([1, 2, 3]));
  }

  #[test]
  fn test_concurrent_puts_to_one_key() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);

    std::thread::scope(|s| {
      for n in 0..16 {
        let cache = &cache;
        s.spawn(move || cache.put("k", json!(n)).unwrap());
      }
    });

    // Whichever put landed last wins in memory and on disk alike
    let winner = cache.get("k").unwrap().payload;
    assert!(winner.as_i64().is_some_and(|n| (0..16).contains(&n)));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache_with(&store, &clock).get("k").unwrap().payload, winner);
  }

  #[test]
  fn test_failed_put_keeps_previous_entry() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);
    cache.put("k", json!("old")).unwrap();

    store.set_fail_writes(true);
    assert!(cache.put("k", json!("new")).is_err());
    assert_eq!(cache.get("k").unwrap().payload, json!("old"));
  }

  #[test]
  fn test_corrupt_records_are_dropped_on_open() {
    let store = MemoryStore::new();
    store.write("cache:bad", b"{not json").unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    cache_with(&store, &clock).put("good", json!(true)).unwrap();

    let cache = cache_with(&store, &clock);
    assert_eq!(cache.len(), 1);
    assert!(store.read("cache:bad").unwrap().is_none());
  }

  #[test]
  fn test_sweep_and_clear() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(start()));
    let cache = cache_with(&store, &clock);

    cache.put("old", json!(1)).unwrap();
    clock.advance(Duration::days(10));
    cache.put("new", json!(2)).unwrap();

    assert_eq!(cache.sweep(Duration::days(7)).unwrap(), 1);
    assert!(cache.get("old").is_none());
    assert!(cache.get("new").is_some());

    assert_eq!(cache.clear().unwrap(), 1);
    assert!(cache.is_empty());
    assert!(store.list_keys(CACHE_PREFIX).unwrap().is_empty());
  }
}
