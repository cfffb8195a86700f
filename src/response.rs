//! Caller-facing results, including metadata about where the data came from.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Result of a sync engine request.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResponse {
  /// The response body (or the pending marker for queued writes)
  pub payload: Value,
  /// Where the data came from
  pub source: ResponseSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl SyncResponse {
  /// Create a result from fresh network data.
  pub fn from_network(payload: Value) -> Self {
    Self {
      payload,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Create a result from cached data.
  pub fn from_cache(payload: Value, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      payload,
      source: if is_stale {
        ResponseSource::CacheStale
      } else {
        ResponseSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create the optimistic result of a write accepted while offline.
  pub fn pending(request_id: &str) -> Self {
    Self {
      payload: serde_json::json!({ "pending": true, "request_id": request_id }),
      source: ResponseSource::Pending {
        request_id: request_id.to_string(),
      },
      cached_at: None,
    }
  }

  /// Degraded data past its TTL.
  pub fn is_stale(&self) -> bool {
    self.source == ResponseSource::CacheStale
  }

  /// Accepted offline; the server has not seen it yet.
  pub fn is_pending(&self) -> bool {
    matches!(self.source, ResponseSource::Pending { .. })
  }
}

/// Indicates where response data came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its TTL, served because the network was unavailable
  CacheStale,
  /// Write queued for later delivery
  Pending { request_id: String },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_pending_marker() {
    let response = SyncResponse::pending("0190-abc");
    assert!(response.is_pending());
    assert!(!response.is_stale());
    assert_eq!(response.payload["pending"], json!(true));
    assert_eq!(response.payload["request_id"], json!("0190-abc"));
  }

  #[test]
  fn test_cache_sources() {
    let now = Utc::now();
    assert!(SyncResponse::from_cache(json!(1), now, true).is_stale());
    let fresh = SyncResponse::from_cache(json!(1), now, false);
    assert_eq!(fresh.source, ResponseSource::CacheFresh);
    assert_eq!(fresh.cached_at, Some(now));
    assert_eq!(SyncResponse::from_network(json!(1)).cached_at, None);
  }
}
