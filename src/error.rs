//! Error taxonomy for the sync layer.
//!
//! Every operation returns a typed [`SyncError`]; nothing here renders UI or
//! decides how a failure is shown to the user.

use crate::transport::TransportError;

/// Failure to read or write the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  /// SQLite error.
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// Serialization error.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// I/O error.
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// A persisted record could not be decoded.
  #[error("corrupt record {key}: {reason}")]
  Corrupt { key: String, reason: String },

  /// A lock guarding storage state was poisoned by a panicking holder.
  #[error("storage lock poisoned")]
  LockPoisoned,

  /// The store refused the write.
  #[error("write rejected: {0}")]
  WriteRejected(String),
}

/// Errors surfaced to callers of the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The server rejected the request (4xx). Never queued or retried.
  #[error("request rejected with status {status}")]
  Validation {
    status: u16,
    body: serde_json::Value,
  },

  /// Timeout, 5xx or connection failure.
  #[error("transient network failure: {0}")]
  TransientNetwork(String),

  /// The request cannot be built, e.g. a path that does not form a URL.
  /// Never retried.
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// Offline read with nothing cached for it.
  #[error("no data available offline for {path}")]
  NoCachedData { path: String },

  /// A queued write failed on every attempt and was dropped.
  #[error("{method} {path} failed after {attempts} attempts")]
  RetryExhausted {
    id: String,
    method: String,
    path: String,
    attempts: u32,
  },

  /// Durable storage failed; the operation did not take effect.
  #[error("storage error: {0}")]
  Storage(#[from] StorageError),
}

impl SyncError {
  /// Whether this failure may succeed if the request is sent again later.
  pub fn is_transient(&self) -> bool {
    matches!(self, SyncError::TransientNetwork(_))
  }
}

impl From<TransportError> for SyncError {
  fn from(e: TransportError) -> Self {
    match e {
      TransportError::InvalidUrl(reason) => SyncError::InvalidRequest(reason),
      other => SyncError::TransientNetwork(other.to_string()),
    }
  }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
