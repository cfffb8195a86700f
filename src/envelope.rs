//! Tagged envelopes for persisted records.
//!
//! Every value written to the store is wrapped as
//! `{"kind": "cache"|"queue", "version": N, "data": ...}` so a record of the
//! wrong kind, an unknown version or a truncated blob is detected on load
//! instead of being deserialized into garbage.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u32 = 1;

/// What a persisted record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
  Cache,
  Queue,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
  kind: RecordKind,
  version: u32,
  data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeOwned {
  kind: RecordKind,
  version: u32,
  data: serde_json::Value,
}

/// Serialize `data` into an envelope of the given kind.
pub fn encode<T: Serialize>(kind: RecordKind, data: &T) -> StorageResult<Vec<u8>> {
  Ok(serde_json::to_vec(&EnvelopeRef {
    kind,
    version: ENVELOPE_VERSION,
    data,
  })?)
}

/// Decode an envelope stored under `key`, checking its kind and version.
pub fn decode<T: DeserializeOwned>(key: &str, kind: RecordKind, bytes: &[u8]) -> StorageResult<T> {
  let corrupt = |reason: String| StorageError::Corrupt {
    key: key.to_string(),
    reason,
  };

  let envelope: EnvelopeOwned =
    serde_json::from_slice(bytes).map_err(|e| corrupt(format!("not an envelope: {}", e)))?;

  if envelope.kind != kind {
    return Err(corrupt(format!(
      "expected {:?} record, found {:?}",
      kind, envelope.kind
    )));
  }
  if envelope.version != ENVELOPE_VERSION {
    return Err(corrupt(format!(
      "unsupported version {}",
      envelope.version
    )));
  }

  serde_json::from_value(envelope.data).map_err(|e| corrupt(format!("bad payload: {}", e)))
}
