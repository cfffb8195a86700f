//! Request fingerprints used as cache slot keys.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::transport::Method;

/// Deterministic fingerprint of a read.
///
/// The same logical request always yields the same key: parameters are
/// serialized with recursively sorted object keys, and absent, `null` and
/// empty-object parameters are equivalent.
pub fn cache_key(method: Method, path: &str, params: Option<&Value>) -> String {
  let params = match params {
    None | Some(Value::Null) => String::new(),
    Some(Value::Object(map)) if map.is_empty() => String::new(),
    Some(value) => canonicalize(value).to_string(),
  };
  let input = format!("{} {}?{}", method, normalize_path(path), params);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Trim whitespace and make the path absolute.
fn normalize_path(path: &str) -> String {
  let path = path.trim();
  if path.starts_with('/') {
    path.to_string()
  } else {
    format!("/{}", path)
  }
}

/// Rebuild a JSON value with every object's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let sorted: BTreeMap<&String, Value> = map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
      Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}
