//! Response caching for reads.
//!
//! This module provides the read side of offline support:
//! - Deterministic request fingerprints as cache keys
//! - Fresh/stale classification against a fixed TTL
//! - Stale entries retained as a fallback when the network is unavailable

mod key;
mod layer;

pub use key::cache_key;
pub use layer::{CacheEntry, CachedPayload, ResponseCache, CACHE_PREFIX};
