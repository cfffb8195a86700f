//! Offline-first sync and cache layer for the dangerous-goods mobile client.
//!
//! [`SyncEngine`] sits between the app and the HTTP API. Reads are answered
//! from a TTL cache when possible and fall back to stale data when the
//! network is gone; writes made offline go into a durable FIFO queue that is
//! drained when connectivity returns.

pub mod api;
pub mod cache;
pub mod clock;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod queue;
pub mod reachability;
pub mod response;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use api::{LocationUpdate, MobileApi, ProofOfDelivery, ShipmentStatus};
pub use engine::{EngineOptions, ReconnectWatcher, SyncEngine};
pub use error::{StorageError, SyncError, SyncResult};
pub use event::SyncEvent;
pub use queue::QueuedRequest;
pub use reachability::{ManualReachability, ProbeReachability, Reachability};
pub use response::{ResponseSource, SyncResponse};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use transport::{HttpTransport, Method, Transport};
