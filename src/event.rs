//! Observable sync events.
//!
//! Screens subscribe to learn about things that happen outside any single
//! call: connectivity edges, queued writes landing later, and queued writes
//! that failed for good and need to be shown to the user.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::queue::QueuedRequest;

/// Capacity of the event channel; slow subscribers miss the oldest events.
const EVENT_CAPACITY: usize = 256;

/// Sync events
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  /// Reachability flipped.
  ConnectivityChanged { online: bool },
  /// A write was accepted offline and is waiting to be sent.
  Queued { request: QueuedRequest },
  /// A queued write reached the server.
  Delivered { request: QueuedRequest },
  /// A queued write was rejected by the server and dropped. `status` is 0
  /// when the request could not be sent at all.
  Rejected {
    request: QueuedRequest,
    status: u16,
    body: Value,
  },
  /// A queued write failed on every attempt and was dropped.
  RetryExhausted {
    request: QueuedRequest,
    last_error: String,
  },
  /// A drain finished.
  DrainCompleted {
    delivered: usize,
    retried: usize,
    dropped: usize,
    remaining: usize,
  },
}

/// Fan-out of sync events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
    Self { tx }
  }

  /// Publish an event. Having no subscribers is fine.
  pub fn emit(&self, event: SyncEvent) {
    let _ = self.tx.send(event);
  }

  /// Receive every event emitted from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
