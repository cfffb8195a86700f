//! Durable queue of writes that could not be sent.
//!
//! The whole list is stored as one enveloped record and rewritten after every
//! change, so a process kill right after a successful
//! [`enqueue`](PendingQueue::enqueue) never loses the request. Queued requests
//! are sent again, oldest first, by [`drain`](PendingQueue::drain).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::envelope::{self, RecordKind};
use crate::error::{StorageError, StorageResult, SyncError};
use crate::store::KeyValueStore;
use crate::transport::{Method, TransportRequest};

/// Store key of the persisted queue.
pub const QUEUE_KEY: &str = "queue:pending";

/// Send attempts before a queued request is dropped.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// A write waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// UUIDv7: creation time plus a random suffix.
  pub id: String,
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed send attempts so far.
  pub retry_count: u32,
}

impl QueuedRequest {
  pub fn new(method: Method, path: &str, body: Option<Value>, now: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::now_v7().to_string(),
      method,
      path: path.to_string(),
      body,
      enqueued_at: now,
      retry_count: 0,
    }
  }

  pub fn to_transport(&self) -> TransportRequest {
    TransportRequest {
      method: self.method,
      path: self.path.clone(),
      body: self.body.clone(),
    }
  }
}

/// What happened to one queued request during a drain.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
  /// The server accepted it.
  Delivered,
  /// Timeout, connection failure or 5xx. Counts against the retry budget.
  Transient(String),
  /// The server rejected it (4xx), or it could not be sent at all (status
  /// 0). Resending cannot succeed.
  Rejected { status: u16, body: Value },
  /// Not attempted because connectivity went away; stops the pass.
  Deferred,
}

/// A request dropped after using up its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedRequest {
  pub request: QueuedRequest,
  pub last_error: String,
}

impl ExhaustedRequest {
  pub fn to_error(&self) -> SyncError {
    SyncError::RetryExhausted {
      id: self.request.id.clone(),
      method: self.request.method.to_string(),
      path: self.request.path.clone(),
      attempts: self.request.retry_count,
    }
  }
}

/// A request dropped because the server rejected it.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRequest {
  pub request: QueuedRequest,
  pub status: u16,
  pub body: Value,
}

/// Summary of a drain call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
  /// Another drain was already running; it will make one more pass.
  pub already_running: bool,
  pub passes: u32,
  pub delivered: Vec<QueuedRequest>,
  /// Failed this time, kept for a later drain.
  pub retried: Vec<QueuedRequest>,
  pub exhausted: Vec<ExhaustedRequest>,
  pub rejected: Vec<RejectedRequest>,
  /// Requests left untouched because the pass stopped early.
  pub deferred: usize,
  /// Queue depth once the drain finished.
  pub remaining: usize,
}

impl DrainReport {
  fn absorb(&mut self, pass: DrainReport) {
    self.delivered.extend(pass.delivered);
    self.retried.extend(pass.retried);
    self.exhausted.extend(pass.exhausted);
    self.rejected.extend(pass.rejected);
    self.deferred += pass.deferred;
  }
}

/// A drain that stopped because the store refused a write.
///
/// `report` holds only passes whose outcome reached the store; the failed
/// pass left the queue exactly as it was before that pass.
#[derive(Debug, thiserror::Error)]
#[error("drain stopped after {} passes: {error}", .report.passes)]
pub struct DrainFailure {
  pub report: DrainReport,
  #[source]
  pub error: StorageError,
}

#[derive(Default)]
struct QueueState {
  pending: Vec<QueuedRequest>,
  /// Snapshot taken by the running drain pass, minus what it already
  /// delivered or dropped.
  in_flight: Vec<QueuedRequest>,
}

impl QueueState {
  /// The list as it must appear on disk, oldest first.
  fn persisted_image(&self) -> Vec<&QueuedRequest> {
    self.in_flight.iter().chain(self.pending.iter()).collect()
  }

  /// Put drain survivors back ahead of anything enqueued meanwhile.
  fn restore_in_flight(&mut self) {
    let mut merged = std::mem::take(&mut self.in_flight);
    merged.append(&mut self.pending);
    self.pending = merged;
  }
}

/// Ordered, durable list of pending writes.
pub struct PendingQueue {
  store: Arc<dyn KeyValueStore>,
  max_retry: u32,
  state: Mutex<QueueState>,
  draining: AtomicBool,
  rerun: AtomicBool,
}

impl PendingQueue {
  /// Load the persisted queue from `store`.
  ///
  /// A queue record that cannot be decoded is an error: dropping it would
  /// silently discard writes the user believes are pending.
  pub fn open(store: Arc<dyn KeyValueStore>, max_retry: u32) -> StorageResult<Self> {
    let pending = match store.read(QUEUE_KEY)? {
      Some(bytes) => envelope::decode::<Vec<QueuedRequest>>(QUEUE_KEY, RecordKind::Queue, &bytes)?,
      None => Vec::new(),
    };

    if !pending.is_empty() {
      tracing::info!(pending = pending.len(), "restored pending requests");
    }

    Ok(Self {
      store,
      max_retry: max_retry.max(1),
      state: Mutex::new(QueueState {
        pending,
        in_flight: Vec::new(),
      }),
      draining: AtomicBool::new(false),
      rerun: AtomicBool::new(false),
    })
  }

  fn lock(&self) -> StorageResult<MutexGuard<'_, QueueState>> {
    self.state.lock().map_err(|_| StorageError::LockPoisoned)
  }

  fn persist(&self, state: &QueueState) -> StorageResult<()> {
    let bytes = envelope::encode(RecordKind::Queue, &state.persisted_image())?;
    self.store.write(QUEUE_KEY, &bytes)
  }

  /// Append `request` and persist the full list before returning.
  ///
  /// If the store write fails the append is undone and the error returned.
  pub fn enqueue(&self, request: QueuedRequest) -> StorageResult<()> {
    debug_assert!(request.method.is_mutating(), "reads are never queued");

    let mut state = self.lock()?;
    state.pending.push(request);
    if let Err(e) = self.persist(&state) {
      state.pending.pop();
      return Err(e);
    }

    tracing::debug!(depth = state.pending.len() + state.in_flight.len(), "enqueued request");
    Ok(())
  }

  /// Number of requests not yet delivered or dropped.
  pub fn len(&self) -> usize {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.pending.len() + state.in_flight.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Every undelivered request, oldest first.
  pub fn snapshot(&self) -> Vec<QueuedRequest> {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.persisted_image().into_iter().cloned().collect()
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::SeqCst)
  }

  /// Try to send every queued request, oldest first.
  ///
  /// Only one drain runs at a time. Calling this while a drain is running
  /// returns immediately with `already_running` set, and the running drain
  /// makes exactly one more pass once its current pass finishes.
  ///
  /// If the outcome of a pass cannot be persisted, that pass is rolled back
  /// in memory to match the store and the drain stops. The returned
  /// [`DrainFailure`] still carries what earlier passes committed.
  pub async fn drain<F, Fut>(&self, mut sender: F) -> Result<DrainReport, DrainFailure>
  where
    F: FnMut(QueuedRequest) -> Fut,
    Fut: Future<Output = SendOutcome>,
  {
    self.rerun.store(true, Ordering::SeqCst);
    if self.draining.swap(true, Ordering::SeqCst) {
      tracing::debug!("drain already running, scheduled another pass");
      return Ok(DrainReport {
        already_running: true,
        remaining: self.len(),
        ..Default::default()
      });
    }

    let mut guard = DrainGuard {
      queue: self,
      armed: true,
    };
    let mut report = DrainReport::default();

    loop {
      while self.rerun.swap(false, Ordering::SeqCst) {
        report.passes += 1;
        match self.drain_pass(&mut sender).await {
          Ok(pass) => report.absorb(pass),
          Err(error) => {
            report.remaining = self.len();
            tracing::error!(error = %error, passes = report.passes, "drain pass rolled back");
            return Err(DrainFailure { report, error });
          }
        }
      }

      guard.armed = false;
      self.draining.store(false, Ordering::SeqCst);

      // A trigger that landed between the last pass and the release above
      if !self.rerun.load(Ordering::SeqCst) || self.draining.swap(true, Ordering::SeqCst) {
        break;
      }
      guard.armed = true;
    }

    report.remaining = self.len();
    tracing::info!(
      passes = report.passes,
      delivered = report.delivered.len(),
      retried = report.retried.len(),
      exhausted = report.exhausted.len(),
      rejected = report.rejected.len(),
      remaining = report.remaining,
      "drained pending queue"
    );
    Ok(report)
  }

  async fn drain_pass<F, Fut>(&self, sender: &mut F) -> StorageResult<DrainReport>
  where
    F: FnMut(QueuedRequest) -> Fut,
    Fut: Future<Output = SendOutcome>,
  {
    let mut pass = DrainReport::default();
    let snapshot: Vec<QueuedRequest> = {
      let mut state = self.lock()?;
      state.in_flight = std::mem::take(&mut state.pending);
      state.in_flight.clone()
    };

    for (index, request) in snapshot.iter().enumerate() {
      let outcome = sender(request.clone()).await;

      let mut state = self.lock()?;
      let Some(pos) = state.in_flight.iter().position(|r| r.id == request.id) else {
        continue;
      };

      match outcome {
        SendOutcome::Delivered => {
          state.in_flight.remove(pos);
          pass.delivered.push(request.clone());
        }
        SendOutcome::Transient(last_error) => {
          let attempts = request.retry_count + 1;
          if attempts < self.max_retry {
            state.in_flight[pos].retry_count = attempts;
            pass.retried.push(state.in_flight[pos].clone());
          } else {
            let mut request = state.in_flight.remove(pos);
            request.retry_count = attempts;
            tracing::warn!(id = %request.id, path = %request.path, attempts, "dropping request after retries");
            pass.exhausted.push(ExhaustedRequest {
              request,
              last_error,
            });
          }
        }
        SendOutcome::Rejected { status, body } => {
          let request = state.in_flight.remove(pos);
          tracing::warn!(id = %request.id, path = %request.path, status, "queued request rejected");
          pass.rejected.push(RejectedRequest {
            request,
            status,
            body,
          });
        }
        SendOutcome::Deferred => {
          pass.deferred += snapshot.len() - index;
          break;
        }
      }
    }

    let mut state = self.lock()?;
    state.restore_in_flight();
    if let Err(e) = self.persist(&state) {
      // Put the snapshot back with its pre-pass retry counts, ahead of
      // whatever was enqueued meanwhile
      let snapshot_ids: Vec<&str> = snapshot.iter().map(|r| r.id.as_str()).collect();
      state.pending.retain(|r| !snapshot_ids.contains(&r.id.as_str()));
      state.in_flight = snapshot;
      state.restore_in_flight();
      return Err(e);
    }
    Ok(pass)
  }
}

/// Releases the drain flag and returns an interrupted snapshot to the queue
/// if a drain future is dropped or fails mid-pass.
struct DrainGuard<'a> {
  queue: &'a PendingQueue,
  armed: bool,
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    {
      let mut state = self.queue.state.lock().unwrap_or_else(|e| e.into_inner());
      state.restore_in_flight();
    }
    self.queue.draining.store(false, Ordering::SeqCst);
  }
}
