//! Sync engine: decides, for every call, whether to serve from cache, send
//! now, or queue for later.
//!
//! Reads degrade gracefully: a stale cached answer beats no answer, because
//! dangerous-goods reference data changes rarely. Writes never degrade
//! silently: while online the caller always learns the true outcome, and
//! while offline the write is durably queued and reported as pending, never
//! as done.
//!
//! ```text
//!   caller ──► SyncEngine ──► ResponseCache   (fresh hit, stale fallback)
//!                  │    └───► Transport       (online)
//!                  └────────► PendingQueue    (offline writes)
//!                                  ▲
//!   Reachability ── offline→online ┘ drain
//! ```

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::{CachedPayload, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::queue::{DrainReport, PendingQueue, QueuedRequest, SendOutcome, DEFAULT_MAX_RETRY};
use crate::reachability::Reachability;
use crate::response::SyncResponse;
use crate::store::KeyValueStore;
use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};

/// Tuning knobs for the engine.
#[derive(Clone)]
pub struct EngineOptions {
  /// Limit for each network attempt, direct or during a drain.
  pub request_timeout: Duration,
  /// How long a cached read counts as fresh.
  pub cache_ttl: chrono::Duration,
  /// Send attempts before a queued write is dropped.
  pub max_retry: u32,
  pub clock: Arc<dyn Clock>,
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      request_timeout: Duration::from_secs(30),
      cache_ttl: chrono::Duration::hours(24),
      max_retry: DEFAULT_MAX_RETRY,
      clock: Arc::new(SystemClock),
    }
  }
}

struct Inner {
  transport: Arc<dyn Transport>,
  reachability: Arc<dyn Reachability>,
  cache: ResponseCache,
  queue: PendingQueue,
  events: EventBus,
  clock: Arc<dyn Clock>,
  request_timeout: Duration,
}

/// Offline-first front door for every API call.
///
/// Cheap to clone; clones share the same cache, queue and event stream.
/// Build one at process start and hand it to every screen.
#[derive(Clone)]
pub struct SyncEngine {
  inner: Arc<Inner>,
}

impl SyncEngine {
  /// Load the cache and the pending queue from `store` and wire up the
  /// collaborators.
  pub fn new(
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    reachability: Arc<dyn Reachability>,
    options: EngineOptions,
  ) -> SyncResult<Self> {
    let cache = ResponseCache::open(Arc::clone(&store), options.cache_ttl, Arc::clone(&options.clock))?;
    let queue = PendingQueue::open(store, options.max_retry)?;

    tracing::info!(
      online = reachability.current(),
      cached = cache.len(),
      pending = queue.len(),
      "sync engine ready"
    );

    Ok(Self {
      inner: Arc::new(Inner {
        transport,
        reachability,
        cache,
        queue,
        events: EventBus::new(),
        clock: options.clock,
        request_timeout: options.request_timeout,
      }),
    })
  }

  /// Perform a request.
  ///
  /// `params_or_body` holds query parameters for GET and the JSON body for
  /// writes. `cacheable` only affects GET: when false the cache is neither
  /// consulted nor updated.
  pub async fn request(
    &self,
    method: Method,
    path: &str,
    params_or_body: Option<Value>,
    cacheable: bool,
  ) -> SyncResult<SyncResponse> {
    if method.is_mutating() {
      self.write(method, path, params_or_body).await
    } else {
      self.read(path, params_or_body, cacheable).await
    }
  }

  async fn read(&self, path: &str, params: Option<Value>, cacheable: bool) -> SyncResult<SyncResponse> {
    let key = cacheable.then(|| ResponseCache::key(Method::Get, path, params.as_ref()));
    let cached = key.as_deref().and_then(|k| self.inner.cache.get(k));

    // Fast path
    if let Some(hit) = cached.as_ref().filter(|hit| hit.fresh) {
      tracing::debug!(path, "cache hit");
      return Ok(SyncResponse::from_cache(hit.payload.clone(), hit.stored_at, false));
    }

    if !self.is_online() {
      return match cached {
        Some(hit) => {
          tracing::debug!(path, "offline, serving stale cache");
          Ok(stale(hit))
        }
        None => Err(SyncError::NoCachedData {
          path: path.to_string(),
        }),
      };
    }

    let request = TransportRequest {
      method: Method::Get,
      path: path.to_string(),
      body: params,
    };

    match self.send(&request).await {
      Ok(payload) => {
        if let Some(key) = &key {
          self.inner.cache.put(key, payload.clone())?;
        }
        Ok(SyncResponse::from_network(payload))
      }
      Err(e) if e.is_transient() => match cached {
        Some(hit) => {
          tracing::warn!(path, error = %e, "network read failed, serving cache");
          Ok(stale(hit))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  async fn write(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<SyncResponse> {
    if self.is_online() {
      let request = TransportRequest {
        method,
        path: path.to_string(),
        body,
      };
      let payload = self.send(&request).await?;
      return Ok(SyncResponse::from_network(payload));
    }

    let request = QueuedRequest::new(method, path, body, self.inner.clock.now());
    self.inner.queue.enqueue(request.clone())?;
    tracing::info!(id = %request.id, %method, path, "offline, queued write");
    self.inner.events.emit(SyncEvent::Queued {
      request: request.clone(),
    });

    // Connectivity may have come back while we were queueing, after the
    // reconnect drain already ran.
    if self.is_online() {
      self.spawn_drain();
    }

    Ok(SyncResponse::pending(&request.id))
  }

  /// One network attempt, bounded by the request timeout.
  async fn send(&self, request: &TransportRequest) -> SyncResult<Value> {
    let response = tokio::time::timeout(self.inner.request_timeout, self.inner.transport.send(request))
      .await
      .map_err(|_| TransportError::Timeout)??;
    classify(response)
  }

  async fn deliver(&self, request: QueuedRequest) -> SendOutcome {
    if !self.is_online() {
      return SendOutcome::Deferred;
    }
    match self.send(&request.to_transport()).await {
      Ok(_) => SendOutcome::Delivered,
      Err(SyncError::Validation { status, body }) => SendOutcome::Rejected { status, body },
      Err(SyncError::InvalidRequest(reason)) => SendOutcome::Rejected {
        status: 0,
        body: Value::String(reason),
      },
      Err(e) => SendOutcome::Transient(e.to_string()),
    }
  }

  /// Send every queued write, oldest first.
  ///
  /// Safe to call at any time; if a drain is already running this returns
  /// at once and the running drain makes one more pass.
  ///
  /// If the queue cannot be saved the error is returned, after events for
  /// the passes that were saved have been published.
  pub async fn drain(&self) -> SyncResult<DrainReport> {
    let result = self
      .inner
      .queue
      .drain(|request| {
        let engine = self.clone();
        async move { engine.deliver(request).await }
      })
      .await;

    match result {
      Ok(report) => {
        if !report.already_running {
          self.publish(&report);
        }
        Ok(report)
      }
      Err(failure) => {
        self.publish(&failure.report);
        Err(failure.error.into())
      }
    }
  }

  fn spawn_drain(&self) {
    let engine = self.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.drain().await {
        tracing::error!(error = %e, "drain failed");
      }
    });
  }

  fn publish(&self, report: &DrainReport) {
    let events = &self.inner.events;
    for request in &report.delivered {
      events.emit(SyncEvent::Delivered {
        request: request.clone(),
      });
    }
    for rejected in &report.rejected {
      events.emit(SyncEvent::Rejected {
        request: rejected.request.clone(),
        status: rejected.status,
        body: rejected.body.clone(),
      });
    }
    for exhausted in &report.exhausted {
      tracing::error!(error = %exhausted.to_error(), last_error = %exhausted.last_error, "giving up on queued request");
      events.emit(SyncEvent::RetryExhausted {
        request: exhausted.request.clone(),
        last_error: exhausted.last_error.clone(),
      });
    }
    events.emit(SyncEvent::DrainCompleted {
      delivered: report.delivered.len(),
      retried: report.retried.len(),
      dropped: report.exhausted.len() + report.rejected.len(),
      remaining: report.remaining,
    });
  }

  /// Start reacting to reachability changes: every offline to online edge
  /// drains the queue. Dropping the returned watcher stops it.
  pub fn start(&self) -> ReconnectWatcher {
    let engine = self.clone();
    let mut rx = self.inner.reachability.subscribe();
    let mut was_online = *rx.borrow_and_update();

    let task = tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online == was_online {
          continue;
        }
        was_online = online;

        engine.inner.events.emit(SyncEvent::ConnectivityChanged { online });
        if online {
          tracing::info!(pending = engine.queue_depth(), "back online, draining queue");
          engine.spawn_drain();
        }
      }
    });

    ReconnectWatcher { task }
  }

  /// Number of writes waiting to be sent.
  pub fn queue_depth(&self) -> usize {
    self.inner.queue.len()
  }

  /// Writes waiting to be sent, oldest first.
  pub fn pending_requests(&self) -> Vec<QueuedRequest> {
    self.inner.queue.snapshot()
  }

  pub fn is_online(&self) -> bool {
    self.inner.reachability.current()
  }

  /// Stream of [`SyncEvent`]s from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.inner.events.subscribe()
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.inner.cache
  }

  /// Drop every cached response. Returns how many were removed.
  pub fn clear_cache(&self) -> SyncResult<usize> {
    Ok(self.inner.cache.clear()?)
  }
}

/// Background task that drains the queue on reconnect.
pub struct ReconnectWatcher {
  task: JoinHandle<()>,
}

impl ReconnectWatcher {
  pub fn stop(self) {
    // Drop aborts
  }
}

impl Drop for ReconnectWatcher {
  fn drop(&mut self) {
    self.task.abort();
  }
}

fn stale(hit: CachedPayload) -> SyncResponse {
  SyncResponse::from_cache(hit.payload, hit.stored_at, !hit.fresh)
}

/// 2xx is success, 4xx is terminal, everything else is worth retrying.
fn classify(response: TransportResponse) -> SyncResult<Value> {
  if response.is_success() {
    Ok(response.body)
  } else if response.is_client_error() {
    Err(SyncError::Validation {
      status: response.status,
      body: response.body,
    })
  } else {
    Err(SyncError::TransientNetwork(format!(
      "server returned {}",
      response.status
    )))
  }
}
