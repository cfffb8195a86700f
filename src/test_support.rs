//! Shared test helpers.

use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::event::SyncEvent;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse, TransportResult};

type Responder = Box<dyn Fn(&TransportRequest) -> TransportResult<TransportResponse> + Send + Sync>;

/// Transport that records every request and answers from a closure.
pub struct MockTransport {
  calls: Mutex<Vec<TransportRequest>>,
  responder: Responder,
  delay: Option<Duration>,
}

impl MockTransport {
  pub fn new(
    responder: impl Fn(&TransportRequest) -> TransportResult<TransportResponse> + Send + Sync + 'static,
  ) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      responder: Box::new(responder),
      delay: None,
    }
  }

  /// Answer every request with `status` and `body`.
  pub fn replying(status: u16, body: Value) -> Self {
    Self::new(move |_| Ok(response(status, body.clone())))
  }

  /// Answer every request with 200 and `{"ok": true}`.
  pub fn ok() -> Self {
    Self::replying(200, json!({"ok": true}))
  }

  /// Fail every request as if the connection was refused.
  pub fn unreachable() -> Self {
    Self::new(|_| Err(TransportError::Connect("connection refused".into())))
  }

  /// Wait `delay` before answering.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn calls(&self) -> Vec<TransportRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Transport for MockTransport {
  fn send<'a>(&'a self, request: &'a TransportRequest) -> BoxFuture<'a, TransportResult<TransportResponse>> {
    Box::pin(async move {
      self.calls.lock().unwrap().push(request.clone());
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      (self.responder)(request)
    })
  }
}

pub fn response(status: u16, body: Value) -> TransportResponse {
  TransportResponse { status, body }
}

/// Wait up to two seconds for an event matching `pred`.
pub async fn wait_for_event(
  rx: &mut broadcast::Receiver<SyncEvent>,
  pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
  tokio::time::timeout(Duration::from_secs(2), async {
    loop {
      let event = rx.recv().await.expect("event channel closed");
      if pred(&event) {
        return event;
      }
    }
  })
  .await
  .expect("timed out waiting for event")
}
