//! Network reachability monitors.
//!
//! A monitor exposes the current online flag plus a `watch` channel of
//! transitions. The sync engine reads the flag synchronously for every call
//! and drains the pending queue on each offline to online edge.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::transport::TransportError;

/// Source of connectivity state.
pub trait Reachability: Send + Sync {
  /// Whether the network is currently reachable.
  fn current(&self) -> bool;

  /// Stream of the online flag; the receiver sees every change from now on.
  fn subscribe(&self) -> watch::Receiver<bool>;
}

fn publish(tx: &watch::Sender<bool>, online: bool) -> bool {
  let changed = tx.send_if_modified(|current| {
    if *current == online {
      false
    } else {
      *current = online;
      true
    }
  });
  if changed {
    tracing::info!(online, "reachability changed");
  }
  changed
}

/// Monitor driven by the host: the app forwards OS connectivity callbacks
/// through [`set_online`](Self::set_online).
#[derive(Debug)]
pub struct ManualReachability {
  tx: watch::Sender<bool>,
}

impl ManualReachability {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  /// Record the current state. Repeating the current state is not a
  /// transition and wakes nobody.
  pub fn set_online(&self, online: bool) {
    publish(&self.tx, online);
  }
}

impl Reachability for ManualReachability {
  fn current(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Monitor that polls a health URL.
///
/// Any HTTP response counts as online; connection errors and timeouts count
/// as offline.
pub struct ProbeReachability {
  tx: Arc<watch::Sender<bool>>,
  task: JoinHandle<()>,
}

impl ProbeReachability {
  /// Probe `url` once for the initial state, then every `interval`.
  pub async fn spawn(url: Url, interval: Duration, timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Request(e.to_string()))?;
    Ok(Self::with_client(client, url, interval).await)
  }

  /// Like [`spawn`](Self::spawn) with a caller-configured client.
  pub async fn with_client(client: reqwest::Client, url: Url, interval: Duration) -> Self {
    let initial = probe(&client, &url).await;
    tracing::info!(online = initial, url = %url, "initial reachability");

    let (tx, _rx) = watch::channel(initial);
    let tx = Arc::new(tx);
    let task_tx = Arc::clone(&tx);

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // First tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let online = probe(&client, &url).await;
        publish(&task_tx, online);
      }
    });

    Self { tx, task }
  }
}

impl Reachability for ProbeReachability {
  fn current(&self) -> bool {
    *self.tx.borrow()
  }

  fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Drop for ProbeReachability {
  fn drop(&mut self) {
    self.task.abort();
  }
}

async fn probe(client: &reqwest::Client, url: &Url) -> bool {
  match client.head(url.clone()).send().await {
    Ok(_) => true,
    Err(e) => {
      tracing::debug!(error = %e, "reachability probe failed");
      false
    }
  }
}
