//! Agent events fanned out to clients, and the signals that drive the host loop.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::commands::Command;
use crate::http::Request;
use crate::network::{fetch_with_timeout, Network};

/// Events the agent emits to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEvent {
  /// A queued request was replayed and removed from the queue
  SyncSuccess { url: String, method: String },
  /// A queued request failed to replay; `dropped` when the retry limit was hit
  SyncFailure {
    url: String,
    method: String,
    reason: String,
    dropped: bool,
  },
  /// An entity snapshot was stored
  SnapshotCached { id: String },
  /// A new static generation finished pre-caching
  VersionInstalled { generation: String },
  /// A notification was clicked while a client was open
  NotificationClick { action: Option<String>, data: Value },
}

/// Broadcast channel fanning agent events out to subscribers.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
    self.tx.subscribe()
  }

  pub fn emit(&self, event: AgentEvent) {
    debug!(?event, "emit");
    // No subscribers is fine; events are fire-and-forget
    let _ = self.tx.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(256)
  }
}

/// Inbound signals driving the long-running agent.
#[derive(Debug)]
pub enum Signal {
  /// Eviction sweep is due
  Sweep,
  /// Connectivity came back
  Online,
  /// Connectivity was lost
  Offline,
  /// Command from the host application
  Command(Command),
  Shutdown,
}

/// Produces signals from timers and the connectivity probe.
pub struct SignalSource {
  tx: mpsc::UnboundedSender<Signal>,
  rx: mpsc::UnboundedReceiver<Signal>,
}

impl SignalSource {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender for host-originated signals.
  pub fn sender(&self) -> mpsc::UnboundedSender<Signal> {
    self.tx.clone()
  }

  /// Emit `Signal::Sweep` every `interval`, starting after one interval.
  pub fn spawn_sweep_timer(&self, interval: Duration) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
      loop {
        ticker.tick().await;
        if tx.send(Signal::Sweep).is_err() {
          break;
        }
      }
    });
  }

  /// Probe `url` every `interval`; emit `Online`/`Offline` on transitions.
  ///
  /// The first probe only records the state, except that starting online
  /// emits `Online` so requests queued by a previous run get replayed.
  pub fn spawn_connectivity_probe(
    &self,
    network: Arc<dyn Network>,
    url: String,
    interval: Duration,
    timeout: Duration,
  ) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut last: Option<bool> = None;
      loop {
        ticker.tick().await;
        let probe = Request::new(crate::http::Method::Head, url.clone());
        let online = fetch_with_timeout(network.as_ref(), &probe, timeout)
          .await
          .is_ok();

        if last != Some(online) {
          info!(online, "connectivity changed");
          let signal = if online { Signal::Online } else { Signal::Offline };
          if (online || last.is_some()) && tx.send(signal).is_err() {
            break;
          }
          last = Some(online);
        }
      }
    });
  }

  /// Receive the next signal
  pub async fn next(&mut self) -> Option<Signal> {
    self.rx.recv().await
  }
}

impl Default for SignalSource {
  fn default() -> Self {
    Self::new()
  }
}
