//! Offline queue for failed mutations and the replay engine that drains it.

use chrono::Utc;
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::db::{NewQueuedRequest, QueuedRequest};
use crate::event::AgentEvent;
use crate::http::Request;
use crate::network::fetch_with_timeout;
use crate::state::AgentState;

/// Persists mutating requests that could not reach the network.
#[derive(Clone)]
pub struct OfflineQueue {
  state: Arc<AgentState>,
}

impl OfflineQueue {
  pub fn new(state: Arc<AgentState>) -> Self {
    Self { state }
  }

  /// Durably queue `request`. Each call creates a new entry; there is no dedup.
  pub fn enqueue(&self, request: &Request) -> Result<QueuedRequest> {
    let body = if request.method.is_mutating() {
      request.body.clone()
    } else {
      None
    };

    let queued = self.state.queue.push(&NewQueuedRequest {
      url: request.url.clone(),
      method: request.method,
      headers: request.headers.clone(),
      body,
      enqueued_at: Utc::now(),
    })?;

    info!(id = queued.id, method = %queued.method, url = %queued.url, "queued request for replay");
    Ok(queued)
  }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub replayed: usize,
  /// Items left in the queue for the next drain
  pub failed: usize,
  /// Items removed after reaching the retry limit
  pub dropped: usize,
  /// Another drain was already running; this trigger did nothing
  pub coalesced: bool,
}

/// Replays queued requests in arrival order.
#[derive(Clone)]
pub struct SyncEngine {
  config: Arc<AgentConfig>,
  state: Arc<AgentState>,
}

impl SyncEngine {
  pub fn new(config: Arc<AgentConfig>, state: Arc<AgentState>) -> Self {
    Self { config, state }
  }

  /// Replay every queued request once, sequentially, oldest first.
  ///
  /// A failing item stays queued and does not stop later items. Never
  /// returns an error; problems are logged. A trigger arriving while a
  /// drain is in flight is coalesced into a no-op.
  pub async fn drain(&self) -> DrainReport {
    let Ok(_guard) = self.state.draining.try_lock() else {
      debug!("drain already in progress");
      return DrainReport {
        coalesced: true,
        ..Default::default()
      };
    };

    let mut report = DrainReport::default();
    let items = match self.state.queue.list() {
      Ok(items) => items,
      Err(e) => {
        error!("Failed to read offline queue: {}", e);
        return report;
      }
    };

    if items.is_empty() {
      return report;
    }
    info!(count = items.len(), "replaying offline queue");

    for item in items {
      let request = item.to_request();
      match fetch_with_timeout(
        self.state.network.as_ref(),
        &request,
        self.config.network_timeout(),
      )
      .await
      {
        Ok(response) if response.is_ok() => self.replayed(&item, &mut report),
        Ok(response) => self.retain(&item, format!("HTTP {}", response.status), &mut report),
        Err(e) => self.retain(&item, e.to_string(), &mut report),
      }
    }

    info!(
      replayed = report.replayed,
      failed = report.failed,
      dropped = report.dropped,
      "drain finished"
    );
    report
  }

  fn replayed(&self, item: &QueuedRequest, report: &mut DrainReport) {
    if let Err(e) = self.state.queue.delete(item.id) {
      // Replayed but still queued; it will be sent again next drain
      error!("Failed to remove replayed request {}: {}", item.id, e);
      return;
    }

    debug!(id = item.id, url = %item.url, "replayed");
    report.replayed += 1;
    self.state.events.emit(AgentEvent::SyncSuccess {
      url: item.url.clone(),
      method: item.method.to_string(),
    });
  }

  fn retain(&self, item: &QueuedRequest, reason: String, report: &mut DrainReport) {
    warn!(id = item.id, url = %item.url, %reason, "replay failed");

    let attempts = match self.state.queue.record_failure(item.id) {
      Ok(attempts) => attempts,
      Err(e) => {
        error!("Failed to record replay failure for {}: {}", item.id, e);
        item.attempts + 1
      }
    };

    let limit_hit = self
      .config
      .max_replay_attempts
      .is_some_and(|max| attempts >= max);

    let dropped = limit_hit
      && match self.state.queue.delete(item.id) {
        Ok(()) => true,
        Err(e) => {
          error!("Failed to drop request {}: {}", item.id, e);
          false
        }
      };

    if dropped {
      warn!(id = item.id, attempts, "dropping request after retry limit");
      report.dropped += 1;
    } else {
      report.failed += 1;
    }

    self.state.events.emit(AgentEvent::SyncFailure {
      url: item.url.clone(),
      method: item.method.to_string(),
      reason,
      dropped,
    });
  }
}
