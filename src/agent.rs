//! The agent: configuration, state and one entry point per host event.

use chrono::Utc;
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

use crate::cache::CacheLayer;
use crate::commands::{Command, CommandReply};
use crate::config::AgentConfig;
use crate::db::Database;
use crate::event::AgentEvent;
use crate::http::{Request, Response};
use crate::lifecycle::{InstallReport, Lifecycle, LifecyclePhase, SweepReport};
use crate::network::{HttpNetwork, Network};
use crate::notify::{self, ClickOutcome, ClientHost, Notification};
use crate::router::Router;
use crate::state::AgentState;
use crate::sync::{DrainReport, SyncEngine};

/// Counts describing the agent's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
  pub static_cache: String,
  pub dynamic_cache: String,
  pub phase: String,
  /// Every cache with its entry count, active or not
  pub caches: Vec<(String, usize)>,
  pub queued: usize,
  pub snapshots: usize,
}

/// Offline edge agent. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Agent {
  config: Arc<AgentConfig>,
  state: Arc<AgentState>,
  router: Arc<Router>,
  layer: CacheLayer,
  sync: SyncEngine,
}

impl Agent {
  pub fn new(config: AgentConfig, db: Database, network: Arc<dyn Network>) -> Result<Self> {
    config.validate()?;
    let config = Arc::new(config);
    let state = Arc::new(AgentState::new(&config, db, network)?);
    let router = Arc::new(Router::new(&config)?);

    Ok(Self {
      layer: CacheLayer::new(config.clone(), state.clone()),
      sync: SyncEngine::new(config.clone(), state.clone()),
      config,
      state,
      router,
    })
  }

  /// Open the configured database and use the real network.
  pub fn open(config: AgentConfig) -> Result<Self> {
    let db = Database::open(&config.database_path()?)?;
    let network = Arc::new(HttpNetwork::new()?);
    Self::new(config, db, network)
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn network(&self) -> Arc<dyn Network> {
    self.state.network.clone()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
    self.state.events.subscribe()
  }

  /// Pre-cache the static generation; activates it when nothing else is active.
  pub async fn on_install(&self) -> Result<InstallReport> {
    Lifecycle::new(&self.config, &self.state).install().await
  }

  /// Startup activation: take over from an older generation once the
  /// configured one is installed and was left waiting by an earlier run.
  ///
  /// Returns the deleted caches, or `None` when nothing changed.
  pub fn on_activate(&self) -> Result<Option<Vec<String>>> {
    Lifecycle::new(&self.config, &self.state).activate_on_start()
  }

  /// Serve a request from the host application.
  #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
  pub async fn on_fetch(&self, request: Request) -> Result<Response> {
    let (class, strategy) = self.router.route(&request);
    debug!(%class, ?strategy, "routing request");

    let response = self.layer.handle(&request, strategy).await;
    if let Err(e) = &response {
      error!("Failed to serve request: {}", e);
    }
    response
  }

  /// Handle a command from the host application.
  pub async fn on_message(&self, command: Command) -> Result<CommandReply> {
    debug!(?command, "command");
    match command {
      Command::SkipWaiting => {
        let activated = Lifecycle::new(&self.config, &self.state).skip_waiting()?;
        Ok(CommandReply::Activated(activated))
      }
      Command::CacheSnapshot { id, payload } => {
        let snapshot = self.state.snapshots.put(&id, &payload)?;
        info!(id = %snapshot.id, "snapshot cached");
        self.state.events.emit(AgentEvent::SnapshotCached { id });
        Ok(CommandReply::Snapshot(Some(snapshot)))
      }
      Command::GetSnapshot { id } => Ok(CommandReply::Snapshot(self.state.snapshots.get(&id)?)),
      Command::ClearCache => {
        let report = Lifecycle::new(&self.config, &self.state).purge()?;
        Ok(CommandReply::Cleared(report))
      }
      Command::Sync => Ok(CommandReply::Synced(self.on_sync().await)),
    }
  }

  /// Explicit sync trigger.
  pub async fn on_sync(&self) -> DrainReport {
    self.sync.drain().await
  }

  /// Connectivity came back.
  pub async fn on_online(&self) -> DrainReport {
    info!("back online");
    self.sync.drain().await
  }

  /// Periodic eviction of expired dynamic entries.
  pub fn on_sweep(&self) -> Result<SweepReport> {
    Lifecycle::new(&self.config, &self.state).sweep(Utc::now())
  }

  /// Render a delivered push payload.
  pub async fn on_push(&self, host: &dyn ClientHost, payload: &[u8]) -> Result<Notification> {
    notify::handle_push(host, payload).await
  }

  /// Route a click on a shown notification; `action` is the clicked button.
  pub async fn on_notification_click(
    &self,
    host: &dyn ClientHost,
    action: Option<String>,
    notification: &Notification,
  ) -> Result<ClickOutcome> {
    let default_url = self.config.resolve("/")?;
    notify::handle_click(host, &self.state.events, action, notification, &default_url).await
  }

  pub fn status(&self) -> Result<AgentStatus> {
    let active = self.state.active()?;
    let caches = self
      .state
      .caches
      .cache_names()?
      .into_iter()
      .map(|name| {
        let count = self.state.caches.count(&name)?;
        Ok((name, count))
      })
      .collect::<Result<Vec<_>>>()?;

    let phase = match self.state.phase()? {
      LifecyclePhase::Idle => "idle",
      LifecyclePhase::Installing => "installing",
      LifecyclePhase::Waiting => "waiting",
      LifecyclePhase::Active => "active",
    };

    Ok(AgentStatus {
      static_cache: active.static_cache,
      dynamic_cache: active.dynamic_cache,
      phase: phase.to_string(),
      caches,
      queued: self.state.queue.len()?,
      snapshots: self.state.snapshots.count()?,
    })
  }
}
