//! Shared runtime state, constructed once per agent.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, RwLock};

use crate::cache::CacheStorage;
use crate::config::AgentConfig;
use crate::db::{Database, QueueStore, SnapshotStore};
use crate::event::EventBus;
use crate::lifecycle::{self, ActiveGenerations, LifecyclePhase};
use crate::network::Network;

pub struct AgentState {
  pub db: Database,
  pub caches: CacheStorage,
  pub queue: QueueStore,
  pub snapshots: SnapshotStore,
  pub network: Arc<dyn Network>,
  pub events: EventBus,
  generations: RwLock<ActiveGenerations>,
  phase: Mutex<LifecyclePhase>,
  /// Static generation that an earlier run installed and left waiting
  pub(crate) waiting_at_start: Option<String>,
  /// Held for the duration of a drain
  pub(crate) draining: tokio::sync::Mutex<()>,
}

impl AgentState {
  /// Build state over `db`, restoring the persisted active generation.
  ///
  /// With nothing persisted yet the configured generation is considered active.
  pub fn new(config: &AgentConfig, db: Database, network: Arc<dyn Network>) -> Result<Self> {
    let generations = match ActiveGenerations::load(&db)? {
      Some(persisted) => persisted,
      None => ActiveGenerations::from_config(config),
    };
    let waiting_at_start = lifecycle::load_waiting(&db)?;

    Ok(Self {
      caches: CacheStorage::new(db.clone()),
      queue: QueueStore::new(db.clone()),
      snapshots: SnapshotStore::new(db.clone()),
      db,
      network,
      events: EventBus::default(),
      generations: RwLock::new(generations),
      phase: Mutex::new(LifecyclePhase::Idle),
      waiting_at_start,
      draining: tokio::sync::Mutex::new(()),
    })
  }

  /// Caches currently allowed to serve requests.
  pub fn active(&self) -> Result<ActiveGenerations> {
    self
      .generations
      .read()
      .map(|g| g.clone())
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub(crate) fn set_active(&self, generations: ActiveGenerations) -> Result<()> {
    generations.persist(&self.db)?;
    let mut current = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *current = generations;
    Ok(())
  }

  pub fn phase(&self) -> Result<LifecyclePhase> {
    self
      .phase
      .lock()
      .map(|p| *p)
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub(crate) fn set_phase(&self, phase: LifecyclePhase) -> Result<()> {
    let mut current = self
      .phase
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *current = phase;
    Ok(())
  }
}
