//! Cache generations: install, activate, eviction sweep and full purge.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::db::Database;
use crate::event::AgentEvent;
use crate::http::Request;
use crate::identity::RequestIdentity;
use crate::network::fetch_with_timeout;
use crate::state::AgentState;

const META_ACTIVE_STATIC: &str = "active_static";
const META_ACTIVE_DYNAMIC: &str = "active_dynamic";
const META_WAITING: &str = "waiting_static";

/// Static generation left waiting by the last install, if any.
pub(crate) fn load_waiting(db: &Database) -> Result<Option<String>> {
  db.get_meta(META_WAITING)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
  Idle,
  Installing,
  /// Installed, but an older generation is still serving
  Waiting,
  Active,
}

/// Names of the two caches allowed to serve requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGenerations {
  pub static_cache: String,
  pub dynamic_cache: String,
}

impl ActiveGenerations {
  pub fn from_config(config: &AgentConfig) -> Self {
    Self {
      static_cache: config.static_cache_name(),
      dynamic_cache: config.dynamic_cache_name(),
    }
  }

  pub(crate) fn load(db: &Database) -> Result<Option<Self>> {
    let static_cache = db.get_meta(META_ACTIVE_STATIC)?;
    let dynamic_cache = db.get_meta(META_ACTIVE_DYNAMIC)?;
    Ok(match (static_cache, dynamic_cache) {
      (Some(static_cache), Some(dynamic_cache)) => Some(Self {
        static_cache,
        dynamic_cache,
      }),
      _ => None,
    })
  }

  pub(crate) fn persist(&self, db: &Database) -> Result<()> {
    db.set_meta(META_ACTIVE_STATIC, &self.static_cache)?;
    db.set_meta(META_ACTIVE_DYNAMIC, &self.dynamic_cache)
  }

  /// Lookup order for cache matches: static first.
  pub fn names(&self) -> Vec<String> {
    vec![self.static_cache.clone(), self.dynamic_cache.clone()]
  }

  pub fn contains(&self, cache_name: &str) -> bool {
    self.static_cache == cache_name || self.dynamic_cache == cache_name
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
  pub generation: String,
  /// Manifest entries fetched during this install
  pub precached: usize,
  pub activated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  pub examined: usize,
  pub evicted: usize,
  /// Entries kept because they carry no usable `Date` header
  pub undated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
  pub caches: usize,
  pub queued: usize,
  pub snapshots: usize,
}

pub struct Lifecycle<'a> {
  config: &'a AgentConfig,
  state: &'a AgentState,
}

impl<'a> Lifecycle<'a> {
  pub fn new(config: &'a AgentConfig, state: &'a AgentState) -> Self {
    Self { config, state }
  }

  /// Pre-cache the static manifest into the configured static generation.
  ///
  /// All-or-nothing: nothing is written unless every manifest entry fetched
  /// with a 2xx. Activates right away when no other generation is active, or
  /// when an earlier run already installed this one and left it waiting.
  pub async fn install(&self) -> Result<InstallReport> {
    self.state.set_phase(LifecyclePhase::Installing)?;
    let generation = self.config.static_cache_name();

    let precached = match self.precache(&generation).await {
      Ok(count) => count,
      Err(e) => {
        self.state.set_phase(LifecyclePhase::Idle)?;
        return Err(e);
      }
    };

    info!(%generation, precached, "generation installed");
    self.state.events.emit(AgentEvent::VersionInstalled {
      generation: generation.clone(),
    });

    let activated = if self.ready_to_activate()? {
      self.activate()?;
      true
    } else {
      let active = self.state.active()?;
      info!(
        active = %active.static_cache,
        waiting = %generation,
        "new generation waiting for activation"
      );
      self.state.db.set_meta(META_WAITING, &generation)?;
      self.state.set_phase(LifecyclePhase::Waiting)?;
      false
    };

    Ok(InstallReport {
      generation,
      precached,
      activated,
    })
  }

  /// Whether the configured generation may take over serving now.
  ///
  /// True on a first install, when it is already the active one, or when an
  /// earlier run fully installed it and left it waiting.
  fn ready_to_activate(&self) -> Result<bool> {
    let target = ActiveGenerations::from_config(self.config);
    match ActiveGenerations::load(&self.state.db)? {
      None => Ok(true),
      Some(current) if current == target => Ok(true),
      Some(_) => {
        let waited = self.state.waiting_at_start.as_deref() == Some(target.static_cache.as_str());
        Ok(waited && self.state.caches.has_cache(&target.static_cache)?)
      }
    }
  }

  /// Startup activation: take over from the previous generation when it is safe
  /// to, even if this run's install could not reach the network.
  ///
  /// Returns the deleted cache names, or `None` when nothing was activated.
  pub fn activate_on_start(&self) -> Result<Option<Vec<String>>> {
    let target = ActiveGenerations::from_config(self.config);
    if self.state.phase()? == LifecyclePhase::Active && self.state.active()? == target {
      return Ok(None);
    }
    if !self.state.caches.has_cache(&target.static_cache)? || !self.ready_to_activate()? {
      return Ok(None);
    }
    self.activate().map(Some)
  }

  async fn precache(&self, cache_name: &str) -> Result<usize> {
    let caches = &self.state.caches;
    let mut missing = Vec::new();
    for url in self.config.precache_urls()? {
      // Keyed like an un-varied GET, matching how requests look entries up
      let identity = RequestIdentity::of(&Request::get(url.clone()), &self.config.vary_headers)?;
      if caches.get(cache_name, &identity)?.is_none() {
        missing.push((url, identity));
      }
    }

    if missing.is_empty() {
      debug!(cache = %cache_name, "manifest already cached");
      return Ok(0);
    }

    let network = self.state.network.as_ref();
    let timeout = self.config.network_timeout();
    let fetches = missing.into_iter().map(|(url, identity)| async move {
      let request = Request::get(url.clone());
      let response = fetch_with_timeout(network, &request, timeout)
        .await
        .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
      if !response.is_ok() {
        return Err(eyre!("Failed to precache {}: HTTP {}", url, response.status));
      }
      Ok((identity, response))
    });

    let fetched = try_join_all(fetches).await?;

    caches.put_all(cache_name, &fetched)?;
    Ok(fetched.len())
  }

  /// Make the configured generation active and delete every other cache.
  ///
  /// Returns the names of the deleted caches.
  pub fn activate(&self) -> Result<Vec<String>> {
    let target = ActiveGenerations::from_config(self.config);
    let caches = &self.state.caches;
    caches.open(&target.static_cache)?;
    caches.open(&target.dynamic_cache)?;
    self.state.set_active(target.clone())?;
    self.state.db.delete_meta(META_WAITING)?;

    let mut deleted = Vec::new();
    for name in caches.cache_names()? {
      if !target.contains(&name) && caches.delete_cache(&name)? {
        info!(cache = %name, "deleted stale cache generation");
        deleted.push(name);
      }
    }

    self.state.set_phase(LifecyclePhase::Active)?;
    Ok(deleted)
  }

  /// Activate a waiting generation now. Returns whether anything changed.
  pub fn skip_waiting(&self) -> Result<bool> {
    if self.state.phase()? != LifecyclePhase::Waiting {
      debug!("skip waiting: nothing waiting");
      return Ok(false);
    }
    self.activate()?;
    Ok(true)
  }

  /// Evict dynamic entries whose `Date` header is older than the retention window.
  pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
    let cache_name = self.state.active()?.dynamic_cache;
    let retention = self.config.retention();
    let mut report = SweepReport::default();

    for entry in self.state.caches.entries(&cache_name)? {
      report.examined += 1;
      let Some(date) = entry.response_date() else {
        report.undated += 1;
        continue;
      };

      if now - date > retention
        && self.state.caches.delete_if_unchanged(&cache_name, &entry)?
      {
        debug!(url = %entry.url, %date, "evicted expired entry");
        report.evicted += 1;
      }
    }

    if report.evicted > 0 {
      info!(cache = %cache_name, evicted = report.evicted, "eviction sweep");
    }
    Ok(report)
  }

  /// Delete every cache generation, queued request and snapshot.
  pub fn purge(&self) -> Result<PurgeReport> {
    let report = PurgeReport {
      caches: self.state.caches.purge()?,
      queued: self.state.queue.clear()?,
      snapshots: self.state.snapshots.clear()?,
    };
    warn!(
      caches = report.caches,
      queued = report.queued,
      snapshots = report.snapshots,
      "all agent state cleared"
    );
    Ok(report)
  }
}
