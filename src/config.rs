use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::router::DynamicPattern;

pub const DEFAULT_MAX_DYNAMIC_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
  /// Base URL of the hosting application, used to resolve relative manifest entries
  pub origin: String,
  /// Label of the static (app shell) cache generation
  pub static_generation: String,
  /// Label of the dynamic (runtime) cache generation
  pub dynamic_generation: String,
  /// URLs eagerly pre-cached on install
  pub precache: Vec<String>,
  /// Document served to navigations when both network and cache miss
  pub offline_fallback: String,
  /// Ordered predicates selecting dynamic content; first match wins
  #[serde(deserialize_with = "serde_yaml::with::singleton_map_recursive::deserialize")]
  pub dynamic_patterns: Vec<DynamicPattern>,
  /// Path segment reserved for API calls
  pub api_segment: String,
  /// Request headers folded into the cache identity
  pub vary_headers: Vec<String>,
  /// Largest declared content-length stored in the dynamic cache
  pub max_dynamic_bytes: u64,
  pub retention_days: u32,
  pub sweep_interval_hours: u32,
  pub network_timeout_secs: u64,
  /// Replay attempts before a queued request is dropped (unbounded when unset)
  pub max_replay_attempts: Option<u32>,
  pub connectivity_probe_secs: u64,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost/".to_string(),
      static_generation: "v1".to_string(),
      dynamic_generation: "v1".to_string(),
      precache: vec!["/".to_string(), "/offline.html".to_string()],
      offline_fallback: "/offline.html".to_string(),
      dynamic_patterns: Vec::new(),
      api_segment: "/api/".to_string(),
      vary_headers: Vec::new(),
      max_dynamic_bytes: DEFAULT_MAX_DYNAMIC_BYTES,
      retention_days: 7,
      sweep_interval_hours: 24,
      network_timeout_secs: 10,
      max_replay_attempts: None,
      connectivity_probe_secs: 30,
      database: None,
    }
  }
}

impl AgentConfig {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./edgecache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/edgecache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("edgecache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("edgecache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Reject configurations the agent cannot honor.
  pub fn validate(&self) -> Result<()> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    if self.static_generation.trim().is_empty() || self.dynamic_generation.trim().is_empty() {
      return Err(eyre!("Cache generation labels must not be empty"));
    }

    let fallback = self.resolve(&self.offline_fallback)?;
    let mut precached = false;
    for entry in &self.precache {
      if self.resolve(entry)? == fallback {
        precached = true;
      }
    }
    if !precached {
      return Err(eyre!(
        "Offline fallback {} must be listed in the precache manifest",
        self.offline_fallback
      ));
    }

    Ok(())
  }

  /// Resolve a possibly relative URL against the configured origin.
  pub fn resolve(&self, url: &str) -> Result<String> {
    let base =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    let mut joined = base
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    joined.set_fragment(None);
    Ok(joined.into())
  }

  /// Absolute URLs of the precache manifest.
  pub fn precache_urls(&self) -> Result<Vec<String>> {
    self.precache.iter().map(|u| self.resolve(u)).collect()
  }

  pub fn static_cache_name(&self) -> String {
    format!("static-{}", self.static_generation)
  }

  pub fn dynamic_cache_name(&self) -> String {
    format!("dynamic-{}", self.dynamic_generation)
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::days(i64::from(self.retention_days))
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(u64::from(self.sweep_interval_hours.max(1)) * 3600)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network_timeout_secs.max(1))
  }

  pub fn connectivity_probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity_probe_secs.max(1))
  }

  /// Database location: explicit path or the user data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("agent.db"))
  }
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("edgecache"))
}
