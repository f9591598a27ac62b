//! Command channel from the host application, plus name lookup for the CLI.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::CachedSnapshot;
use crate::lifecycle::PurgeReport;
use crate::sync::DrainReport;

/// Commands the agent accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
  /// Activate a waiting generation immediately
  SkipWaiting,
  /// Store an entity snapshot for offline use
  #[serde(alias = "CACHE_RESUME_DATA")]
  CacheSnapshot { id: String, payload: Value },
  /// Fetch a stored snapshot; replies with null when absent
  #[serde(alias = "GET_CACHED_RESUME")]
  GetSnapshot { id: String },
  /// Delete every cache, the queue and all snapshots
  ClearCache,
  /// Replay the offline queue now
  Sync,
}

/// Reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommandReply {
  Activated(bool),
  Snapshot(Option<CachedSnapshot>),
  Cleared(PurgeReport),
  Synced(DrainReport),
}

impl Command {
  pub fn parse_json(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Invalid command '{}': {}", line.trim(), e))
  }
}

#[derive(Debug, Clone)]
pub struct CommandInfo {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[CommandInfo] = &[
  CommandInfo {
    name: "SKIP_WAITING",
    aliases: &["skip", "activate"],
    description: "Activate the installed generation now",
  },
  CommandInfo {
    name: "CACHE_SNAPSHOT",
    aliases: &["put", "CACHE_RESUME_DATA"],
    description: "Store an entity snapshot (needs id and payload)",
  },
  CommandInfo {
    name: "GET_SNAPSHOT",
    aliases: &["get", "GET_CACHED_RESUME"],
    description: "Read an entity snapshot (needs id)",
  },
  CommandInfo {
    name: "CLEAR_CACHE",
    aliases: &["clear", "purge"],
    description: "Delete all caches, queued requests and snapshots",
  },
  CommandInfo {
    name: "SYNC",
    aliases: &["drain", "replay"],
    description: "Replay queued requests",
  },
];

/// Get suggestions for a given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static CommandInfo> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&CommandInfo, u32)> = Vec::new();

  for cmd in COMMANDS {
    let name = cmd.name.to_lowercase();
    let aliases: Vec<String> = cmd.aliases.iter().map(|a| a.to_lowercase()).collect();

    // Exact match on name
    if name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    // Exact match on alias
    if aliases.contains(&input_lower) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    if aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Look a command up by exact name or alias, ignoring case.
pub fn lookup(input: &str) -> Option<&'static CommandInfo> {
  COMMANDS.iter().find(|cmd| {
    cmd.name.eq_ignore_ascii_case(input) || cmd.aliases.iter().any(|a| a.eq_ignore_ascii_case(input))
  })
}

/// Build a command from its exact name or alias plus optional arguments.
///
/// Partial names are rejected; use [`get_suggestions`] to offer completions.
pub fn build(name: &str, id: Option<String>, payload: Option<Value>) -> Result<Command> {
  let info = lookup(name.trim()).ok_or_else(|| eyre!("Unknown command: {}", name))?;

  let need_id = || id.clone().ok_or_else(|| eyre!("{} needs --id", info.name));

  match info.name {
    "SKIP_WAITING" => Ok(Command::SkipWaiting),
    "CACHE_SNAPSHOT" => Ok(Command::CacheSnapshot {
      id: need_id()?,
      payload: payload.ok_or_else(|| eyre!("{} needs --payload", info.name))?,
    }),
    "GET_SNAPSHOT" => Ok(Command::GetSnapshot { id: need_id()? }),
    "CLEAR_CACHE" => Ok(Command::ClearCache),
    "SYNC" => Ok(Command::Sync),
    other => Err(eyre!("Unknown command: {}", other)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("CLEAR_CACHE");
    assert_eq!(suggestions[0].name, "CLEAR_CACHE");
  }

  #[test]
  fn test_alias_match() {
    assert_eq!(get_suggestions("purge")[0].name, "CLEAR_CACHE");
    assert_eq!(get_suggestions("get_cached_resume")[0].name, "GET_SNAPSHOT");
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(get_suggestions("skip_")[0].name, "SKIP_WAITING");
  }

  #[test]
  fn test_parse_wire_commands() {
    assert_eq!(
      Command::parse_json(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
      Command::SkipWaiting
    );
    assert_eq!(
      Command::parse_json(r#"{"type":"CLEAR_CACHE"}"#).unwrap(),
      Command::ClearCache
    );
    assert_eq!(
      Command::parse_json(r#"{"type":"GET_SNAPSHOT","id":"r1"}"#).unwrap(),
      Command::GetSnapshot { id: "r1".to_string() }
    );
  }

  #[test]
  fn test_parse_legacy_resume_names() {
    let command =
      Command::parse_json(r#"{"type":"CACHE_RESUME_DATA","id":"r1","payload":{"a":1}}"#).unwrap();
    assert_eq!(
      command,
      Command::CacheSnapshot {
        id: "r1".to_string(),
        payload: json!({"a": 1})
      }
    );
    assert_eq!(
      Command::parse_json(r#"{"type":"GET_CACHED_RESUME","id":"r1"}"#).unwrap(),
      Command::GetSnapshot { id: "r1".to_string() }
    );
  }

  #[test]
  fn test_parse_rejects_unknown() {
    assert!(Command::parse_json(r#"{"type":"REBOOT"}"#).is_err());
  }

  #[test]
  fn test_build_requires_arguments() {
    assert!(build("get", None, None).is_err());
    assert_eq!(
      build("get", Some("r1".to_string()), None).unwrap(),
      Command::GetSnapshot { id: "r1".to_string() }
    );
    assert!(build("put", Some("r1".to_string()), None).is_err());
    assert_eq!(build("clear", None, None).unwrap(), Command::ClearCache);
  }

  #[test]
  fn test_build_rejects_partial_names() {
    // "e" is a substring of clear_cache; it must not wipe anything
    assert!(build("e", None, None).is_err());
    assert!(build("clear_", None, None).is_err());
    assert!(build("skip", None, None).is_err());
    assert_eq!(build("Clear_Cache", None, None).unwrap(), Command::ClearCache);
    assert_eq!(build("SKIP_WAITING", None, None).unwrap(), Command::SkipWaiting);
  }
}
