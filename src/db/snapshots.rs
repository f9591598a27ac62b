//! Last known good copies of application entities.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use super::{format_timestamp, parse_timestamp, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
  pub id: String,
  pub payload: Value,
  pub last_modified: DateTime<Utc>,
  /// Always true; lets the host tell a snapshot apart from live data
  pub cached: bool,
}

#[derive(Clone)]
pub struct SnapshotStore {
  db: Database,
}

impl SnapshotStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Store or overwrite the snapshot for `id`.
  pub fn put(&self, id: &str, payload: &Value) -> Result<CachedSnapshot> {
    let now = Utc::now();
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO snapshots (id, payload, last_modified) VALUES (?, ?, ?)",
          params![id, data, format_timestamp(now)],
        )
        .map_err(|e| eyre!("Failed to store snapshot {}: {}", id, e))?;
      Ok(())
    })?;

    Ok(CachedSnapshot {
      id: id.to_string(),
      payload: payload.clone(),
      last_modified: now,
      cached: true,
    })
  }

  pub fn get(&self, id: &str) -> Result<Option<CachedSnapshot>> {
    let row: Option<(String, String)> = self.db.with_conn(|conn| {
      conn
        .query_row(
          "SELECT payload, last_modified FROM snapshots WHERE id = ?",
          params![id],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read snapshot {}: {}", id, e))
    })?;

    match row {
      Some((data, last_modified)) => {
        let payload: Value = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize snapshot {}: {}", id, e))?;
        Ok(Some(CachedSnapshot {
          id: id.to_string(),
          payload,
          last_modified: parse_timestamp(&last_modified)?,
          cached: true,
        }))
      }
      None => Ok(None),
    }
  }

  pub fn count(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count snapshots: {}", e))?;
      Ok(count as usize)
    })
  }

  pub fn clear(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM snapshots", [])
        .map_err(|e| eyre!("Failed to clear snapshots: {}", e))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_put_then_get() {
    let store = SnapshotStore::new(Database::open_in_memory().unwrap());
    store.put("resume-1", &json!({"name": "Ada"})).unwrap();

    let snapshot = store.get("resume-1").unwrap().unwrap();
    assert_eq!(snapshot.payload, json!({"name": "Ada"}));
    assert!(snapshot.cached);
  }

  #[test]
  fn test_put_overwrites_and_bumps_last_modified() {
    let store = SnapshotStore::new(Database::open_in_memory().unwrap());
    let first = store.put("doc", &json!({"v": 1})).unwrap();
    let second = store.put("doc", &json!({"v": 2})).unwrap();

    let stored = store.get("doc").unwrap().unwrap();
    assert_eq!(stored.payload, json!({"v": 2}));
    assert!(second.last_modified >= first.last_modified);
    assert_eq!(store.count().unwrap(), 1);
  }

  #[test]
  fn test_missing_snapshot_is_none() {
    let store = SnapshotStore::new(Database::open_in_memory().unwrap());
    assert!(store.get("nope").unwrap().is_none());
  }

  #[test]
  fn test_serializes_with_camel_case_fields() {
    let store = SnapshotStore::new(Database::open_in_memory().unwrap());
    let snapshot = store.put("doc", &json!({})).unwrap();
    let value = serde_json::to_value(&snapshot).unwrap();
    assert!(value.get("lastModified").is_some());
    assert_eq!(value["cached"], json!(true));
  }
}
