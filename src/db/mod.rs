//! Durable structured storage shared by every component of the agent.

pub mod queue;
pub mod schema;
pub mod snapshots;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use queue::{NewQueuedRequest, QueueStore, QueuedRequest};
pub use snapshots::{CachedSnapshot, SnapshotStore};

/// Database connection wrapper.
///
/// Cloning is cheap; all clones share one connection. The lock is only held
/// for the duration of a single statement or transaction, never across an await.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute_batch(schema::SCHEMA)
        .map_err(|e| eyre!("Failed to run migrations: {}", e))
    })
  }

  /// Run `f` with exclusive access to the connection.
  pub fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T>,
  {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&mut conn)
  }

  pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
    self.with_conn(|conn| {
      conn
        .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
          row.get(0)
        })
        .optional()
        .map_err(|e| eyre!("Failed to read meta {}: {}", key, e))
    })
  }

  pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
          params![key, value],
        )
        .map_err(|e| eyre!("Failed to write meta {}: {}", key, e))?;
      Ok(())
    })
  }

  pub fn delete_meta(&self, key: &str) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute("DELETE FROM meta WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to delete meta {}: {}", key, e))?;
      Ok(())
    })
  }
}

/// Format a timestamp for storage.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_meta_roundtrip() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.get_meta("active_static").unwrap(), None);
    db.set_meta("active_static", "static-v1").unwrap();
    db.set_meta("active_static", "static-v2").unwrap();
    assert_eq!(
      db.get_meta("active_static").unwrap().as_deref(),
      Some("static-v2")
    );
    db.delete_meta("active_static").unwrap();
    assert_eq!(db.get_meta("active_static").unwrap(), None);
  }

  #[test]
  fn test_timestamp_format_roundtrip() {
    let now = Utc::now();
    let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
    assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
  }

  #[test]
  fn test_open_on_disk_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("agent.db");
    Database::open(&path).unwrap();
    assert!(path.exists());
  }
}
