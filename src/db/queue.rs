//! Durable FIFO of mutating requests awaiting replay.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_timestamp, Database};
use crate::http::{Headers, Method, Request};

/// A persisted request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
  pub id: i64,
  pub url: String,
  pub method: Method,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  pub attempts: u32,
}

impl QueuedRequest {
  /// Rebuild the outbound request for replay.
  pub fn to_request(&self) -> Request {
    Request {
      method: self.method,
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      mode: Default::default(),
    }
  }
}

/// Fields captured when a request is queued.
#[derive(Debug, Clone)]
pub struct NewQueuedRequest {
  pub url: String,
  pub method: Method,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QueueStore {
  db: Database,
}

impl QueueStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append a request. Returns once the row is committed.
  pub fn push(&self, request: &NewQueuedRequest) -> Result<QueuedRequest> {
    let headers = request.headers.to_json()?;
    let enqueued_at = format_timestamp(request.enqueued_at);

    let id = self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT INTO queued_requests (url, method, headers, body, enqueued_at, attempts)
           VALUES (?, ?, ?, ?, ?, 0)",
          params![
            request.url,
            request.method.as_str(),
            headers,
            request.body,
            enqueued_at
          ],
        )
        .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;
      Ok(conn.last_insert_rowid())
    })?;

    Ok(QueuedRequest {
      id,
      url: request.url.clone(),
      method: request.method,
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at: request.enqueued_at,
      attempts: 0,
    })
  }

  /// All queued requests in arrival order.
  pub fn list(&self) -> Result<Vec<QueuedRequest>> {
    let rows = self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT id, url, method, headers, body, enqueued_at, attempts
           FROM queued_requests ORDER BY id ASC",
        )
        .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

      let rows = stmt
        .query_map([], RawRow::from_row)
        .map_err(|e| eyre!("Failed to read queue: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read queue row: {}", e))?;
      Ok(rows)
    })?;

    rows.into_iter().map(RawRow::into_queued).collect()
  }

  pub fn delete(&self, id: i64) -> Result<()> {
    self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM queued_requests WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to delete queued request {}: {}", id, e))?;
      Ok(())
    })
  }

  /// Bump the attempt counter after a failed replay, returning the new count.
  pub fn record_failure(&self, id: i64) -> Result<u32> {
    self.db.with_conn(|conn| {
      conn
        .query_row(
          "UPDATE queued_requests SET attempts = attempts + 1 WHERE id = ? RETURNING attempts",
          params![id],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to record replay failure for {}: {}", id, e))
    })
  }

  pub fn len(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count queue: {}", e))?;
      Ok(count as usize)
    })
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Remove every queued request. Returns the number removed.
  pub fn clear(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      conn
        .execute("DELETE FROM queued_requests", [])
        .map_err(|e| eyre!("Failed to clear queue: {}", e))
    })
  }
}

/// Row as stored, before parsing method and timestamps.
struct RawRow {
  id: i64,
  url: String,
  method: String,
  headers: String,
  body: Option<Vec<u8>>,
  enqueued_at: String,
  attempts: u32,
}

impl RawRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      url: row.get(1)?,
      method: row.get(2)?,
      headers: row.get(3)?,
      body: row.get(4)?,
      enqueued_at: row.get(5)?,
      attempts: row.get(6)?,
    })
  }

  fn into_queued(self) -> Result<QueuedRequest> {
    Ok(QueuedRequest {
      id: self.id,
      url: self.url,
      method: self.method.parse()?,
      headers: Headers::from_json(&self.headers)?,
      body: self.body,
      enqueued_at: parse_timestamp(&self.enqueued_at)?,
      attempts: self.attempts,
    })
  }
}
