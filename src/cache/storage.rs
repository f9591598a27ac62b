//! Byte store: named caches of request identity to stored response.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::ResponseSource;
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::http::{Headers, Response};
use crate::identity::RequestIdentity;

/// A cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub identity: String,
  pub url: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn to_response(&self) -> Response {
    Response::new(self.status, self.headers.clone(), self.body.clone())
      .with_source(ResponseSource::Cache)
  }
}

/// Entry metadata used by the eviction sweep (no body).
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub identity: String,
  pub url: String,
  pub headers: Headers,
  /// Write version, used to detect concurrent overwrites
  version: i64,
}

impl EntrySummary {
  /// Origin server time from the `Date` response header, if it parses.
  pub fn response_date(&self) -> Option<DateTime<Utc>> {
    let value = self.headers.get("date")?;
    DateTime::parse_from_rfc2822(value.trim())
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }
}

/// SQLite-backed response cache storage.
#[derive(Clone)]
pub struct CacheStorage {
  db: Database,
}

impl CacheStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Create the named cache if it does not exist yet.
  pub fn open(&self, cache_name: &str) -> Result<()> {
    self.db.with_conn(|conn| {
      conn
        .execute(
          "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
          params![cache_name, format_timestamp(Utc::now())],
        )
        .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
      Ok(())
    })
  }

  /// Names of every existing cache.
  pub fn cache_names(&self) -> Result<Vec<String>> {
    self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT name FROM caches ORDER BY name")
        .map_err(|e| eyre!("Failed to prepare cache listing: {}", e))?;
      let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list caches: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to list caches: {}", e))?;
      Ok(names)
    })
  }

  pub fn has_cache(&self, cache_name: &str) -> Result<bool> {
    Ok(self.cache_names()?.iter().any(|n| n == cache_name))
  }

  /// Delete a cache and all of its entries. Returns whether it existed.
  pub fn delete_cache(&self, cache_name: &str) -> Result<bool> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      tx.execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;
      let removed = tx
        .execute("DELETE FROM caches WHERE name = ?", params![cache_name])
        .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(removed > 0)
    })
  }

  /// Delete every cache. Returns the number of caches removed.
  pub fn purge(&self) -> Result<usize> {
    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      tx.execute("DELETE FROM cache_entries", [])
        .map_err(|e| eyre!("Failed to purge cache entries: {}", e))?;
      let removed = tx
        .execute("DELETE FROM caches", [])
        .map_err(|e| eyre!("Failed to purge caches: {}", e))?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(removed)
    })
  }

  /// Store `response` under `identity`, replacing any previous entry.
  pub fn put(&self, cache_name: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
    self.open(cache_name)?;
    let headers = response.headers.to_json()?;

    self.db.with_conn(|conn| insert_entry(conn, cache_name, identity, response, &headers))
  }

  /// Store every entry in one transaction: either all land or none do.
  pub fn put_all(&self, cache_name: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
    let encoded = entries
      .iter()
      .map(|(identity, response)| Ok((identity, response, response.headers.to_json()?)))
      .collect::<Result<Vec<_>>>()?;

    self.db.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
      tx.execute(
        "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
        params![cache_name, format_timestamp(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
      for (identity, response, headers) in &encoded {
        insert_entry(&tx, cache_name, identity, response, headers)?;
      }
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
      Ok(())
    })
  }

  pub fn get(&self, cache_name: &str, identity: &RequestIdentity) -> Result<Option<CacheEntry>> {
    let row: Option<(String, u16, String, Vec<u8>, String)> = self.db.with_conn(|conn| {
      conn
        .query_row(
          "SELECT url, status, headers, body, stored_at FROM cache_entries
           WHERE cache_name = ? AND identity = ?",
          params![cache_name, identity.as_str()],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to read {} from {}: {}", identity.url(), cache_name, e))
    })?;

    match row {
      Some((url, status, headers, body, stored_at)) => Ok(Some(CacheEntry {
        identity: identity.as_str().to_string(),
        url,
        status,
        headers: Headers::from_json(&headers)?,
        body,
        stored_at: parse_timestamp(&stored_at)?,
      })),
      None => Ok(None),
    }
  }

  /// Look `identity` up in each of `cache_names` in order; first hit wins.
  pub fn match_any(
    &self,
    cache_names: &[String],
    identity: &RequestIdentity,
  ) -> Result<Option<CacheEntry>> {
    for name in cache_names {
      if let Some(entry) = self.get(name, identity)? {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }

  /// Enumerate entry metadata of one cache.
  pub fn entries(&self, cache_name: &str) -> Result<Vec<EntrySummary>> {
    let rows: Vec<(String, String, String, i64)> = self.db.with_conn(|conn| {
      let mut stmt = conn
        .prepare(
          "SELECT identity, url, headers, version FROM cache_entries
           WHERE cache_name = ? ORDER BY url",
        )
        .map_err(|e| eyre!("Failed to prepare entry listing: {}", e))?;
      let rows = stmt
        .query_map(params![cache_name], |row| {
          Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .map_err(|e| eyre!("Failed to list entries of {}: {}", cache_name, e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to list entries of {}: {}", cache_name, e))?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(identity, url, headers, version)| {
        Ok(EntrySummary {
          identity,
          url,
          headers: Headers::from_json(&headers)?,
          version,
        })
      })
      .collect()
  }

  /// Delete the entry only if it has not been rewritten since `summary` was read.
  pub fn delete_if_unchanged(&self, cache_name: &str, summary: &EntrySummary) -> Result<bool> {
    self.db.with_conn(|conn| {
      let removed = conn
        .execute(
          "DELETE FROM cache_entries
           WHERE cache_name = ? AND identity = ? AND version = ?",
          params![cache_name, summary.identity, summary.version],
        )
        .map_err(|e| eyre!("Failed to evict {} from {}: {}", summary.url, cache_name, e))?;
      Ok(removed > 0)
    })
  }

  pub fn count(&self, cache_name: &str) -> Result<usize> {
    self.db.with_conn(|conn| {
      let count: i64 = conn
        .query_row(
          "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
          params![cache_name],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to count entries of {}: {}", cache_name, e))?;
      Ok(count as usize)
    })
  }
}

/// Write one entry with a version above every stored one.
fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  identity: &RequestIdentity,
  response: &Response,
  headers: &str,
) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, identity, url, status, headers, body, stored_at, version)
       VALUES (?, ?, ?, ?, ?, ?, ?,
         (SELECT COALESCE(MAX(version), 0) + 1 FROM cache_entries))",
      params![
        cache_name,
        identity.as_str(),
        identity.url(),
        response.status,
        headers,
        response.body,
        format_timestamp(Utc::now())
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", identity.url(), cache_name, e))?;
  Ok(())
}
