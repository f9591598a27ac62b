/// Schema for the agent's durable state.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named response caches, one per generation
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Cached responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    identity TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    -- Bumped on every write; guards eviction against concurrent re-stores
    version INTEGER NOT NULL,
    PRIMARY KEY (cache_name, identity),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_version ON cache_entries(version);

-- Mutations awaiting replay, FIFO by id
CREATE TABLE IF NOT EXISTS queued_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

-- Application entity snapshots kept for offline use
CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

-- Agent bookkeeping (active generation labels)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
