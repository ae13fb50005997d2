//! SQLite cache backend.
//!
//! Layout: a single `cache(key, value, created_at, expires_at)` table with
//! timestamps in epoch milliseconds and an index on `expires_at` for compaction.
//!
//! Every `set` is its own autocommit statement under `synchronous=FULL`, so a
//! value is on disk before `set` returns.

use super::{expiry, retention_cutoff, CacheEntry, CacheStore, StaleRead};
use crate::clock::{Clock, SystemClock};
use crate::error::FetchError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires_at);
";

pub struct SqliteCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        let cache = Self::init(conn, Some(path.to_path_buf()), clock)?;
        debug!(path = %path.display(), "opened sqlite cache");
        Ok(cache)
    }

    /// A private in-memory database; same SQL paths, nothing persisted.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        Self::init(Connection::open_in_memory()?, None, clock)
    }

    fn init(conn: Connection, path: Option<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            clock,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_row(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let row = self
            .lock()
            .query_row(
                "SELECT value, created_at, expires_at FROM cache WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((raw, created_ms, expires_ms)) = row else {
            return Ok(None);
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "undecodable cache row treated as absent");
                return Ok(None);
            }
        };
        let (Some(created_at), Some(expires_at)) = (
            DateTime::from_timestamp_millis(created_ms),
            DateTime::from_timestamp_millis(expires_ms),
        ) else {
            warn!(key, "cache row with out-of-range timestamps treated as absent");
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            key: key.to_string(),
            value,
            created_at,
            expires_at,
        }))
    }
}

impl CacheStore for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let now = self.clock.now();
        Ok(self.read_row(key)?.filter(|e| !e.is_expired_at(now)))
    }

    fn get_allow_stale(&self, key: &str) -> Result<Option<StaleRead>, FetchError> {
        let now = self.clock.now();
        Ok(self.read_row(key)?.map(|entry| StaleRead {
            is_stale: entry.is_expired_at(now),
            entry,
        }))
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), FetchError> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl);
        let json = serde_json::to_string(&value)
            .map_err(|e| FetchError::Storage(format!("serialize {key}: {e}")))?;
        self.lock().execute(
            "INSERT OR REPLACE INTO cache (key, value, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, json, now.timestamp_millis(), expires_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn compact(&self, retention: Duration) -> Result<usize, FetchError> {
        let cutoff = retention_cutoff(self.clock.now(), retention);
        let removed = self.lock().execute(
            "DELETE FROM cache WHERE expires_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        debug!(removed, "compacted sqlite cache");
        Ok(removed)
    }

    fn len(&self) -> Result<usize, FetchError> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
