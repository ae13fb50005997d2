//! TTL-aware key/value cache.
//!
//! Two backends implement [`CacheStore`]:
//! - [`MemoryCache`]: process-local, for tests and `FUNDGATE_CACHE_BACKEND=memory` runs
//! - [`SqliteCache`]: durable, survives restarts
//!
//! Contract shared by both:
//! - `get` misses once `now > expires_at`, even if the entry is still stored
//! - `get_allow_stale` is the only read that may return expired data, and says so
//! - `set` replaces any existing entry for the key
//! - `compact` drops entries that expired more than `retention` ago

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A stored value with its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh through `expires_at` inclusive.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a stale-tolerant read.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead {
    pub entry: CacheEntry,
    pub is_stale: bool,
}

pub trait CacheStore: Send + Sync {
    /// Unexpired entry for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError>;

    /// Entry for `key` regardless of expiry, flagged when expired.
    fn get_allow_stale(&self, key: &str) -> Result<Option<StaleRead>, FetchError>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), FetchError>;

    /// Remove entries whose `expires_at` is older than `now - retention`.
    /// Returns the number of entries removed.
    fn compact(&self, retention: Duration) -> Result<usize, FetchError>;

    /// Number of stored entries, expired or not.
    fn len(&self) -> Result<usize, FetchError>;

    fn is_empty(&self) -> Result<bool, FetchError> {
        Ok(self.len()? == 0)
    }
}

/// Expiry for an entry written at `now`. A zero TTL is bumped to 1ms so
/// `expires_at > created_at` always holds.
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
        .max(chrono::Duration::milliseconds(1));
    now + ttl
}

pub(crate) fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero())
}
