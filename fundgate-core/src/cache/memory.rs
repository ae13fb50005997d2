//! In-memory cache backend.

use super::{expiry, retention_cutoff, CacheEntry, CacheStore, StaleRead};
use crate::clock::{Clock, SystemClock};
use crate::error::FetchError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, FetchError> {
        let now = self.clock.now();
        Ok(self
            .lock()
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .cloned())
    }

    fn get_allow_stale(&self, key: &str) -> Result<Option<StaleRead>, FetchError> {
        let now = self.clock.now();
        Ok(self.lock().get(key).map(|e| StaleRead {
            is_stale: e.is_expired_at(now),
            entry: e.clone(),
        }))
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), FetchError> {
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: now,
            expires_at: expiry(now, ttl),
        };
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn compact(&self, retention: Duration) -> Result<usize, FetchError> {
        let cutoff = retention_cutoff(self.clock.now(), retention);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at >= cutoff);
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize, FetchError> {
        Ok(self.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn setup() -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 6, 1, 0, 0).unwrap(),
        ));
        let cache = MemoryCache::with_clock(clock.clone());
        (clock, cache)
    }

    #[test]
    fn get_misses_after_expiry_but_stale_read_still_hits() {
        let (clock, cache) = setup();
        cache
            .set("fund_realtime:code=008888", json!({"price": 1.2}), Duration::from_secs(60))
            .unwrap();

        clock.advance(chrono::Duration::seconds(60));
        assert!(cache.get("fund_realtime:code=008888").unwrap().is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get("fund_realtime:code=008888").unwrap().is_none());

        let stale = cache
            .get_allow_stale("fund_realtime:code=008888")
            .unwrap()
            .unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.entry.value, json!({"price": 1.2}));
    }

    #[test]
    fn set_replaces_previous_entry() {
        let (_clock, cache) = setup();
        cache.set("k", json!(1), Duration::from_secs(10)).unwrap();
        cache.set("k", json!(2), Duration::from_secs(10)).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().value, json!(2));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn compact_keeps_recently_expired_entries() {
        let (clock, cache) = setup();
        cache.set("old", json!(1), Duration::from_secs(1)).unwrap();
        clock.advance(chrono::Duration::days(3));
        cache.set("recent", json!(2), Duration::from_secs(1)).unwrap();
        clock.advance(chrono::Duration::seconds(10));

        let removed = cache.compact(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get_allow_stale("old").unwrap().is_none());
        assert!(cache.get_allow_stale("recent").unwrap().is_some());
    }
}
