//! Per-source circuit breaking.
//!
//! Each (data type, source) pair has a consecutive-failure counter. Once it
//! reaches the threshold the source is skipped until the cooldown has passed
//! since its last failure. After the cooldown the source gets exactly one more
//! try: a success closes the breaker, a failure re-opens it for another full
//! cooldown because the counter is still at or above the threshold.

use crate::clock::Clock;
use crate::model::DataType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive strikes that open the breaker.
    pub threshold: u32,
    /// How long an open breaker stays open after the last failure.
    pub cooldown: Duration,
    /// Soft failures (unusable answers) that add up to one strike.
    pub soft_failures_per_strike: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(300),
            soft_failures_per_strike: 2,
        }
    }
}

/// Health record for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub name: String,
    pub fail_count: u32,
    pub soft_fail_count: u32,
    pub last_fail_at: Option<DateTime<Utc>>,
}

impl SourceHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_count: 0,
            soft_fail_count: 0,
            last_fail_at: None,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    /// Below threshold, requests flow.
    Closed,
    /// Threshold reached, skipped for `retry_in` more.
    Open { retry_in_secs: u64 },
    /// Threshold reached but cooldown passed: the next call decides.
    HalfOpen,
}

type Key = (DataType, String);

pub struct HealthTracker {
    config: BreakerConfig,
    sources: Mutex<HashMap<Key, SourceHealth>>,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            sources: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Key, SourceHealth>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Any success fully resets the source.
    pub fn record_success(&self, data_type: DataType, name: &str) {
        let mut sources = self.lock();
        let health = sources
            .entry((data_type, name.to_string()))
            .or_insert_with(|| SourceHealth::new(name));
        health.fail_count = 0;
        health.soft_fail_count = 0;
    }

    /// One strike: increments `fail_count` and stamps `last_fail_at`.
    pub fn record_failure(&self, data_type: DataType, name: &str) {
        let now = self.clock.now();
        let mut sources = self.lock();
        let health = sources
            .entry((data_type, name.to_string()))
            .or_insert_with(|| SourceHealth::new(name));
        strike(health, now);
    }

    /// An unusable answer. Counts as a strike once enough of them accumulate.
    pub fn record_soft_failure(&self, data_type: DataType, name: &str) {
        let now = self.clock.now();
        let per_strike = self.config.soft_failures_per_strike.max(1);
        let mut sources = self.lock();
        let health = sources
            .entry((data_type, name.to_string()))
            .or_insert_with(|| SourceHealth::new(name));
        health.soft_fail_count += 1;
        if health.soft_fail_count >= per_strike {
            health.soft_fail_count = 0;
            strike(health, now);
        }
    }

    pub fn is_available(&self, data_type: DataType, name: &str) -> bool {
        !matches!(self.state(data_type, name), BreakerState::Open { .. })
    }

    pub fn state(&self, data_type: DataType, name: &str) -> BreakerState {
        let now = self.clock.now();
        let sources = self.lock();
        match sources.get(&(data_type, name.to_string())) {
            None => BreakerState::Closed,
            Some(health) => self.state_of(health, now),
        }
    }

    fn state_of(&self, health: &SourceHealth, now: DateTime<Utc>) -> BreakerState {
        if health.fail_count < self.config.threshold {
            return BreakerState::Closed;
        }
        let Some(last_fail_at) = health.last_fail_at else {
            return BreakerState::HalfOpen;
        };
        let elapsed = (now - last_fail_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed > self.config.cooldown {
            BreakerState::HalfOpen
        } else {
            let remaining = self.config.cooldown - elapsed;
            BreakerState::Open {
                retry_in_secs: remaining.as_secs_f64().ceil() as u64,
            }
        }
    }

    /// Health record for a source, if it has ever been touched.
    pub fn get(&self, data_type: DataType, name: &str) -> Option<SourceHealth> {
        self.lock().get(&(data_type, name.to_string())).cloned()
    }

    /// Every tracked source with its current state, sorted for display.
    pub fn snapshot(&self) -> Vec<(DataType, SourceHealth, BreakerState)> {
        let now = self.clock.now();
        let sources = self.lock();
        let mut out: Vec<_> = sources
            .iter()
            .map(|((dt, _), h)| (*dt, h.clone(), self.state_of(h, now)))
            .collect();
        out.sort_by(|a, b| (a.0, &a.1.name).cmp(&(b.0, &b.1.name)));
        out
    }
}

fn strike(health: &mut SourceHealth, now: DateTime<Utc>) {
    health.fail_count = health.fail_count.saturating_add(1);
    health.last_fail_at = Some(now);
}
