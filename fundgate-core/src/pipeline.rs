//! Cache → live sources → stale cache.
//!
//! [`FetchPipeline::fetch`] never fails. Every vendor error is turned into a
//! breaker update and the caller gets a fresh value, a stale one flagged as
//! such, or `None`. Cached values pass the same validator as live ones on
//! every path out of the cache.

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::error::{FailureKind, FetchError};
use crate::health::HealthTracker;
use crate::model::{DataType, FetchRequest, FetchResult};
use crate::provider::Adapter;
use crate::registry::SourceRegistry;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-data-type usability check applied before a value is returned or cached.
pub trait Validator<T>: Send + Sync {
    /// `Err(reason)` rejects the value.
    fn validate(&self, value: &T) -> Result<(), String>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&T) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<(), String> {
        self(value)
    }
}

/// Accepts anything.
pub struct AcceptAll;

impl<T> Validator<T> for AcceptAll {
    fn validate(&self, _value: &T) -> Result<(), String> {
        Ok(())
    }
}

/// What is stored in the cache: the value plus where and when it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub value: T,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Envelope<T> {
    fn into_result(self, stale: bool, cached: bool) -> FetchResult<T> {
        FetchResult {
            value: self.value,
            source: self.source,
            fetched_at: self.fetched_at,
            stale,
            cached,
        }
    }
}

pub struct FetchPipeline {
    cache: Arc<dyn CacheStore>,
    health: Arc<HealthTracker>,
    registry: SourceRegistry,
    clock: Arc<dyn Clock>,
}

impl FetchPipeline {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        health: Arc<HealthTracker>,
        registry: SourceRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            health,
            registry,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Resolve `req` through the cache and the available sources.
    ///
    /// `adapters` are matched to registry entries by [`Adapter::name`]; the
    /// registry decides order and availability.
    pub fn fetch<T>(
        &self,
        req: &FetchRequest,
        adapters: &[Arc<dyn Adapter<T>>],
        validator: &dyn Validator<T>,
        ttl: Duration,
    ) -> Option<FetchResult<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = req.cache_key();
        let data_type = req.data_type();

        if let Some(hit) = self.fresh_hit(&key, validator) {
            debug!(%key, source = %hit.source, "cache hit");
            return Some(hit);
        }

        for name in self.registry.list_available(data_type, &self.health) {
            let Some(adapter) = adapters.iter().find(|a| a.name() == name) else {
                warn!(%data_type, source = %name, "registered source has no adapter");
                continue;
            };
            // no lock is held here; vendor calls may block for seconds
            let outcome = adapter
                .fetch(req)
                .and_then(|value| match validator.validate(&value) {
                    Ok(()) => Ok(value),
                    Err(reason) => Err(FetchError::Validation(reason)),
                });
            match outcome {
                Ok(value) => {
                    self.health.record_success(data_type, &name);
                    let envelope = Envelope {
                        value,
                        source: name.clone(),
                        fetched_at: self.clock.now(),
                    };
                    self.store(&key, &envelope, ttl);
                    debug!(%key, source = %name, "live fetch");
                    return Some(envelope.into_result(false, false));
                }
                Err(e) => self.record(data_type, &name, &key, &e),
            }
        }

        self.last_resort(&key, validator)
    }

    /// Whatever the cache holds for `key`, expired or not, provided it still
    /// passes `validator`.
    fn last_resort<T: DeserializeOwned>(
        &self,
        key: &str,
        validator: &dyn Validator<T>,
    ) -> Option<FetchResult<T>> {
        let read = match self.cache.get_allow_stale(key) {
            Ok(Some(read)) => read,
            Ok(None) => {
                info!(%key, "no data");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "stale cache read failed");
                return None;
            }
        };
        let Some(envelope) = decode::<T>(read.entry.value) else {
            warn!(%key, "cached value could not be decoded");
            return None;
        };
        if let Err(reason) = validator.validate(&envelope.value) {
            warn!(%key, %reason, "cached value rejected, no data");
            return None;
        }
        info!(%key, source = %envelope.source, stale = read.is_stale, "all sources failed, serving cached value");
        Some(envelope.into_result(read.is_stale, true))
    }

    fn fresh_hit<T: DeserializeOwned>(
        &self,
        key: &str,
        validator: &dyn Validator<T>,
    ) -> Option<FetchResult<T>> {
        let entry = match self.cache.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(%key, error = %e, "cache read failed");
                return None;
            }
        };
        let envelope = decode::<T>(entry.value)?;
        match validator.validate(&envelope.value) {
            Ok(()) => Some(envelope.into_result(false, true)),
            Err(reason) => {
                debug!(%key, %reason, "cached value rejected");
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, envelope: &Envelope<T>, ttl: Duration) {
        let value = match serde_json::to_value(envelope) {
            Ok(v) => v,
            Err(e) => {
                warn!(%key, error = %e, "value not serializable, not cached");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, value, ttl) {
            warn!(%key, error = %e, "cache write failed");
        }
    }

    fn record(&self, data_type: DataType, name: &str, key: &str, e: &FetchError) {
        match e.failure_kind() {
            FailureKind::Hard => {
                warn!(%data_type, source = %name, %key, error = %e, "source failed");
                self.health.record_failure(data_type, name);
            }
            FailureKind::Soft => {
                warn!(%data_type, source = %name, %key, error = %e, "source returned unusable data");
                self.health.record_soft_failure(data_type, name);
            }
            FailureKind::NotApplicable => {
                debug!(%data_type, source = %name, %key, error = %e, "source skipped");
            }
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Option<Envelope<T>> {
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::health::BreakerConfig;
    use crate::retry::RetryPolicy;
    use chrono::TimeZone;

    struct Fixed {
        name: &'static str,
        answer: Result<f64, FetchError>,
        retry: RetryPolicy,
    }

    impl Adapter<f64> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn retry_policy(&self) -> &RetryPolicy {
            &self.retry
        }

        fn request(&self, _req: &FetchRequest) -> Result<String, FetchError> {
            self.answer.clone().map(|v| v.to_string())
        }

        fn normalize(&self, raw: &str, _req: &FetchRequest) -> Result<f64, FetchError> {
            raw.parse().map_err(|_| FetchError::Schema(raw.to_string()))
        }
    }

    fn pipeline(sources: &[(&str, i32)]) -> FetchPipeline {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 3, 2, 0, 0).unwrap(),
        ));
        let mut registry = SourceRegistry::new();
        for (name, priority) in sources {
            registry.register(DataType::FundRealtime, name, *priority);
        }
        FetchPipeline::new(
            Arc::new(MemoryCache::with_clock(clock.clone())),
            Arc::new(HealthTracker::new(BreakerConfig::default(), clock.clone())),
            registry,
            clock,
        )
    }

    fn fixed(name: &'static str, answer: Result<f64, FetchError>) -> Arc<dyn Adapter<f64>> {
        Arc::new(Fixed {
            name,
            answer,
            retry: RetryPolicy::none(),
        })
    }

    fn req() -> FetchRequest {
        FetchRequest::new(DataType::FundRealtime).param("code", "510300")
    }

    fn positive(v: &f64) -> Result<(), String> {
        if *v > 0.0 {
            Ok(())
        } else {
            Err(format!("price {v} <= 0"))
        }
    }

    #[test]
    fn unsupported_does_not_strike() {
        let p = pipeline(&[("a", 2), ("b", 1)]);
        let adapters = [
            fixed("a", Err(FetchError::Unsupported("off-exchange".into()))),
            fixed("b", Ok(1.0)),
        ];
        let out = p.fetch(&req(), &adapters, &positive, Duration::from_secs(60)).unwrap();
        assert_eq!(out.source, "b");
        assert_eq!(p.health().get(DataType::FundRealtime, "a"), None);
    }

    #[test]
    fn rejected_value_is_soft_failure() {
        let p = pipeline(&[("a", 2), ("b", 1)]);
        let adapters = [fixed("a", Ok(0.0)), fixed("b", Ok(2.0))];
        let out = p.fetch(&req(), &adapters, &positive, Duration::from_secs(60)).unwrap();
        assert_eq!(out.value, 2.0);
        let a = p.health().get(DataType::FundRealtime, "a").unwrap();
        assert_eq!(a.fail_count, 0);
        assert_eq!(a.soft_fail_count, 1);
    }

    #[test]
    fn source_without_adapter_is_skipped() {
        let p = pipeline(&[("ghost", 5), ("b", 1)]);
        let out = p
            .fetch(&req(), &[fixed("b", Ok(3.0))], &AcceptAll, Duration::from_secs(60))
            .unwrap();
        assert_eq!(out.source, "b");
    }

    #[test]
    fn envelope_keeps_provenance_on_cache_hit() {
        let p = pipeline(&[("a", 1)]);
        let adapters = [fixed("a", Ok(1.5))];
        let first = p.fetch(&req(), &adapters, &AcceptAll, Duration::from_secs(60)).unwrap();
        assert!(!first.cached);
        let second = p.fetch(&req(), &adapters[..0], &AcceptAll, Duration::from_secs(60)).unwrap();
        assert!(second.cached);
        assert!(!second.stale);
        assert_eq!(second.source, "a");
        assert_eq!(second.fetched_at, first.fetched_at);
    }
}
