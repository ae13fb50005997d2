//! Process-wide wiring, built once at startup and passed to whoever needs it.
//!
//! Owns the cache, the breaker state, the registry and one adapter list per
//! data type. Tests build isolated contexts with [`MarketDataContext::assemble`]
//! and scripted adapters.
//!
//! Expired cache entries are swept when the context is built and then at most
//! once per `cache_compact_interval` as calls come in.

use crate::cache::{CacheStore, MemoryCache, SqliteCache};
use crate::calendar::TradingCalendar;
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheBackend, Settings};
use crate::error::FetchError;
use crate::health::HealthTracker;
use crate::http::HttpClient;
use crate::model::{DataType, NavPoint, NormalizedQuote, SectorFlowRecord};
use crate::pipeline::FetchPipeline;
use crate::provider::Adapter;
use crate::providers::{
    eastmoney_nav, fundgz, push2, tencent, ths, tushare, EastmoneyNavAdapter, FundgzAdapter,
    Push2Adapter, TencentAdapter, ThsFlowAdapter, TushareAdapter, TushareClient,
};
use crate::registry::SourceRegistry;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Built-in priorities; higher is tried first.
pub const DEFAULT_PRIORITIES: [(DataType, &str, i32); 9] = [
    (DataType::FundRealtime, fundgz::NAME, 100),
    (DataType::FundRealtime, tencent::NAME, 90),
    (DataType::FundRealtime, tushare::NAME, 80),
    (DataType::FundRealtime, eastmoney_nav::NAME, 70),
    (DataType::FundHistory, eastmoney_nav::NAME, 100),
    (DataType::FundHistory, tushare::NAME, 80),
    (DataType::SectorFlow, push2::NAME, 100),
    (DataType::SectorFlow, tushare::NAME, 90),
    (DataType::SectorFlow, ths::NAME, 80),
];

pub fn default_priority(data_type: DataType, source: &str) -> Option<i32> {
    DEFAULT_PRIORITIES
        .iter()
        .find(|(dt, name, _)| *dt == data_type && *name == source)
        .map(|(_, _, p)| *p)
}

/// One adapter list per data type.
#[derive(Default)]
pub struct Sources {
    pub quote: Vec<Arc<dyn Adapter<NormalizedQuote>>>,
    pub history: Vec<Arc<dyn Adapter<Vec<NavPoint>>>>,
    pub flow: Vec<Arc<dyn Adapter<Vec<SectorFlowRecord>>>>,
}

impl Sources {
    /// The vendor adapters. tushare is only included when a token is configured.
    pub fn vendors(
        settings: &Settings,
        http: Arc<HttpClient>,
        calendar: Arc<TradingCalendar>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FetchError> {
        let retry = RetryPolicy::vendor_default();
        let nav = Arc::new(EastmoneyNavAdapter::new(http.clone(), retry.clone()));
        let estimate: Arc<dyn Adapter<NormalizedQuote>> = Arc::new(
            FundgzAdapter::new(http.clone(), retry.clone(), calendar, clock.clone())
                .with_settlement(nav.clone()),
        );
        let exchange: Arc<dyn Adapter<NormalizedQuote>> =
            Arc::new(TencentAdapter::new(http.clone(), retry.clone(), clock.clone()));
        let settled: Arc<dyn Adapter<NormalizedQuote>> = nav.clone();
        let history: Arc<dyn Adapter<Vec<NavPoint>>> = nav;
        let flow: Arc<dyn Adapter<Vec<SectorFlowRecord>>> =
            Arc::new(Push2Adapter::new(http.clone(), retry.clone()));
        let flow_ths: Arc<dyn Adapter<Vec<SectorFlowRecord>>> =
            Arc::new(ThsFlowAdapter::new(http.clone(), retry.clone()));

        let mut sources = Sources {
            quote: vec![estimate, exchange, settled],
            history: vec![history],
            flow: vec![flow, flow_ths],
        };

        match settings.tushare_token() {
            Some(token) => {
                let client = Arc::new(TushareClient::new(http, token)?);
                let ts = Arc::new(TushareAdapter::new(client, retry, clock));
                sources.quote.push(ts.clone());
                sources.history.push(ts.clone());
                sources.flow.push(ts);
            }
            None => debug!("TUSHARE_TOKEN not set, tushare not registered"),
        }
        Ok(sources)
    }

    fn names(&self, data_type: DataType) -> Vec<String> {
        match data_type {
            DataType::FundRealtime => self.quote.iter().map(|a| a.name().to_string()).collect(),
            DataType::FundHistory => self.history.iter().map(|a| a.name().to_string()).collect(),
            DataType::SectorFlow => self.flow.iter().map(|a| a.name().to_string()).collect(),
        }
    }
}

pub struct MarketDataContext {
    settings: Settings,
    clock: Arc<dyn Clock>,
    calendar: Arc<TradingCalendar>,
    pipeline: FetchPipeline,
    sources: Sources,
    last_compaction: Mutex<Option<DateTime<Utc>>>,
}

impl MarketDataContext {
    /// Vendor sources, system clock, cache per `settings.cache_backend`.
    pub fn from_settings(settings: Settings) -> Result<Self, FetchError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache: Arc<dyn CacheStore> = match settings.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryCache::with_clock(clock.clone())),
            CacheBackend::Sqlite => {
                let path = settings.cache_path();
                info!(path = %path.display(), "using sqlite cache");
                Arc::new(SqliteCache::open_with_clock(path, clock.clone())?)
            }
        };
        let http = Arc::new(HttpClient::new(settings.http_config())?);
        let calendar = Arc::new(settings.calendar());
        let sources = Sources::vendors(&settings, http, calendar.clone(), clock.clone())?;
        Ok(Self::assemble(settings, cache, clock, sources))
    }

    /// Wire explicit parts. Every adapter is registered under its data type
    /// with the configured priority, else the built-in one, else 0. The cache
    /// is compacted once before the context is returned.
    pub fn assemble(
        settings: Settings,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        sources: Sources,
    ) -> Self {
        let mut registry = SourceRegistry::new();
        for data_type in DataType::ALL {
            for name in sources.names(data_type) {
                let priority = settings
                    .priority(data_type, &name)
                    .or_else(|| default_priority(data_type, &name))
                    .unwrap_or(0);
                registry.register(data_type, &name, priority);
            }
            registry.set_selection(data_type, settings.provider_selection(data_type));
        }
        let health = Arc::new(HealthTracker::new(settings.breaker_config(), clock.clone()));
        let calendar = Arc::new(settings.calendar());
        let ctx = Self {
            pipeline: FetchPipeline::new(cache, health, registry, clock.clone()),
            settings,
            clock,
            calendar,
            sources,
            last_compaction: Mutex::new(None),
        };
        ctx.compact_if_due();
        ctx
    }

    /// Drop entries expired longer than `cache_retention` ago, unless a sweep
    /// ran within `cache_compact_interval`. Returns the count removed when a
    /// sweep ran. Failures are logged; the cache stays usable.
    pub fn compact_if_due(&self) -> Option<usize> {
        let now = self.clock.now();
        {
            let mut last = self.last_compaction.lock().unwrap_or_else(|e| e.into_inner());
            let interval = chrono::Duration::from_std(self.settings.cache_compact_interval())
                .unwrap_or_else(|_| chrono::Duration::zero());
            if last.is_some_and(|at| now - at < interval) {
                return None;
            }
            *last = Some(now);
        }
        match self.cache().compact(self.settings.cache_retention()) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "compacted expired cache entries");
                }
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "cache compaction failed");
                None
            }
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        self.pipeline.cache()
    }

    pub fn health(&self) -> &HealthTracker {
        self.pipeline.health()
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.pipeline.registry()
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }
}
