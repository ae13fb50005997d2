//! fundgate core: resilient fund market-data acquisition.
//!
//! This crate is the layer between flaky upstream vendors and everything that
//! needs fund prices:
//! - TTL cache with in-memory and SQLite backends
//! - Per-source circuit breaking and a priority-ordered source registry
//! - A fetch pipeline that falls back across sources and then to stale cache
//! - Vendor adapters with tolerant parsing of drifting schemas and units
//! - Settlement-aware quotes (intraday estimate vs. published NAV)

pub mod cache;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod http;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod sentiment;
pub mod service;
pub mod table;

pub use cache::{CacheEntry, CacheStore, MemoryCache, SqliteCache, StaleRead};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use context::{MarketDataContext, Sources};
pub use error::{FailureKind, FetchError};
pub use health::{BreakerConfig, BreakerState, HealthTracker, SourceHealth};
pub use model::{
    DataType, FetchRequest, FetchResult, FlowPeriod, NavPoint, NormalizedQuote, QuoteOrigin,
    SectorFlowRecord, SectorKind,
};
pub use pipeline::{FetchPipeline, Validator};
pub use provider::Adapter;
pub use registry::{ProviderSelection, SourceRegistry};
pub use retry::RetryPolicy;
pub use service::MarketData;
