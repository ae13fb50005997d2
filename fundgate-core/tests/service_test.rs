//! The collaborator interface over a context wired with canned sources.

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use fundgate_core::cache::{CacheStore, MemoryCache, SqliteCache};
use fundgate_core::sentiment::SentimentLevel;
use fundgate_core::{
    Adapter, Clock, FetchError, FetchRequest, ManualClock, MarketData, MarketDataContext,
    NavPoint, NormalizedQuote, QuoteOrigin, RetryPolicy, SectorFlowRecord, SectorKind, Settings,
    Sources,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Canned source ────────────────────────────────────────────────────

/// Answers every request with the same value (round-tripped through JSON) or error.
struct Canned<T> {
    name: &'static str,
    answer: Result<T, FetchError>,
    calls: AtomicUsize,
    retry: RetryPolicy,
}

impl<T> Canned<T> {
    fn new(name: &'static str, answer: Result<T, FetchError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            answer,
            calls: AtomicUsize::new(0),
            retry: RetryPolicy::none(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T> Adapter<T> for Canned<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, _req: &FetchRequest) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Ok(v) => Ok(serde_json::to_string(v)?),
            Err(e) => Err(e.clone()),
        }
    }

    fn normalize(&self, raw: &str, _req: &FetchRequest) -> Result<T, FetchError> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn quote(price: f64, name: Option<&str>) -> NormalizedQuote {
    NormalizedQuote {
        code: "018125".into(),
        price,
        change_pct: Some(0.8),
        as_of: Utc.with_ymd_and_hms(2025, 11, 18, 7, 0, 0).unwrap(),
        source: "quotes".into(),
        origin: QuoteOrigin::Estimate,
        name: name.map(str::to_string),
        settled_nav: None,
        nav_date: None,
    }
}

fn sector(name: &str, net: f64, pct: f64) -> SectorFlowRecord {
    SectorFlowRecord {
        rank: 0,
        name: name.into(),
        code: None,
        change_pct: Some(pct),
        main_net: net,
        main_inflow: None,
        main_outflow: None,
        main_net_pct: None,
    }
}

fn ranking() -> Vec<SectorFlowRecord> {
    fundgate_core::model::rank_by_net_flow(vec![
        sector("半导体", 35e8, 3.5),
        sector("银行", -12e8, -0.4),
        sector("软件开发", 8e8, 1.1),
        sector("煤炭", 2e8, 0.2),
        sector("证券", -1e8, -0.1),
        sector("医药商业", 0.5e8, 0.3),
    ])
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 18, 6, 0, 0).unwrap()))
}

fn service(settings: Settings, cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, sources: Sources) -> MarketData {
    MarketData::new(Arc::new(MarketDataContext::assemble(settings, cache, clock, sources)))
}

fn memory_service(sources: Sources) -> MarketData {
    let clock = clock();
    service(
        Settings::default(),
        Arc::new(MemoryCache::with_clock(clock.clone())),
        clock,
        sources,
    )
}

// ── Quotes ───────────────────────────────────────────────────────────

#[test]
fn malformed_code_never_reaches_sources() {
    let src = Canned::new("quotes", Ok(quote(1.0, None)));
    let md = memory_service(Sources {
        quote: vec![src.clone()],
        ..Sources::default()
    });
    assert!(md.get_latest_quote("12345").is_none());
    assert!(md.get_latest_quote("abcdef").is_none());
    assert_eq!(src.calls(), 0);

    let q = md.get_latest_quote(" 018125 ").unwrap();
    assert_eq!(q.value.price, 1.0);
    assert_eq!(src.calls(), 1);
}

#[test]
fn provider_selection_restricts_sources() {
    let first = Canned::new("first", Ok(quote(1.0, None)));
    let second = Canned::new("second", Ok(quote(2.0, None)));
    let mut settings = Settings::default();
    settings.providers.fund_realtime = "second".into();
    settings
        .priorities
        .entry("fund_realtime".into())
        .or_default()
        .extend([("first".to_string(), 10), ("second".to_string(), 5)]);
    let clock = clock();
    let md = service(
        settings,
        Arc::new(MemoryCache::with_clock(clock.clone())),
        clock,
        Sources {
            quote: vec![first.clone(), second.clone()],
            ..Sources::default()
        },
    );

    let q = md.get_latest_quote("018125").unwrap();
    assert_eq!(q.source, "second");
    assert_eq!(first.calls(), 0);
}

#[test]
fn cached_quote_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data_cache.db");
    let clock = clock();

    {
        let up = Canned::new("quotes", Ok(quote(1.25, None)));
        let cache = Arc::new(SqliteCache::open_with_clock(&path, clock.clone()).unwrap());
        let md = service(
            Settings::default(),
            cache,
            clock.clone(),
            Sources {
                quote: vec![up],
                ..Sources::default()
            },
        );
        assert!(md.get_latest_quote("018125").is_some());
    }

    let down: Arc<Canned<NormalizedQuote>> =
        Canned::new("quotes", Err(FetchError::Timeout("connect".into())));
    let cache = Arc::new(SqliteCache::open_with_clock(&path, clock.clone()).unwrap());
    let md = service(
        Settings::default(),
        cache,
        clock,
        Sources {
            quote: vec![down.clone()],
            ..Sources::default()
        },
    );
    let q = md.get_latest_quote("018125").unwrap();
    assert!(q.cached);
    assert_eq!(q.value.price, 1.25);
    assert_eq!(down.calls(), 0);
}

#[test]
fn long_running_service_compacts_expired_entries() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 18, 6, 0, 0).unwrap()));
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::with_clock(clock.clone()));
    let settings = Settings {
        cache_retention_days: 1,
        cache_compact_interval_mins: 60,
        ..Settings::default()
    };
    let md = service(
        settings,
        cache.clone(),
        clock.clone(),
        Sources {
            quote: vec![Canned::new("quotes", Ok(quote(1.0, None)))],
            ..Sources::default()
        },
    );

    md.get_latest_quote("018125").unwrap();
    md.get_latest_quote("008888").unwrap();
    assert_eq!(cache.len().unwrap(), 2);

    // two days on, the next call sweeps both before storing its own answer
    clock.advance(ChronoDuration::days(2));
    md.get_latest_quote("110011").unwrap();
    assert_eq!(cache.len().unwrap(), 1);
    assert!(cache.get_allow_stale("fund_realtime:code=018125").unwrap().is_none());
}

// ── History ──────────────────────────────────────────────────────────

#[test]
fn history_must_be_ascending() {
    let d = |day| NaiveDate::from_ymd_opt(2025, 11, day).unwrap();
    let good = Canned::new(
        "good",
        Ok(vec![
            NavPoint { date: d(14), close: 1.50 },
            NavPoint { date: d(17), close: 1.51 },
        ]),
    );
    let backwards = Canned::new(
        "backwards",
        Ok(vec![
            NavPoint { date: d(17), close: 1.51 },
            NavPoint { date: d(14), close: 1.50 },
        ]),
    );
    let mut settings = Settings::default();
    settings
        .priorities
        .entry("fund_history".into())
        .or_default()
        .extend([("backwards".to_string(), 10), ("good".to_string(), 1)]);
    let clock = clock();
    let md = service(
        settings,
        Arc::new(MemoryCache::with_clock(clock.clone())),
        clock,
        Sources {
            history: vec![backwards.clone(), good.clone()],
            ..Sources::default()
        },
    );

    let h = md.get_history("018125", 30).unwrap();
    assert_eq!(h.source, "good");
    assert_eq!(h.value.len(), 2);
    assert!(h.value[0].date < h.value[1].date);
    assert_eq!(backwards.calls(), 1);
}

// ── Sector flow ──────────────────────────────────────────────────────

#[test]
fn top_n_applies_after_the_cache() {
    let flow = Canned::new("flow", Ok(ranking()));
    let md = memory_service(Sources {
        flow: vec![flow.clone()],
        ..Sources::default()
    });

    let top2 = md.get_sector_flow_ranking(SectorKind::Industry, 2).unwrap();
    let names: Vec<_> = top2.value.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["半导体", "软件开发"]);

    let top5 = md.get_sector_flow_ranking(SectorKind::Industry, 5).unwrap();
    assert_eq!(top5.value.len(), 5);
    assert!(top5.cached);
    assert_eq!(top5.value[4].rank, 5);
    assert_eq!(flow.calls(), 1);

    // a different sector kind is a different cache key
    md.get_sector_flow_ranking(SectorKind::Concept, 5).unwrap();
    assert_eq!(flow.calls(), 2);
}

#[test]
fn top_n_out_of_range_is_empty() {
    let flow = Canned::new("flow", Ok(ranking()));
    let md = memory_service(Sources {
        flow: vec![flow.clone()],
        ..Sources::default()
    });
    assert!(md.get_sector_flow_ranking(SectorKind::Industry, 0).is_none());
    assert!(md.get_sector_flow_ranking(SectorKind::Industry, 201).is_none());
    assert_eq!(flow.calls(), 0);
    assert_eq!(
        md.get_sector_flow_ranking(SectorKind::Industry, 200).unwrap().value.len(),
        6
    );
}

#[test]
fn empty_ranking_is_rejected() {
    let flow: Arc<Canned<Vec<SectorFlowRecord>>> = Canned::new("flow", Ok(Vec::new()));
    let md = memory_service(Sources {
        flow: vec![flow],
        ..Sources::default()
    });
    assert!(md.get_sector_flow_ranking(SectorKind::Industry, 10).is_none());
}

// ── Sentiment ────────────────────────────────────────────────────────

#[test]
fn sentiment_from_live_ranking() {
    let md = memory_service(Sources {
        flow: vec![Canned::new("flow", Ok(ranking()))],
        ..Sources::default()
    });
    let s = md.sector_sentiment("半导体");
    assert_eq!(s.score, 74);
    assert_eq!(s.level, SentimentLevel::Strong);
    assert_eq!(s.matched.as_deref(), Some("半导体"));

    let s = md.sector_sentiment("银行");
    assert_eq!(s.score, 40);
    assert_eq!(s.level, SentimentLevel::LeaningWeak);
}

#[test]
fn sentiment_without_ranking_falls_back() {
    let down: Arc<Canned<Vec<SectorFlowRecord>>> =
        Canned::new("flow", Err(FetchError::Network("reset".into())));
    let md = memory_service(Sources {
        flow: vec![down],
        ..Sources::default()
    });
    let s = md.sector_sentiment("半导体");
    assert_eq!(s.score, 48);
    assert_eq!(s.matched, None);
    assert_eq!(s.level, SentimentLevel::LeaningWeak);
}

#[test]
fn fund_sector_from_quote_name() {
    let md = memory_service(Sources {
        quote: vec![Canned::new("quotes", Ok(quote(1.0, Some("某某中证光伏产业指数C"))))],
        ..Sources::default()
    });
    assert_eq!(md.sector_of_fund("008888"), Some("半导体"));
    assert_eq!(md.sector_of_fund("000002"), Some("新能源"));
}
