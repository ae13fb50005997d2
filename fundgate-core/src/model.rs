//! Request and result types shared by every layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Logical data type a source is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    FundRealtime,
    FundHistory,
    SectorFlow,
}

impl DataType {
    pub const ALL: [DataType; 3] = [
        DataType::FundRealtime,
        DataType::FundHistory,
        DataType::SectorFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::FundRealtime => "fund_realtime",
            DataType::FundHistory => "fund_history",
            DataType::SectorFlow => "sector_flow",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fund_realtime" => Ok(DataType::FundRealtime),
            "fund_history" => Ok(DataType::FundHistory),
            "sector_flow" | "board_flow" => Ok(DataType::SectorFlow),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}

/// An immutable request: data type plus parameters.
///
/// Parameters live in a `BTreeMap` so the cache key is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    data_type: DataType,
    params: BTreeMap<String, Value>,
}

impl FetchRequest {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// `fund_realtime:code=008888`
    pub fn cache_key(&self) -> String {
        let mut key = self.data_type.as_str().to_string();
        for (k, v) in &self.params {
            key.push(':');
            key.push_str(k);
            key.push('=');
            match v {
                Value::String(s) => key.push_str(s),
                other => key.push_str(&other.to_string()),
            }
        }
        key
    }
}

/// What the pipeline hands back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult<T> {
    pub value: T,
    /// Name of the source that produced the value.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    /// True when served from a cache entry that had already expired.
    pub stale: bool,
    /// True when served from the cache rather than a live call.
    pub cached: bool,
}

impl<T> FetchResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        FetchResult {
            value: f(self.value),
            source: self.source,
            fetched_at: self.fetched_at,
            stale: self.stale,
            cached: self.cached,
        }
    }
}

/// Whether a price is an intraday estimate or a published end-of-day value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteOrigin {
    /// Intraday estimate, provisional.
    Estimate,
    /// Exchange trade price.
    Exchange,
    /// Authoritative end-of-day value.
    Settled,
}

impl QuoteOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteOrigin::Estimate => "estimate",
            QuoteOrigin::Exchange => "exchange",
            QuoteOrigin::Settled => "settled",
        }
    }
}

/// Canonical shape for price-like data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub code: String,
    pub price: f64,
    /// Percent change, e.g. `-1.23` for -1.23%. `None` means unavailable, not zero.
    pub change_pct: Option<f64>,
    pub as_of: DateTime<Utc>,
    pub source: String,
    pub origin: QuoteOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Most recent published NAV, when the source reports one alongside the price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_nav: Option<f64>,
    /// Date of `settled_nav`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_date: Option<NaiveDate>,
}

/// One point of a NAV history series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Sector grouping for fund-flow rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorKind {
    Industry,
    Concept,
    Region,
}

impl SectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectorKind::Industry => "industry",
            SectorKind::Concept => "concept",
            SectorKind::Region => "region",
        }
    }
}

impl FromStr for SectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "industry" | "行业" | "行业资金流" => Ok(SectorKind::Industry),
            "concept" | "概念" | "概念资金流" => Ok(SectorKind::Concept),
            "region" | "地域" | "地域资金流" => Ok(SectorKind::Region),
            other => Err(format!("unknown sector kind '{other}'")),
        }
    }
}

/// Window over which net flow is accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPeriod {
    #[default]
    Today,
    FiveDay,
    TenDay,
}

impl FlowPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPeriod::Today => "today",
            FlowPeriod::FiveDay => "5d",
            FlowPeriod::TenDay => "10d",
        }
    }

    pub fn trading_days(&self) -> usize {
        match self {
            FlowPeriod::Today => 1,
            FlowPeriod::FiveDay => 5,
            FlowPeriod::TenDay => 10,
        }
    }
}

impl FromStr for FlowPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" | "1d" | "今日" => Ok(FlowPeriod::Today),
            "5d" | "5日" => Ok(FlowPeriod::FiveDay),
            "10d" | "10日" => Ok(FlowPeriod::TenDay),
            other => Err(format!("unknown flow period '{other}'")),
        }
    }
}

/// One row of a sector fund-flow ranking. Amounts are in yuan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorFlowRecord {
    pub rank: usize,
    pub name: String,
    pub code: Option<String>,
    pub change_pct: Option<f64>,
    pub main_net: f64,
    pub main_inflow: Option<f64>,
    pub main_outflow: Option<f64>,
    pub main_net_pct: Option<f64>,
}

/// Sort by net flow descending and assign 1-based ranks.
pub fn rank_by_net_flow(mut records: Vec<SectorFlowRecord>) -> Vec<SectorFlowRecord> {
    records.sort_by(|a, b| b.main_net.total_cmp(&a.main_net));
    for (i, r) in records.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_sorted_and_unquoted() {
        let req = FetchRequest::new(DataType::FundHistory)
            .param("lookback_days", 180)
            .param("code", "008888");
        assert_eq!(
            req.cache_key(),
            "fund_history:code=008888:lookback_days=180"
        );
    }

    #[test]
    fn realtime_key_matches_documented_shape() {
        let req = FetchRequest::new(DataType::FundRealtime).param("code", "008888");
        assert_eq!(req.cache_key(), "fund_realtime:code=008888");
    }

    #[test]
    fn ranking_is_descending_and_reranked() {
        let rec = |name: &str, net: f64| SectorFlowRecord {
            rank: 0,
            name: name.into(),
            code: None,
            change_pct: None,
            main_net: net,
            main_inflow: None,
            main_outflow: None,
            main_net_pct: None,
        };
        let ranked = rank_by_net_flow(vec![rec("a", -1.0), rec("b", 5.0), rec("c", 2.0)]);
        let names: Vec<_> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["b", "c", "a"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn parses_chinese_aliases() {
        assert_eq!("行业资金流".parse::<SectorKind>(), Ok(SectorKind::Industry));
        assert_eq!("5日".parse::<FlowPeriod>(), Ok(FlowPeriod::FiveDay));
        assert_eq!("board_flow".parse::<DataType>(), Ok(DataType::SectorFlow));
    }
}
