//! Runtime settings: TOML file first, then environment overrides.
//!
//! ```toml
//! cache_backend = "sqlite"
//! holidays = ["2025-10-01", "2025-10-02"]
//!
//! [providers]
//! fund_realtime = "auto"
//! sector_flow = "eastmoney"
//!
//! [priorities.fund_realtime]
//! tencent = 120
//! ```

use crate::calendar::{TradingCalendar, DEFAULT_SETTLEMENT_HOUR};
use crate::health::BreakerConfig;
use crate::http::HttpConfig;
use crate::model::DataType;
use crate::registry::ProviderSelection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Vendor choice per data type: `auto` or a vendor name/alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub fund_realtime: String,
    pub fund_history: String,
    pub sector_flow: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            fund_realtime: "auto".into(),
            fund_history: "auto".into(),
            sector_flow: "auto".into(),
        }
    }
}

/// Cache lifetimes in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSettings {
    pub quote_secs: u64,
    pub history_secs: u64,
    pub sector_secs: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            quote_secs: 60,
            history_secs: 3600,
            sector_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub cooldown_secs: u64,
    pub soft_failures_per_strike: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            threshold: d.threshold,
            cooldown_secs: d.cooldown.as_secs(),
            soft_failures_per_strike: d.soft_failures_per_strike,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Honor `HTTP(S)_PROXY` from the environment.
    pub trust_env_proxy: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let d = HttpConfig::default();
        Self {
            connect_timeout_secs: d.connect_timeout.as_secs(),
            read_timeout_secs: d.read_timeout.as_secs(),
            trust_env_proxy: d.trust_env_proxy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_backend: CacheBackend,
    /// SQLite file. Defaults to [`default_cache_path`].
    pub cache_path: Option<PathBuf>,
    /// How long past expiry an entry survives compaction.
    pub cache_retention_days: u64,
    /// Minimum gap between automatic compactions while the process runs.
    pub cache_compact_interval_mins: u64,
    pub providers: ProviderSettings,
    pub ttl: TtlSettings,
    pub breaker: BreakerSettings,
    pub http: HttpSettings,
    /// Without a token the tushare source is not registered.
    pub tushare_token: Option<String>,
    /// `priorities.<data_type>.<source> = n`, overriding built-in priorities.
    pub priorities: BTreeMap<String, BTreeMap<String, i32>>,
    /// Exchange holidays on top of weekends.
    pub holidays: Vec<NaiveDate>,
    /// Market-time hour after which the day's NAV is expected to be published.
    pub settlement_hour: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackend::default(),
            cache_path: None,
            cache_retention_days: 7,
            cache_compact_interval_mins: 60,
            providers: ProviderSettings::default(),
            ttl: TtlSettings::default(),
            breaker: BreakerSettings::default(),
            http: HttpSettings::default(),
            tushare_token: None,
            priorities: BTreeMap::new(),
            holidays: Vec::new(),
            settlement_hour: DEFAULT_SETTLEMENT_HOUR,
        }
    }
}

/// `<user cache dir>/fundgate/data_cache.db`, or `.cache/data_cache.db` when
/// the platform has no cache directory.
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("fundgate"))
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("data_cache.db")
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        settings.apply_env(|k| std::env::var(k).ok())?;
        Ok(settings)
    }

    /// Apply environment overrides, reading variables through `lookup`.
    /// Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("FUNDGATE_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("FUNDGATE_CACHE_BACKEND") {
            self.cache_backend = match v.to_ascii_lowercase().as_str() {
                "sqlite" => CacheBackend::Sqlite,
                "memory" => CacheBackend::Memory,
                _ => return Err(invalid("FUNDGATE_CACHE_BACKEND", &v)),
            };
        }
        if let Some(v) = var("FUND_PRICE_PROVIDER") {
            self.providers.fund_realtime = v;
        }
        if let Some(v) = var("FUND_HISTORY_PROVIDER") {
            self.providers.fund_history = v;
        }
        if let Some(v) = var("FUND_BOARD_PROVIDER") {
            self.providers.sector_flow = v;
        }

        set_num(&var, "QUOTE_CACHE_TTL_SECONDS", &mut self.ttl.quote_secs)?;
        set_num(&var, "HISTORY_CACHE_TTL_SECONDS", &mut self.ttl.history_secs)?;
        set_num(&var, "SECTOR_CACHE_TTL_SECONDS", &mut self.ttl.sector_secs)?;
        set_num(&var, "BREAKER_THRESHOLD", &mut self.breaker.threshold)?;
        set_num(&var, "BREAKER_COOLDOWN_SECONDS", &mut self.breaker.cooldown_secs)?;
        set_num(
            &var,
            "BREAKER_SOFT_FAILURES_PER_STRIKE",
            &mut self.breaker.soft_failures_per_strike,
        )?;
        set_num(&var, "HTTP_CONNECT_TIMEOUT_SECONDS", &mut self.http.connect_timeout_secs)?;
        set_num(&var, "HTTP_READ_TIMEOUT_SECONDS", &mut self.http.read_timeout_secs)?;
        set_num(&var, "CACHE_RETENTION_DAYS", &mut self.cache_retention_days)?;
        set_num(
            &var,
            "CACHE_COMPACT_INTERVAL_MINUTES",
            &mut self.cache_compact_interval_mins,
        )?;

        if let Some(v) = var("FUND_TRUST_ENV_PROXY") {
            self.http.trust_env_proxy = parse_flag(&v).ok_or_else(|| invalid("FUND_TRUST_ENV_PROXY", &v))?;
        }
        if let Some(v) = var("TUSHARE_TOKEN") {
            self.tushare_token = Some(v);
        }
        Ok(())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }

    pub fn cache_retention(&self) -> Duration {
        Duration::from_secs(self.cache_retention_days.saturating_mul(86_400))
    }

    pub fn cache_compact_interval(&self) -> Duration {
        Duration::from_secs(self.cache_compact_interval_mins.saturating_mul(60))
    }

    pub fn ttl(&self, data_type: DataType) -> Duration {
        Duration::from_secs(match data_type {
            DataType::FundRealtime => self.ttl.quote_secs,
            DataType::FundHistory => self.ttl.history_secs,
            DataType::SectorFlow => self.ttl.sector_secs,
        })
    }

    pub fn provider_selection(&self, data_type: DataType) -> ProviderSelection {
        let raw = match data_type {
            DataType::FundRealtime => &self.providers.fund_realtime,
            DataType::FundHistory => &self.providers.fund_history,
            DataType::SectorFlow => &self.providers.sector_flow,
        };
        match raw.parse() {
            Ok(selection) => selection,
            Err(never) => match never {},
        }
    }

    /// Configured priority for `source` under `data_type`, if overridden.
    pub fn priority(&self, data_type: DataType, source: &str) -> Option<i32> {
        self.priorities
            .get(data_type.as_str())
            .and_then(|m| m.get(source))
            .copied()
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            threshold: self.breaker.threshold.max(1),
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
            soft_failures_per_strike: self.breaker.soft_failures_per_strike.max(1),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            trust_env_proxy: self.http.trust_env_proxy,
            ..HttpConfig::default()
        }
    }

    pub fn calendar(&self) -> TradingCalendar {
        TradingCalendar::new(self.holidays.iter().copied(), self.settlement_hour)
    }

    /// Token with surrounding whitespace removed, if non-empty.
    pub fn tushare_token(&self) -> Option<&str> {
        self.tushare_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

fn invalid(var: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn set_num<N: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut N,
) -> Result<(), ConfigError> {
    if let Some(v) = var(name) {
        *slot = v.parse().map_err(|_| invalid(name, &v))?;
    }
    Ok(())
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
