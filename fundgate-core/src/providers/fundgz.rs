//! Eastmoney intraday estimates (`fundgz.1234567.com.cn`).
//!
//! The payload is JSONP: `jsonpgz({"fundcode":..,"gsz":..,"gszzl":..,"gztime":..,"dwjz":..,"jzrq":..});`.
//! `gsz` is the intraday estimate, `dwjz` the last published NAV dated `jzrq`.
//! Unknown codes answer `jsonpgz();`.
//!
//! Once the NAV for the current session has been published (see
//! [`TradingCalendar::latest_expected_settlement`]), the estimate is replaced
//! with the published value.

use super::eastmoney_nav::EastmoneyNavAdapter;
use super::{market_instant, market_midnight, require_code};
use crate::calendar::TradingCalendar;
use crate::clock::Clock;
use crate::error::FetchError;
use crate::http::{HttpClient, VendorGet};
use crate::model::{FetchRequest, NormalizedQuote, QuoteOrigin};
use crate::normalize::{cell_text, parse_date, parse_datetime, parse_percent, parse_price, strip_jsonp};
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const NAME: &str = "eastmoney_fundgz";
const REFERER: &str = "https://fund.eastmoney.com/";
static NULL: Value = Value::Null;

pub struct FundgzAdapter {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
    calendar: Arc<TradingCalendar>,
    clock: Arc<dyn Clock>,
    nav: Option<Arc<EastmoneyNavAdapter>>,
}

impl FundgzAdapter {
    pub fn new(
        http: Arc<HttpClient>,
        retry: RetryPolicy,
        calendar: Arc<TradingCalendar>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            retry,
            calendar,
            clock,
            nav: None,
        }
    }

    /// Use `nav` to fetch published values for settled sessions.
    pub fn with_settlement(mut self, nav: Arc<EastmoneyNavAdapter>) -> Self {
        self.nav = Some(nav);
        self
    }

    fn estimate_get(&self, req: &FetchRequest) -> Result<VendorGet, FetchError> {
        let code = require_code(req)?;
        let url = format!("https://fundgz.1234567.com.cn/js/{code}.js");
        Ok(VendorGet::new(NAME, url, REFERER).param("rt", self.clock.now().timestamp_millis()))
    }

    fn payload(raw: &str) -> Result<Map<String, Value>, FetchError> {
        let inner = strip_jsonp(raw)?;
        if inner.is_empty() {
            return Err(FetchError::Unsupported("fundgz has no estimate for this code".into()));
        }
        match serde_json::from_str::<Value>(inner)? {
            Value::Object(map) => Ok(map),
            other => Err(FetchError::Schema(format!("fundgz payload is not an object: {other}"))),
        }
    }
}

impl Adapter<NormalizedQuote> for FundgzAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        self.http.get(&self.estimate_get(req)?)
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<NormalizedQuote, FetchError> {
        let code = require_code(req)?;
        let obj = Self::payload(raw)?;
        let field = |k: &str| obj.get(k).unwrap_or(&NULL);

        let estimate = parse_price(field("gsz"));
        let settled_nav = parse_price(field("dwjz"));
        let nav_date = cell_text(field("jzrq")).and_then(|s| parse_date(&s));

        let (price, origin) = match (estimate, settled_nav) {
            (Some(gsz), _) => (gsz, QuoteOrigin::Estimate),
            (None, Some(dwjz)) => (dwjz, QuoteOrigin::Settled),
            (None, None) => {
                return Err(FetchError::Schema("fundgz payload has neither gsz nor dwjz".into()))
            }
        };
        let as_of = cell_text(field("gztime"))
            .and_then(|s| parse_datetime(&s))
            .map(market_instant)
            .or_else(|| nav_date.map(market_midnight))
            .unwrap_or_else(|| self.clock.now());

        Ok(NormalizedQuote {
            code: cell_text(field("fundcode")).unwrap_or_else(|| code.to_string()),
            price,
            change_pct: parse_percent(field("gszzl")),
            as_of,
            source: NAME.to_string(),
            origin,
            name: cell_text(field("name")),
            settled_nav,
            nav_date,
        })
    }

    /// Swap the estimate for the published NAV once the session has settled.
    ///
    /// The published change is recomputed against the NAV before it. Without
    /// that lookup the estimate stands: `dwjz` belongs to the previous session
    /// and cannot be paired with today's estimated change.
    fn refine(&self, quote: NormalizedQuote, _req: &FetchRequest) -> Result<NormalizedQuote, FetchError> {
        if quote.origin != QuoteOrigin::Estimate {
            return Ok(quote);
        }
        let Some(nav_date) = quote.nav_date else {
            return Ok(quote);
        };
        if !self.calendar.is_settled(nav_date, self.clock.now()) {
            return Ok(quote);
        }
        debug!(code = %quote.code, %nav_date, "session settled, replacing estimate");

        let snapshot = match &self.nav {
            Some(nav) => nav.settled_snapshot(&quote.code, Some(nav_date)).map(Some),
            None => Ok(None),
        };
        match snapshot {
            Ok(Some(snap)) => Ok(NormalizedQuote {
                price: snap.nav,
                change_pct: snap.change_pct.or(quote.change_pct),
                as_of: market_midnight(snap.date),
                origin: QuoteOrigin::Settled,
                settled_nav: Some(snap.nav),
                nav_date: Some(snap.date),
                ..quote
            }),
            Ok(None) => Ok(quote),
            Err(e) => {
                warn!(code = %quote.code, error = %e, "settled NAV lookup failed, keeping estimate");
                Ok(quote)
            }
        }
    }
}
