//! TuShare Pro (`api.tushare.pro`).
//!
//! Every call is a POST of `{api_name, token, params, fields}` answered with
//! `{code, msg, data: {fields, items}}`. Requires a token; without one the
//! source is never registered.
//!
//! | data type       | api                                  |
//! |-----------------|--------------------------------------|
//! | `fund_realtime` | `fund_daily`, then `daily` (exchange-listed only) |
//! | `fund_history`  | `fund_nav`                           |
//! | `sector_flow`   | `trade_cal` + `moneyflow_ind_dc` per day |

use super::{exchange_of, market_instant, pct_change, require_code, Exchange};
use crate::calendar::market_time;
use crate::clock::Clock;
use crate::error::FetchError;
use crate::http::HttpClient;
use crate::model::{
    rank_by_net_flow, FetchRequest, FlowPeriod, NavPoint, NormalizedQuote, QuoteOrigin,
    SectorFlowRecord, SectorKind,
};
use crate::normalize::{cell_text, parse_amount, parse_date, parse_number, parse_percent, AmountUnit};
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use crate::table::Table;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "tushare";
pub const DEFAULT_URL: &str = "http://api.tushare.pro";
const REFERER: &str = "https://tushare.pro/";

/// Daily bar tables tried in order: ETF/LOF first, then stocks.
const DAILY_APIS: [&str; 2] = ["fund_daily", "daily"];
const DAILY_FIELDS: &str = "ts_code,trade_date,close,pre_close,pct_chg";

/// Vendor error code for per-minute quota exhaustion.
const CODE_RATE_LIMITED: i64 = 40203;
const CODE_BAD_TOKEN: [i64; 2] = [40001, 40101];

pub struct TushareClient {
    http: Arc<HttpClient>,
    token: String,
    url: String,
}

impl TushareClient {
    pub fn new(http: Arc<HttpClient>, token: &str) -> Result<Self, FetchError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(FetchError::Configuration("TUSHARE_TOKEN is empty".into()));
        }
        Ok(Self {
            http,
            token: token.to_string(),
            url: DEFAULT_URL.to_string(),
        })
    }

    fn body(&self, api_name: &str, params: Value, fields: &str) -> Value {
        json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": fields,
        })
    }

    /// One API call, returning the raw response body.
    pub fn call(&self, api_name: &str, params: Value, fields: &str) -> Result<String, FetchError> {
        debug!(api_name, "tushare call");
        let body = self.body(api_name, params, fields);
        self.http.post_json(NAME, &self.url, REFERER, &body)
    }
}

/// The first response from `apis` whose table has rows. When every table is
/// empty the security is not covered.
fn first_with_rows(
    apis: &[&str],
    mut call: impl FnMut(&str) -> Result<String, FetchError>,
) -> Result<String, FetchError> {
    for api in apis {
        let raw = call(api)?;
        if !parse_response(&raw)?.is_empty() {
            return Ok(raw);
        }
        debug!(api, "tushare table empty");
    }
    Err(FetchError::Unsupported(format!("no rows from {}", apis.join(" or "))))
}

/// The `data` table of a parsed response, or the vendor error it carries.
pub fn response_table(body: &Value) -> Result<Table, FetchError> {
    let code = body
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| FetchError::Schema("tushare response has no code".into()))?;
    if code != 0 {
        let msg = body.get("msg").and_then(cell_text).unwrap_or_default();
        return Err(match code {
            CODE_RATE_LIMITED => FetchError::RateLimited { retry_after_secs: 60 },
            c if CODE_BAD_TOKEN.contains(&c) => FetchError::Configuration(format!("tushare token rejected: {msg}")),
            c => FetchError::Schema(format!("tushare error {c}: {msg}")),
        });
    }
    let fields: Vec<String> = body
        .pointer("/data/fields")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Schema("tushare response has no data.fields".into()))?
        .iter()
        .map(|f| f.as_str().unwrap_or_default().to_string())
        .collect();
    let items = body
        .pointer("/data/items")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    Ok(Table::new(fields, items))
}

pub fn parse_response(raw: &str) -> Result<Table, FetchError> {
    response_table(&serde_json::from_str(raw)?)
}

/// `510300.SH`; off-exchange funds use the `.OF` suffix.
pub fn ts_code(code: &str) -> String {
    match exchange_of(code) {
        Some(Exchange::Shanghai) => format!("{code}.SH"),
        Some(Exchange::Shenzhen) => format!("{code}.SZ"),
        None => format!("{code}.OF"),
    }
}

fn ymd(d: NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

fn content_type(kind: SectorKind) -> &'static str {
    match kind {
        SectorKind::Industry => "行业",
        SectorKind::Concept => "概念",
        SectorKind::Region => "地域",
    }
}

/// Trade dates are `YYYYMMDD` strings or numbers.
fn cell_date(v: &Value) -> Option<NaiveDate> {
    cell_text(v).and_then(|s| parse_date(&s))
}

pub struct TushareAdapter {
    client: Arc<TushareClient>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TushareAdapter {
    pub fn new(client: Arc<TushareClient>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            retry,
            clock,
        }
    }

    fn today(&self) -> NaiveDate {
        market_time(self.clock.now()).date_naive()
    }

    /// The last `n` open SSE days up to today, oldest first.
    fn open_days(&self, n: usize) -> Result<Vec<String>, FetchError> {
        let today = self.today();
        let span = (n as i64 * 10).max(20);
        let raw = self.client.call(
            "trade_cal",
            json!({
                "exchange": "SSE",
                "start_date": ymd(today - Duration::days(span)),
                "end_date": ymd(today),
            }),
            "cal_date,is_open",
        )?;
        let table = parse_response(&raw)?;
        let date = table.aliases(&["cal_date"]);
        let open = table.aliases(&["is_open"]);
        let mut days: Vec<String> = table
            .rows()
            .filter(|r| r.select(&open).and_then(parse_number) == Some(1.0))
            .filter_map(|r| r.select(&date).and_then(cell_text))
            .collect();
        days.sort();
        days.dedup();
        let skip = days.len().saturating_sub(n);
        Ok(days.split_off(skip))
    }
}

impl Adapter<NormalizedQuote> for TushareAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let code = require_code(req)?;
        if exchange_of(code).is_none() {
            return Err(FetchError::Unsupported(format!("fund_daily covers exchange-listed funds, not {code}")));
        }
        let today = self.today();
        let params = json!({
            "ts_code": ts_code(code),
            "start_date": ymd(today - Duration::days(15)),
            "end_date": ymd(today),
        });
        first_with_rows(&DAILY_APIS, |api| self.client.call(api, params.clone(), DAILY_FIELDS))
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<NormalizedQuote, FetchError> {
        let code = require_code(req)?;
        let table = parse_response(raw)?;
        let date = table.aliases(&["trade_date"]);
        let close = table.aliases(&["close"]);
        let pre_close = table.aliases(&["pre_close"]);
        let pct = table.aliases(&["pct_chg"]);

        let latest = table
            .rows()
            .filter_map(|r| Some((r.select(&date).and_then(cell_date)?, r)))
            .max_by_key(|(d, _)| *d)
            .ok_or_else(|| FetchError::Unsupported(format!("no daily bars for {code}")))?;
        let (trade_date, row) = latest;
        let price = row
            .select(&close)
            .and_then(parse_number)
            .ok_or_else(|| FetchError::Schema("daily bar has no close".into()))?;
        let change_pct = row.select(&pct).and_then(parse_percent).or_else(|| {
            row.select(&pre_close)
                .and_then(parse_number)
                .and_then(|p| pct_change(price, p))
        });

        Ok(NormalizedQuote {
            code: code.to_string(),
            price,
            change_pct,
            as_of: market_instant(trade_date.and_time(NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default())),
            source: NAME.to_string(),
            origin: QuoteOrigin::Exchange,
            name: None,
            settled_nav: None,
            nav_date: None,
        })
    }
}

impl Adapter<Vec<NavPoint>> for TushareAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let code = require_code(req)?;
        let lookback = req.u64_param("lookback_days").unwrap_or(180).min(36_500) as i64;
        let today = self.today();
        self.client.call(
            "fund_nav",
            json!({
                "ts_code": ts_code(code),
                "start_date": ymd(today - Duration::days(lookback * 2)),
                "end_date": ymd(today),
            }),
            "ts_code,ann_date,nav_date,unit_nav,accum_nav",
        )
    }

    fn normalize(&self, raw: &str, _req: &FetchRequest) -> Result<Vec<NavPoint>, FetchError> {
        let table = parse_response(raw)?;
        let date = table.aliases(&["nav_date", "end_date"]);
        let nav = table.aliases(&["unit_nav", "adj_nav"]);
        let mut points: Vec<NavPoint> = table
            .rows()
            .filter_map(|r| {
                Some(NavPoint {
                    date: r.select(&date).and_then(cell_date)?,
                    close: r.select(&nav).and_then(parse_number)?,
                })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Ok(points)
    }
}

impl Adapter<Vec<SectorFlowRecord>> for TushareAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `trade_cal` then one `moneyflow_ind_dc` call per day, bundled as
    /// `{"dates": [..], "days": [<response>, ..]}`.
    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let kind: SectorKind = req
            .str_param("kind")
            .unwrap_or("industry")
            .parse()
            .map_err(FetchError::Unsupported)?;
        let period: FlowPeriod = req
            .str_param("period")
            .unwrap_or("today")
            .parse()
            .map_err(FetchError::Unsupported)?;

        let dates = self.open_days(period.trading_days())?;
        if dates.is_empty() {
            return Err(FetchError::Validation("trade_cal returned no open days".into()));
        }
        let mut days = Vec::with_capacity(dates.len());
        for date in &dates {
            let raw = self.client.call(
                "moneyflow_ind_dc",
                json!({"trade_date": date, "content_type": content_type(kind)}),
                "trade_date,content_type,ts_code,name,pct_change,close,net_amount,net_amount_rate,rank",
            )?;
            days.push(serde_json::from_str::<Value>(&raw)?);
        }
        Ok(json!({"dates": dates, "days": days}).to_string())
    }

    fn normalize(&self, raw: &str, _req: &FetchRequest) -> Result<Vec<SectorFlowRecord>, FetchError> {
        let bundle: Value = serde_json::from_str(raw)?;
        let days = bundle
            .get("days")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Schema("tushare flow bundle has no days".into()))?;
        aggregate_flow_days(days)
    }
}

/// Sum net flow per sector across days; the change is the latest day's,
/// the net ratio is averaged over the window.
fn aggregate_flow_days(days: &[Value]) -> Result<Vec<SectorFlowRecord>, FetchError> {
    #[derive(Default)]
    struct Acc {
        name: String,
        net: f64,
        rate_sum: f64,
        rate_seen: bool,
        change: Option<f64>,
    }

    let mut order: Vec<String> = Vec::new();
    let mut acc: HashMap<String, Acc> = HashMap::new();
    for day in days {
        let table = response_table(day)?;
        let code = table.aliases(&["ts_code"]);
        let name = table.aliases(&["name"]);
        let net = table.aliases(&["net_amount"]);
        let rate = table.aliases(&["net_amount_rate"]);
        let change = table.aliases(&["pct_change"]);
        for row in table.rows() {
            let Some(key) = row.select(&code).or_else(|| row.select(&name)).and_then(cell_text) else {
                continue;
            };
            let entry = acc.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                Acc::default()
            });
            if let Some(n) = row.select(&name).and_then(cell_text) {
                entry.name = n;
            }
            entry.net += row
                .select(&net)
                .and_then(|v| parse_amount(v, AmountUnit::Yuan))
                .unwrap_or(0.0);
            if let Some(r) = row.select(&rate).and_then(parse_percent) {
                entry.rate_sum += r;
                entry.rate_seen = true;
            }
            if let Some(c) = row.select(&change).and_then(parse_percent) {
                entry.change = Some(c);
            }
        }
    }

    let window = days.len().max(1) as f64;
    let records = order
        .into_iter()
        .filter_map(|code| {
            let a = acc.remove(&code)?;
            let name = if a.name.is_empty() { code.clone() } else { a.name };
            Some(SectorFlowRecord {
                rank: 0,
                name,
                code: Some(code),
                change_pct: a.change,
                main_net: a.net,
                main_inflow: None,
                main_outflow: None,
                main_net_pct: a.rate_seen.then(|| a.rate_sum / window),
            })
        })
        .collect();
    Ok(rank_by_net_flow(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::DataType;
    use chrono::{TimeZone, Utc};

    fn day(date: &str, rows: Value) -> Value {
        json!({
            "request_id": "x",
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["trade_date", "content_type", "ts_code", "name", "pct_change", "close", "net_amount", "net_amount_rate", "rank"],
                "items": rows.as_array().unwrap().iter().map(|r| {
                    let mut r = r.as_array().unwrap().clone();
                    r.insert(0, json!(date));
                    Value::Array(r)
                }).collect::<Vec<_>>(),
                "has_more": false
            }
        })
    }

    #[test]
    fn vendor_error_codes() {
        let limited = json!({"code": 40203, "msg": "抱歉，您每分钟最多访问该接口200次"});
        assert!(matches!(response_table(&limited), Err(FetchError::RateLimited { .. })));
        let token = json!({"code": 40101, "msg": "token不对"});
        assert!(matches!(response_table(&token), Err(FetchError::Configuration(_))));
        assert!(matches!(response_table(&json!({"msg": "?"})), Err(FetchError::Schema(_))));
    }

    #[test]
    fn ts_codes() {
        assert_eq!(ts_code("510300"), "510300.SH");
        assert_eq!(ts_code("159915"), "159915.SZ");
        assert_eq!(ts_code("110011"), "110011.OF");
    }

    #[test]
    fn empty_token_is_configuration_error() {
        let http = Arc::new(HttpClient::new(crate::http::HttpConfig::default()).unwrap());
        assert!(matches!(
            TushareClient::new(http, "  "),
            Err(FetchError::Configuration(_))
        ));
    }

    #[test]
    fn flow_is_summed_across_days_and_ranked() {
        let d1 = day(
            "20251117",
            json!([
                ["行业", "BK1036.DC", "半导体", 1.5, 1000.0, 2.0e9, 4.0, 1],
                ["行业", "BK0475.DC", "银行", -0.2, 900.0, -5.0e8, -1.0, 2]
            ]),
        );
        let d2 = day(
            "20251118",
            json!([
                ["行业", "BK1036.DC", "半导体", -0.8, 990.0, -1.5e9, -2.0, 5],
                ["行业", "BK0475.DC", "银行", 0.6, 905.0, 1.2e9, 3.0, 1]
            ]),
        );
        let recs = aggregate_flow_days(&[d1, d2]).unwrap();
        assert_eq!(recs[0].name, "银行");
        assert_eq!(recs[0].main_net, 7.0e8);
        assert_eq!(recs[0].change_pct, Some(0.6));
        assert_eq!(recs[0].main_net_pct, Some(1.0));
        assert_eq!(recs[1].main_net, 5.0e8);
        assert_eq!(recs[1].code.as_deref(), Some("BK1036.DC"));
        assert_eq!(recs[1].rank, 2);
    }

    fn adapter() -> TushareAdapter {
        let http = Arc::new(HttpClient::new(crate::http::HttpConfig::default()).unwrap());
        let client = Arc::new(TushareClient::new(http, "t0ken").unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 18, 8, 0, 0).unwrap()));
        TushareAdapter::new(client, RetryPolicy::none(), clock)
    }

    fn table(fields: &[&str], items: Value) -> String {
        json!({"code": 0, "msg": "", "data": {"fields": fields, "items": items}}).to_string()
    }

    fn quote_req(code: &str) -> FetchRequest {
        FetchRequest::new(DataType::FundRealtime).param("code", code)
    }

    #[test]
    fn request_body_carries_token_and_params() {
        let adapter = adapter();
        let body = adapter.client.body("fund_nav", json!({"ts_code": "110011.OF"}), "nav_date");
        assert_eq!(body["api_name"], "fund_nav");
        assert_eq!(body["token"], "t0ken");
        assert_eq!(body["params"]["ts_code"], "110011.OF");
        assert_eq!(body["fields"], "nav_date");
    }

    #[test]
    fn fund_daily_quote_takes_latest_bar() {
        let raw = table(
            &["ts_code", "trade_date", "close", "pre_close", "pct_chg"],
            json!([
                ["510300.SH", "20251117", 3.890, 3.900, null],
                ["510300.SH", "20251118", 3.912, 3.890, 0.5656],
                ["510300.SH", "20251114", 3.900, 3.880, 0.52]
            ]),
        );
        let q: NormalizedQuote = adapter().normalize(&raw, &quote_req("510300")).unwrap();
        assert_eq!(q.code, "510300");
        assert_eq!(q.price, 3.912);
        assert_eq!(q.change_pct, Some(0.5656));
        assert_eq!(q.origin, QuoteOrigin::Exchange);
        assert_eq!(q.source, NAME);
        // 15:00 Beijing close
        assert_eq!(q.as_of, Utc.with_ymd_and_hms(2025, 11, 18, 7, 0, 0).unwrap());
    }

    #[test]
    fn fund_daily_without_pct_uses_previous_close() {
        let raw = table(
            &["ts_code", "trade_date", "close", "pre_close", "pct_chg"],
            json!([["159915.SZ", "20251118", 2.2, 2.0, null]]),
        );
        let q: NormalizedQuote = adapter().normalize(&raw, &quote_req("159915")).unwrap();
        assert!((q.change_pct.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_daily_bars_are_unsupported() {
        let raw = table(&["ts_code", "trade_date", "close"], json!([]));
        let out: Result<NormalizedQuote, _> = adapter().normalize(&raw, &quote_req("510300"));
        assert!(matches!(out, Err(FetchError::Unsupported(_))));
    }

    #[test]
    fn empty_fund_daily_falls_back_to_stock_daily() {
        let empty = table(&["ts_code", "trade_date", "close"], json!([]));
        let bars = table(
            &["ts_code", "trade_date", "close", "pre_close", "pct_chg"],
            json!([["600519.SH", "20251118", 1500.0, 1480.0, 1.35]]),
        );
        let mut called = Vec::new();
        let raw = first_with_rows(&DAILY_APIS, |api| {
            called.push(api.to_string());
            Ok(if api == "fund_daily" { empty.clone() } else { bars.clone() })
        })
        .unwrap();
        assert_eq!(called, ["fund_daily", "daily"]);
        assert_eq!(raw, bars);

        let mut called = 0;
        let none = first_with_rows(&DAILY_APIS, |_| {
            called += 1;
            Ok(empty.clone())
        });
        assert_eq!(called, 2);
        assert!(matches!(none, Err(FetchError::Unsupported(_))));
    }

    #[test]
    fn fund_daily_rows_skip_the_stock_table() {
        let bars = table(
            &["ts_code", "trade_date", "close"],
            json!([["510300.SH", "20251118", 3.912]]),
        );
        let mut called = Vec::new();
        first_with_rows(&DAILY_APIS, |api| {
            called.push(api.to_string());
            Ok(bars.clone())
        })
        .unwrap();
        assert_eq!(called, ["fund_daily"]);
    }

    #[test]
    fn fund_nav_history_is_ascending_unique_unit_nav() {
        let raw = table(
            &["ts_code", "ann_date", "nav_date", "unit_nav", "accum_nav"],
            json!([
                ["110011.OF", "20251119", "20251118", 5.125, 6.2],
                ["110011.OF", "20251115", "20251114", 5.001, 6.0],
                ["110011.OF", "20251118", "20251117", 5.080, 6.1],
                ["110011.OF", "20251119", "20251118", 5.125, 6.2],
                ["110011.OF", "20251118", null, 5.0, 6.0]
            ]),
        );
        let req = FetchRequest::new(DataType::FundHistory).param("code", "110011");
        let points: Vec<NavPoint> = adapter().normalize(&raw, &req).unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2025, 11, day).unwrap();
        assert_eq!(
            points,
            [
                NavPoint { date: d(14), close: 5.001 },
                NavPoint { date: d(17), close: 5.080 },
                NavPoint { date: d(18), close: 5.125 },
            ]
        );
    }
}
