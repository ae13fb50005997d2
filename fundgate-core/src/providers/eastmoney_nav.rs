//! Eastmoney published NAV history (`f10/lsjz`).
//!
//! Serves both the NAV history series and, as the lowest-priority realtime
//! source, the latest settled NAV. Also used by the fundgz adapter to replace
//! an estimate with the published value once it exists.

use super::{market_midnight, pct_change, require_code};
use crate::error::FetchError;
use crate::http::{HttpClient, VendorGet};
use crate::model::{FetchRequest, NavPoint, NormalizedQuote, QuoteOrigin};
use crate::normalize::{cell_text, parse_date, parse_percent, parse_price};
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use crate::table::Table;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::sync::Arc;

pub const NAME: &str = "eastmoney_nav";
const LSJZ_URL: &str = "https://api.fund.eastmoney.com/f10/lsjz";
const REFERER: &str = "https://fundf10.eastmoney.com/";
const DEFAULT_LOOKBACK_DAYS: u64 = 180;
const MAX_LOOKBACK_DAYS: u64 = 36_500;
/// Rows requested when only the latest NAV is needed.
const LATEST_ROWS: u64 = 10;

const DATE_COLS: [&str; 3] = ["FSRQ", "净值日期", "date"];
const NAV_COLS: [&str; 3] = ["DWJZ", "单位净值", "close"];
const PCT_COLS: [&str; 2] = ["JZZZL", "日增长率"];

/// A published NAV with the one before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettledNav {
    pub date: NaiveDate,
    pub nav: f64,
    pub prev_nav: Option<f64>,
    pub change_pct: Option<f64>,
}

/// One lsjz row as parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NavRow {
    date: NaiveDate,
    nav: f64,
    pct: Option<f64>,
}

pub struct EastmoneyNavAdapter {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
}

impl EastmoneyNavAdapter {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }

    /// `pageSize` for a history request: twice the lookback, at least 20, at most 500.
    pub fn page_size(lookback_days: u64) -> u64 {
        lookback_days.saturating_mul(2).clamp(20, 500)
    }

    fn lsjz_get(code: &str, page_size: u64) -> VendorGet {
        VendorGet::new(NAME, LSJZ_URL, REFERER)
            .param("fundCode", code)
            .param("pageIndex", 1)
            .param("pageSize", page_size)
            .param("startDate", "")
            .param("endDate", "")
    }

    /// One lsjz page, newest rows first.
    fn get_lsjz(&self, code: &str, page_size: u64) -> Result<String, FetchError> {
        self.http.get(&Self::lsjz_get(code, page_size))
    }

    /// Published NAV on or before `target` (the latest row if `target` is `None`).
    pub fn settled_snapshot(
        &self,
        code: &str,
        target: Option<NaiveDate>,
    ) -> Result<SettledNav, FetchError> {
        let raw = self.retry.run(|_| self.get_lsjz(code, LATEST_ROWS))?;
        snapshot_from_rows(&parse_rows(&raw)?, target)
    }
}

/// Ascending, de-duplicated rows from an lsjz payload.
fn parse_rows(raw: &str) -> Result<Vec<NavRow>, FetchError> {
    let body: Value = serde_json::from_str(raw)?;
    if let Some(code) = body.get("ErrCode").and_then(Value::as_i64).filter(|c| *c != 0) {
        let msg = body.get("ErrMsg").and_then(cell_text).unwrap_or_default();
        return Err(FetchError::Schema(format!("lsjz ErrCode {code}: {msg}")));
    }
    let list = body
        .pointer("/Data/LSJZList")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Schema("lsjz payload has no Data.LSJZList".into()))?;

    let table = Table::from_records(list.iter().filter_map(Value::as_object));
    let date_sel = table.aliases(&DATE_COLS);
    let nav_sel = table.aliases(&NAV_COLS);
    if !table.is_empty() && (!date_sel.is_resolved() || !nav_sel.is_resolved()) {
        return Err(FetchError::Schema(format!(
            "lsjz columns changed: {:?}",
            table.columns()
        )));
    }
    let pct_sel = table.aliases(&PCT_COLS);

    let mut rows: Vec<NavRow> = table
        .rows()
        .filter_map(|row| {
            let date = row.select(&date_sel).and_then(cell_text).and_then(|s| parse_date(&s))?;
            let nav = row.select(&nav_sel).and_then(parse_price)?;
            Some(NavRow {
                date,
                nav,
                pct: row.select(&pct_sel).and_then(parse_percent),
            })
        })
        .collect();
    rows.sort_by_key(|r| r.date);
    rows.dedup_by_key(|r| r.date);
    Ok(rows)
}

fn snapshot_from_rows(rows: &[NavRow], target: Option<NaiveDate>) -> Result<SettledNav, FetchError> {
    if rows.is_empty() {
        return Err(FetchError::Validation("no published NAV rows".into()));
    }
    let idx = match target {
        None => rows.len() - 1,
        Some(t) => rows.iter().rposition(|r| r.date <= t).unwrap_or(0),
    };
    let row = rows[idx];
    let prev_nav = idx.checked_sub(1).map(|i| rows[i].nav);
    let change_pct = prev_nav
        .and_then(|p| pct_change(row.nav, p))
        .or(row.pct);
    Ok(SettledNav {
        date: row.date,
        nav: row.nav,
        prev_nav,
        change_pct,
    })
}

/// Keep rows no older than `2 × lookback_days` before the newest date.
fn trim_to_lookback(rows: Vec<NavRow>, lookback_days: u64) -> Vec<NavPoint> {
    let span = lookback_days.min(MAX_LOOKBACK_DAYS) as i64 * 2;
    let cutoff = rows.last().map(|last| last.date - Duration::days(span));
    rows.into_iter()
        .filter(|r| cutoff.map_or(true, |c| r.date >= c))
        .map(|r| NavPoint {
            date: r.date,
            close: r.nav,
        })
        .collect()
}

impl Adapter<Vec<NavPoint>> for EastmoneyNavAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let code = require_code(req)?;
        let lookback = req.u64_param("lookback_days").unwrap_or(DEFAULT_LOOKBACK_DAYS);
        self.get_lsjz(code, Self::page_size(lookback))
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<Vec<NavPoint>, FetchError> {
        let lookback = req.u64_param("lookback_days").unwrap_or(DEFAULT_LOOKBACK_DAYS);
        Ok(trim_to_lookback(parse_rows(raw)?, lookback))
    }
}

impl Adapter<NormalizedQuote> for EastmoneyNavAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        self.get_lsjz(require_code(req)?, LATEST_ROWS)
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<NormalizedQuote, FetchError> {
        let code = require_code(req)?;
        let snap = snapshot_from_rows(&parse_rows(raw)?, None)?;
        Ok(NormalizedQuote {
            code: code.to_string(),
            price: snap.nav,
            change_pct: snap.change_pct,
            as_of: market_midnight(snap.date),
            source: NAME.to_string(),
            origin: QuoteOrigin::Settled,
            name: None,
            settled_nav: Some(snap.nav),
            nav_date: Some(snap.date),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;
    use crate::model::DataType;

    const PAYLOAD: &str = r#"{"Data":{"LSJZList":[
        {"FSRQ":"2025-11-18","DWJZ":"1.5300","LJJZ":"2.1","JZZZL":"2.00","SGZT":"开放申购"},
        {"FSRQ":"2025-11-17","DWJZ":"1.5000","LJJZ":"2.0","JZZZL":"-0.50","SGZT":"开放申购"},
        {"FSRQ":"2025-11-14","DWJZ":"1.5075","LJJZ":"2.0","JZZZL":"","SGZT":"开放申购"},
        {"FSRQ":"2025-06-02","DWJZ":"1.2000","LJJZ":"1.8","JZZZL":"--","SGZT":"开放申购"}
    ],"FundType":"002"},"ErrCode":0,"ErrMsg":null,"TotalCount":4,"PageSize":20,"PageIndex":1}"#;

    fn adapter() -> EastmoneyNavAdapter {
        EastmoneyNavAdapter::new(
            Arc::new(HttpClient::new(HttpConfig::default()).unwrap()),
            RetryPolicy::none(),
        )
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    #[test]
    fn history_is_ascending_and_trimmed() {
        let req = FetchRequest::new(DataType::FundHistory)
            .param("code", "008888")
            .param("lookback_days", 30);
        let points: Vec<NavPoint> = adapter().normalize(PAYLOAD, &req).unwrap();
        let dates: Vec<_> = points.iter().map(|p| p.date).collect();
        // 2025-06-02 is older than 60 days before 2025-11-18
        assert_eq!(dates, [d(11, 14), d(11, 17), d(11, 18)]);
        assert_eq!(points[2].close, 1.53);
    }

    #[test]
    fn latest_quote_recomputes_change_against_previous_row() {
        let req = FetchRequest::new(DataType::FundRealtime).param("code", "008888");
        let q: NormalizedQuote = adapter().normalize(PAYLOAD, &req).unwrap();
        assert_eq!(q.price, 1.53);
        assert!((q.change_pct.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(q.origin, QuoteOrigin::Settled);
        assert_eq!(q.nav_date, Some(d(11, 18)));
    }

    #[test]
    fn snapshot_picks_latest_on_or_before_target() {
        let rows = parse_rows(PAYLOAD).unwrap();
        let snap = snapshot_from_rows(&rows, Some(d(11, 16))).unwrap();
        assert_eq!(snap.date, d(11, 14));
        assert_eq!(snap.prev_nav, Some(1.2));

        let first = snapshot_from_rows(&rows, Some(d(1, 1))).unwrap();
        assert_eq!(first.date, d(6, 2));
        assert_eq!(first.change_pct, None);
    }

    #[test]
    fn lsjz_request_sends_referer() {
        let get = EastmoneyNavAdapter::lsjz_get("008888", 360);
        assert_eq!(get.referer, "https://fundf10.eastmoney.com/");
        assert_eq!(get.query_value("fundCode"), Some("008888"));
        assert_eq!(get.query_value("pageSize"), Some("360"));
    }

    #[test]
    fn page_size_bounds() {
        assert_eq!(EastmoneyNavAdapter::page_size(5), 20);
        assert_eq!(EastmoneyNavAdapter::page_size(180), 360);
        assert_eq!(EastmoneyNavAdapter::page_size(1000), 500);
    }

    #[test]
    fn vendor_error_code_is_schema_error() {
        let err = parse_rows(r#"{"Data":null,"ErrCode":-999,"ErrMsg":"系统繁忙"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Schema(_)));
    }

    #[test]
    fn empty_list_is_unusable_for_quotes() {
        let req = FetchRequest::new(DataType::FundRealtime).param("code", "008888");
        let raw = r#"{"Data":{"LSJZList":[]},"ErrCode":0}"#;
        let out: Result<NormalizedQuote, _> = adapter().normalize(raw, &req);
        assert!(matches!(out, Err(FetchError::Validation(_))));
    }
}
