//! Tencent exchange quotes (`qt.gtimg.cn`).
//!
//! Covers exchange-listed funds (ETF/LOF) and stocks only. Response is one
//! line per symbol: `v_sh510300="1~沪深300ETF~510300~3.912~3.890~...";` with
//! `~`-separated fields: 1 name, 2 code, 3 last price, 4 previous close,
//! 30 timestamp (`yyyyMMddHHmmss`). Bodies are GBK.

use super::{exchange_of, market_instant, pct_change, require_code, Exchange};
use crate::clock::Clock;
use crate::error::FetchError;
use crate::http::{HttpClient, VendorGet};
use crate::model::{FetchRequest, NormalizedQuote, QuoteOrigin};
use crate::normalize::is_missing_str;
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use chrono::NaiveDateTime;
use std::sync::Arc;

pub const NAME: &str = "tencent";
const QUOTE_URL: &str = "https://qt.gtimg.cn/q=";
const REFERER: &str = "https://gu.qq.com/";

const F_NAME: usize = 1;
const F_CODE: usize = 2;
const F_PRICE: usize = 3;
const F_PREV_CLOSE: usize = 4;
const F_TIME: usize = 30;

/// `sh510300` / `sz159915`, or `None` for codes that do not trade on an exchange.
pub fn tencent_symbol(code: &str) -> Option<String> {
    exchange_of(code).map(|ex| match ex {
        Exchange::Shanghai => format!("sh{code}"),
        Exchange::Shenzhen => format!("sz{code}"),
    })
}

pub struct TencentAdapter {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TencentAdapter {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { http, retry, clock }
    }

    fn quote_get(&self, req: &FetchRequest) -> Result<VendorGet, FetchError> {
        let code = require_code(req)?;
        let symbol = tencent_symbol(code)
            .ok_or_else(|| FetchError::Unsupported(format!("{code} is not exchange-listed")))?;
        Ok(VendorGet::new(NAME, format!("{QUOTE_URL}{symbol}"), REFERER).gbk())
    }
}

fn field<'a>(parts: &[&'a str], i: usize) -> Option<&'a str> {
    parts.get(i).map(|s| s.trim()).filter(|s| !is_missing_str(s))
}

impl Adapter<NormalizedQuote> for TencentAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        self.http.get(&self.quote_get(req)?)
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<NormalizedQuote, FetchError> {
        let code = require_code(req)?;
        if raw.contains("pv_none_match") {
            return Err(FetchError::Unsupported(format!("tencent has no quote for {code}")));
        }
        let inner = raw
            .split('"')
            .nth(1)
            .filter(|s| s.contains('~'))
            .ok_or_else(|| FetchError::Schema("tencent payload has no quoted field list".into()))?;
        let parts: Vec<&str> = inner.split('~').collect();

        let price: f64 = field(&parts, F_PRICE)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FetchError::Schema(format!("tencent price field unparsable: {inner:.60}")))?;
        let prev_close: Option<f64> = field(&parts, F_PREV_CLOSE).and_then(|s| s.parse().ok());
        let as_of = field(&parts, F_TIME)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S").ok())
            .map(market_instant)
            .unwrap_or_else(|| self.clock.now());

        Ok(NormalizedQuote {
            code: field(&parts, F_CODE).unwrap_or(code).to_string(),
            price,
            change_pct: prev_close.and_then(|p| pct_change(price, p)),
            as_of,
            source: NAME.to_string(),
            origin: QuoteOrigin::Exchange,
            name: field(&parts, F_NAME).map(str::to_string),
            settled_nav: None,
            nav_date: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http::{BodyEncoding, HttpConfig};
    use crate::model::DataType;
    use chrono::{TimeZone, Utc};

    fn adapter() -> TencentAdapter {
        TencentAdapter::new(
            Arc::new(HttpClient::new(HttpConfig::default()).unwrap()),
            RetryPolicy::none(),
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 11, 18, 6, 0, 0).unwrap())),
        )
    }

    fn req(code: &str) -> FetchRequest {
        FetchRequest::new(DataType::FundRealtime).param("code", code)
    }

    fn payload() -> String {
        let mut fields = vec![""; 40];
        fields[0] = "1";
        fields[1] = "沪深300ETF";
        fields[2] = "510300";
        fields[3] = "3.912";
        fields[4] = "3.890";
        fields[30] = "20251118145958";
        format!("v_sh510300=\"{}\";\n", fields.join("~"))
    }

    #[test]
    fn symbols_by_exchange() {
        assert_eq!(tencent_symbol("510300").as_deref(), Some("sh510300"));
        assert_eq!(tencent_symbol("159915").as_deref(), Some("sz159915"));
        assert_eq!(tencent_symbol("110011"), None);
    }

    #[test]
    fn parses_quote_line() {
        let q = adapter().normalize(&payload(), &req("510300")).unwrap();
        assert_eq!(q.price, 3.912);
        let expected = (3.912 - 3.890) / 3.890 * 100.0;
        assert!((q.change_pct.unwrap() - expected).abs() < 1e-9);
        assert_eq!(q.name.as_deref(), Some("沪深300ETF"));
        assert_eq!(q.origin, QuoteOrigin::Exchange);
        assert_eq!(q.as_of, Utc.with_ymd_and_hms(2025, 11, 18, 6, 59, 58).unwrap());
    }

    #[test]
    fn request_sends_referer_and_decodes_gbk() {
        let get = adapter().quote_get(&req("159915")).unwrap();
        assert_eq!(get.url, "https://qt.gtimg.cn/q=sz159915");
        assert_eq!(get.referer, "https://gu.qq.com/");
        assert_eq!(get.encoding, BodyEncoding::Gbk);
    }

    #[test]
    fn off_exchange_codes_are_unsupported() {
        let err = adapter().request(&req("110011")).unwrap_err();
        assert!(matches!(err, FetchError::Unsupported(_)));
        let err = adapter()
            .normalize("v_pv_none_match=\"1\";", &req("510300"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Unsupported(_)));
    }

    #[test]
    fn zero_previous_close_leaves_change_unknown() {
        let raw = payload().replace("~3.890~", "~0~");
        let q = adapter().normalize(&raw, &req("510300")).unwrap();
        assert_eq!(q.change_pct, None);
    }
}
