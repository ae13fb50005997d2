//! Eastmoney sector fund-flow ranking (`push2.eastmoney.com/api/qt/clist/get`).
//!
//! Rows come back keyed by numeric field codes (`f12` code, `f14` name, ...).
//! They are relabelled with the Chinese headers the flow-table parser already
//! understands, so both this source and tabular ones share one parser. With
//! `fltt=2` the amounts are already plain yuan.

use super::flow_records_from_table;
use crate::error::FetchError;
use crate::http::{HttpClient, VendorGet};
use crate::model::{FetchRequest, FlowPeriod, SectorFlowRecord, SectorKind};
use crate::normalize::AmountUnit;
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use crate::table::Table;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const NAME: &str = "eastmoney_push2";
const CLIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";
const REFERER: &str = "https://data.eastmoney.com/";
const PAGE_SIZE: u32 = 500;

/// Field codes for one period, in the order change, net, net ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PeriodFields {
    change: &'static str,
    net: &'static str,
    net_pct: &'static str,
    label: &'static str,
}

fn period_fields(period: FlowPeriod) -> PeriodFields {
    match period {
        FlowPeriod::Today => PeriodFields {
            change: "f3",
            net: "f62",
            net_pct: "f184",
            label: "今日",
        },
        FlowPeriod::FiveDay => PeriodFields {
            change: "f109",
            net: "f164",
            net_pct: "f165",
            label: "5日",
        },
        FlowPeriod::TenDay => PeriodFields {
            change: "f160",
            net: "f174",
            net_pct: "f175",
            label: "10日",
        },
    }
}

/// `fs` board filter for a sector kind.
pub fn board_filter(kind: SectorKind) -> &'static str {
    match kind {
        SectorKind::Industry => "m:90+t:2",
        SectorKind::Concept => "m:90+t:3",
        SectorKind::Region => "m:90+t:1",
    }
}

fn kind_and_period(req: &FetchRequest) -> Result<(SectorKind, FlowPeriod), FetchError> {
    let kind = req
        .str_param("kind")
        .unwrap_or("industry")
        .parse()
        .map_err(FetchError::Unsupported)?;
    let period = req
        .str_param("period")
        .unwrap_or("today")
        .parse()
        .map_err(FetchError::Unsupported)?;
    Ok((kind, period))
}

fn clist_get(kind: SectorKind, period: FlowPeriod) -> VendorGet {
    let f = period_fields(period);
    VendorGet::new(NAME, CLIST_URL, REFERER)
        .param("pn", 1)
        .param("pz", PAGE_SIZE)
        .param("po", 1)
        .param("np", 1)
        .param("fltt", 2)
        .param("invt", 2)
        .param("fid", f.net)
        .param("fs", board_filter(kind))
        .param("fields", ["f12", "f14", f.change, f.net, f.net_pct].join(","))
}

/// `data.diff` is a list, or a map keyed `"0"`, `"1"`, ... on some mirrors.
fn diff_rows(body: &Value) -> Result<Vec<&Map<String, Value>>, FetchError> {
    let data = body
        .get("data")
        .ok_or_else(|| FetchError::Schema("push2 response has no data".into()))?;
    if data.is_null() {
        return Err(FetchError::Validation("push2 returned no rows".into()));
    }
    let rows: Vec<&Map<String, Value>> = match data.get("diff") {
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_object).collect(),
        Some(Value::Object(map)) => {
            let mut keyed: Vec<(usize, &Map<String, Value>)> = map
                .iter()
                .filter_map(|(k, v)| Some((k.parse().unwrap_or(usize::MAX), v.as_object()?)))
                .collect();
            keyed.sort_by_key(|(i, _)| *i);
            keyed.into_iter().map(|(_, row)| row).collect()
        }
        _ => return Err(FetchError::Schema("push2 data has no diff".into())),
    };
    Ok(rows)
}

/// Relabel `fNN` keys with flow-table headers for `period`.
fn relabel(rows: &[&Map<String, Value>], period: FlowPeriod) -> Table {
    let f = period_fields(period);
    let columns = vec![
        "代码".to_string(),
        "名称".to_string(),
        format!("{}涨跌幅", f.label),
        format!("{}主力净流入-净额", f.label),
        format!("{}主力净流入-净占比", f.label),
    ];
    let keys = ["f12", "f14", f.change, f.net, f.net_pct];
    let body = rows
        .iter()
        .map(|row| {
            keys.iter()
                .map(|k| row.get(*k).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Table::new(columns, body)
}

pub struct Push2Adapter {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
}

impl Push2Adapter {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }
}

impl Adapter<Vec<SectorFlowRecord>> for Push2Adapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let (kind, period) = kind_and_period(req)?;
        self.http.get(&clist_get(kind, period))
    }

    fn normalize(&self, raw: &str, req: &FetchRequest) -> Result<Vec<SectorFlowRecord>, FetchError> {
        let (_, period) = kind_and_period(req)?;
        let body: Value = serde_json::from_str(raw)?;
        let rows = diff_rows(&body)?;
        flow_records_from_table(&relabel(&rows, period), AmountUnit::Yuan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;
    use crate::model::DataType;

    fn adapter() -> Push2Adapter {
        Push2Adapter::new(
            Arc::new(HttpClient::new(HttpConfig::default()).unwrap()),
            RetryPolicy::none(),
        )
    }

    fn req(period: &str) -> FetchRequest {
        FetchRequest::new(DataType::SectorFlow)
            .param("kind", "industry")
            .param("period", period)
    }

    #[test]
    fn today_list_payload() {
        let raw = r#"{"rc":0,"data":{"total":3,"diff":[
            {"f12":"BK1036","f14":"半导体","f3":2.15,"f62":3215000000.0,"f184":6.1},
            {"f12":"BK0475","f14":"银行","f3":-0.32,"f62":-812000000.0,"f184":-2.4},
            {"f12":"BK0737","f14":"软件开发","f3":"-","f62":1250000000.0,"f184":"-"}
        ]}}"#;
        let recs = adapter().normalize(raw, &req("today")).unwrap();
        let names: Vec<_> = recs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["半导体", "软件开发", "银行"]);
        assert_eq!(recs[0].main_net, 3.215e9);
        assert_eq!(recs[0].change_pct, Some(2.15));
        assert_eq!(recs[0].main_net_pct, Some(6.1));
        assert_eq!(recs[0].code.as_deref(), Some("BK1036"));
        assert_eq!(recs[1].change_pct, None);
        assert_eq!(recs[2].rank, 3);
    }

    #[test]
    fn five_day_map_payload_uses_period_fields() {
        let raw = r#"{"rc":0,"data":{"total":2,"diff":{
            "1":{"f12":"BK0475","f14":"银行","f109":1.0,"f164":500000000.0,"f165":1.2,"f62":9e12},
            "0":{"f12":"BK1036","f14":"半导体","f109":-3.4,"f164":-2000000000.0,"f165":-4.0}
        }}}"#;
        let recs = adapter().normalize(raw, &req("5d")).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].name, "银行");
        assert_eq!(recs[0].main_net, 5e8);
        assert_eq!(recs[1].change_pct, Some(-3.4));
    }

    #[test]
    fn null_data_is_unusable() {
        let err = adapter()
            .normalize(r#"{"rc":0,"data":null}"#, &req("today"))
            .unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
    }

    #[test]
    fn unknown_period_is_unsupported() {
        let err = adapter().request(&req("30d")).unwrap_err();
        assert!(matches!(err, FetchError::Unsupported(_)));
    }

    #[test]
    fn clist_request_sends_referer() {
        let get = clist_get(SectorKind::Concept, FlowPeriod::TenDay);
        assert_eq!(get.referer, "https://data.eastmoney.com/");
        assert_eq!(get.query_value("fs"), Some("m:90+t:3"));
        assert_eq!(get.query_value("fid"), Some("f174"));
    }

    #[test]
    fn board_filters() {
        assert_eq!(board_filter(SectorKind::Industry), "m:90+t:2");
        assert_eq!(board_filter(SectorKind::Concept), "m:90+t:3");
        assert_eq!(board_filter(SectorKind::Region), "m:90+t:1");
    }
}
