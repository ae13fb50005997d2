//! Tonghuashun (同花顺) sector fund flow (`data.10jqka.com.cn/funds`).
//!
//! Industry (`hyzjl`) and concept (`gnzjl`) boards only; there is no public
//! region board. Pages are GBK HTML tables of 50 rows with amounts in 亿:
//!
//! | today                                      | 5d / 10d                              |
//! |--------------------------------------------|---------------------------------------|
//! | 序号 行业 行业指数 涨跌幅 流入资金 流出资金 净额 公司家数 领涨股 涨跌幅 当前价 | 序号 行业 公司家数 行业指数 阶段涨跌幅 流入资金 流出资金 净额 |
//!
//! Headers are relabelled onto the shared flow-table names, so parsing goes
//! through the same column matcher as the eastmoney ranking.

use super::flow_records_from_table;
use crate::error::FetchError;
use crate::http::{HttpClient, VendorGet};
use crate::model::{FetchRequest, FlowPeriod, SectorFlowRecord, SectorKind};
use crate::normalize::AmountUnit;
use crate::provider::Adapter;
use crate::retry::RetryPolicy;
use crate::table::Table;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "ths";
const BASE_URL: &str = "http://data.10jqka.com.cn/funds";
const INDUSTRY_REFERER: &str = "http://data.10jqka.com.cn/funds/hyzjl/";
const CONCEPT_REFERER: &str = "http://data.10jqka.com.cn/funds/gnzjl/";
/// Concept boards run to about eight pages; industry to two.
const MAX_PAGES: u32 = 10;

/// Board path segment and referer for a sector kind.
fn board(kind: SectorKind) -> Result<(&'static str, &'static str), FetchError> {
    match kind {
        SectorKind::Industry => Ok(("hyzjl", INDUSTRY_REFERER)),
        SectorKind::Concept => Ok(("gnzjl", CONCEPT_REFERER)),
        SectorKind::Region => Err(FetchError::Unsupported(
            "ths publishes no region fund flow".into(),
        )),
    }
}

fn page_get(kind: SectorKind, period: FlowPeriod, page: u32) -> Result<VendorGet, FetchError> {
    let (path, referer) = board(kind)?;
    let window = match period {
        FlowPeriod::Today => String::new(),
        FlowPeriod::FiveDay | FlowPeriod::TenDay => format!("board/{}/", period.trading_days()),
    };
    let url = format!("{BASE_URL}/{path}/{window}field/tradezdf/order/desc/page/{page}/ajax/1/free/1/");
    Ok(VendorGet::new(NAME, url, referer).gbk())
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

/// One `<td>`/`<th>` with tags stripped, plus the first link inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cell {
    text: String,
    href: Option<String>,
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn cell(raw: &str) -> Cell {
    // raw starts just after `<td` / `<th`
    let open_end = raw.find('>').map_or(raw.len(), |i| i + 1);
    let body = &raw[open_end..];
    let body = body.find("</t").map_or(body, |i| &body[..i]);
    let href = body.find("href=\"").and_then(|i| {
        let rest = &body[i + 6..];
        rest.find('"').map(|j| rest[..j].to_string())
    });
    Cell {
        text: strip_tags(body),
        href,
    }
}

/// Rows of `<tr>` cells in document order. Header rows come first.
fn html_rows(html: &str) -> Vec<Vec<Cell>> {
    html.split("<tr")
        .skip(1)
        .map(|chunk| chunk.find("</tr>").map_or(chunk, |i| &chunk[..i]))
        .map(|tr| {
            tr.split("<t")
                .skip(1)
                .filter(|seg| {
                    let mut chars = seg.chars();
                    matches!(chars.next(), Some('d' | 'h'))
                        && matches!(chars.next(), Some('>' | ' '))
                })
                .map(|seg| cell(&seg[1..]))
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// Total pages from `<span class="page_info">1/3</span>`; 1 when absent.
fn page_count(html: &str) -> u32 {
    html.find("page_info")
        .map(|i| &html[i..])
        .and_then(|s| s.find('>').map(|j| &s[j + 1..]))
        .and_then(|s| s.split('<').next())
        .and_then(|s| s.split('/').nth(1))
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1)
}

/// Sector code from `.../code/881121/`.
fn code_from_href(href: &str) -> Option<String> {
    let rest = &href[href.find("/code/")? + 6..];
    let code = rest.split('/').next()?;
    (!code.is_empty()).then(|| code.to_string())
}

/// Flow-table header for a THS header. The second `涨跌幅` is the leading
/// stock's, not the board's.
fn relabel(header: &str, seen_change: bool) -> String {
    let h = header.split('(').next().unwrap_or(header).trim();
    match h {
        "行业" | "概念" | "板块" => "名称".to_string(),
        "涨跌幅" | "阶段涨跌幅" if !seen_change => "涨跌幅".to_string(),
        "涨跌幅" => "领涨股涨幅".to_string(),
        "流入资金" => "主力流入".to_string(),
        "流出资金" => "主力流出".to_string(),
        "净额" => "主力净流入-净额".to_string(),
        other => other.to_string(),
    }
}

/// Merge pages into one flow table, with a `代码` column from the name links.
fn pages_table(pages: &[String]) -> Result<Table, FetchError> {
    let mut header: Option<Vec<String>> = None;
    let mut name_idx = None;
    let mut rows = Vec::new();
    for page in pages {
        let mut page_rows = html_rows(page).into_iter();
        let Some(head) = page_rows.next() else {
            continue;
        };
        if header.is_none() {
            let mut seen_change = false;
            let mut cols: Vec<String> = head
                .iter()
                .map(|c| {
                    let col = relabel(&c.text, seen_change);
                    seen_change |= col == "涨跌幅";
                    col
                })
                .collect();
            name_idx = cols.iter().position(|c| c == "名称");
            cols.push("代码".to_string());
            header = Some(cols);
        }
        for cells in page_rows {
            let code = name_idx
                .and_then(|i| cells.get(i))
                .and_then(|c| c.href.as_deref())
                .and_then(code_from_href)
                .map_or(Value::Null, Value::String);
            let mut row: Vec<Value> = cells.into_iter().map(|c| Value::String(c.text)).collect();
            if let Some(width) = header.as_ref().map(|h| h.len() - 1) {
                row.resize(width, Value::Null);
            }
            row.push(code);
            rows.push(row);
        }
    }
    let columns = header.ok_or_else(|| FetchError::Schema("ths page has no table".into()))?;
    Ok(Table::new(columns, rows))
}

pub struct ThsFlowAdapter {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
}

impl ThsFlowAdapter {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy) -> Self {
        Self { http, retry }
    }
}

impl Adapter<Vec<SectorFlowRecord>> for ThsFlowAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Every page of the board, bundled as `{"pages": [<html>, ..]}`.
    fn request(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let (kind, period) = kind_and_period(req)?;
        let first = self.http.get(&page_get(kind, period, 1)?)?;
        let total = page_count(&first).clamp(1, MAX_PAGES);
        debug!(kind = kind.as_str(), pages = total, "ths board");
        let mut pages = vec![first];
        for page in 2..=total {
            pages.push(self.http.get(&page_get(kind, period, page)?)?);
        }
        Ok(json!({ "pages": pages }).to_string())
    }

    fn normalize(&self, raw: &str, _req: &FetchRequest) -> Result<Vec<SectorFlowRecord>, FetchError> {
        let bundle: Value = serde_json::from_str(raw)?;
        let pages: Vec<String> = bundle
            .get("pages")
            .and_then(Value::as_array)
            .ok_or_else(|| FetchError::Schema("ths bundle has no pages".into()))?
            .iter()
            .filter_map(|p| p.as_str().map(str::to_string))
            .collect();
        flow_records_from_table(&pages_table(&pages)?, AmountUnit::HundredMillion)
    }
}
