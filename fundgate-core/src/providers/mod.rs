//! Vendor adapters.
//!
//! | data type       | source              | default priority |
//! |-----------------|---------------------|------------------|
//! | `fund_realtime` | `eastmoney_fundgz`  | 100 |
//! | `fund_realtime` | `tencent`           | 90  |
//! | `fund_realtime` | `tushare`           | 80  |
//! | `fund_realtime` | `eastmoney_nav`     | 70  |
//! | `fund_history`  | `eastmoney_nav`     | 100 |
//! | `fund_history`  | `tushare`           | 80  |
//! | `sector_flow`   | `eastmoney_push2`   | 100 |
//! | `sector_flow`   | `tushare`           | 90  |
//! | `sector_flow`   | `ths`               | 80  |

pub mod eastmoney_nav;
pub mod fundgz;
pub mod push2;
pub mod tencent;
pub mod ths;
pub mod tushare;

pub use eastmoney_nav::{EastmoneyNavAdapter, SettledNav};
pub use fundgz::FundgzAdapter;
pub use push2::Push2Adapter;
pub use tencent::TencentAdapter;
pub use ths::ThsFlowAdapter;
pub use tushare::{TushareAdapter, TushareClient};

use crate::calendar::market_offset;
use crate::error::FetchError;
use crate::model::{FetchRequest, SectorFlowRecord};
use crate::normalize::{cell_text, parse_amount, parse_percent, AmountUnit};
use crate::table::{ColumnSpec, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// A six-digit fund or security code.
pub fn require_code(req: &FetchRequest) -> Result<&str, FetchError> {
    let code = req
        .str_param("code")
        .ok_or_else(|| FetchError::Unsupported("request has no fund code".into()))?;
    if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(FetchError::Unsupported(format!("'{code}' is not a six-digit code")))
    }
}

/// Listing exchange for exchange-traded codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
}

/// Exchange a six-digit code trades on, by number range. Off-exchange funds give `None`.
pub fn exchange_of(code: &str) -> Option<Exchange> {
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // ETFs/LOFs first, then stocks
    if code.starts_with('5') || code.starts_with("60") || code.starts_with("68") {
        Some(Exchange::Shanghai)
    } else if ["15", "16", "18", "00", "30", "20"]
        .iter()
        .any(|p| code.starts_with(p))
    {
        Some(Exchange::Shenzhen)
    } else {
        None
    }
}

/// Percent change from `prev` to `cur`; `None` when `prev` is zero.
pub fn pct_change(cur: f64, prev: f64) -> Option<f64> {
    (prev != 0.0).then(|| (cur - prev) / prev * 100.0)
}

/// Midnight market time on `date`, as UTC.
pub fn market_midnight(date: NaiveDate) -> DateTime<Utc> {
    market_instant(date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// A naive market-time wall clock as UTC.
pub fn market_instant(local: NaiveDateTime) -> DateTime<Utc> {
    market_offset()
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Column patterns for fund-flow tables. Headers look like
/// `今日主力净流入-净额`, `5日涨跌幅`, `主力流入`.
mod flow_columns {
    pub const NAME: [&str; 5] = ["板块名称", "行业", "概念", "板块", "名称"];
    pub const CODE: [&str; 2] = ["板块代码", "代码"];
    pub const CHANGE: [&str; 3] = ["涨跌幅", "今日涨跌幅", "区间涨跌幅"];
    pub const NET: [&str; 5] = [
        "主力净流入-净额",
        "主力净流入净额",
        "主力净流入",
        "主力资金净流入",
        "主力净流入额",
    ];
    pub const NET_PCT: [&str; 4] = [
        "主力净流入-净占比",
        "主力净流入净占比",
        "主力净流入占比",
        "主力净占比",
    ];
    pub const INFLOW: [&str; 3] = ["主力流入", "主力资金流入", "主力资金流入额"];
    pub const OUTFLOW: [&str; 3] = ["主力流出", "主力资金流出", "主力资金流出额"];
}

/// Turn a fund-flow table into a ranking.
///
/// Columns are found by pattern so header renames do not break parsing.
/// Rows without a name, or without any way to get a net figure, are dropped.
pub fn flow_records_from_table(
    table: &Table,
    implied: AmountUnit,
) -> Result<Vec<SectorFlowRecord>, FetchError> {
    use flow_columns::*;

    let name = table.aliases(&NAME);
    if !name.is_resolved() {
        return Err(FetchError::Schema(format!(
            "no sector name column in {:?}",
            table.columns()
        )));
    }
    let code = table.aliases(&CODE);
    let change = table.selector(&ColumnSpec::any(&["涨跌幅"]), &CHANGE);
    let net = table.selector(
        &ColumnSpec::any(&["净流入"]).all(&["主力"]).exclude(&["占比", "%"]),
        &NET,
    );
    let net_pct = table.selector(
        &ColumnSpec::any(&["净占比", "占比"]).all(&["主力"]),
        &NET_PCT,
    );
    let inflow = table.selector(
        &ColumnSpec::any(&["流入"]).all(&["主力"]).exclude(&["净", "占比", "%"]),
        &INFLOW,
    );
    let outflow = table.selector(
        &ColumnSpec::any(&["流出"]).all(&["主力"]).exclude(&["占比", "%"]),
        &OUTFLOW,
    );

    let mut records = Vec::with_capacity(table.len());
    for row in table.rows() {
        let Some(name) = row.select(&name).and_then(cell_text) else {
            continue;
        };
        let main_inflow = row.select(&inflow).and_then(|v| parse_amount(v, implied));
        let main_outflow = row.select(&outflow).and_then(|v| parse_amount(v, implied));
        let main_net = row
            .select(&net)
            .and_then(|v| parse_amount(v, implied))
            .or_else(|| Some(main_inflow? - main_outflow?));
        let Some(main_net) = main_net else {
            debug!(sector = %name, "row without net flow dropped");
            continue;
        };
        records.push(SectorFlowRecord {
            rank: 0,
            name,
            code: row.select(&code).and_then(cell_text),
            change_pct: row.select(&change).and_then(parse_percent),
            main_net,
            main_inflow,
            main_outflow,
            main_net_pct: row.select(&net_pct).and_then(parse_percent),
        });
    }
    Ok(crate::model::rank_by_net_flow(records))
}
