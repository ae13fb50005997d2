//! The market-data calls other layers consume.
//!
//! Every call is best effort: `None` means no live source answered and nothing
//! was cached. Callers show "data unavailable" rather than failing. Each fetch
//! also gives the context a chance to compact the cache.

use crate::context::MarketDataContext;
use crate::model::{
    DataType, FetchRequest, FetchResult, FlowPeriod, NavPoint, NormalizedQuote, SectorFlowRecord,
    SectorKind,
};
use crate::sentiment::{self, SectorSentiment};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LOOKBACK_DAYS: u64 = 180;
pub const MAX_TOP_N: usize = 200;

/// Price must be present, finite and positive.
pub fn valid_quote(q: &NormalizedQuote) -> Result<(), String> {
    if !q.price.is_finite() || q.price <= 0.0 {
        return Err(format!("price {} is not positive", q.price));
    }
    if q.change_pct.is_some_and(|p| !p.is_finite()) {
        return Err("change_pct is not finite".into());
    }
    Ok(())
}

/// Non-empty, ascending, positive closes.
pub fn valid_history(points: &Vec<NavPoint>) -> Result<(), String> {
    if points.is_empty() {
        return Err("empty NAV history".into());
    }
    if let Some(p) = points.iter().find(|p| !p.close.is_finite() || p.close <= 0.0) {
        return Err(format!("non-positive NAV {} on {}", p.close, p.date));
    }
    if points.windows(2).any(|w| w[0].date >= w[1].date) {
        return Err("NAV history is not strictly ascending".into());
    }
    Ok(())
}

pub fn valid_ranking(records: &Vec<SectorFlowRecord>) -> Result<(), String> {
    if records.is_empty() {
        return Err("empty sector ranking".into());
    }
    if records.iter().any(|r| !r.main_net.is_finite()) {
        return Err("non-finite net flow".into());
    }
    Ok(())
}

/// Fund codes are six digits; surrounding whitespace is ignored.
fn clean_code(code: &str) -> Option<&str> {
    let code = code.trim();
    (code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())).then_some(code)
}

#[derive(Clone)]
pub struct MarketData {
    ctx: Arc<MarketDataContext>,
}

impl MarketData {
    pub fn new(ctx: Arc<MarketDataContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &MarketDataContext {
        &self.ctx
    }

    /// Latest price for a fund: the estimate intraday, the published NAV once settled.
    pub fn get_latest_quote(&self, code: &str) -> Option<FetchResult<NormalizedQuote>> {
        let Some(code) = clean_code(code) else {
            debug!(code, "not a fund code");
            return None;
        };
        let req = FetchRequest::new(DataType::FundRealtime).param("code", code);
        self.ctx.compact_if_due();
        self.ctx.pipeline().fetch(
            &req,
            &self.ctx.sources().quote,
            &valid_quote,
            self.ctx.settings().ttl(DataType::FundRealtime),
        )
    }

    /// NAV series, oldest first. `lookback_days` of 0 uses the default.
    pub fn get_history(&self, code: &str, lookback_days: u64) -> Option<FetchResult<Vec<NavPoint>>> {
        let code = clean_code(code)?;
        let lookback = if lookback_days == 0 {
            DEFAULT_LOOKBACK_DAYS
        } else {
            lookback_days
        };
        let req = FetchRequest::new(DataType::FundHistory)
            .param("code", code)
            .param("lookback_days", lookback);
        self.ctx.compact_if_due();
        self.ctx.pipeline().fetch(
            &req,
            &self.ctx.sources().history,
            &valid_history,
            self.ctx.settings().ttl(DataType::FundHistory),
        )
    }

    /// Today's ranking, best `top_n` by main-force net inflow.
    pub fn get_sector_flow_ranking(
        &self,
        kind: SectorKind,
        top_n: usize,
    ) -> Option<FetchResult<Vec<SectorFlowRecord>>> {
        self.get_sector_flow_ranking_for(kind, FlowPeriod::Today, top_n)
    }

    /// Ranking over `period`. The full ranking is cached and truncated here;
    /// `top_n` outside `1..=200` gives no result.
    pub fn get_sector_flow_ranking_for(
        &self,
        kind: SectorKind,
        period: FlowPeriod,
        top_n: usize,
    ) -> Option<FetchResult<Vec<SectorFlowRecord>>> {
        if !(1..=MAX_TOP_N).contains(&top_n) {
            debug!(top_n, "top_n out of range");
            return None;
        }
        self.full_ranking(kind, period).map(|r| {
            r.map(|mut records| {
                records.truncate(top_n);
                records
            })
        })
    }

    fn full_ranking(
        &self,
        kind: SectorKind,
        period: FlowPeriod,
    ) -> Option<FetchResult<Vec<SectorFlowRecord>>> {
        let req = FetchRequest::new(DataType::SectorFlow)
            .param("kind", kind.as_str())
            .param("period", period.as_str());
        self.ctx.compact_if_due();
        self.ctx.pipeline().fetch(
            &req,
            &self.ctx.sources().flow,
            &valid_ranking,
            self.ctx.settings().ttl(DataType::SectorFlow),
        )
    }

    /// Background score for an industry sector from today's ranking. Without
    /// a ranking the fallback score applies.
    pub fn sector_sentiment(&self, sector: &str) -> SectorSentiment {
        let ranking = self.full_ranking(SectorKind::Industry, FlowPeriod::Today);
        let records = ranking.as_ref().map(|r| r.value.as_slice()).unwrap_or(&[]);
        sentiment::assess(sector, records)
    }

    /// Sector for a fund code, using the quote's fund name when the code is not mapped.
    pub fn sector_of_fund(&self, code: &str) -> Option<&'static str> {
        if let Some(sector) = sentiment::sector_for_fund(code, None) {
            return Some(sector);
        }
        let quote = self.get_latest_quote(code)?;
        sentiment::sector_for_fund(code, quote.value.name.as_deref())
    }
}
