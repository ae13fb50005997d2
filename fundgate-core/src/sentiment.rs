//! Sector background score.
//!
//! A deliberately blunt 0–100 reading of one day's main-force net flow and
//! price change for a sector. Background context only; not a trading signal.

use crate::model::SectorFlowRecord;
use serde::Serialize;

const BASE_SCORE: f64 = 50.0;
const HUNDRED_MILLION: f64 = 1e8;

/// Scores used when the sector is absent from the ranking.
const FALLBACK_SCORES: [(&str, u8); 5] = [
    ("半导体", 48),
    ("机器人", 55),
    ("通信设备", 52),
    ("先进制造", 50),
    ("航空航天", 52),
];

/// Funds whose sector is known without looking at the name.
const FUND_SECTORS: [(&str, &str); 5] = [
    ("008888", "半导体"),
    ("014881", "机器人"),
    ("018125", "先进制造"),
    ("013238", "通信设备"),
    ("015790", "航空航天"),
];

/// Name keyword → sector, first match wins. Upper-case keywords match case-insensitively.
const NAME_KEYWORDS: [(&str, &str); 20] = [
    ("半导体", "半导体"),
    ("芯片", "半导体"),
    ("光伏", "新能源"),
    ("锂电", "新能源"),
    ("新能源", "新能源"),
    ("机器人", "机器人"),
    ("人工智能", "AI应用"),
    ("AI", "AI应用"),
    ("算力", "AI应用"),
    ("传媒", "中证传媒"),
    ("通信", "5G通信"),
    ("油气", "油气产业"),
    ("军工", "商业航天"),
    ("航天", "商业航天"),
    ("有色", "有色金属"),
    ("黄金", "沪港深黄金"),
    ("纳指", "纳指100"),
    ("中证1000", "中证1000"),
    ("创业板", "创业板"),
    ("沪深300", "沪深300"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLevel {
    Strong,
    LeaningStrong,
    Neutral,
    LeaningWeak,
    Weak,
}

impl SentimentLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => SentimentLevel::Strong,
            60..=69 => SentimentLevel::LeaningStrong,
            50..=59 => SentimentLevel::Neutral,
            40..=49 => SentimentLevel::LeaningWeak,
            _ => SentimentLevel::Weak,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SentimentLevel::Strong => "强",
            SentimentLevel::LeaningStrong => "偏强",
            SentimentLevel::Neutral => "中性",
            SentimentLevel::LeaningWeak => "偏弱",
            SentimentLevel::Weak => "弱",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectorSentiment {
    pub sector: String,
    pub score: u8,
    pub level: SentimentLevel,
    /// Ranking row the score was computed from; `None` means a fallback score.
    pub matched: Option<String>,
    /// Main-force net flow of the matched row, in yuan.
    pub main_net: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Score from net flow (yuan) and percent change. A missing change counts as flat.
pub fn flow_score(main_net: f64, change_pct: Option<f64>) -> u8 {
    let yi = main_net / HUNDRED_MILLION;
    let mut score = BASE_SCORE;
    if yi >= 30.0 {
        score += 18.0;
    } else if yi >= 10.0 {
        score += 10.0;
    } else if yi <= -30.0 {
        score -= 18.0;
    } else if yi <= -10.0 {
        score -= 10.0;
    }
    match change_pct {
        Some(p) if p >= 3.0 => score += 6.0,
        Some(p) if p <= -3.0 => score -= 6.0,
        _ => {}
    }
    score.round().clamp(0.0, 100.0) as u8
}

pub fn fallback_score(sector: &str) -> u8 {
    FALLBACK_SCORES
        .iter()
        .find(|(name, _)| *name == sector)
        .map_or(BASE_SCORE as u8, |(_, s)| *s)
}

/// First row whose name contains `sector` or is contained in it.
pub fn find_sector<'a>(records: &'a [SectorFlowRecord], sector: &str) -> Option<&'a SectorFlowRecord> {
    let target = sector.trim();
    if target.is_empty() {
        return None;
    }
    records.iter().find(|r| {
        let name = r.name.trim();
        !name.is_empty() && (name.contains(target) || target.contains(name))
    })
}

/// Score `sector` against a flow ranking.
pub fn assess(sector: &str, records: &[SectorFlowRecord]) -> SectorSentiment {
    let sector = sector.trim();
    let (score, matched, main_net, change_pct) = match find_sector(records, sector) {
        Some(r) => (
            flow_score(r.main_net, r.change_pct),
            Some(r.name.clone()),
            Some(r.main_net),
            r.change_pct,
        ),
        None => (fallback_score(sector), None, None, None),
    };
    SectorSentiment {
        sector: sector.to_string(),
        score,
        level: SentimentLevel::from_score(score),
        matched,
        main_net,
        change_pct,
    }
}

/// Sector for a fund: the fixed mapping first, then keywords in its name.
pub fn sector_for_fund(code: &str, name: Option<&str>) -> Option<&'static str> {
    let code = code.trim();
    if let Some((_, sector)) = FUND_SECTORS.iter().find(|(c, _)| *c == code) {
        return Some(*sector);
    }
    let name = name.map(str::trim).filter(|n| !n.is_empty())?;
    let upper = name.to_uppercase();
    NAME_KEYWORDS
        .iter()
        .find(|(kw, _)| {
            if kw.chars().any(|c| c.is_ascii_alphabetic()) {
                upper.contains(kw)
            } else {
                name.contains(kw)
            }
        })
        .map(|(_, sector)| *sector)
}
