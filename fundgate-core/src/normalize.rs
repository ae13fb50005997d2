//! Tolerant parsing of vendor cell values.
//!
//! Vendors mix numbers, numeric strings, unit-suffixed strings and placeholder
//! sentinels in the same column. Every parser here returns `None` for a
//! missing value rather than `0.0`: zero is a legitimate change or flow.

use crate::error::FetchError;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Unsuffixed amounts at or above this magnitude are taken as already in yuan,
/// whatever unit the column nominally uses.
pub const PRECONVERTED_THRESHOLD: f64 = 1e6;

const MISSING_TOKENS: [&str; 7] = ["", "--", "-", "—", "nan", "none", "null"];

/// Currency unit a column is denominated in when its cells carry no suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountUnit {
    Yuan,
    TenThousand,
    HundredMillion,
}

impl AmountUnit {
    pub fn multiplier(&self) -> f64 {
        match self {
            AmountUnit::Yuan => 1.0,
            AmountUnit::TenThousand => 1e4,
            AmountUnit::HundredMillion => 1e8,
        }
    }
}

pub fn is_missing_str(s: &str) -> bool {
    let t = s.trim();
    MISSING_TOKENS.iter().any(|m| t.eq_ignore_ascii_case(m))
}

/// True for JSON null, non-finite numbers and placeholder strings.
pub fn is_missing(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Number(n) => n.as_f64().map_or(true, |f| !f.is_finite()),
        Value::String(s) => is_missing_str(s),
        _ => false,
    }
}

/// Text of a cell with placeholders mapped to `None`.
pub fn cell_text(v: &Value) -> Option<String> {
    if is_missing(v) {
        return None;
    }
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn cleaned(v: &Value) -> Option<String> {
    cell_text(v).map(|s| s.replace([',', ' '], ""))
}

/// Parse a finite float from a number or numeric string.
pub fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        _ => cleaned(v)?.parse::<f64>().ok().filter(|f| f.is_finite()),
    }
}

/// Parse a percentage, dropping a trailing `%`. `"--"`, `""`, `"nan"` give `None`.
pub fn parse_percent(v: &Value) -> Option<f64> {
    match v {
        Value::Number(_) => parse_number(v),
        _ => {
            let s = cleaned(v)?;
            let s = s.strip_suffix('%').unwrap_or(&s);
            s.parse::<f64>().ok().filter(|f| f.is_finite())
        }
    }
}

/// Parse a price. Same as [`parse_number`]; positivity is the validator's job.
pub fn parse_price(v: &Value) -> Option<f64> {
    parse_number(v)
}

/// Parse a currency amount into yuan.
///
/// `亿` multiplies by 1e8 and `万` by 1e4. An unsuffixed value is scaled by
/// `implied` unless its magnitude already reaches [`PRECONVERTED_THRESHOLD`],
/// in which case the vendor has already converted it to yuan.
pub fn parse_amount(v: &Value, implied: AmountUnit) -> Option<f64> {
    if let Value::Number(_) = v {
        return parse_number(v).map(|n| scale_unsuffixed(n, implied));
    }
    let text = cleaned(v)?;
    let (s, explicit_yuan) = match text.strip_suffix('元') {
        Some(rest) => (rest, true),
        None => (text.as_str(), false),
    };
    let (digits, suffix_mult) = if let Some(d) = s.strip_suffix('亿') {
        (d, Some(1e8))
    } else if let Some(d) = s.strip_suffix('万') {
        (d, Some(1e4))
    } else {
        (s, None)
    };
    let n: f64 = digits.parse().ok().filter(|f: &f64| f.is_finite())?;
    Some(match suffix_mult {
        Some(m) => n * m,
        None if explicit_yuan => n,
        None => scale_unsuffixed(n, implied),
    })
}

fn scale_unsuffixed(n: f64, implied: AmountUnit) -> f64 {
    if implied == AmountUnit::Yuan || n.abs() >= PRECONVERTED_THRESHOLD {
        n
    } else {
        n * implied.multiplier()
    }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a vendor date, ignoring any time component.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

/// Parse a vendor timestamp; a bare date becomes midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Unwrap a JSONP payload: `callback({...});` → `{...}`.
pub fn strip_jsonp(text: &str) -> Result<&str, FetchError> {
    let t = text.trim();
    let t = t.strip_suffix(';').unwrap_or(t).trim_end();
    match (t.find('('), t.ends_with(')')) {
        (Some(open), true) if open > 0 => Ok(t[open + 1..t.len() - 1].trim()),
        _ => Err(FetchError::Schema(format!(
            "not a JSONP payload: {}",
            text.chars().take(60).collect::<String>()
        ))),
    }
}
