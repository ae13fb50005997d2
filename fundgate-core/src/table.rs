//! Column-tolerant tables for vendor payloads.
//!
//! Vendors rename columns without notice (`主力净流入-净额` one month,
//! `主力净流入净额` the next). Adapters never index a column by its exact
//! header; they describe it with a [`ColumnSpec`] and resolve it once per
//! table into a [`Selector`].

use crate::normalize::is_missing;
use serde_json::{Map, Value};

/// Header comparison form: trimmed, lowercased, spaces removed.
fn header_key(s: &str) -> String {
    s.trim().to_lowercase().replace(' ', "")
}

/// Named columns over rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Short rows are padded with nulls.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, Value::Null);
                r
            })
            .collect();
        Self { columns, rows }
    }

    /// Build from JSON objects. Columns appear in first-seen order.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Map<String, Value>>) -> Self {
        let records: Vec<&Map<String, Value>> = records.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for rec in &records {
            for k in rec.keys() {
                if !columns.iter().any(|c| c == k) {
                    columns.push(k.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|rec| {
                columns
                    .iter()
                    .map(|c| rec.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let key = header_key(name);
        self.columns.iter().position(|c| header_key(c) == key)
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row { table: self, cells })
    }

    pub fn row(&self, i: usize) -> Option<Row<'_>> {
        self.rows.get(i).map(|cells| Row { table: self, cells })
    }

    /// Resolve a column: first by `spec`, else by the first exact
    /// (normalized) alias present, else by the first alias contained in a header.
    /// When nothing resolves, the selector falls back to per-row alias lookup.
    pub fn selector(&self, spec: &ColumnSpec<'_>, aliases: &[&str]) -> Selector {
        let column = spec
            .find(&self.columns)
            .or_else(|| pick_column(&self.columns, aliases));
        let fallbacks = aliases
            .iter()
            .filter_map(|a| self.column_index(a))
            .collect();
        Selector { column, fallbacks }
    }

    /// A selector for exactly-named aliases (no pattern search).
    pub fn aliases(&self, aliases: &[&str]) -> Selector {
        Selector {
            column: None,
            fallbacks: aliases.iter().filter_map(|a| self.column_index(a)).collect(),
        }
    }
}

/// One table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    cells: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.table.column_index(column).and_then(|i| self.cells.get(i))
    }

    /// Value under a resolved selector. A missing cell in the resolved column
    /// falls through to the aliases.
    pub fn select(&self, selector: &Selector) -> Option<&'a Value> {
        selector
            .column
            .iter()
            .chain(selector.fallbacks.iter())
            .filter_map(|&i| self.cells.get(i))
            .find(|v| !is_missing(v))
    }
}

/// Resolved column positions for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    column: Option<usize>,
    fallbacks: Vec<usize>,
}

impl Selector {
    pub fn is_resolved(&self) -> bool {
        self.column.is_some() || !self.fallbacks.is_empty()
    }
}

/// Substring pattern for locating a column.
///
/// A header matches if it contains any of `include_any`, all of
/// `include_all`, and none of `exclude_any`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnSpec<'a> {
    pub include_any: &'a [&'a str],
    pub include_all: &'a [&'a str],
    pub exclude_any: &'a [&'a str],
}

impl<'a> ColumnSpec<'a> {
    pub fn any(include_any: &'a [&'a str]) -> Self {
        Self {
            include_any,
            ..Default::default()
        }
    }

    pub fn all(mut self, include_all: &'a [&'a str]) -> Self {
        self.include_all = include_all;
        self
    }

    pub fn exclude(mut self, exclude_any: &'a [&'a str]) -> Self {
        self.exclude_any = exclude_any;
        self
    }

    pub fn matches(&self, header: &str) -> bool {
        let h = header_key(header);
        let has = |k: &&str| h.contains(&header_key(k));
        self.include_any.iter().any(has)
            && self.include_all.iter().all(has)
            && !self.exclude_any.iter().any(has)
    }

    /// First matching column index, in table order.
    pub fn find(&self, columns: &[String]) -> Option<usize> {
        columns.iter().position(|c| self.matches(c))
    }
}

/// Exact (normalized) alias match first, then substring match, alias order first.
pub fn pick_column(columns: &[String], aliases: &[&str]) -> Option<usize> {
    let keys: Vec<String> = columns.iter().map(|c| header_key(c)).collect();
    let wanted: Vec<String> = aliases
        .iter()
        .map(|a| header_key(a))
        .filter(|a| !a.is_empty())
        .collect();
    wanted
        .iter()
        .find_map(|w| keys.iter().position(|k| k == w))
        .or_else(|| wanted.iter().find_map(|w| keys.iter().position(|k| k.contains(w.as_str()))))
}

/// First non-missing value of `aliases` in a JSON object.
pub fn pick_first_value<'a>(record: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|a| record.get(*a))
        .find(|v| !is_missing(v))
}
