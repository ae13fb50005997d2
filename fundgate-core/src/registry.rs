//! Source registry: which named sources serve which data type, and in what order.

use crate::health::HealthTracker;
use crate::model::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A registered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub name: String,
    pub priority: i32,
}

/// Operator choice of vendors for a data type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    /// Every registered source, by priority.
    #[default]
    Auto,
    /// Only the named source, or the vendor family it prefixes (`eastmoney`
    /// selects `eastmoney_fundgz` and `eastmoney_nav`).
    Only(String),
}

impl ProviderSelection {
    pub fn admits(&self, source: &str) -> bool {
        match self {
            ProviderSelection::Auto => true,
            ProviderSelection::Only(name) => {
                source == name
                    || source
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest.starts_with('_'))
            }
        }
    }
}

impl FromStr for ProviderSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Ok(match s.as_str() {
            "" | "auto" => ProviderSelection::Auto,
            "ts" | "tu" | "tushare" => ProviderSelection::Only("tushare".into()),
            "qq" | "gtimg" | "tencent" => ProviderSelection::Only("tencent".into()),
            "ths" | "tonghuashun" | "10jqka" => ProviderSelection::Only("ths".into()),
            "ak" | "akshare" | "em" | "eastmoney" => ProviderSelection::Only("eastmoney".into()),
            _ => ProviderSelection::Only(s),
        })
    }
}

impl fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSelection::Auto => f.write_str("auto"),
            ProviderSelection::Only(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: HashMap<DataType, Vec<SourceEntry>>,
    selection: HashMap<DataType, ProviderSelection>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `data_type`. Re-registering a name updates its priority.
    pub fn register(&mut self, data_type: DataType, name: &str, priority: i32) {
        let entries = self.sources.entry(data_type).or_default();
        match entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.priority = priority,
            None => entries.push(SourceEntry {
                name: name.to_string(),
                priority,
            }),
        }
    }

    pub fn set_selection(&mut self, data_type: DataType, selection: ProviderSelection) {
        self.selection.insert(data_type, selection);
    }

    pub fn selection(&self, data_type: DataType) -> ProviderSelection {
        self.selection.get(&data_type).cloned().unwrap_or_default()
    }

    /// Registered sources for `data_type`, highest priority first.
    pub fn entries(&self, data_type: DataType) -> Vec<SourceEntry> {
        let mut entries = self.sources.get(&data_type).cloned().unwrap_or_default();
        // stable: equal priorities keep registration order
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    /// Names of currently available sources for `data_type`, highest priority first.
    pub fn list_available(&self, data_type: DataType, health: &HealthTracker) -> Vec<String> {
        let selection = self.selection(data_type);
        self.entries(data_type)
            .into_iter()
            .filter(|e| selection.admits(&e.name))
            .filter(|e| health.is_available(data_type, &e.name))
            .map(|e| e.name)
            .collect()
    }
}
