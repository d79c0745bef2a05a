use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layer::DataLayer;

/// The flat key/value shape legacy agents consume and produce.
pub type LegacyState = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyKind {
    Text,
    Object,
}

/// Legacy flat key ⇄ layered field. Used in both directions.
const LEGACY_FIELDS: &[(&str, DataLayer, &str, LegacyKind)] = &[
    ("company_of_interest", DataLayer::Context, "ticker", LegacyKind::Text),
    ("trade_date", DataLayer::Context, "trade_date", LegacyKind::Text),
    ("market_report", DataLayer::Reports, "market_report", LegacyKind::Text),
    ("sentiment_report", DataLayer::Reports, "sentiment_report", LegacyKind::Text),
    ("news_report", DataLayer::Reports, "news_report", LegacyKind::Text),
    ("fundamentals_report", DataLayer::Reports, "fundamentals_report", LegacyKind::Text),
    ("sector_report", DataLayer::Reports, "sector_report", LegacyKind::Text),
    ("index_report", DataLayer::Reports, "index_report", LegacyKind::Text),
    ("investment_debate_state", DataLayer::Decisions, "investment_debate", LegacyKind::Object),
    ("investment_plan", DataLayer::Decisions, "investment_plan", LegacyKind::Text),
    ("trader_investment_plan", DataLayer::Decisions, "trader_investment_plan", LegacyKind::Text),
    ("risk_debate_state", DataLayer::Decisions, "risk_assessment", LegacyKind::Object),
    ("final_trade_decision", DataLayer::Decisions, "final_trade_decision", LegacyKind::Text),
];

/// Legacy key for a layered field, if the field has one.
pub fn legacy_key_for(layer: DataLayer, field: &str) -> Option<&'static str> {
    LEGACY_FIELDS
        .iter()
        .find(|(_, l, f, _)| *l == layer && *f == field)
        .map(|(key, ..)| *key)
}

/// Layered field for a legacy key, if the key is a known one.
pub fn field_for_legacy_key(key: &str) -> Option<(DataLayer, &'static str)> {
    LEGACY_FIELDS
        .iter()
        .find(|(k, ..)| *k == key)
        .map(|(_, layer, field, _)| (*layer, *field))
}

/// Layered container for everything one analysis run knows.
///
/// Every `set` records which component wrote the field (when a source is
/// given) and bumps `updated_at`. `updated_at` never moves backwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisContext {
    context: Map<String, Value>,
    raw_data: Map<String, Value>,
    analysis_data: Map<String, Value>,
    reports: Map<String, Value>,
    decisions: Map<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data_lineage: BTreeMap<String, String>,
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisContext {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            context: Map::new(),
            raw_data: Map::new(),
            analysis_data: Map::new(),
            reports: Map::new(),
            decisions: Map::new(),
            created_at: now,
            updated_at: now,
            data_lineage: BTreeMap::new(),
        }
    }

    fn layer_ref(&self, layer: DataLayer) -> &Map<String, Value> {
        match layer {
            DataLayer::Context => &self.context,
            DataLayer::RawData => &self.raw_data,
            DataLayer::AnalysisData => &self.analysis_data,
            DataLayer::Reports => &self.reports,
            DataLayer::Decisions => &self.decisions,
        }
    }

    fn layer_mut(&mut self, layer: DataLayer) -> &mut Map<String, Value> {
        match layer {
            DataLayer::Context => &mut self.context,
            DataLayer::RawData => &mut self.raw_data,
            DataLayer::AnalysisData => &mut self.analysis_data,
            DataLayer::Reports => &mut self.reports,
            DataLayer::Decisions => &mut self.decisions,
        }
    }

    pub fn get(&self, layer: DataLayer, field: &str) -> Option<&Value> {
        self.layer_ref(layer).get(field)
    }

    /// String value of a field; non-string values are ignored.
    pub fn get_str(&self, layer: DataLayer, field: &str) -> Option<&str> {
        self.get(layer, field).and_then(Value::as_str)
    }

    pub fn contains(&self, layer: DataLayer, field: &str) -> bool {
        self.layer_ref(layer).contains_key(field)
    }

    pub fn set(&mut self, layer: DataLayer, field: &str, value: Value, source: Option<&str>) {
        self.layer_mut(layer).insert(field.to_string(), value);
        if let Some(source) = source {
            self.data_lineage
                .insert(lineage_key(layer, field), source.to_string());
        }
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// A copy of the layer; mutating it does not touch the context.
    pub fn get_layer(&self, layer: DataLayer) -> Map<String, Value> {
        self.layer_ref(layer).clone()
    }

    pub fn get_field_source(&self, layer: DataLayer, field: &str) -> Option<&str> {
        self.data_lineage
            .get(&lineage_key(layer, field))
            .map(String::as_str)
    }

    /// Reports visible at a pipeline step. Steps 3 and later see all of them.
    pub fn get_reports_for_phase(&self, phase: u32) -> Map<String, Value> {
        if phase >= 3 {
            self.reports.clone()
        } else {
            Map::new()
        }
    }

    pub fn lineage(&self) -> &BTreeMap<String, String> {
        &self.data_lineage
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Project into the legacy flat state. Missing text fields become `""`,
    /// missing debate states become `{}`.
    pub fn to_legacy_state(&self) -> LegacyState {
        LEGACY_FIELDS
            .iter()
            .map(|(key, layer, field, kind)| {
                let value = self.get(*layer, field).cloned().unwrap_or(match kind {
                    LegacyKind::Text => Value::String(String::new()),
                    LegacyKind::Object => Value::Object(Map::new()),
                });
                (key.to_string(), value)
            })
            .collect()
    }

    /// Build a context from a legacy flat state. Only keys present in `state` are set.
    pub fn from_legacy_state(state: &LegacyState) -> Self {
        let mut ctx = Self::new();
        for (key, layer, field, _) in LEGACY_FIELDS {
            if let Some(value) = state.get(*key) {
                ctx.layer_mut(*layer).insert(field.to_string(), value.clone());
            }
        }
        ctx
    }
}

fn lineage_key(layer: DataLayer, field: &str) -> String {
    format!("{}.{}", layer.as_str(), field)
}
