use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use agora_models::context::AnalysisContext;
use agora_models::layer::{AgentDataContract, DataLayer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// An `AnalysisContext` shared between the engine, phases and concurrent agents.
///
/// Each write holds the lock for one field, its lineage entry and the
/// timestamp bump, so concurrent writers never interleave within a write.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<AnalysisContext>>,
}

impl SharedContext {
    pub fn new(context: AnalysisContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    /// Run `f` against the context under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&AnalysisContext) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut AnalysisContext) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn get(&self, layer: DataLayer, field: &str) -> Option<Value> {
        self.read(|ctx| ctx.get(layer, field).cloned())
    }

    /// Non-empty string value of a field.
    pub fn get_string(&self, layer: DataLayer, field: &str) -> Option<String> {
        self.read(|ctx| {
            ctx.get_str(layer, field)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    pub fn set(&self, layer: DataLayer, field: &str, value: Value, source: Option<&str>) {
        self.write(|ctx| ctx.set(layer, field, value, source));
    }

    pub fn get_layer(&self, layer: DataLayer) -> Map<String, Value> {
        self.read(|ctx| ctx.get_layer(layer))
    }

    pub fn get_field_source(&self, layer: DataLayer, field: &str) -> Option<String> {
        self.read(|ctx| ctx.get_field_source(layer, field).map(str::to_string))
    }

    pub fn snapshot(&self) -> AnalysisContext {
        self.read(AnalysisContext::clone)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Read,
    Write,
}

/// One audited read or write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessLogEntry {
    pub agent_id: String,
    pub layer: DataLayer,
    pub fields: Vec<String>,
    pub action: AccessAction,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessSummary {
    pub total_operations: usize,
    pub read_count: usize,
    pub write_count: usize,
    pub unique_agents: usize,
    pub agents: Vec<String>,
    pub layers_accessed: Vec<DataLayer>,
}

/// The only path agents use to touch the context: reads and writes are
/// filtered by the agent's contract and every access is logged.
#[derive(Debug, Clone)]
pub struct DataAccessManager {
    context: SharedContext,
    log: Arc<Mutex<Vec<AccessLogEntry>>>,
}

impl DataAccessManager {
    pub fn new(context: SharedContext) -> Self {
        Self {
            context,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    fn record(&self, entry: AccessLogEntry) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Everything `contract` may read, keyed by field name.
    ///
    /// A missing required field is present as `null`; a missing optional
    /// field is left out. One log entry per declared input.
    pub fn get_data(&self, agent_id: &str, contract: &AgentDataContract) -> Map<String, Value> {
        let mut view = Map::new();

        for access in &contract.inputs {
            let layer_data = self.context.get_layer(access.layer);

            let fields: Vec<String> = if access.is_whole_layer() {
                let keys: Vec<String> = layer_data.keys().cloned().collect();
                view.extend(layer_data);
                keys
            } else {
                let mut missing = Vec::new();
                for field in &access.fields {
                    match layer_data.get(field) {
                        Some(value) => {
                            view.insert(field.clone(), value.clone());
                        }
                        None if access.required => {
                            missing.push(field.clone());
                            view.insert(field.clone(), Value::Null);
                        }
                        None => {}
                    }
                }
                if !missing.is_empty() {
                    debug!(agent = %agent_id, layer = %access.layer, missing = ?missing, "Required input missing");
                    self.record(AccessLogEntry {
                        agent_id: agent_id.to_string(),
                        layer: access.layer,
                        fields: access.fields.clone(),
                        action: AccessAction::Read,
                        timestamp: Utc::now(),
                        success: false,
                        error: Some(format!("missing required fields: {}", missing.join(", "))),
                    });
                    continue;
                }
                access.fields.clone()
            };

            self.record(AccessLogEntry {
                agent_id: agent_id.to_string(),
                layer: access.layer,
                fields,
                action: AccessAction::Read,
                timestamp: Utc::now(),
                success: true,
                error: None,
            });
        }

        view
    }

    /// Write the declared outputs present in `outputs`. Undeclared keys are dropped.
    ///
    /// Returns the `(layer, field)` pairs written.
    pub fn set_data(
        &self,
        agent_id: &str,
        contract: &AgentDataContract,
        outputs: &Map<String, Value>,
    ) -> Vec<(DataLayer, String)> {
        let mut written = Vec::new();

        for access in &contract.outputs {
            for field in &access.fields {
                let Some(value) = outputs.get(field) else {
                    continue;
                };
                self.context
                    .set(access.layer, field, value.clone(), Some(agent_id));
                self.record(AccessLogEntry {
                    agent_id: agent_id.to_string(),
                    layer: access.layer,
                    fields: vec![field.clone()],
                    action: AccessAction::Write,
                    timestamp: Utc::now(),
                    success: true,
                    error: None,
                });
                written.push((access.layer, field.clone()));
            }
        }

        let dropped: Vec<&String> = outputs
            .keys()
            .filter(|k| !written.iter().any(|(_, f)| f == *k))
            .collect();
        if !dropped.is_empty() {
            warn!(agent = %agent_id, dropped = ?dropped, "Dropped undeclared outputs");
        }

        written
    }

    pub fn validate_access(
        &self,
        contract: &AgentDataContract,
        layer: DataLayer,
        field: Option<&str>,
        action: AccessAction,
    ) -> bool {
        match action {
            AccessAction::Read => contract.has_input_access(layer, field),
            AccessAction::Write => contract.has_output_access(layer, field),
        }
    }

    /// Log entries, optionally for one agent only.
    pub fn get_access_log(&self, agent_id: Option<&str>) -> Vec<AccessLogEntry> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.iter()
            .filter(|e| agent_id.map_or(true, |a| e.agent_id == a))
            .cloned()
            .collect()
    }

    pub fn clear_access_log(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Lineage entries whose key starts with `layer` and ends with `field`.
    pub fn get_data_lineage(
        &self,
        layer: Option<DataLayer>,
        field: Option<&str>,
    ) -> Vec<(String, String)> {
        self.context.read(|ctx| {
            ctx.lineage()
                .iter()
                .filter(|(key, _)| layer.map_or(true, |l| key.starts_with(&format!("{l}."))))
                .filter(|(key, _)| field.map_or(true, |f| key.ends_with(&format!(".{f}"))))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    pub fn get_all_reports(&self) -> Map<String, Value> {
        self.context.get_layer(DataLayer::Reports)
    }

    /// Field names currently populated in each layer.
    pub fn get_context_info(&self) -> Map<String, Value> {
        self.context.read(|ctx| {
            DataLayer::ALL
                .into_iter()
                .map(|layer| {
                    let keys: Vec<Value> = ctx
                        .get_layer(layer)
                        .keys()
                        .map(|k| Value::from(k.as_str()))
                        .collect();
                    (layer.as_str().to_string(), Value::Array(keys))
                })
                .collect()
        })
    }

    pub fn get_access_summary(&self) -> AccessSummary {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let agents: BTreeSet<&str> = log.iter().map(|e| e.agent_id.as_str()).collect();
        let layers: BTreeSet<DataLayer> = log.iter().map(|e| e.layer).collect();
        let read_count = log
            .iter()
            .filter(|e| e.action == AccessAction::Read)
            .count();
        AccessSummary {
            total_operations: log.len(),
            read_count,
            write_count: log.len() - read_count,
            unique_agents: agents.len(),
            agents: agents.into_iter().map(str::to_string).collect(),
            layers_accessed: layers.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_models::layer::DataAccess;
    use serde_json::json;

    fn manager() -> DataAccessManager {
        let ctx = SharedContext::default();
        ctx.set(DataLayer::Context, "ticker", json!("000001"), Some("init"));
        ctx.set(DataLayer::Context, "trade_date", json!("2024-01-15"), Some("init"));
        ctx.set(DataLayer::Reports, "market_report", json!("trend up"), Some("market_analyst"));
        DataAccessManager::new(ctx)
    }

    fn reader() -> AgentDataContract {
        AgentDataContract::new("bull_researcher")
            .unwrap()
            .input(DataAccess::new(DataLayer::Context, &["ticker", "company_name"]))
            .input(DataAccess::new(DataLayer::Reports, &["market_report", "news_report"]).optional())
            .output(DataAccess::new(DataLayer::Reports, &["bull_report"]))
    }

    #[test]
    fn get_data_scopes_to_contract() {
        let dm = manager();
        let view = dm.get_data("bull_researcher", &reader());

        assert_eq!(view["ticker"], json!("000001"));
        // required but missing
        assert_eq!(view["company_name"], Value::Null);
        // optional and missing
        assert!(!view.contains_key("news_report"));
        assert_eq!(view["market_report"], json!("trend up"));
        // never declared
        assert!(!view.contains_key("trade_date"));

        let log = dm.get_access_log(Some("bull_researcher"));
        assert_eq!(log.len(), 2);
        assert!(!log[0].success);
        assert!(log[0].error.as_deref().unwrap().contains("company_name"));
        assert!(log[1].success);
    }

    #[test]
    fn whole_layer_read_logs_present_keys() {
        let dm = manager();
        let contract = AgentDataContract::new("auditor")
            .unwrap()
            .input(DataAccess::layer(DataLayer::Context));
        let view = dm.get_data("auditor", &contract);
        assert_eq!(view.len(), 2);
        let log = dm.get_access_log(None);
        assert_eq!(log[0].fields, vec!["ticker".to_string(), "trade_date".to_string()]);
    }

    #[test]
    fn set_data_drops_undeclared_fields() {
        let dm = manager();
        let outputs: Map<String, Value> = serde_json::from_value(json!({
            "bull_report": "upside",
            "final_decision": {"action": "BUY"}
        }))
        .unwrap();

        let written = dm.set_data("bull_researcher", &reader(), &outputs);
        assert_eq!(written, vec![(DataLayer::Reports, "bull_report".to_string())]);
        assert!(dm.context().get(DataLayer::Decisions, "final_decision").is_none());
        assert_eq!(
            dm.context().get_field_source(DataLayer::Reports, "bull_report").as_deref(),
            Some("bull_researcher")
        );

        let writes: Vec<_> = dm
            .get_access_log(None)
            .into_iter()
            .filter(|e| e.action == AccessAction::Write)
            .collect();
        assert_eq!(writes.len(), 1);
    }

    #[test]
    fn lineage_filters() {
        let dm = manager();
        assert_eq!(dm.get_data_lineage(Some(DataLayer::Context), None).len(), 2);
        let reports = dm.get_data_lineage(None, Some("market_report"));
        assert_eq!(reports, vec![("reports.market_report".to_string(), "market_analyst".to_string())]);
    }

    #[test]
    fn summary_and_clear() {
        let dm = manager();
        dm.get_data("bull_researcher", &reader());
        let outputs: Map<String, Value> = serde_json::from_value(json!({"bull_report": "x"})).unwrap();
        dm.set_data("bull_researcher", &reader(), &outputs);

        let summary = dm.get_access_summary();
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.read_count, 2);
        assert_eq!(summary.write_count, 1);
        assert_eq!(summary.agents, vec!["bull_researcher".to_string()]);
        assert_eq!(summary.layers_accessed, vec![DataLayer::Context, DataLayer::Reports]);

        dm.clear_access_log();
        assert_eq!(dm.get_access_summary().total_operations, 0);
    }

    #[test]
    fn validate_access_follows_contract() {
        let dm = manager();
        let c = reader();
        assert!(dm.validate_access(&c, DataLayer::Reports, Some("market_report"), AccessAction::Read));
        assert!(!dm.validate_access(&c, DataLayer::Reports, Some("market_report"), AccessAction::Write));
        assert!(dm.validate_access(&c, DataLayer::Reports, Some("bull_report"), AccessAction::Write));
    }

    #[test]
    fn context_info_lists_keys() {
        let dm = manager();
        let info = dm.get_context_info();
        assert_eq!(info["reports"], json!(["market_report"]));
        assert_eq!(info["decisions"], json!([]));
        assert_eq!(dm.get_all_reports().len(), 1);
    }
}
