use std::sync::Arc;
use std::time::Instant;

use agora_models::layer::{AgentDataContract, DataLayer};
use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{AgentRunner, AnalysisPhase, PhaseExecutor, PhaseOutputs};
use crate::access::{DataAccessManager, SharedContext};
use crate::error::{AgentError, EngineError};
use crate::validator::execution_order;

/// Runs the selected analysts, each producing one report.
///
/// One analyst failing never stops the others; failures are listed in the
/// phase outputs instead.
pub struct AnalystsPhase {
    runner: AgentRunner,
    analysts: Vec<String>,
    max_workers: usize,
}

impl AnalystsPhase {
    pub fn new(runner: AgentRunner, analysts: Vec<String>, max_workers: usize) -> Self {
        Self {
            runner,
            analysts,
            max_workers,
        }
    }

    fn concurrent(&self) -> bool {
        self.max_workers > 1 && self.analysts.len() > 1
    }

    /// Sequential order: dependency order over the selected contracts.
    fn sequential_order(&self) -> Vec<String> {
        match execution_order(&self.contracts()) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, "Falling back to configured analyst order");
                self.analysts.clone()
            }
        }
    }

    async fn run_concurrent(
        &self,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> (Vec<String>, Vec<String>) {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::new();

        for id in &self.analysts {
            let id = id.clone();
            let runner = self.runner.clone();
            let manager = manager.clone();
            let cancel = cancel.clone();
            let permits = Arc::clone(&permits);

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => run_analyst(&runner, &id, &manager, &cancel).await,
                    Err(_) => Err(EngineError::Cancelled),
                };
                (id, result, started.elapsed())
            }));
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((id, Ok(()), elapsed)) => {
                    info!(agent = %id, elapsed_ms = elapsed.as_millis(), "Analyst succeeded");
                    succeeded.push(id);
                }
                Ok((id, Err(e), elapsed)) => {
                    warn!(agent = %id, error = %e, elapsed_ms = elapsed.as_millis(), "Analyst failed");
                    failed.push(id);
                }
                Err(e) => {
                    let id = self.analysts[index].clone();
                    error!(agent = %id, error = %e, "Analyst task panicked");
                    failed.push(id);
                }
            }
        }
        (succeeded, failed)
    }

    async fn run_sequential(
        &self,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> (Vec<String>, Vec<String>) {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for id in self.sequential_order() {
            let started = Instant::now();
            match run_analyst(&self.runner, &id, manager, cancel).await {
                Ok(()) => {
                    info!(agent = %id, elapsed_ms = started.elapsed().as_millis(), "Analyst succeeded");
                    succeeded.push(id);
                }
                Err(e) => {
                    warn!(agent = %id, error = %e, "Analyst failed");
                    failed.push(id);
                }
            }
        }
        (succeeded, failed)
    }
}

/// One analyst: its agent when one resolves, else a placeholder report.
async fn run_analyst(
    runner: &AgentRunner,
    id: &str,
    manager: &DataAccessManager,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    let contract = runner.contract(id)?;
    let report_field = contract
        .output_fields(DataLayer::Reports)
        .first()
        .map(|f| f.to_string())
        .ok_or_else(|| {
            EngineError::agent(id, AgentError::Unavailable("contract declares no report".into()))
        })?;

    let Some(agent) = runner.agent(id) else {
        let ticker = manager
            .context()
            .get_string(DataLayer::Context, "ticker")
            .unwrap_or_default();
        let mut outputs = Map::new();
        outputs.insert(
            report_field,
            json!(format!("[{id}] analysis placeholder - {ticker}")),
        );
        manager.set_data(id, &contract, &outputs);
        return Ok(());
    };

    let state = runner.integrator().state_for(id, &contract, manager);
    let update = runner.run(agent.as_ref(), &state, cancel).await?;
    let written = runner.integrator().commit(id, &contract, &update, manager);
    if !written
        .iter()
        .any(|(layer, field)| *layer == DataLayer::Reports && *field == report_field)
    {
        return Err(EngineError::agent(
            id,
            AgentError::Parse(format!("no {report_field} in output")),
        ));
    }
    Ok(())
}

#[async_trait]
impl PhaseExecutor for AnalystsPhase {
    fn phase(&self) -> AnalysisPhase {
        AnalysisPhase::Analysts
    }

    fn contracts(&self) -> Vec<AgentDataContract> {
        self.runner
            .contracts_of(self.analysts.iter().map(String::as_str))
    }

    async fn execute(
        &self,
        context: &SharedContext,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutputs, EngineError> {
        let ticker = context
            .get_string(DataLayer::Context, "ticker")
            .unwrap_or_default();
        info!(
            ticker = %ticker,
            analysts = ?self.analysts,
            concurrent = self.concurrent(),
            "Running analysts"
        );

        let (succeeded, failed) = if self.concurrent() {
            self.run_concurrent(manager, cancel).await
        } else {
            self.run_sequential(manager, cancel).await
        };

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let report_fields: Vec<String> = self
            .contracts()
            .iter()
            .flat_map(|c| c.output_fields(DataLayer::Reports))
            .map(|f| f.to_string())
            .collect();
        let reports = manager.get_all_reports();
        let reports_generated = report_fields
            .iter()
            .filter(|f| {
                reports
                    .get(f.as_str())
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.is_empty())
            })
            .count();

        let mut outputs = Map::new();
        outputs.insert("ticker".into(), json!(ticker));
        outputs.insert("analysts_run".into(), json!(succeeded));
        outputs.insert("analysts_failed".into(), json!(failed));
        outputs.insert("reports_generated".into(), json!(reports_generated));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::AgentIntegrator;
    use crate::registry::AgentRegistry;
    use crate::test_support::ScriptedAgent;
    use agora_models::context::AnalysisContext;
    use agora_models::contracts::{ContractCatalog, ANALYST_IDS};
    use std::time::Duration;

    fn setup(agents: Vec<ScriptedAgent>, use_stub: bool) -> (AgentRunner, SharedContext) {
        let mut integrator = AgentIntegrator::new(
            Arc::new(ContractCatalog::builtin()),
            AgentRegistry::builtin(),
            None,
        );
        for agent in agents {
            integrator = integrator.with_agent(Arc::new(agent));
        }
        let context = SharedContext::new(AnalysisContext::new());
        context.set(DataLayer::Context, "ticker", json!("000001"), Some("init"));
        context.set(DataLayer::Context, "trade_date", json!("2024-01-15"), Some("init"));
        (
            AgentRunner::new(Arc::new(integrator), Duration::from_secs(5), use_stub),
            context,
        )
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn execute(phase: &AnalystsPhase, context: &SharedContext) -> PhaseOutputs {
        let manager = DataAccessManager::new(context.clone());
        phase
            .execute(context, &manager, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stub_reports_are_placeholders() {
        let (runner, context) = setup(vec![], true);
        let phase = AnalystsPhase::new(runner, ids(&["market_analyst"]), 4);
        let outputs = execute(&phase, &context).await;

        assert_eq!(outputs["analysts_run"], json!(["market_analyst"]));
        assert_eq!(outputs["reports_generated"], 1);
        assert_eq!(
            context.get_string(DataLayer::Reports, "market_report").as_deref(),
            Some("[market_analyst] analysis placeholder - 000001")
        );
        assert_eq!(
            context.get_field_source(DataLayer::Reports, "market_report").as_deref(),
            Some("market_analyst")
        );
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let agents = vec![
            ScriptedAgent::new("market_analyst", json!({"market_report": "uptrend"})),
            ScriptedAgent::failing("news_analyst"),
            ScriptedAgent::new("sentiment_analyst", json!({"sentiment_report": "euphoric"})),
        ];
        let (runner, context) = setup(agents, false);
        let phase = AnalystsPhase::new(
            runner,
            ids(&["market_analyst", "news_analyst", "sentiment_analyst"]),
            2,
        );
        let outputs = execute(&phase, &context).await;

        assert_eq!(outputs["analysts_run"], json!(["market_analyst", "sentiment_analyst"]));
        assert_eq!(outputs["analysts_failed"], json!(["news_analyst"]));
        assert_eq!(outputs["reports_generated"], 2);
    }

    #[tokio::test]
    async fn only_this_phase_reports_are_counted() {
        let agents = vec![ScriptedAgent::new("news_analyst", json!({"news_report": "quiet"}))];
        let (runner, context) = setup(agents, false);
        context.set(DataLayer::Reports, "market_report", json!("from an earlier run"), Some("market_analyst"));
        context.set(DataLayer::Reports, "bull_report", json!("upside"), Some("bull_researcher"));

        let phase = AnalystsPhase::new(runner, ids(&["news_analyst"]), 1);
        let outputs = execute(&phase, &context).await;
        assert_eq!(outputs["reports_generated"], 1);
    }

    #[tokio::test]
    async fn agent_without_report_counts_as_failed() {
        let agents = vec![ScriptedAgent::new("index_analyst", json!({"other": "x"}))];
        let (runner, context) = setup(agents, false);
        let phase = AnalystsPhase::new(runner, ids(&["index_analyst"]), 1);
        let outputs = execute(&phase, &context).await;
        assert_eq!(outputs["analysts_failed"], json!(["index_analyst"]));
    }

    #[tokio::test]
    async fn sequential_when_single_worker() {
        let catalog = ContractCatalog::builtin();
        let agents: Vec<ScriptedAgent> = ANALYST_IDS
            .iter()
            .map(|id| {
                let mut update = Map::new();
                let field = catalog.report_field(id).unwrap();
                update.insert(field.to_string(), json!(format!("{id} report")));
                ScriptedAgent::new(id, update.into())
            })
            .collect();
        let (runner, context) = setup(agents, false);
        let phase = AnalystsPhase::new(runner, ids(&ANALYST_IDS), 1);
        assert!(!phase.concurrent());

        let outputs = execute(&phase, &context).await;
        assert_eq!(outputs["analysts_run"], json!(ANALYST_IDS));
        assert_eq!(context.get_layer(DataLayer::Reports).len(), 6);
    }

    #[tokio::test]
    async fn cancelled_run_is_an_error() {
        let agents = vec![ScriptedAgent::new("market_analyst", json!({"market_report": "x"}))
            .with_delay(Duration::from_secs(5))];
        let (runner, context) = setup(agents, false);
        let phase = AnalystsPhase::new(runner, ids(&["market_analyst"]), 4);
        let manager = DataAccessManager::new(context.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = phase.execute(&context, &manager, &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
