use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_memory::MemoryProvider;
use agora_models::config::EngineConfig;
use agora_models::context::AnalysisContext;
use agora_models::contracts::ContractCatalog;
use agora_models::decision::FinalDecision;
use agora_models::layer::DataLayer;
use agora_models::schema::DataSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{AccessLogEntry, DataAccessManager, SharedContext};
use crate::agent::{Agent, AgentDeps};
use crate::error::EngineError;
use crate::integrator::AgentIntegrator;
use crate::llm::LlmProvider;
use crate::phases::{
    AgentRunner, AnalysisPhase, AnalystsPhase, DataCollectionPhase, PhaseExecutor, PhaseOutputs,
    ResearchDebatePhase, RiskAssessmentPhase, TradeDecisionPhase,
};
use crate::registry::AgentRegistry;
use crate::toolkit::Toolkit;
use crate::validator::{execution_order, ContractValidator, ValidationResult};

/// Outcome of one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    pub phase: AnalysisPhase,
    pub success: bool,
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub outputs: PhaseOutputs,
}

/// Everything a run produced, including the partial context of a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub ticker: String,
    pub trade_date: String,
    pub success: bool,
    pub final_decision: Option<FinalDecision>,
    pub phase_results: Vec<PhaseResult>,
    pub context: AnalysisContext,
    pub error: Option<String>,
    pub total_duration_seconds: f64,
    pub access_log: Vec<AccessLogEntry>,
}

impl AnalysisResult {
    /// Context fields, report and decision names, and how many lineage
    /// entries the run left.
    pub fn context_summary(&self) -> Value {
        let keys = |layer: DataLayer| -> Vec<String> { self.context.get_layer(layer).keys().cloned().collect() };
        json!({
            "context": self.context.get_layer(DataLayer::Context),
            "reports": keys(DataLayer::Reports),
            "decisions": keys(DataLayer::Decisions),
            "lineage_count": self.context.lineage().len(),
        })
    }
}

/// Subject of a run. An unset market type is inferred from the ticker.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub ticker: String,
    pub trade_date: String,
    pub company_name: Option<String>,
    pub market_type: Option<String>,
    pub extra: Map<String, Value>,
}

impl AnalysisRequest {
    pub fn new(ticker: impl Into<String>, trade_date: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            trade_date: trade_date.into(),
            ..Default::default()
        }
    }

    pub fn company_name(mut self, name: impl Into<String>) -> Self {
        self.company_name = Some(name.into());
        self
    }

    pub fn market_type(mut self, market: impl Into<String>) -> Self {
        self.market_type = Some(market.into());
        self
    }

    /// Extra Context-layer field.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    llm: Option<Arc<dyn LlmProvider>>,
    memory: Option<Arc<dyn MemoryProvider>>,
    memory_matches: usize,
    toolkit: Toolkit,
    agents: Vec<Arc<dyn Agent>>,
    schema: Option<DataSchema>,
}

impl EngineBuilder {
    /// Without an LLM every agent takes its stub or fallback path.
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn memory_provider(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn memory_matches(mut self, n: usize) -> Self {
        self.memory_matches = n;
        self
    }

    pub fn toolkit(mut self, toolkit: Toolkit) -> Self {
        self.toolkit = toolkit;
        self
    }

    /// Use `agent` for its id in place of the built-in one.
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Start from `schema` (e.g. with extension fields loaded) instead of the core table.
    pub fn schema(mut self, schema: DataSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn build(self) -> Result<StockAnalysisEngine, EngineError> {
        let EngineBuilder {
            config,
            llm,
            memory,
            memory_matches,
            toolkit,
            agents,
            schema,
        } = self;
        let catalog = ContractCatalog::builtin();
        let mut schema = schema.unwrap_or_default();
        schema.register_contracts(&catalog);
        let schema = Arc::new(schema);

        match execution_order(catalog.all()) {
            Ok(order) => debug!(order = ?order, "Agent dependency order"),
            Err(e) if config.strict_contracts => return Err(e),
            Err(e) => warn!(error = %e, "Agent dependency order unavailable"),
        }

        let mut validator = ContractValidator::new(Arc::clone(&schema));
        let results = validator.validate_all_contracts(catalog.all(), true, config.strict_contracts);
        let invalid: Vec<String> = results
            .iter()
            .filter(|(_, r)| !r.is_valid)
            .map(|(agent, _)| agent.clone())
            .collect();
        if invalid.is_empty() {
            info!(contracts = results.len(), "Agent contracts valid");
        } else {
            for agent in &invalid {
                warn!(agent = %agent, errors = ?results[agent].errors, "Invalid agent contract");
            }
            if config.strict_contracts {
                return Err(EngineError::InvalidContracts(invalid));
            }
        }

        let deps = llm.map(|llm| AgentDeps {
            llm,
            memory,
            toolkit: Arc::new(toolkit),
            n_matches: memory_matches,
        });
        let mut integrator = AgentIntegrator::new(Arc::new(catalog), AgentRegistry::builtin(), deps);
        for agent in agents {
            integrator = integrator.with_agent(agent);
        }
        let integrator = Arc::new(integrator);

        let runner = AgentRunner::new(
            Arc::clone(&integrator),
            Duration::from_secs(config.agent_timeout_seconds),
            config.use_stub,
        );
        let mut executors: BTreeMap<AnalysisPhase, Arc<dyn PhaseExecutor>> = BTreeMap::new();
        executors.insert(AnalysisPhase::DataCollection, Arc::new(DataCollectionPhase::new()));
        executors.insert(
            AnalysisPhase::Analysts,
            Arc::new(AnalystsPhase::new(runner.clone(), config.analysts(), config.max_workers)),
        );
        executors.insert(
            AnalysisPhase::ResearchDebate,
            Arc::new(ResearchDebatePhase::new(runner.clone(), config.research_debate_rounds)),
        );
        executors.insert(
            AnalysisPhase::TradeDecision,
            Arc::new(TradeDecisionPhase::new(runner.clone())),
        );
        executors.insert(
            AnalysisPhase::RiskAssessment,
            Arc::new(RiskAssessmentPhase::new(
                runner,
                config.risk_debate_rounds,
                config.risk_profiles.clone(),
            )),
        );

        info!(
            analysts = ?config.analysts(),
            use_stub = config.use_stub,
            "Engine ready"
        );

        Ok(StockAnalysisEngine {
            config,
            schema,
            integrator,
            executors,
        })
    }
}

/// Drives the five phases over one shared context per run.
pub struct StockAnalysisEngine {
    config: EngineConfig,
    schema: Arc<DataSchema>,
    integrator: Arc<AgentIntegrator>,
    executors: BTreeMap<AnalysisPhase, Arc<dyn PhaseExecutor>>,
}

impl StockAnalysisEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            llm: None,
            memory: None,
            memory_matches: 2,
            toolkit: Toolkit::new(),
            agents: Vec::new(),
            schema: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    /// Replace the executor of `phase`.
    pub fn register_phase_executor(&mut self, phase: AnalysisPhase, executor: Arc<dyn PhaseExecutor>) {
        self.executors.insert(phase, executor);
    }

    /// Drop the executor of `phase`; the phase is then reported as skipped.
    pub fn remove_phase_executor(&mut self, phase: AnalysisPhase) {
        self.executors.remove(&phase);
    }

    /// Static check of every built-in contract against the schema.
    pub fn validate_contracts(&self) -> BTreeMap<String, ValidationResult> {
        ContractValidator::new(Arc::clone(&self.schema)).validate_all_contracts(
            self.integrator.catalog().all(),
            true,
            self.config.strict_contracts,
        )
    }

    pub fn contract_order(&self) -> Result<Vec<String>, EngineError> {
        execution_order(self.integrator.catalog().all())
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisResult {
        self.analyze_with_cancel(request, CancellationToken::new()).await
    }

    /// Run the pipeline. Never fails: problems land in the result.
    ///
    /// Cancelling `cancel` stops the run at the next agent call. Dropping the
    /// returned future cancels it too, so spawned phase and analyst tasks
    /// never outlive the caller.
    pub async fn analyze_with_cancel(
        &self,
        request: AnalysisRequest,
        cancel: CancellationToken,
    ) -> AnalysisResult {
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, ticker = %request.ticker, trade_date = %request.trade_date, "Starting analysis");

        let context = SharedContext::new(create_context(&request));
        let manager = DataAccessManager::new(context.clone());
        let mut phase_results = Vec::new();
        let mut error = None;

        for phase in AnalysisPhase::ALL {
            let result = match self.executors.get(&phase) {
                Some(executor) => {
                    self.execute_phase(phase, Arc::clone(executor), &context, &manager, &cancel)
                        .await
                }
                None => {
                    warn!(phase = %phase, "No executor registered, skipping");
                    let mut outputs = Map::new();
                    outputs.insert("skipped".into(), json!(true));
                    PhaseResult {
                        phase,
                        success: true,
                        duration_seconds: 0.0,
                        error: None,
                        outputs,
                    }
                }
            };
            let failed = !result.success;
            if failed {
                error = Some(format!(
                    "phase {phase} failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
            phase_results.push(result);
            if failed {
                break;
            }
        }

        let success = error.is_none();
        let final_decision = if success {
            context
                .get(DataLayer::Decisions, "final_decision")
                .and_then(|v| serde_json::from_value(v).ok())
        } else {
            None
        };
        let total = started.elapsed();

        if success {
            info!(%run_id, ticker = %request.ticker, elapsed_ms = total.as_millis(), "Analysis complete");
        } else {
            error!(%run_id, ticker = %request.ticker, error = ?error, elapsed_ms = total.as_millis(), "Analysis failed");
        }

        AnalysisResult {
            run_id,
            ticker: request.ticker,
            trade_date: request.trade_date,
            success,
            final_decision,
            phase_results,
            context: context.snapshot(),
            error,
            total_duration_seconds: total.as_secs_f64(),
            access_log: manager.get_access_log(None),
        }
    }

    /// One phase in its own task, so a panic becomes a failed result.
    async fn execute_phase(
        &self,
        phase: AnalysisPhase,
        executor: Arc<dyn PhaseExecutor>,
        context: &SharedContext,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> PhaseResult {
        let started = Instant::now();
        info!(phase = %phase, "Phase starting");

        if !executor.validate_inputs(context, manager) {
            warn!(phase = %phase, "Phase inputs incomplete, running anyway");
        }

        let handle = {
            let context = context.clone();
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                executor.execute(&context, &manager, &cancel).await
            })
        };
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(EngineError::Panicked(e.to_string())),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(outputs) => {
                info!(phase = %phase, elapsed_ms = elapsed.as_millis(), "Phase complete");
                PhaseResult {
                    phase,
                    success: true,
                    duration_seconds: elapsed.as_secs_f64(),
                    error: None,
                    outputs,
                }
            }
            Err(e) => {
                error!(phase = %phase, error = %e, elapsed_ms = elapsed.as_millis(), "Phase failed");
                PhaseResult {
                    phase,
                    success: false,
                    duration_seconds: elapsed.as_secs_f64(),
                    error: Some(e.to_string()),
                    outputs: Map::new(),
                }
            }
        }
    }
}

fn create_context(request: &AnalysisRequest) -> AnalysisContext {
    let source = Some("init");
    let mut context = AnalysisContext::new();
    context.set(DataLayer::Context, "ticker", json!(request.ticker), source);
    context.set(DataLayer::Context, "trade_date", json!(request.trade_date), source);
    if let Some(market) = &request.market_type {
        context.set(DataLayer::Context, "market_type", json!(market), source);
    }
    if let Some(name) = &request.company_name {
        context.set(DataLayer::Context, "company_name", json!(name), source);
    }
    for (key, value) in &request.extra {
        context.set(DataLayer::Context, key, value.clone(), source);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FailingPhase;

    fn stub_config() -> EngineConfig {
        EngineConfig {
            selected_analysts: vec!["market_analyst".into()],
            use_stub: true,
            ..Default::default()
        }
    }

    #[test]
    fn request_seeds_context() {
        let request = AnalysisRequest::new("000858.SZ", "2024-01-15")
            .company_name("Wuliangye")
            .extra("session", json!("morning"));
        let context = create_context(&request);
        assert_eq!(context.get_str(DataLayer::Context, "company_name"), Some("Wuliangye"));
        assert_eq!(context.get_str(DataLayer::Context, "session"), Some("morning"));
        assert!(!context.contains(DataLayer::Context, "market_type"));
        assert_eq!(context.get_field_source(DataLayer::Context, "ticker"), Some("init"));
    }

    #[tokio::test]
    async fn stub_run_succeeds() {
        let engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        let result = engine.analyze(AnalysisRequest::new("000001", "2024-01-15")).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.phase_results.len(), 5);
        assert!(result.final_decision.is_some());
        assert!(!result.access_log.is_empty());

        let summary = result.context_summary();
        assert_eq!(summary["context"]["market_type"], "cn");
        assert!(summary["reports"].as_array().unwrap().contains(&json!("market_report")));
        assert!(summary["lineage_count"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn finished_run_leaves_caller_token_alone() {
        let engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        let token = CancellationToken::new();
        let result = engine
            .analyze_with_cancel(AnalysisRequest::new("000001", "2024-01-15"), token.clone())
            .await;
        assert!(result.success);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn missing_executor_is_skipped() {
        let mut engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        engine.remove_phase_executor(AnalysisPhase::Analysts);
        let result = engine.analyze(AnalysisRequest::new("000001", "2024-01-15")).await;
        assert!(result.success);
        assert_eq!(result.phase_results[1].outputs["skipped"], true);
    }

    #[tokio::test]
    async fn panicking_phase_is_contained() {
        let mut engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        engine.register_phase_executor(
            AnalysisPhase::TradeDecision,
            Arc::new(FailingPhase::panicking(AnalysisPhase::TradeDecision)),
        );
        let result = engine.analyze(AnalysisRequest::new("000001", "2024-01-15")).await;

        assert!(!result.success);
        assert_eq!(result.phase_results.len(), 4);
        assert!(result.phase_results[3].error.as_deref().unwrap().contains("panicked"));
        assert!(result.final_decision.is_none());
    }

    #[tokio::test]
    async fn empty_ticker_fails_first_phase() {
        let engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        let result = engine.analyze(AnalysisRequest::new("", "2024-01-15")).await;
        assert!(!result.success);
        assert_eq!(result.phase_results.len(), 1);
        assert!(result.error.unwrap().starts_with("phase data_collection failed"));
    }

    #[test]
    fn builtin_contracts_validate() {
        let engine = StockAnalysisEngine::builder(stub_config()).build().unwrap();
        let results = engine.validate_contracts();
        assert!(results.values().all(|r| r.is_valid));
        assert_eq!(engine.contract_order().unwrap().len(), 14);
    }
}
