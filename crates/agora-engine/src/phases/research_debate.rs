use agora_models::decision::{DebateSide, InvestmentDebateState};
use agora_models::layer::{AgentDataContract, DataLayer};
use async_trait::async_trait;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{take_update, AgentRunner, AnalysisPhase, PhaseExecutor, PhaseOutputs};
use crate::access::{DataAccessManager, SharedContext};
use crate::error::{AgentError, EngineError};

const BULL: &str = "bull_researcher";
const BEAR: &str = "bear_researcher";
const MANAGER: &str = "research_manager";

/// Alternating bull/bear rounds, then the research manager's plan.
pub struct ResearchDebatePhase {
    runner: AgentRunner,
    rounds: u32,
}

impl ResearchDebatePhase {
    pub fn new(runner: AgentRunner, rounds: u32) -> Self {
        Self { runner, rounds }
    }

    async fn turn(
        &self,
        agent_id: &str,
        side: DebateSide,
        round: u32,
        debate: InvestmentDebateState,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> Result<InvestmentDebateState, EngineError> {
        let Some(agent) = self.runner.agent(agent_id) else {
            let ticker = manager
                .context()
                .get_string(DataLayer::Context, "ticker")
                .unwrap_or_default();
            let mut debate = debate;
            let stance = match side {
                DebateSide::Bull => "bullish",
                DebateSide::Bear => "bearish",
            };
            debate.record(side, &format!("[stub] {stance} case for {ticker}, round {round}"));
            return Ok(debate);
        };

        let contract = self.runner.contract(agent_id)?;
        let mut state = self.runner.integrator().state_for(agent_id, &contract, manager);
        state.insert("investment_debate_state".into(), serde_json::to_value(&debate)?);
        let update = self.runner.run(agent.as_ref(), &state, cancel).await?;
        let next: InvestmentDebateState = take_update(agent_id, &update, "investment_debate_state")?;
        debug!(agent = %agent_id, round, count = next.count, "Debate turn");
        Ok(next)
    }
}

#[async_trait]
impl PhaseExecutor for ResearchDebatePhase {
    fn phase(&self) -> AnalysisPhase {
        AnalysisPhase::ResearchDebate
    }

    fn contracts(&self) -> Vec<AgentDataContract> {
        self.runner.contracts_of([BULL, BEAR, MANAGER])
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
        info!(ticker = %ticker, rounds = self.rounds, "Starting research debate");

        let mut debate = InvestmentDebateState::default();
        for round in 1..=self.rounds {
            debate = self
                .turn(BULL, DebateSide::Bull, round, debate, manager, cancel)
                .await?;
            debate = self
                .turn(BEAR, DebateSide::Bear, round, debate, manager, cancel)
                .await?;
        }

        let bull_report = debate.bull_history.trim().to_string();
        let bear_report = debate.bear_history.trim().to_string();
        let mut bull = Map::new();
        bull.insert("bull_report".into(), json!(bull_report));
        manager.set_data(BULL, &self.runner.contract(BULL)?, &bull);
        let mut bear = Map::new();
        bear.insert("bear_report".into(), json!(bear_report));
        manager.set_data(BEAR, &self.runner.contract(BEAR)?, &bear);

        let manager_contract = self.runner.contract(MANAGER)?;
        let plan = match self.runner.agent(MANAGER) {
            Some(agent) => {
                let mut state = self
                    .runner
                    .integrator()
                    .state_for(MANAGER, &manager_contract, manager);
                state.insert("investment_debate_state".into(), serde_json::to_value(&debate)?);
                let update = self.runner.run(agent.as_ref(), &state, cancel).await?;
                let plan: String = take_update(MANAGER, &update, "investment_plan")?;
                if plan.trim().is_empty() {
                    return Err(EngineError::agent(
                        MANAGER,
                        AgentError::Parse("empty investment_plan".into()),
                    ));
                }
                if update.contains_key("investment_debate_state") {
                    debate = take_update(MANAGER, &update, "investment_debate_state")?;
                }
                plan
            }
            None => {
                info!(agent = MANAGER, "No research manager, using stub plan");
                format!("[stub] investment plan for {ticker}")
            }
        };
        if debate.judge_decision.is_empty() {
            debate.judge_decision = plan.clone();
        }

        let mut decisions = Map::new();
        decisions.insert("investment_plan".into(), json!(plan));
        decisions.insert("investment_debate".into(), serde_json::to_value(&debate)?);
        manager.set_data(MANAGER, &manager_contract, &decisions);

        let mut outputs = Map::new();
        outputs.insert("ticker".into(), json!(ticker));
        outputs.insert("debate_rounds".into(), json!(self.rounds));
        outputs.insert("bull_report".into(), json!(bull_report));
        outputs.insert("bear_report".into(), json!(bear_report));
        outputs.insert("investment_plan".into(), json!(plan));
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentDeps;
    use crate::integrator::AgentIntegrator;
    use crate::registry::AgentRegistry;
    use crate::test_support::{ScriptedAgent, ScriptedLlm};
    use crate::toolkit::Toolkit;
    use agora_models::context::AnalysisContext;
    use agora_models::contracts::ContractCatalog;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> SharedContext {
        let context = SharedContext::new(AnalysisContext::new());
        context.set(DataLayer::Context, "ticker", json!("000001"), Some("init"));
        context.set(DataLayer::Reports, "market_report", json!("steady uptrend"), Some("market_analyst"));
        context
    }

    fn runner(integrator: AgentIntegrator, use_stub: bool) -> AgentRunner {
        AgentRunner::new(Arc::new(integrator), Duration::from_secs(5), use_stub)
    }

    fn integrator(deps: Option<AgentDeps>) -> AgentIntegrator {
        AgentIntegrator::new(Arc::new(ContractCatalog::builtin()), AgentRegistry::builtin(), deps)
    }

    async fn execute(phase: &ResearchDebatePhase, context: &SharedContext) -> Result<PhaseOutputs, EngineError> {
        let manager = DataAccessManager::new(context.clone());
        phase.execute(context, &manager, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn stub_debate_still_yields_plan() {
        let context = context();
        let phase = ResearchDebatePhase::new(runner(integrator(None), true), 2);
        let outputs = execute(&phase, &context).await.unwrap();

        assert_eq!(outputs["investment_plan"], "[stub] investment plan for 000001");
        let debate: InvestmentDebateState =
            serde_json::from_value(context.get(DataLayer::Decisions, "investment_debate").unwrap()).unwrap();
        assert_eq!(debate.count, 4);
        assert_eq!(debate.judge_decision, "[stub] investment plan for 000001");
        assert!(context
            .get_string(DataLayer::Reports, "bear_report")
            .unwrap()
            .contains("round 2"));
    }

    #[tokio::test]
    async fn llm_agents_alternate_and_manager_decides() {
        let llm = ScriptedLlm::new()
            .when("bullish researcher", "Margins are expanding.")
            .when("bearish researcher", "Valuation is stretched.")
            .when("research manager", "Recommendation: Buy with a staged entry.");
        let deps = AgentDeps {
            llm: Arc::new(llm),
            memory: None,
            toolkit: Arc::new(Toolkit::new()),
            n_matches: 2,
        };
        let context = context();
        let phase = ResearchDebatePhase::new(runner(integrator(Some(deps)), false), 1);
        let outputs = execute(&phase, &context).await.unwrap();

        assert_eq!(outputs["bull_report"], "Bull Analyst: Margins are expanding.");
        assert_eq!(outputs["bear_report"], "Bear Analyst: Valuation is stretched.");
        assert_eq!(
            context.get_string(DataLayer::Decisions, "investment_plan").as_deref(),
            Some("Recommendation: Buy with a staged entry.")
        );
        assert_eq!(
            context.get_field_source(DataLayer::Decisions, "investment_plan").as_deref(),
            Some(MANAGER)
        );
        let debate = context.get(DataLayer::Decisions, "investment_debate").unwrap();
        assert!(debate["history"].as_str().unwrap().find("Bull").unwrap()
            < debate["history"].as_str().unwrap().find("Bear").unwrap());
    }

    #[tokio::test]
    async fn failing_researcher_fails_phase() {
        let integrator = integrator(None).with_agent(Arc::new(ScriptedAgent::failing(BEAR)));
        let context = context();
        let phase = ResearchDebatePhase::new(runner(integrator, false), 1);
        match execute(&phase, &context).await {
            Err(EngineError::Agent { agent, .. }) => assert_eq!(agent, BEAR),
            other => panic!("expected bear failure, got {other:?}"),
        }
        assert!(context.get(DataLayer::Decisions, "investment_plan").is_none());
    }

    #[tokio::test]
    async fn researcher_without_debate_state_is_rejected() {
        let integrator = integrator(None)
            .with_agent(Arc::new(ScriptedAgent::new(BULL, json!({"bull_report": "up"}))));
        let phase = ResearchDebatePhase::new(runner(integrator, false), 1);
        assert!(matches!(
            execute(&phase, &context()).await,
            Err(EngineError::Agent {
                source: AgentError::Parse(_),
                ..
            })
        ));
    }
}
