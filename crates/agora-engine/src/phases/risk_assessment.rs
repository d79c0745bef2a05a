use agora_models::decision::{FinalDecision, RiskDebateState, RiskProfile, TradeSignal};
use agora_models::layer::{AgentDataContract, DataLayer};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{take_update, AgentRunner, AnalysisPhase, PhaseExecutor, PhaseOutputs};
use crate::access::{DataAccessManager, SharedContext};
use crate::error::EngineError;
use crate::scoring::{risk_adjusted_position, risk_level, score_text, truncate_chars};

const RISK_MANAGER: &str = "risk_manager";
const RATIONALE_CHARS: usize = 500;
const ORIGINAL_RATIONALE_CHARS: usize = 200;

/// Risk committee debate and the final, risk-adjusted decision.
pub struct RiskAssessmentPhase {
    runner: AgentRunner,
    rounds: u32,
    profiles: Vec<RiskProfile>,
}

impl RiskAssessmentPhase {
    pub fn new(runner: AgentRunner, rounds: u32, profiles: Vec<RiskProfile>) -> Self {
        Self {
            runner,
            rounds,
            profiles,
        }
    }

    /// Runs every round and returns the transcript with the number of turns
    /// an agent actually argued. Missing debaters get a `[stub]` turn.
    async fn debate(
        &self,
        ticker: &str,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> Result<(RiskDebateState, usize), EngineError> {
        let mut debate = RiskDebateState::default();
        let mut argued = 0;
        for round in 1..=self.rounds {
            for profile in &self.profiles {
                let id = profile.agent_id();
                let Some(agent) = self.runner.agent(id) else {
                    debug!(agent = id, round, "No risk debater, stub turn");
                    debate.record(*profile, &format!("[stub] {id} view on {ticker}, round {round}"));
                    continue;
                };
                let contract = self.runner.contract(id)?;
                let mut state = self.runner.integrator().state_for(id, &contract, manager);
                state.insert("risk_debate_state".into(), serde_json::to_value(&debate)?);
                let update = self.runner.run(agent.as_ref(), &state, cancel).await?;
                debate = take_update(id, &update, "risk_debate_state")?;
                argued += 1;
            }
        }
        Ok((debate, argued))
    }
}

fn final_text(plan: &str, trader_plan: &str, assessment: &str) -> String {
    format!(
        "## Investment Plan\n\n{plan}\n\n## Trading Plan\n\n{trader_plan}\n\n## Risk Assessment\n\n{assessment}"
    )
}

#[async_trait]
impl PhaseExecutor for RiskAssessmentPhase {
    fn phase(&self) -> AnalysisPhase {
        AnalysisPhase::RiskAssessment
    }

    fn contracts(&self) -> Vec<AgentDataContract> {
        self.runner.contracts_of(
            self.profiles
                .iter()
                .map(RiskProfile::agent_id)
                .chain([RISK_MANAGER]),
        )
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
        let mut outputs = Map::new();
        outputs.insert("ticker".into(), json!(ticker));

        let signal: Option<TradeSignal> = context
            .get(DataLayer::Decisions, "trade_signal")
            .and_then(|v| serde_json::from_value(v).ok());
        let trader_plan = context.get_string(DataLayer::Decisions, "trader_investment_plan");
        if signal.is_none() && trader_plan.is_none() {
            warn!(ticker = %ticker, "No trade signal or trading plan, skipping risk assessment");
            outputs.insert("skipped".into(), json!(true));
            return Ok(outputs);
        }
        let trader_plan = trader_plan.unwrap_or_default();
        let plan = context
            .get_string(DataLayer::Decisions, "investment_plan")
            .unwrap_or_default();

        info!(ticker = %ticker, rounds = self.rounds, profiles = ?self.profiles, "Starting risk debate");
        let (mut debate, argued) = self.debate(&ticker, manager, cancel).await?;

        for profile in &self.profiles {
            let history = debate.history_of(*profile).trim();
            if history.is_empty() {
                continue;
            }
            let id = profile.agent_id();
            let mut report = Map::new();
            report.insert(format!("{id}_report"), json!(history));
            manager.set_data(id, &self.runner.contract(id)?, &report);
        }

        let manager_contract = self.runner.contract(RISK_MANAGER)?;
        let judgement = match self.runner.agent(RISK_MANAGER) {
            Some(agent) => {
                let mut state = self
                    .runner
                    .integrator()
                    .state_for(RISK_MANAGER, &manager_contract, manager);
                state.insert("risk_debate_state".into(), serde_json::to_value(&debate)?);
                let update = self.runner.run(agent.as_ref(), &state, cancel).await?;
                let decision: String = take_update(RISK_MANAGER, &update, "final_trade_decision")?;
                if update.contains_key("risk_debate_state") {
                    debate = take_update(RISK_MANAGER, &update, "risk_debate_state")?;
                }
                if debate.judge_decision.is_empty() {
                    debate.judge_decision = decision.clone();
                }
                Some(decision)
            }
            None => {
                info!(agent = RISK_MANAGER, "No risk manager, deciding by keyword scoring");
                None
            }
        };

        let assessment = match &judgement {
            Some(decision) => decision.clone(),
            // Stub turns carry no argument worth scoring
            None if argued > 0 && !debate.history.trim().is_empty() => {
                debate.history.trim().to_string()
            }
            None => "No risk debate was held.".to_string(),
        };
        let final_trade_decision = final_text(&plan, &trader_plan, &assessment);

        let scored = judgement.as_deref().unwrap_or(&final_trade_decision);
        let (action, confidence) = score_text(scored);
        let original_position = signal
            .as_ref()
            .map(|s| s.position_size)
            .unwrap_or(Decimal::ZERO);
        let decision = FinalDecision {
            ticker: ticker.clone(),
            action,
            position_size: risk_adjusted_position(action, confidence, original_position),
            confidence,
            risk_level: risk_level(&final_trade_decision),
            rationale: truncate_chars(scored, RATIONALE_CHARS),
            original_rationale: signal
                .as_ref()
                .map(|s| truncate_chars(&s.rationale, ORIGINAL_RATIONALE_CHARS))
                .unwrap_or_default(),
            decided_at: Utc::now(),
        };

        info!(
            ticker = %ticker,
            action = %decision.action,
            position_size = %decision.position_size,
            risk_level = ?decision.risk_level,
            "Final decision"
        );

        let mut writes = Map::new();
        writes.insert("risk_assessment".into(), serde_json::to_value(&debate)?);
        writes.insert("final_decision".into(), serde_json::to_value(&decision)?);
        writes.insert("final_trade_decision".into(), json!(final_trade_decision));
        manager.set_data(RISK_MANAGER, &manager_contract, &writes);

        outputs.insert("debate_rounds".into(), json!(self.rounds));
        outputs.insert("profiles".into(), json!(self.profiles));
        outputs.insert("action".into(), json!(decision.action));
        outputs.insert("position_size".into(), json!(decision.position_size));
        outputs.insert("risk_level".into(), json!(decision.risk_level));
        Ok(outputs)
    }
}
