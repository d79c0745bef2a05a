use agora_models::decision::{TradeAction, TradeSignal};
use agora_models::layer::{AgentDataContract, DataLayer};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{take_update, AgentRunner, AnalysisPhase, PhaseExecutor, PhaseOutputs};
use crate::access::{DataAccessManager, SharedContext};
use crate::error::EngineError;
use crate::parser::parse_stated_signal;
use crate::scoring::{position_for, score_plan, score_text, truncate_chars};

const TRADER: &str = "trader";
const RATIONALE_CHARS: usize = 500;

/// Turns the investment plan into a structured trade signal.
pub struct TradeDecisionPhase {
    runner: AgentRunner,
}

impl TradeDecisionPhase {
    pub fn new(runner: AgentRunner) -> Self {
        Self { runner }
    }
}

/// Signal from the trader's text: its stated JSON call when present, keyword
/// scoring otherwise.
fn signal_from_text(ticker: &str, text: &str) -> TradeSignal {
    let (action, confidence, position_size) = match parse_stated_signal(text) {
        Some(stated) => {
            let confidence = stated.confidence.unwrap_or_else(|| Decimal::new(5, 1));
            let position = stated
                .position_size
                .unwrap_or_else(|| position_for(stated.action, confidence));
            (stated.action, confidence, position)
        }
        None => {
            let (action, confidence) = score_text(text);
            (action, confidence, position_for(action, confidence))
        }
    };
    build_signal(ticker, action, confidence, position_size, text)
}

fn build_signal(
    ticker: &str,
    action: TradeAction,
    confidence: Decimal,
    position_size: Decimal,
    rationale: &str,
) -> TradeSignal {
    let position_size = if action == TradeAction::Hold {
        Decimal::ZERO
    } else {
        position_size
    };
    TradeSignal {
        ticker: ticker.to_string(),
        action,
        position_size,
        confidence,
        rationale: truncate_chars(rationale, RATIONALE_CHARS),
        generated_at: Utc::now(),
    }
}

fn plan_text(plan: &Value) -> String {
    match plan {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PhaseExecutor for TradeDecisionPhase {
    fn phase(&self) -> AnalysisPhase {
        AnalysisPhase::TradeDecision
    }

    fn contracts(&self) -> Vec<AgentDataContract> {
        self.runner.contracts_of([TRADER])
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

        let plan = match context.get(DataLayer::Decisions, "investment_plan") {
            Some(plan) if !plan.is_null() && plan.as_str() != Some("") => plan,
            _ => {
                warn!(ticker = %ticker, "No investment plan, skipping trade decision");
                outputs.insert("skipped".into(), json!(true));
                return Ok(outputs);
            }
        };

        let contract = self.runner.contract(TRADER)?;
        let (signal, trader_plan, source) = match self.runner.agent(TRADER) {
            Some(agent) => {
                let state = self.runner.integrator().state_for(TRADER, &contract, manager);
                let update = self.runner.run(agent.as_ref(), &state, cancel).await?;
                let text: String = take_update(TRADER, &update, "trader_investment_plan")?;
                (signal_from_text(&ticker, &text), text, "agent")
            }
            None => {
                info!(ticker = %ticker, "No trader agent, scoring the investment plan");
                let (action, confidence) = score_plan(&plan);
                let text = plan_text(&plan);
                let signal = build_signal(
                    &ticker,
                    action,
                    confidence,
                    position_for(action, confidence),
                    &text,
                );
                let trader_plan = format!(
                    "Keyword scoring of the investment plan: {action} at confidence {confidence}"
                );
                (signal, trader_plan, "keyword_fallback")
            }
        };

        info!(
            ticker = %ticker,
            action = %signal.action,
            confidence = %signal.confidence,
            position_size = %signal.position_size,
            source,
            "Trade signal"
        );

        let mut writes = Map::new();
        writes.insert("trade_signal".into(), serde_json::to_value(&signal)?);
        writes.insert("trader_investment_plan".into(), json!(trader_plan));
        manager.set_data(TRADER, &contract, &writes);

        outputs.insert("action".into(), json!(signal.action));
        outputs.insert("confidence".into(), json!(signal.confidence));
        outputs.insert("position_size".into(), json!(signal.position_size));
        outputs.insert("source".into(), json!(source));
        Ok(outputs)
    }
}
