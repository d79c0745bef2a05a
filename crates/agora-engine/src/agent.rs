use std::sync::Arc;

use agora_memory::{Memory, MemoryProvider};
use agora_models::context::LegacyState;
use agora_models::decision::{DebateSide, InvestmentDebateState, RiskDebateState, RiskProfile};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::llm::LlmProvider;
use crate::prompts::{system_prompt, user_prompt};
use crate::toolkit::Toolkit;

/// Legacy keys of the reports every downstream role reads.
pub const REPORT_KEYS: [&str; 6] = [
    "market_report",
    "sentiment_report",
    "news_report",
    "fundamentals_report",
    "sector_report",
    "index_report",
];

/// One analysis agent: flat state in, partial update out. Mockable for testing.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, state: &LegacyState) -> Result<LegacyState, AgentError>;
}

/// What an agent does in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Analyst {
        report_field: &'static str,
        domain: &'static str,
    },
    Bull,
    Bear,
    ResearchManager,
    Trader,
    RiskDebater(RiskProfile),
    RiskManager,
}

impl AgentRole {
    /// Whether the role consults past situations before answering.
    pub fn uses_memory(&self) -> bool {
        matches!(
            self,
            AgentRole::Bull
                | AgentRole::Bear
                | AgentRole::ResearchManager
                | AgentRole::Trader
                | AgentRole::RiskManager
        )
    }
}

/// Collaborators an agent factory may draw on.
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub memory: Option<Arc<dyn MemoryProvider>>,
    pub toolkit: Arc<Toolkit>,
    pub n_matches: usize,
}

/// LLM-backed agent whose behaviour is chosen by its role.
pub struct RoleAgent {
    id: String,
    role: AgentRole,
    llm: Arc<dyn LlmProvider>,
    memory: Option<Arc<dyn Memory>>,
    toolkit: Arc<Toolkit>,
    n_matches: usize,
}

impl RoleAgent {
    pub fn new(id: &str, role: AgentRole, deps: &AgentDeps) -> Self {
        let memory = if role.uses_memory() {
            deps.memory
                .as_ref()
                .and_then(|provider| provider.get_memory_by_agent(id))
        } else {
            None
        };
        Self {
            id: id.to_string(),
            role,
            llm: Arc::clone(&deps.llm),
            memory,
            toolkit: Arc::clone(&deps.toolkit),
            n_matches: deps.n_matches,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    /// Past recommendations for similar situations. Memory trouble degrades to none.
    async fn reflections(&self, state: &LegacyState) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let situation = situation_of(state);
        match memory.get_memories(&situation, self.n_matches).await {
            Ok(matches) => matches.into_iter().map(|m| m.recommendation).collect(),
            Err(e) => {
                warn!(agent = %self.id, error = %e, "Memory lookup failed, continuing without");
                Vec::new()
            }
        }
    }

    async fn tool_data(&self, domain: &str, state: &LegacyState) -> Map<String, Value> {
        let ticker = text(state, "company_of_interest");
        let trade_date = text(state, "trade_date");
        let mut data = Map::new();
        for tool in self.toolkit.tools_for(domain) {
            match tool.fetch(ticker, trade_date).await {
                Ok(value) => {
                    data.insert(tool.name().to_string(), value);
                }
                Err(e) => {
                    warn!(agent = %self.id, tool = tool.name(), error = %e, "Tool fetch failed");
                    data.insert(tool.name().to_string(), json!({ "error": e.to_string() }));
                }
            }
        }
        data
    }

    async fn ask(&self, input: Value) -> Result<String, AgentError> {
        let system = system_prompt(&self.role);
        let prompt = user_prompt(&input)?;
        debug!(agent = %self.id, prompt_len = prompt.len(), "Calling LLM");
        let text = self.llm.complete(&system, &prompt).await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Agent for RoleAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, state: &LegacyState) -> Result<LegacyState, AgentError> {
        let mut update = Map::new();
        match self.role {
            AgentRole::Analyst {
                report_field,
                domain,
            } => {
                let tool_data = self.tool_data(domain, state).await;
                let report = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "company_name": text(state, "company_name"),
                        "trade_date": text(state, "trade_date"),
                        "market_type": text(state, "market_type"),
                        "tool_data": tool_data,
                    }))
                    .await?;
                update.insert(report_field.to_string(), Value::String(report));
            }
            AgentRole::Bull | AgentRole::Bear => {
                let mut debate: InvestmentDebateState = object(state, "investment_debate_state")?;
                let reflections = self.reflections(state).await;
                let argument = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "reports": reports(state),
                        "debate_history": debate.history,
                        "last_opponent_argument": debate.current_response,
                        "past_reflections": reflections,
                    }))
                    .await?;
                let side = if self.role == AgentRole::Bull {
                    DebateSide::Bull
                } else {
                    DebateSide::Bear
                };
                debate.record(side, &argument);
                update.insert("investment_debate_state".into(), serde_json::to_value(debate)?);
            }
            AgentRole::ResearchManager => {
                let mut debate: InvestmentDebateState = object(state, "investment_debate_state")?;
                let reflections = self.reflections(state).await;
                let plan = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "reports": reports(state),
                        "debate_history": debate.history,
                        "past_reflections": reflections,
                    }))
                    .await?;
                debate.judge_decision = plan.clone();
                update.insert("investment_plan".into(), Value::String(plan));
                update.insert("investment_debate_state".into(), serde_json::to_value(debate)?);
            }
            AgentRole::Trader => {
                let reflections = self.reflections(state).await;
                let plan = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "investment_plan": text(state, "investment_plan"),
                        "reports": reports(state),
                        "past_reflections": reflections,
                    }))
                    .await?;
                update.insert("trader_investment_plan".into(), Value::String(plan));
            }
            AgentRole::RiskDebater(profile) => {
                let mut debate: RiskDebateState = object(state, "risk_debate_state")?;
                let others: Map<String, Value> = RiskProfile::ALL
                    .iter()
                    .filter(|p| **p != profile)
                    .map(|p| (p.label().to_string(), Value::String(last_turn(&debate, *p))))
                    .collect();
                let argument = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "trader_plan": text(state, "trader_investment_plan"),
                        "reports": reports(state),
                        "debate_history": debate.history,
                        "other_arguments": others,
                    }))
                    .await?;
                debate.record(profile, &argument);
                update.insert("risk_debate_state".into(), serde_json::to_value(debate)?);
            }
            AgentRole::RiskManager => {
                let mut debate: RiskDebateState = object(state, "risk_debate_state")?;
                let reflections = self.reflections(state).await;
                let decision = self
                    .ask(json!({
                        "ticker": text(state, "company_of_interest"),
                        "investment_plan": text(state, "investment_plan"),
                        "trader_plan": text(state, "trader_investment_plan"),
                        "risk_debate_history": debate.history,
                        "past_reflections": reflections,
                    }))
                    .await?;
                debate.judge_decision = decision.clone();
                update.insert("final_trade_decision".into(), Value::String(decision));
                update.insert("risk_debate_state".into(), serde_json::to_value(debate)?);
            }
        }
        Ok(update)
    }
}

fn text<'a>(state: &'a LegacyState, key: &str) -> &'a str {
    state.get(key).and_then(Value::as_str).unwrap_or("")
}

/// A debate state from the flat state; missing or null means a fresh debate.
fn object<T: serde::de::DeserializeOwned + Default>(
    state: &LegacyState,
    key: &str,
) -> Result<T, AgentError> {
    match state.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| AgentError::Parse(format!("{key}: {e}"))),
    }
}

fn reports(state: &LegacyState) -> Map<String, Value> {
    REPORT_KEYS
        .iter()
        .filter_map(|key| {
            let report = text(state, key);
            (!report.is_empty()).then(|| (key.to_string(), Value::String(report.to_string())))
        })
        .collect()
}

/// The text memory is matched against: the four core analyst reports.
fn situation_of(state: &LegacyState) -> String {
    REPORT_KEYS[..4]
        .iter()
        .map(|key| text(state, key))
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn last_turn(debate: &RiskDebateState, profile: RiskProfile) -> String {
    match profile {
        RiskProfile::Risky => debate.current_risky_response.clone(),
        RiskProfile::Safe => debate.current_safe_response.clone(),
        RiskProfile::Neutral => debate.current_neutral_response.clone(),
    }
}
