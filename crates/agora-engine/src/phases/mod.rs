//! The five analysis phases and the executor trait they share.

pub mod analysts;
pub mod data_collection;
pub mod research_debate;
pub mod risk_assessment;
pub mod trade_decision;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agora_models::context::LegacyState;
use agora_models::layer::AgentDataContract;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::access::{DataAccessManager, SharedContext};
use crate::agent::Agent;
use crate::error::{AgentError, EngineError};
use crate::integrator::AgentIntegrator;

pub use analysts::AnalystsPhase;
pub use data_collection::DataCollectionPhase;
pub use research_debate::ResearchDebatePhase;
pub use risk_assessment::RiskAssessmentPhase;
pub use trade_decision::TradeDecisionPhase;

/// Summary a phase returns. The full results live in the context.
pub type PhaseOutputs = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    DataCollection,
    Analysts,
    ResearchDebate,
    TradeDecision,
    RiskAssessment,
}

impl AnalysisPhase {
    /// Run order. No phase runs twice.
    pub const ALL: [AnalysisPhase; 5] = [
        AnalysisPhase::DataCollection,
        AnalysisPhase::Analysts,
        AnalysisPhase::ResearchDebate,
        AnalysisPhase::TradeDecision,
        AnalysisPhase::RiskAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisPhase::DataCollection => "data_collection",
            AnalysisPhase::Analysts => "analysts",
            AnalysisPhase::ResearchDebate => "research_debate",
            AnalysisPhase::TradeDecision => "trade_decision",
            AnalysisPhase::RiskAssessment => "risk_assessment",
        }
    }

    /// 1-based position in the pipeline.
    pub fn number(&self) -> u32 {
        match self {
            AnalysisPhase::DataCollection => 1,
            AnalysisPhase::Analysts => 2,
            AnalysisPhase::ResearchDebate => 3,
            AnalysisPhase::TradeDecision => 4,
            AnalysisPhase::RiskAssessment => 5,
        }
    }
}

impl fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of the pipeline. Mockable for testing.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn phase(&self) -> AnalysisPhase;

    fn name(&self) -> &str {
        self.phase().as_str()
    }

    /// Contracts of the agents this phase drives.
    fn contracts(&self) -> Vec<AgentDataContract> {
        Vec::new()
    }

    /// Whether every required explicit input of every contract is present.
    ///
    /// Advisory: the engine logs a `false` and runs the phase anyway.
    fn validate_inputs(&self, context: &SharedContext, _manager: &DataAccessManager) -> bool {
        let mut ok = true;
        for contract in self.contracts() {
            for access in contract.inputs.iter().filter(|a| a.required) {
                for field in &access.fields {
                    let present = context
                        .get(access.layer, field)
                        .is_some_and(|v| !v.is_null());
                    if !present {
                        warn!(
                            phase = %self.name(),
                            agent = %contract.agent_id,
                            field = %format!("{}.{}", access.layer, field),
                            "Required input missing"
                        );
                        ok = false;
                    }
                }
            }
        }
        ok
    }

    async fn execute(
        &self,
        context: &SharedContext,
        manager: &DataAccessManager,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutputs, EngineError>;
}

/// Agent lookup and invocation shared by the agent-driven phases.
#[derive(Clone)]
pub struct AgentRunner {
    integrator: Arc<AgentIntegrator>,
    timeout: Duration,
    use_stub: bool,
}

impl AgentRunner {
    pub fn new(integrator: Arc<AgentIntegrator>, timeout: Duration, use_stub: bool) -> Self {
        Self {
            integrator,
            timeout,
            use_stub,
        }
    }

    pub fn integrator(&self) -> &AgentIntegrator {
        &self.integrator
    }

    /// `None` in stub mode or when no agent resolves for `agent_id`.
    pub fn agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        if self.use_stub {
            return None;
        }
        self.integrator.get_agent(agent_id)
    }

    pub fn contract(&self, agent_id: &str) -> Result<AgentDataContract, EngineError> {
        self.integrator.contract(agent_id).cloned().ok_or_else(|| {
            EngineError::agent(agent_id, AgentError::Unavailable("no data contract".into()))
        })
    }

    /// Contracts for `ids`, skipping unknown ones.
    pub fn contracts_of<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<AgentDataContract> {
        ids.into_iter()
            .filter_map(|id| self.integrator.contract(id).cloned())
            .collect()
    }

    /// Run `agent` under the per-agent deadline, racing cancellation.
    pub async fn run(
        &self,
        agent: &dyn Agent,
        state: &LegacyState,
        cancel: &CancellationToken,
    ) -> Result<LegacyState, EngineError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = tokio::time::timeout(self.timeout, agent.run(state)) => match result {
                Ok(Ok(update)) => Ok(update),
                Ok(Err(e)) => Err(EngineError::agent(agent.id(), e)),
                Err(_) => Err(EngineError::agent(
                    agent.id(),
                    AgentError::Timeout(self.timeout.as_secs()),
                )),
            },
        }
    }
}

/// A typed value an agent handed back under `key`.
pub(crate) fn take_update<T: serde::de::DeserializeOwned>(
    agent_id: &str,
    update: &LegacyState,
    key: &str,
) -> Result<T, EngineError> {
    let value = update.get(key).cloned().ok_or_else(|| {
        EngineError::agent(agent_id, AgentError::Parse(format!("missing {key} in output")))
    })?;
    serde_json::from_value(value)
        .map_err(|e| EngineError::agent(agent_id, AgentError::Parse(format!("{key}: {e}"))))
}
