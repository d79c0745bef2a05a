//! Compile-time table of the built-in agents.

use std::sync::Arc;

use agora_models::decision::RiskProfile;

use crate::agent::{Agent, AgentDeps, AgentRole, RoleAgent};

pub type AgentFactory = fn(&str, AgentRole, &AgentDeps) -> Arc<dyn Agent>;

#[derive(Clone, Copy)]
pub struct AgentRegistration {
    pub agent_id: &'static str,
    pub role: AgentRole,
    factory: AgentFactory,
}

fn role_agent(id: &str, role: AgentRole, deps: &AgentDeps) -> Arc<dyn Agent> {
    Arc::new(RoleAgent::new(id, role, deps))
}

const fn analyst(
    agent_id: &'static str,
    report_field: &'static str,
    domain: &'static str,
) -> AgentRegistration {
    AgentRegistration {
        agent_id,
        role: AgentRole::Analyst {
            report_field,
            domain,
        },
        factory: role_agent,
    }
}

const fn entry(agent_id: &'static str, role: AgentRole) -> AgentRegistration {
    AgentRegistration {
        agent_id,
        role,
        factory: role_agent,
    }
}

static BUILTIN: [AgentRegistration; 14] = [
    analyst("market_analyst", "market_report", "market"),
    analyst("news_analyst", "news_report", "news"),
    analyst("sentiment_analyst", "sentiment_report", "social"),
    analyst("fundamentals_analyst", "fundamentals_report", "fundamentals"),
    analyst("sector_analyst", "sector_report", "sector"),
    analyst("index_analyst", "index_report", "index"),
    entry("bull_researcher", AgentRole::Bull),
    entry("bear_researcher", AgentRole::Bear),
    entry("research_manager", AgentRole::ResearchManager),
    entry("trader", AgentRole::Trader),
    entry("risky_risk", AgentRole::RiskDebater(RiskProfile::Risky)),
    entry("safe_risk", AgentRole::RiskDebater(RiskProfile::Safe)),
    entry("neutral_risk", AgentRole::RiskDebater(RiskProfile::Neutral)),
    entry("risk_manager", AgentRole::RiskManager),
];

/// Maps agent ids to their role and constructor.
#[derive(Clone)]
pub struct AgentRegistry {
    entries: Vec<AgentRegistration>,
}

impl AgentRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.to_vec(),
        }
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.agent_id).collect()
    }

    pub fn role(&self, agent_id: &str) -> Option<AgentRole> {
        self.find(agent_id).map(|e| e.role)
    }

    /// Construct the agent registered under `agent_id`.
    pub fn build(&self, agent_id: &str, deps: &AgentDeps) -> Option<Arc<dyn Agent>> {
        let entry = self.find(agent_id)?;
        Some((entry.factory)(entry.agent_id, entry.role, deps))
    }

    fn find(&self, agent_id: &str) -> Option<&AgentRegistration> {
        self.entries.iter().find(|e| e.agent_id == agent_id)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;
    use crate::toolkit::Toolkit;
    use agora_models::contracts::ContractCatalog;

    #[test]
    fn registry_covers_every_builtin_contract() {
        let registry = AgentRegistry::builtin();
        let catalog = ContractCatalog::builtin();
        let mut ids = registry.ids();
        ids.sort_unstable();
        let mut contract_ids: Vec<&str> = catalog.all().iter().map(|c| c.agent_id.as_str()).collect();
        contract_ids.sort_unstable();
        assert_eq!(ids, contract_ids);
    }

    #[test]
    fn analyst_roles_match_contract_reports() {
        let registry = AgentRegistry::builtin();
        let catalog = ContractCatalog::builtin();
        for id in catalog.analyst_ids() {
            match registry.role(id) {
                Some(AgentRole::Analyst { report_field, .. }) => {
                    assert_eq!(Some(report_field), catalog.report_field(id));
                }
                other => panic!("{id} has role {other:?}"),
            }
        }
    }

    #[test]
    fn build_known_and_unknown() {
        let deps = AgentDeps {
            llm: Arc::new(ScriptedLlm::constant("ok")),
            memory: None,
            toolkit: Arc::new(Toolkit::new()),
            n_matches: 2,
        };
        let registry = AgentRegistry::builtin();
        assert_eq!(registry.build("trader", &deps).unwrap().id(), "trader");
        assert!(registry.build("astrologer", &deps).is_none());
        assert_eq!(
            registry.role("neutral_risk"),
            Some(AgentRole::RiskDebater(RiskProfile::Neutral))
        );
    }
}
