use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agora_models::context::{field_for_legacy_key, legacy_key_for, LegacyState};
use agora_models::contracts::ContractCatalog;
use agora_models::layer::{AgentDataContract, DataLayer};
use serde_json::Map;
use tracing::debug;

use crate::access::DataAccessManager;
use crate::agent::{Agent, AgentDeps};
use crate::registry::AgentRegistry;

/// Resolves agents by id and translates between the layered context and the
/// flat state agents consume.
pub struct AgentIntegrator {
    catalog: Arc<ContractCatalog>,
    registry: AgentRegistry,
    deps: Option<AgentDeps>,
    overrides: HashMap<String, Arc<dyn Agent>>,
    built: Mutex<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentIntegrator {
    /// Without `deps` (no LLM configured) only explicitly added agents exist.
    pub fn new(catalog: Arc<ContractCatalog>, registry: AgentRegistry, deps: Option<AgentDeps>) -> Self {
        Self {
            catalog,
            registry,
            deps,
            overrides: HashMap::new(),
            built: Mutex::new(HashMap::new()),
        }
    }

    /// Use `agent` for its id instead of the registry's.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.overrides.insert(agent.id().to_string(), agent);
        self
    }

    pub fn catalog(&self) -> &ContractCatalog {
        &self.catalog
    }

    pub fn contract(&self, agent_id: &str) -> Option<&AgentDataContract> {
        self.catalog.get(agent_id)
    }

    /// The agent for `agent_id`, or `None` when the stub/fallback path applies.
    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        if let Some(agent) = self.overrides.get(agent_id) {
            return Some(Arc::clone(agent));
        }
        let deps = self.deps.as_ref()?;
        let mut built = self.built.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(agent) = built.get(agent_id) {
            return Some(Arc::clone(agent));
        }
        let agent = self.registry.build(agent_id, deps)?;
        debug!(agent = %agent_id, "Built agent from registry");
        built.insert(agent_id.to_string(), Arc::clone(&agent));
        Some(agent)
    }

    /// Flat state for an agent: its readable data, keyed by legacy name where
    /// one exists.
    pub fn state_for(
        &self,
        agent_id: &str,
        contract: &AgentDataContract,
        manager: &DataAccessManager,
    ) -> LegacyState {
        let view = manager.get_data(agent_id, contract);
        let mut state = Map::new();
        for (field, value) in view {
            let key = contract
                .inputs
                .iter()
                .filter(|a| a.covers(Some(&field)))
                .find_map(|a| legacy_key_for(a.layer, &field))
                .map(str::to_string)
                .unwrap_or(field);
            state.insert(key, value);
        }
        state
    }

    /// Write an agent's update back through the manager. Keys outside the
    /// contract are dropped there.
    pub fn commit(
        &self,
        agent_id: &str,
        contract: &AgentDataContract,
        update: &LegacyState,
        manager: &DataAccessManager,
    ) -> Vec<(DataLayer, String)> {
        let outputs: Map<_, _> = update
            .iter()
            .map(|(key, value)| {
                let field = field_for_legacy_key(key)
                    .map(|(_, field)| field.to_string())
                    .unwrap_or_else(|| key.clone());
                (field, value.clone())
            })
            .collect();
        manager.set_data(agent_id, contract, &outputs)
    }
}
