use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contracts::ANALYST_IDS;
use crate::decision::RiskProfile;

/// Top-level configuration for agora.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgoraConfig {
    pub engine: EngineConfig,
    /// Without an `[llm]` table every agent runs on its stub/fallback path.
    pub llm: Option<LlmConfig>,
    pub memory: MemoryConfig,
    pub schema: SchemaConfig,
}

/// Pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Analysts to run. Empty means all six built-ins.
    pub selected_analysts: Vec<String>,
    /// Upper bound on analysts running at once.
    pub max_workers: usize,
    pub research_debate_rounds: u32,
    pub risk_debate_rounds: u32,
    pub risk_profiles: Vec<RiskProfile>,
    /// Deadline for a single agent call.
    pub agent_timeout_seconds: u64,
    /// Force stub analysts even when an LLM is configured.
    pub use_stub: bool,
    /// Reject contracts that read fields the schema does not know.
    pub strict_contracts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            selected_analysts: Vec::new(),
            max_workers: 4,
            research_debate_rounds: 1,
            risk_debate_rounds: 1,
            risk_profiles: RiskProfile::ALL.to_vec(),
            agent_timeout_seconds: 120,
            use_stub: false,
            strict_contracts: false,
        }
    }
}

impl EngineConfig {
    /// The requested analysts, restricted to known ids, in request order.
    /// Unknown ids are logged and dropped.
    pub fn analysts(&self) -> Vec<String> {
        if self.selected_analysts.is_empty() {
            return ANALYST_IDS.iter().map(|s| s.to_string()).collect();
        }
        let mut picked: Vec<String> = Vec::new();
        for id in &self.selected_analysts {
            if !ANALYST_IDS.contains(&id.as_str()) {
                warn!(analyst = %id, known = ?ANALYST_IDS, "Unknown analyst id, skipping");
            } else if !picked.contains(id) {
                picked.push(id.clone());
            }
        }
        if picked.is_empty() {
            warn!(requested = ?self.selected_analysts, "No known analysts selected");
        }
        picked
    }
}

/// Claude CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            timeout_seconds: 90,
        }
    }
}

/// Situation memory store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// SQLite file. `None` keeps memories in process only.
    pub sqlite_path: Option<String>,
    pub hot_cache_capacity: u64,
    pub hot_cache_ttl_seconds: u64,
    pub n_matches: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sqlite_path: None,
            hot_cache_capacity: 1_000,
            hot_cache_ttl_seconds: 300,
            n_matches: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    /// TOML file with extension field definitions.
    pub extension_path: Option<String>,
}
