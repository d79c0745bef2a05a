use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Agent timed out after {0} seconds")]
    Timeout(u64),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Memory error: {0}")]
    Memory(#[from] agora_memory::MemoryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Missing required context field: {0}")]
    MissingContext(String),

    #[error("Agent {agent} failed: {source}")]
    Agent {
        agent: String,
        #[source]
        source: AgentError,
    },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Dependency cycle between agents: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("Invalid agent contracts: {0:?}")]
    InvalidContracts(Vec<String>),

    #[error("Schema error: {0}")]
    Schema(#[from] agora_models::SchemaError),

    #[error("Phase panicked: {0}")]
    Panicked(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn agent(agent: &str, source: AgentError) -> Self {
        EngineError::Agent {
            agent: agent.to_string(),
            source,
        }
    }
}
