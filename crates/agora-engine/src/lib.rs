pub mod access;
pub mod agent;
pub mod engine;
pub mod error;
pub mod integrator;
pub mod llm;
pub mod parser;
pub mod phases;
pub mod prompts;
pub mod registry;
pub mod scoring;
pub mod toolkit;
pub mod validator;

pub mod test_support;

pub use access::{AccessLogEntry, DataAccessManager, SharedContext};
pub use agent::{Agent, AgentDeps, AgentRole, RoleAgent};
pub use engine::{AnalysisRequest, AnalysisResult, EngineBuilder, PhaseResult, StockAnalysisEngine};
pub use error::{AgentError, EngineError};
pub use integrator::AgentIntegrator;
pub use llm::{ClaudeCliConfig, ClaudeCliProvider, LlmProvider};
pub use phases::{AnalysisPhase, PhaseExecutor, PhaseOutputs};
pub use registry::AgentRegistry;
pub use toolkit::{DataTool, Toolkit};
pub use validator::{ContractValidator, ValidationResult};
