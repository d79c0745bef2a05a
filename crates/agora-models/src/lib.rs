pub mod config;
pub mod context;
pub mod contracts;
pub mod decision;
pub mod layer;
pub mod memory_record;
pub mod schema;

pub use config::{AgoraConfig, EngineConfig, LlmConfig, MemoryConfig, SchemaConfig};
pub use context::{field_for_legacy_key, legacy_key_for, AnalysisContext, LegacyState};
pub use contracts::{ContractCatalog, ANALYST_IDS, RISK_DEBATER_IDS};
pub use decision::{
    DebateSide, FinalDecision, InvestmentDebateState, RiskDebateState, RiskLevel, RiskProfile,
    TradeAction, TradeSignal,
};
pub use layer::{AgentDataContract, DataAccess, DataLayer, EmptyAgentId};
pub use memory_record::{memory_name_for_agent, MemoryRecord, MEMORY_AGENT_MAPPING, MEMORY_TABLE_DDL};
pub use schema::{DataSchema, FieldDefinition, FieldSource, FieldType, SchemaError};
