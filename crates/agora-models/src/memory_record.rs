use serde::{Deserialize, Serialize};

/// One stored lesson: a past market situation and what was recommended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: i64,
    /// Named memory bank, e.g. `bull_memory`.
    pub memory_name: String,
    pub situation: String,
    pub recommendation: String,
    pub created_at: String,
}

/// SQLite table holding every memory bank.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS memory_entries (
///     id              INTEGER PRIMARY KEY AUTOINCREMENT,
///     memory_name     TEXT NOT NULL,
///     situation       TEXT NOT NULL,
///     recommendation  TEXT NOT NULL,
///     created_at      TEXT NOT NULL
/// );
/// ```
pub const MEMORY_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS memory_entries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_name     TEXT NOT NULL,
    situation       TEXT NOT NULL,
    recommendation  TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memory_name ON memory_entries(memory_name);
";

/// Memory bank → the agent that consults it.
pub const MEMORY_AGENT_MAPPING: [(&str, &str); 5] = [
    ("bull_memory", "bull_researcher"),
    ("bear_memory", "bear_researcher"),
    ("trader_memory", "trader"),
    ("invest_judge_memory", "research_manager"),
    ("risk_manager_memory", "risk_manager"),
];

/// Bank consulted by `agent_id`. Unmapped agents share the research judge's bank.
pub fn memory_name_for_agent(agent_id: &str) -> &'static str {
    MEMORY_AGENT_MAPPING
        .iter()
        .find(|(_, agent)| *agent == agent_id)
        .map(|(name, _)| *name)
        .unwrap_or("invest_judge_memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_lookup() {
        assert_eq!(memory_name_for_agent("bear_researcher"), "bear_memory");
        assert_eq!(memory_name_for_agent("risk_manager"), "risk_manager_memory");
        assert_eq!(memory_name_for_agent("market_analyst"), "invest_judge_memory");
    }
}
