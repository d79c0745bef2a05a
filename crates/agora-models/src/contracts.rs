//! Data contracts of the built-in agents.
//!
//! Raw-data inputs are declared optional: the engine does not fetch market
//! data itself, analyst agents pull it through their toolkit.

use crate::layer::{AgentDataContract, DataAccess, DataLayer};

/// Analyst ids in their default run order.
pub const ANALYST_IDS: [&str; 6] = [
    "market_analyst",
    "news_analyst",
    "sentiment_analyst",
    "fundamentals_analyst",
    "sector_analyst",
    "index_analyst",
];

const ANALYST_REPORTS: [&str; 6] = [
    "market_report",
    "news_report",
    "sentiment_report",
    "fundamentals_report",
    "sector_report",
    "index_report",
];

/// Risk debate profiles, in their default speaking order.
pub const RISK_DEBATER_IDS: [&str; 3] = ["risky_risk", "safe_risk", "neutral_risk"];

const SUBJECT: [&str; 3] = ["ticker", "company_name", "trade_date"];
/// Analysts also read the market the ticker trades on.
const ANALYST_SUBJECT: [&str; 4] = ["ticker", "company_name", "trade_date", "market_type"];

/// An immutable set of contracts keyed by agent id.
#[derive(Debug, Clone, Default)]
pub struct ContractCatalog {
    contracts: Vec<AgentDataContract>,
}

impl ContractCatalog {
    pub fn new(contracts: Vec<AgentDataContract>) -> Self {
        Self { contracts }
    }

    pub fn builtin() -> Self {
        let mut contracts = analyst_contracts();
        contracts.extend(researcher_contracts());
        contracts.extend(trader_contracts());
        Self { contracts }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDataContract> {
        self.contracts.iter().find(|c| c.agent_id == agent_id)
    }

    pub fn all(&self) -> &[AgentDataContract] {
        &self.contracts
    }

    /// Insert or replace the contract for `contract.agent_id`.
    pub fn insert(&mut self, contract: AgentDataContract) {
        match self
            .contracts
            .iter_mut()
            .find(|c| c.agent_id == contract.agent_id)
        {
            Some(existing) => *existing = contract,
            None => self.contracts.push(contract),
        }
    }

    pub fn analyst_ids(&self) -> Vec<&str> {
        ANALYST_IDS
            .iter()
            .copied()
            .filter(|id| self.get(id).is_some())
            .collect()
    }

    /// The single Reports field an agent writes, if any.
    pub fn report_field(&self, agent_id: &str) -> Option<&str> {
        self.get(agent_id)?
            .output_fields(DataLayer::Reports)
            .into_iter()
            .next()
    }
}

fn contract(id: &str, description: &str) -> AgentDataContract {
    AgentDataContract {
        agent_id: id.to_string(),
        inputs: Vec::new(),
        outputs: Vec::new(),
        depends_on: Default::default(),
        description: description.to_string(),
    }
}

fn analyst(
    id: &str,
    description: &str,
    raw: &[&str],
    analysis: &[&str],
    report: &str,
) -> AgentDataContract {
    contract(id, description)
        .input(DataAccess::new(DataLayer::Context, &ANALYST_SUBJECT))
        .input(DataAccess::new(DataLayer::RawData, raw).optional())
        .output(DataAccess::new(DataLayer::AnalysisData, analysis))
        .output(DataAccess::new(DataLayer::Reports, &[report]))
}

fn analyst_contracts() -> Vec<AgentDataContract> {
    vec![
        analyst(
            "market_analyst",
            "Technical analysis of price action and indicators",
            &["price_data"],
            &["technical"],
            "market_report",
        ),
        analyst(
            "news_analyst",
            "News flow and market hot topics",
            &["news_data"],
            &["news_sentiment"],
            "news_report",
        ),
        analyst(
            "sentiment_analyst",
            "Social media and investor sentiment",
            &["social_data"],
            &["sentiment"],
            "sentiment_report",
        ),
        analyst(
            "fundamentals_analyst",
            "Financial statements and valuation",
            &["financial_data"],
            &["valuation"],
            "fundamentals_report",
        ),
        analyst(
            "sector_analyst",
            "Industry trend, sector rotation and peer comparison",
            &["sector_data", "fund_flow_data"],
            &["sector_ranking", "fund_flow_metrics"],
            "sector_report",
        ),
        contract("index_analyst", "Broad market and index breadth")
            .input(DataAccess::new(DataLayer::Context, &["trade_date", "market_type"]))
            .input(DataAccess::new(DataLayer::RawData, &["index_data"]).optional())
            .output(DataAccess::new(DataLayer::AnalysisData, &["market_breadth"]))
            .output(DataAccess::new(DataLayer::Reports, &["index_report"])),
    ]
}

fn researcher(id: &str, description: &str, report: &str) -> AgentDataContract {
    contract(id, description)
        .input(DataAccess::new(DataLayer::Context, &SUBJECT))
        .input(DataAccess::new(DataLayer::Reports, &ANALYST_REPORTS).optional())
        .input(
            DataAccess::new(DataLayer::AnalysisData, &["technical", "valuation", "sentiment"])
                .optional(),
        )
        .output(DataAccess::new(DataLayer::Reports, &[report]))
        .depends_on(&[
            "market_analyst",
            "news_analyst",
            "sentiment_analyst",
            "fundamentals_analyst",
        ])
}

fn researcher_contracts() -> Vec<AgentDataContract> {
    vec![
        researcher("bull_researcher", "Argues the bullish case", "bull_report"),
        researcher("bear_researcher", "Argues the bearish case", "bear_report"),
        contract("research_manager", "Judges the debate and writes the investment plan")
            .input(DataAccess::new(DataLayer::Context, &SUBJECT))
            .input(DataAccess::new(DataLayer::Reports, &["bull_report", "bear_report"]))
            .input(DataAccess::new(DataLayer::Reports, &ANALYST_REPORTS).optional())
            .output(DataAccess::new(
                DataLayer::Decisions,
                &["investment_debate", "investment_plan"],
            ))
            .depends_on(&["bull_researcher", "bear_researcher"]),
    ]
}

fn risk_debater(id: &str, description: &str, report: &str) -> AgentDataContract {
    contract(id, description)
        .input(DataAccess::new(DataLayer::Context, &SUBJECT))
        .input(DataAccess::new(
            DataLayer::Decisions,
            &["trade_signal", "investment_plan", "trader_investment_plan"],
        ))
        .input(DataAccess::new(DataLayer::AnalysisData, &["technical"]).optional())
        .input(DataAccess::new(DataLayer::Reports, &ANALYST_REPORTS).optional())
        .output(DataAccess::new(DataLayer::Reports, &[report]))
        .depends_on(&["trader"])
}

fn trader_contracts() -> Vec<AgentDataContract> {
    vec![
        contract("trader", "Turns the investment plan into a trade signal")
            .input(DataAccess::new(DataLayer::Context, &SUBJECT))
            .input(DataAccess::new(DataLayer::Decisions, &["investment_plan"]))
            .input(DataAccess::new(DataLayer::AnalysisData, &["technical", "valuation"]).optional())
            .input(DataAccess::new(DataLayer::Reports, &ANALYST_REPORTS).optional())
            .output(DataAccess::new(
                DataLayer::Decisions,
                &["trade_signal", "trader_investment_plan"],
            ))
            .depends_on(&["research_manager"]),
        risk_debater("risky_risk", "Aggressive risk perspective", "risky_risk_report"),
        risk_debater("safe_risk", "Conservative risk perspective", "safe_risk_report"),
        risk_debater("neutral_risk", "Balanced risk perspective", "neutral_risk_report"),
        contract("risk_manager", "Weighs the risk debate and issues the final decision")
            .input(DataAccess::new(DataLayer::Context, &SUBJECT))
            .input(
                DataAccess::new(
                    DataLayer::Reports,
                    &["risky_risk_report", "safe_risk_report", "neutral_risk_report"],
                )
                .optional(),
            )
            .input(DataAccess::new(
                DataLayer::Decisions,
                &["trade_signal", "investment_plan", "trader_investment_plan"],
            ))
            .output(DataAccess::new(
                DataLayer::Decisions,
                &["risk_assessment", "final_decision", "final_trade_decision"],
            ))
            .depends_on(&RISK_DEBATER_IDS),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_fourteen_agents() {
        let catalog = ContractCatalog::builtin();
        assert_eq!(catalog.all().len(), 14);
        assert_eq!(catalog.analyst_ids(), ANALYST_IDS.to_vec());
    }

    #[test]
    fn each_analyst_writes_one_report() {
        let catalog = ContractCatalog::builtin();
        for (id, report) in ANALYST_IDS.iter().zip(ANALYST_REPORTS) {
            let contract = catalog.get(id).unwrap();
            assert_eq!(contract.output_fields(DataLayer::Reports), vec![report]);
            assert_eq!(catalog.report_field(id), Some(report));
        }
    }

    #[test]
    fn analysts_read_market_type() {
        let catalog = ContractCatalog::builtin();
        for id in ANALYST_IDS {
            let contract = catalog.get(id).unwrap();
            assert!(
                contract.has_input_access(DataLayer::Context, Some("market_type")),
                "{id} cannot read market_type"
            );
        }
    }

    #[test]
    fn insert_replaces_existing() {
        let mut catalog = ContractCatalog::builtin();
        let custom = AgentDataContract::new("trader").unwrap();
        catalog.insert(custom.clone());
        assert_eq!(catalog.get("trader"), Some(&custom));
        assert_eq!(catalog.all().len(), 14);
    }
}
