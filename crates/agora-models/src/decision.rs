use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn parse(text: &str) -> Option<TradeAction> {
        match text.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(TradeAction::Buy),
            "SELL" => Some(TradeAction::Sell),
            "HOLD" => Some(TradeAction::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// The trader's structured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub ticker: String,
    pub action: TradeAction,
    /// Fraction of capital, 0.0 to 1.0. Always zero for HOLD.
    pub position_size: Decimal,
    /// 0.0 to 1.0.
    pub confidence: Decimal,
    pub rationale: String,
    pub generated_at: DateTime<Utc>,
}

/// The risk-adjusted decision a run ends with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalDecision {
    pub ticker: String,
    pub action: TradeAction,
    pub position_size: Decimal,
    pub confidence: Decimal,
    pub risk_level: RiskLevel,
    pub rationale: String,
    /// Leading excerpt of the trade signal's rationale.
    pub original_rationale: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    Bull,
    Bear,
}

/// Transcript of the bull/bear research debate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvestmentDebateState {
    pub history: String,
    pub bull_history: String,
    pub bear_history: String,
    pub current_response: String,
    pub count: u32,
    pub judge_decision: String,
}

impl InvestmentDebateState {
    /// Append one turn to the combined and per-side transcripts.
    pub fn record(&mut self, side: DebateSide, argument: &str) {
        let line = match side {
            DebateSide::Bull => format!("Bull Analyst: {argument}"),
            DebateSide::Bear => format!("Bear Analyst: {argument}"),
        };
        self.history.push('\n');
        self.history.push_str(&line);
        let own = match side {
            DebateSide::Bull => &mut self.bull_history,
            DebateSide::Bear => &mut self.bear_history,
        };
        own.push('\n');
        own.push_str(&line);
        self.current_response = line;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Risky,
    Safe,
    Neutral,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 3] = [RiskProfile::Risky, RiskProfile::Safe, RiskProfile::Neutral];

    /// Agent id of the debater arguing this profile.
    pub fn agent_id(&self) -> &'static str {
        match self {
            RiskProfile::Risky => "risky_risk",
            RiskProfile::Safe => "safe_risk",
            RiskProfile::Neutral => "neutral_risk",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskProfile::Risky => "Risky Analyst",
            RiskProfile::Safe => "Safe Analyst",
            RiskProfile::Neutral => "Neutral Analyst",
        }
    }
}

/// Transcript of the three-way risk debate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RiskDebateState {
    pub history: String,
    pub risky_history: String,
    pub safe_history: String,
    pub neutral_history: String,
    pub current_risky_response: String,
    pub current_safe_response: String,
    pub current_neutral_response: String,
    pub count: u32,
    pub judge_decision: String,
}

impl RiskDebateState {
    pub fn record(&mut self, profile: RiskProfile, argument: &str) {
        let line = format!("{}: {argument}", profile.label());
        self.history.push('\n');
        self.history.push_str(&line);
        let (own, current) = match profile {
            RiskProfile::Risky => (&mut self.risky_history, &mut self.current_risky_response),
            RiskProfile::Safe => (&mut self.safe_history, &mut self.current_safe_response),
            RiskProfile::Neutral => (&mut self.neutral_history, &mut self.current_neutral_response),
        };
        own.push('\n');
        own.push_str(&line);
        *current = line;
        self.count += 1;
    }

    pub fn history_of(&self, profile: RiskProfile) -> &str {
        match profile {
            RiskProfile::Risky => &self.risky_history,
            RiskProfile::Safe => &self.safe_history,
            RiskProfile::Neutral => &self.neutral_history,
        }
    }
}
