use agora_models::decision::RiskProfile;
use serde_json::Value;

use crate::agent::AgentRole;
use crate::error::AgentError;

/// JSON block the trader is asked to end with.
fn signal_schema() -> String {
    let example = serde_json::json!({
        "action": "BUY | SELL | HOLD",
        "confidence": 0.65,
        "position_size": 0.3
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

fn analyst_prompt(domain: &str, report_field: &str) -> String {
    let focus = match domain {
        "market" => {
            "price action, trend, support and resistance, moving averages, MACD, RSI \
             and volume"
        }
        "news" => "company announcements, industry news and policy changes of the last week",
        "social" => "retail investor sentiment, forum heat and social media tone",
        "fundamentals" => {
            "revenue and profit growth, margins, balance sheet health and valuation \
             (PE, PB, PEG) against peers"
        }
        "sector" => "sector rotation, industry fund flows and the stock's rank among peers",
        "index" => "broad index trend, market breadth and the overall risk appetite",
        _ => "every signal available in the tool data",
    };
    format!(
        "You are the {domain} analyst of a multi-agent equity research team.\n\n\
         ## INPUT\n\n\
         A JSON object with `ticker`, `company_name`, `trade_date`, `market_type` and \
         `tool_data` (raw data fetched for you, keyed by tool name; a tool may carry \
         an `error` instead of data).\n\n\
         ## TASK\n\n\
         Analyse {focus}. Only use figures present in `tool_data`; when data is \
         missing say so rather than inventing numbers.\n\n\
         ## OUTPUT\n\n\
         A markdown report (it is stored as `{report_field}`). End with a short \
         table of the key findings and a one-line view: bullish, bearish or neutral."
    )
}

fn researcher_prompt(bull: bool) -> String {
    let (stance, opponent) = if bull {
        ("bullish", "bear")
    } else {
        ("bearish", "bull")
    };
    format!(
        "You are the {stance} researcher in an investment debate.\n\n\
         ## INPUT\n\n\
         `reports` (analyst reports by name), `debate_history`, \
         `last_opponent_argument` and `past_reflections` (lessons from similar past \
         situations, possibly empty).\n\n\
         ## TASK\n\n\
         Build the strongest evidence-based {stance} case. Rebut the {opponent}'s last \
         argument point by point. Learn from the past reflections and do not repeat \
         earlier mistakes.\n\n\
         ## OUTPUT\n\n\
         Conversational prose, as if speaking in the debate. No JSON."
    )
}

fn research_manager_prompt() -> String {
    "You are the research manager and debate judge.\n\n\
     ## INPUT\n\n\
     `reports`, the full bull/bear `debate_history` and `past_reflections`.\n\n\
     ## TASK\n\n\
     Weigh both sides and commit to a recommendation: Buy, Sell or Hold. Do not \
     default to Hold just because both sides have merit.\n\n\
     ## OUTPUT\n\n\
     An investment plan for the trader: the recommendation, the rationale, and \
     concrete strategic actions (entry, sizing, horizon)."
        .to_string()
}

fn trader_prompt() -> String {
    format!(
        "You are the trader. Turn the research team's investment plan into an \
         executable decision.\n\n\
         ## INPUT\n\n\
         `investment_plan`, `reports` and `past_reflections`.\n\n\
         ## OUTPUT\n\n\
         A short trading plan in prose, then a fenced JSON block:\n\n\
         ```json\n{}\n```\n\n\
         `confidence` and `position_size` are between 0 and 1. HOLD means \
         position_size 0.",
        signal_schema()
    )
}

fn risk_debater_prompt(profile: RiskProfile) -> String {
    let stance = match profile {
        RiskProfile::Risky => {
            "Champion high-reward opportunities. Argue why the upside justifies \
             bold sizing and challenge excessive caution."
        }
        RiskProfile::Safe => {
            "Protect capital. Stress volatility, drawdown and downside scenarios and \
             argue for smaller or no positions."
        }
        RiskProfile::Neutral => {
            "Balance both views. Point out where the risky and safe arguments \
             overreach and propose a moderate plan."
        }
    };
    format!(
        "You are the {} in the risk committee debate.\n\n\
         ## INPUT\n\n\
         `trader_plan`, `reports`, `debate_history` and `other_arguments` (the latest \
         turn of each other debater).\n\n\
         ## TASK\n\n\
         {stance}\n\n\
         ## OUTPUT\n\n\
         Conversational prose addressing the other debaters directly. No JSON.",
        profile.label()
    )
}

fn risk_manager_prompt() -> String {
    "You are the risk manager and chair of the risk committee.\n\n\
     ## INPUT\n\n\
     `investment_plan`, `trader_plan`, `risk_debate_history` and \
     `past_reflections`.\n\n\
     ## TASK\n\n\
     Decide whether the trader's plan stands. Adjust the action or the sizing \
     when the debate exposes risks the plan ignores. State the overall risk \
     level as low, medium or high risk.\n\n\
     ## OUTPUT\n\n\
     The final decision: Buy, Sell or Hold, followed by the reasoning."
        .to_string()
}

/// System prompt for an agent role.
pub fn system_prompt(role: &AgentRole) -> String {
    match role {
        AgentRole::Analyst {
            report_field,
            domain,
        } => analyst_prompt(domain, report_field),
        AgentRole::Bull => researcher_prompt(true),
        AgentRole::Bear => researcher_prompt(false),
        AgentRole::ResearchManager => research_manager_prompt(),
        AgentRole::Trader => trader_prompt(),
        AgentRole::RiskDebater(profile) => risk_debater_prompt(*profile),
        AgentRole::RiskManager => risk_manager_prompt(),
    }
}

/// The user prompt is the role's input object as pretty JSON.
pub fn user_prompt(input: &Value) -> Result<String, AgentError> {
    Ok(serde_json::to_string_pretty(input)?)
}
