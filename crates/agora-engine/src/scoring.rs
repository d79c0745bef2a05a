//! Keyword scoring used when no agent states a structured call.

use agora_models::decision::{RiskLevel, TradeAction};
use rust_decimal::Decimal;
use serde_json::Value;

const BUY_TERMS: &[&str] = &["买入", "增持", "看多", "建议买入", "buy", "bullish", "看涨"];
const SELL_TERMS: &[&str] = &["卖出", "减持", "看空", "建议卖出", "sell", "bearish", "看跌"];
const HOLD_TERMS: &[&str] = &["持有", "观望", "hold", "neutral", "中性"];

const HIGH_RISK_TERMS: &[&str] = &["高风险", "风险较大", "谨慎", "危险", "high risk"];
const LOW_RISK_TERMS: &[&str] = &["低风险", "安全", "稳健", "low risk"];

/// How many of `terms` occur in `text` (each term counted once).
fn hits(text: &str, terms: &[&str]) -> u32 {
    terms.iter().filter(|t| text.contains(*t)).count() as u32
}

fn confidence_for(hits: u32) -> Decimal {
    let score = Decimal::new(5, 1) + Decimal::new(i64::from(hits), 1);
    score.min(Decimal::new(9, 1))
}

/// Action and confidence implied by free text.
///
/// A side wins only with strictly more hits than both others; ties are HOLD at 0.5.
pub fn score_text(text: &str) -> (TradeAction, Decimal) {
    let lower = text.to_lowercase();
    let buy = hits(&lower, BUY_TERMS);
    let sell = hits(&lower, SELL_TERMS);
    let hold = hits(&lower, HOLD_TERMS);

    if buy > sell && buy > hold {
        (TradeAction::Buy, confidence_for(buy))
    } else if sell > buy && sell > hold {
        (TradeAction::Sell, confidence_for(sell))
    } else {
        (TradeAction::Hold, Decimal::new(5, 1))
    }
}

/// Same as [`score_text`] but also accepts an investment plan given as an
/// object with `recommendation` / `confidence` keys.
pub fn score_plan(plan: &Value) -> (TradeAction, Decimal) {
    match plan {
        Value::String(text) => score_text(text),
        Value::Object(map) => {
            let action = map
                .get("recommendation")
                .and_then(Value::as_str)
                .and_then(TradeAction::parse)
                .unwrap_or(TradeAction::Hold);
            let confidence = map
                .get("confidence")
                .and_then(|c| c.to_string().trim_matches('"').parse::<Decimal>().ok())
                .unwrap_or(Decimal::new(5, 1))
                .clamp(Decimal::ZERO, Decimal::ONE);
            (action, confidence)
        }
        _ => (TradeAction::Hold, Decimal::new(5, 1)),
    }
}

/// Position size for a fresh signal: nothing for HOLD, otherwise the confidence.
pub fn position_for(action: TradeAction, confidence: Decimal) -> Decimal {
    match action {
        TradeAction::Hold => Decimal::ZERO,
        _ => confidence.min(Decimal::ONE),
    }
}

/// Scale the trader's position by the final confidence.
///
/// Without a positive original size, half the confidence is used.
pub fn risk_adjusted_position(
    action: TradeAction,
    confidence: Decimal,
    original_position: Decimal,
) -> Decimal {
    match action {
        TradeAction::Hold => Decimal::ZERO,
        _ if original_position > Decimal::ZERO => confidence.min(Decimal::ONE) * original_position,
        _ => confidence * Decimal::new(5, 1),
    }
}

pub fn risk_level(text: &str) -> RiskLevel {
    let lower = text.to_lowercase();
    let high = hits(&lower, HIGH_RISK_TERMS);
    let low = hits(&lower, LOW_RISK_TERMS);
    if high > low {
        RiskLevel::High
    } else if low > high {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
