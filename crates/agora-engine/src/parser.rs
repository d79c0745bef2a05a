use agora_models::decision::TradeAction;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::AgentError;

/// Recover the first JSON object embedded in LLM output.
///
/// Accepts a bare object, a fenced ```json block, or an object preceded by prose.
pub fn extract_json(text: &str) -> Result<Value, AgentError> {
    let trimmed = text.trim();

    let candidates = [
        trimmed.starts_with('{').then(|| trimmed.to_string()),
        fenced_block(trimmed),
        first_balanced_object(trimmed),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return Ok(value);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn fenced_block(text: &str) -> Option<String> {
    for marker in ["```json\n", "```json\r\n", "```\n", "```\r\n"] {
        if let Some(start) = text.find(marker) {
            let body = start + marker.len();
            if let Some(end) = text[body..].find("```") {
                return Some(text[body..body + end].trim().to_string());
            }
        }
    }
    None
}

fn first_balanced_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// A trade call stated explicitly by an agent as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct StatedSignal {
    pub action: TradeAction,
    pub confidence: Option<Decimal>,
    pub position_size: Option<Decimal>,
}

/// Read `{"action": "BUY", "confidence": 0.7, "position_size": 0.3}` out of agent text.
///
/// Returns `None` when the text carries no object or the object names no valid action.
pub fn parse_stated_signal(text: &str) -> Option<StatedSignal> {
    let value = extract_json(text).ok()?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .and_then(TradeAction::parse)?;
    Some(StatedSignal {
        action,
        confidence: value.get("confidence").and_then(unit_decimal),
        position_size: value.get("position_size").and_then(unit_decimal),
    })
}

/// A number or numeric string, clamped to [0, 1].
fn unit_decimal(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    }?;
    Some(parsed.clamp(Decimal::ZERO, Decimal::ONE))
}
