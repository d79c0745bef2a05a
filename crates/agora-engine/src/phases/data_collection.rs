use agora_models::layer::DataLayer;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{AnalysisPhase, PhaseExecutor, PhaseOutputs};
use crate::access::{DataAccessManager, SharedContext};
use crate::error::EngineError;

const CN_SUFFIXES: [&str; 3] = [".SZ", ".SH", ".BJ"];

/// Market a ticker trades on, from its shape alone.
pub fn detect_market(ticker: &str) -> &'static str {
    let ticker = ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return "cn";
    }
    if CN_SUFFIXES.iter().any(|s| ticker.ends_with(s)) || is_cn_code(&ticker) {
        "cn"
    } else if ticker.ends_with(".HK") {
        "hk"
    } else {
        "us"
    }
}

fn is_cn_code(ticker: &str) -> bool {
    ticker.len() == 6 && ticker.bytes().all(|b| b.is_ascii_digit())
}

/// Canonical ticker for `market`: trimmed, uppercased, and for China
/// A-shares the exchange suffix dropped.
pub fn normalize_ticker(ticker: &str, market: &str) -> String {
    let ticker = ticker.trim().to_ascii_uppercase();
    if market == "cn" {
        for suffix in CN_SUFFIXES {
            if let Some(code) = ticker.strip_suffix(suffix) {
                return code.to_string();
            }
        }
    }
    ticker
}

fn currency_for(market: &str) -> &'static str {
    match market {
        "hk" => "HKD",
        "us" => "USD",
        _ => "CNY",
    }
}

/// Checks the subject of the run and normalises it. The only phase for which
/// a missing input is fatal.
#[derive(Debug, Default)]
pub struct DataCollectionPhase;

impl DataCollectionPhase {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhaseExecutor for DataCollectionPhase {
    fn phase(&self) -> AnalysisPhase {
        AnalysisPhase::DataCollection
    }

    async fn execute(
        &self,
        context: &SharedContext,
        _manager: &DataAccessManager,
        _cancel: &CancellationToken,
    ) -> Result<PhaseOutputs, EngineError> {
        let source = Some(self.name());
        let ticker = context
            .get_string(DataLayer::Context, "ticker")
            .ok_or_else(|| EngineError::MissingContext("ticker".into()))?;
        let trade_date = context
            .get_string(DataLayer::Context, "trade_date")
            .ok_or_else(|| EngineError::MissingContext("trade_date".into()))?;

        let market = match context.get_string(DataLayer::Context, "market_type") {
            Some(market) => market,
            None => {
                let detected = detect_market(&ticker).to_string();
                context.set(DataLayer::Context, "market_type", json!(detected), source);
                detected
            }
        };

        let normalized = normalize_ticker(&ticker, &market);
        if normalized != ticker {
            info!(from = %ticker, to = %normalized, "Normalized ticker");
            context.set(DataLayer::Context, "ticker", json!(normalized), source);
        }

        if context.get_string(DataLayer::Context, "currency").is_none() {
            context.set(DataLayer::Context, "currency", json!(currency_for(&market)), source);
        }

        let company_name = context
            .get_string(DataLayer::Context, "company_name")
            .unwrap_or_default();
        info!(ticker = %normalized, market = %market, trade_date = %trade_date, "Context ready");

        let mut outputs = Map::new();
        outputs.insert("ticker".into(), json!(normalized));
        outputs.insert("trade_date".into(), json!(trade_date));
        outputs.insert("company_name".into(), json!(company_name));
        outputs.insert("market_type".into(), json!(market));
        outputs.insert("initialized".into(), Value::Bool(true));
        Ok(outputs)
    }
}
