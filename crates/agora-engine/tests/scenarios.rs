//! Whole-pipeline runs through `StockAnalysisEngine`.
//!
//! Stub runs need nothing external. LLM runs use `ScriptedLlm`, whose replies
//! are keyed on each role's system prompt.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agora_engine::test_support::{FailingPhase, ScriptedAgent, ScriptedLlm, StaticMemoryProvider};
use agora_engine::{AnalysisPhase, AnalysisRequest, StockAnalysisEngine};
use agora_models::config::EngineConfig;
use agora_models::contracts::{ContractCatalog, ANALYST_IDS};
use agora_models::decision::{TradeAction, TradeSignal};
use agora_models::layer::DataLayer;
use rust_decimal_macros::dec;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;

fn config(analysts: &[&str]) -> EngineConfig {
    EngineConfig {
        selected_analysts: analysts.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn stub_config(analysts: &[&str]) -> EngineConfig {
    EngineConfig {
        use_stub: true,
        ..config(analysts)
    }
}

fn request() -> AnalysisRequest {
    AnalysisRequest::new("000001", "2024-01-15")
}

fn committee_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .when("You are the research manager", "Recommendation: Buy on the pullback.")
        .when("You are the risk manager", "Final: BUY with a reduced size. Risk is moderate.")
        .when(
            "You are the trader",
            "Entering long.\n```json\n{\"action\": \"BUY\", \"confidence\": 0.8, \"position_size\": 0.5}\n```",
        )
        .when("bullish researcher", "Earnings momentum supports upside.")
        .when("bearish researcher", "Loan book quality is a concern.")
        .when("Risky Analyst", "Take the full position.")
        .when("Safe Analyst", "Keep it small.")
        .when("Neutral Analyst", "Half size is reasonable.")
        .when("analyst of a multi-agent", "Constructive setup, mild upside.")
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn stub_run_reaches_a_final_decision() {
    let engine = StockAnalysisEngine::builder(stub_config(&["market_analyst"]))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.phase_results.len(), 5);
    assert!(result.phase_results.iter().all(|p| p.success));

    let context = &result.context;
    assert_eq!(context.get_str(DataLayer::Context, "market_type"), Some("cn"));
    assert_eq!(context.get_str(DataLayer::Context, "ticker"), Some("000001"));
    assert!(!context.get_str(DataLayer::Reports, "market_report").unwrap().is_empty());
    assert!(!context.get_str(DataLayer::Decisions, "investment_plan").unwrap().is_empty());

    let signal: TradeSignal =
        serde_json::from_value(context.get(DataLayer::Decisions, "trade_signal").unwrap().clone())
            .unwrap();
    let decision = result.final_decision.expect("final decision");
    let actions = [TradeAction::Buy, TradeAction::Sell, TradeAction::Hold];
    assert!(actions.contains(&signal.action));
    assert!(actions.contains(&decision.action));
    assert_eq!(decision.ticker, "000001");
}

#[tokio::test]
async fn scripted_committee_buys() {
    let engine = StockAnalysisEngine::builder(config(&ANALYST_IDS))
        .llm(Arc::new(committee_llm()))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(result.context.get_layer(DataLayer::Reports).len() >= 6);
    assert_eq!(
        result.context.get_str(DataLayer::Reports, "market_report"),
        Some("Constructive setup, mild upside.")
    );

    let signal: TradeSignal = serde_json::from_value(
        result.context.get(DataLayer::Decisions, "trade_signal").unwrap().clone(),
    )
    .unwrap();
    assert_eq!(signal.action, TradeAction::Buy);
    assert_eq!(signal.position_size, dec!(0.5));

    let decision = result.final_decision.unwrap();
    assert_eq!(decision.action, TradeAction::Buy);
    assert!(decision.position_size <= dec!(0.5));
    assert_eq!(
        result.context.get_field_source(DataLayer::Decisions, "investment_plan"),
        Some("research_manager")
    );
}

#[tokio::test]
async fn analyst_prompt_carries_detected_market() {
    let llm = committee_llm();
    let prompts = llm.prompts();
    let engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .llm(Arc::new(llm))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;
    assert!(result.success);

    let prompts = prompts.lock().unwrap();
    assert!(prompts[0].contains("\"market_type\": \"cn\""), "{}", prompts[0]);
}

#[tokio::test]
async fn memory_recall_reaches_memory_roles() {
    let llm = committee_llm();
    let prompts = llm.prompts();
    let engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .llm(Arc::new(llm))
        .memory_provider(Arc::new(StaticMemoryProvider::with_recommendation(
            "Bank rallies faded after the last rate cut.",
        )))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;
    assert!(result.success);

    let prompts = prompts.lock().unwrap();
    assert!(prompts.iter().any(|p| p.contains("Bank rallies faded")));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn failure_in_phase_three_halts_the_run() {
    let mut engine = StockAnalysisEngine::builder(stub_config(&["market_analyst"]))
        .build()
        .unwrap();
    engine.register_phase_executor(
        AnalysisPhase::ResearchDebate,
        Arc::new(FailingPhase::new(AnalysisPhase::ResearchDebate)),
    );
    let result = engine.analyze(request()).await;

    assert!(!result.success);
    assert_eq!(result.phase_results.len(), 3);
    assert!(result.phase_results[0].success);
    assert!(result.phase_results[1].success);
    assert!(!result.phase_results[2].success);
    assert!(result.error.unwrap().starts_with("phase research_debate failed"));
    assert!(result.final_decision.is_none());

    // Earlier phases' writes survive.
    assert!(result.context.contains(DataLayer::Reports, "market_report"));
    assert!(!result.context.contains(DataLayer::Decisions, "trade_signal"));
}

#[tokio::test]
async fn failing_analyst_does_not_stop_the_run() {
    let engine = StockAnalysisEngine::builder(config(&["market_analyst", "news_analyst"]))
        .agent(Arc::new(ScriptedAgent::failing("news_analyst")))
        .agent(Arc::new(ScriptedAgent::new(
            "market_analyst",
            json!({"market_report": "Breakout above resistance."}),
        )))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;

    assert!(result.success);
    let analysts = &result.phase_results[1].outputs;
    assert_eq!(analysts["analysts_failed"], json!(["news_analyst"]));
    assert_eq!(analysts["reports_generated"], 1);
}

#[tokio::test]
async fn failing_trader_fails_phase_four() {
    let engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .agent(Arc::new(ScriptedAgent::failing("trader")))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;

    assert!(!result.success);
    assert_eq!(result.phase_results.len(), 4);
    assert_eq!(result.phase_results[3].phase, AnalysisPhase::TradeDecision);
    assert!(result.phase_results[3].error.as_deref().unwrap().contains("trader"));
}

#[tokio::test]
async fn cancellation_stops_a_slow_run() {
    let engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .agent(Arc::new(
            ScriptedAgent::new("market_analyst", json!({"market_report": "late"}))
                .with_delay(Duration::from_secs(30)),
        ))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.analyze_with_cancel(request(), cancel),
    )
    .await
    .expect("cancelled run should return promptly");

    assert!(!result.success);
    assert_eq!(result.phase_results.len(), 2);
    assert!(result.error.unwrap().contains("cancelled"));
}

#[tokio::test]
async fn dropping_the_run_stops_its_agents() {
    let analyst = ScriptedAgent::new("market_analyst", json!({"market_report": "late"}))
        .with_delay(Duration::from_millis(300));
    let completed = analyst.completed();
    let engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .agent(Arc::new(analyst))
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(50), engine.analyze(request())).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn agent_timeout_is_an_analyst_failure() {
    let config = EngineConfig {
        agent_timeout_seconds: 1,
        ..config(&["market_analyst"])
    };
    let engine = StockAnalysisEngine::builder(config)
        .agent(Arc::new(
            ScriptedAgent::new("market_analyst", json!({"market_report": "late"}))
                .with_delay(Duration::from_secs(10)),
        ))
        .build()
        .unwrap();
    let result = engine.analyze(request()).await;

    assert!(result.success);
    assert_eq!(result.phase_results[1].outputs["analysts_failed"], json!(["market_analyst"]));
}

// ============================================================================
// Concurrency and scoping
// ============================================================================

#[tokio::test]
async fn six_concurrent_analysts_all_land() {
    let catalog = ContractCatalog::builtin();
    let mut builder = StockAnalysisEngine::builder(EngineConfig {
        max_workers: 6,
        ..config(&ANALYST_IDS)
    });
    for (i, id) in ANALYST_IDS.iter().enumerate() {
        let mut update = Map::new();
        update.insert(
            catalog.report_field(id).unwrap().to_string(),
            json!(format!("{id} findings")),
        );
        let delay = Duration::from_millis(10 * (6 - i as u64));
        builder = builder.agent(Arc::new(ScriptedAgent::new(id, update.into()).with_delay(delay)));
    }
    let engine = builder.build().unwrap();
    let result = engine.analyze(request()).await;

    assert!(result.success);
    for id in ANALYST_IDS {
        let field = catalog.report_field(id).unwrap();
        assert_eq!(
            result.context.get_str(DataLayer::Reports, field),
            Some(format!("{id} findings").as_str())
        );
        assert_eq!(result.context.get_field_source(DataLayer::Reports, field), Some(id));
    }
    assert_eq!(result.phase_results[1].outputs["reports_generated"], 6);
}

#[tokio::test]
async fn undeclared_agent_outputs_are_dropped() {
    let mut engine = StockAnalysisEngine::builder(config(&["market_analyst"]))
        .agent(Arc::new(ScriptedAgent::new(
            "market_analyst",
            json!({
                "market_report": "Uptrend intact.",
                "final_trade_decision": "BUY everything",
            }),
        )))
        .build()
        .unwrap();
    engine.remove_phase_executor(AnalysisPhase::ResearchDebate);
    engine.remove_phase_executor(AnalysisPhase::TradeDecision);
    engine.remove_phase_executor(AnalysisPhase::RiskAssessment);
    let result = engine.analyze(request()).await;

    assert!(result.success);
    assert!(!result.context.contains(DataLayer::Decisions, "final_trade_decision"));
    assert!(result.context.get_field_source(DataLayer::Decisions, "final_trade_decision").is_none());
    assert!(result
        .access_log
        .iter()
        .filter(|e| e.agent_id == "market_analyst")
        .all(|e| e.layer != DataLayer::Decisions));
    assert!(result.phase_results[2].outputs["skipped"].as_bool().unwrap());
}

#[tokio::test]
async fn hk_ticker_keeps_suffix_and_currency() {
    let engine = StockAnalysisEngine::builder(stub_config(&["market_analyst"]))
        .build()
        .unwrap();
    let result = engine
        .analyze(AnalysisRequest::new("0700.hk", "2024-01-15").company_name("Tencent"))
        .await;

    assert!(result.success);
    assert_eq!(result.context.get_str(DataLayer::Context, "market_type"), Some("hk"));
    assert_eq!(result.context.get_str(DataLayer::Context, "ticker"), Some("0700.HK"));
    assert_eq!(result.context.get_str(DataLayer::Context, "currency"), Some("HKD"));
    assert_eq!(result.context.get_str(DataLayer::Context, "company_name"), Some("Tencent"));
}
