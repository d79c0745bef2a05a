//! Integration tests that invoke the real Claude CLI.
//!
//! These tests are `#[ignore]` by default. They require:
//! - The `claude` CLI installed and on PATH
//! - Valid Anthropic credentials configured
//!
//! Run explicitly with:
//! ```bash
//! cargo test -p agora-engine --test cli_integration -- --ignored
//! ```

use agora_engine::llm::{check_cli_available, invoke_claude, ClaudeCliConfig, ClaudeCliProvider};
use agora_engine::parser::extract_json;
use agora_engine::{AnalysisRequest, StockAnalysisEngine};
use agora_models::config::EngineConfig;

use std::sync::Arc;
use std::time::Duration;

/// Verify the Claude CLI is installed and responds to --version.
#[tokio::test]
#[ignore]
async fn cli_is_available() {
    assert!(
        check_cli_available().await,
        "claude CLI not found on PATH"
    );
}

/// Invoke the Claude CLI with a trivial prompt and verify we get parseable JSON back.
///
/// This catches breaking changes in the CLI's output format (new wrapping,
/// changed response structure, etc.) that would otherwise only surface in production.
#[tokio::test]
#[ignore]
async fn cli_output_is_parseable_json() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: "claude-3-5-haiku-latest".to_string(),
        timeout: Duration::from_secs(30),
    };

    let system_prompt = concat!(
        "You are a test agent. Respond ONLY with a JSON object, no other text.\n",
        "The JSON must have exactly these fields:\n",
        "- \"status\": the string \"ok\"\n",
        "- \"echo\": repeat back the user's message exactly\n",
    );

    let user_prompt = "ping";

    let raw = invoke_claude(system_prompt, user_prompt, &config)
        .await
        .expect("Claude CLI invocation failed");

    let parsed = extract_json(&raw).unwrap_or_else(|e| {
        panic!("Failed to extract JSON from CLI output ({e}). Raw output:\n---\n{raw}\n---")
    });

    assert_eq!(
        parsed["status"], "ok",
        "Unexpected response structure: {parsed}"
    );
}

/// Verify that the CLI returns a non-zero exit code for an invalid model,
/// and that our error handling captures it correctly.
#[tokio::test]
#[ignore]
async fn cli_reports_errors_for_invalid_model() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: "nonexistent-model-12345".to_string(),
        timeout: Duration::from_secs(15),
    };

    let result = invoke_claude("You are a test.", "hello", &config).await;

    assert!(
        result.is_err(),
        "Expected error for invalid model, got: {:?}",
        result.unwrap()
    );
}

/// One real pipeline run with a single analyst.
#[tokio::test]
#[ignore]
async fn real_single_analyst_run() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = EngineConfig {
        selected_analysts: vec!["market_analyst".to_string()],
        ..Default::default()
    };
    let llm = ClaudeCliProvider::new(ClaudeCliConfig {
        model: "claude-3-5-haiku-latest".to_string(),
        timeout: Duration::from_secs(120),
    });
    let engine = StockAnalysisEngine::builder(config)
        .llm(Arc::new(llm))
        .build()
        .expect("engine builds");

    let result = engine
        .analyze(AnalysisRequest::new("AAPL", "2024-01-15"))
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert!(result.final_decision.is_some());
}
