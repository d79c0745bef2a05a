//! Agora - multi-agent stock analysis
//!
//! Runs a fixed five-phase pipeline of LLM-backed agents (analysts, a
//! bull/bear research debate, a trader and a risk committee) over one
//! layered analysis context, and returns a structured final decision.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use agora::engine::{AnalysisRequest, StockAnalysisEngine};
//! use agora::models::config::AgoraConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = agora::build_engine(&AgoraConfig::default())?;
//! let result = engine.analyze(AnalysisRequest::new("000001", "2024-01-15")).await;
//! println!("{:?}", result.final_decision);
//! # Ok(())
//! # }
//! ```

pub use agora_engine as engine;
pub use agora_memory as memory;
pub use agora_models as models;

use std::path::Path;
use std::sync::Arc;

use agora_engine::llm::{ClaudeCliConfig, ClaudeCliProvider};
use agora_engine::StockAnalysisEngine;
use agora_memory::StoreMemoryProvider;
use agora_models::config::AgoraConfig;
use agora_models::schema::DataSchema;
use anyhow::Context;
use tracing::info;

/// Read a TOML config file. A missing `[engine]`, `[memory]` or `[schema]`
/// table falls back to defaults.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<AgoraConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Build an engine from configuration.
///
/// Agents get the Claude CLI only when an `[llm]` table is present.
pub fn build_engine(config: &AgoraConfig) -> anyhow::Result<StockAnalysisEngine> {
    let mut schema = DataSchema::new();
    if let Some(path) = &config.schema.extension_path {
        let loaded = schema
            .load_extensions(path)
            .with_context(|| format!("Failed to load schema extensions: {path}"))?;
        info!(path = %path, fields = loaded, "Loaded schema extensions");
    }

    let memory = StoreMemoryProvider::from_config(&config.memory)
        .context("Failed to open memory store")?;

    let mut builder = StockAnalysisEngine::builder(config.engine.clone())
        .schema(schema)
        .memory_provider(Arc::new(memory))
        .memory_matches(config.memory.n_matches);
    if let Some(llm) = &config.llm {
        info!(model = %llm.model, "Using Claude CLI");
        builder = builder.llm(Arc::new(ClaudeCliProvider::new(ClaudeCliConfig::from(llm))));
    }

    builder.build().context("Failed to build engine")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_engine::AnalysisRequest;
    use agora_models::layer::DataLayer;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_partial_config() {
        let file = write_config(
            r#"
[engine]
selected_analysts = ["market_analyst", "news_analyst"]
research_debate_rounds = 2

[memory]
enabled = false
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.engine.research_debate_rounds, 2);
        assert_eq!(config.engine.max_workers, 4);
        assert!(!config.memory.enabled);
        assert!(config.llm.is_none());
    }

    #[test]
    fn shipped_config_parses() {
        let config: AgoraConfig = toml::from_str(include_str!("../../../config/agora.toml")).unwrap();
        assert_eq!(config.engine.analysts().len(), 3);
        assert_eq!(config.engine.risk_profiles.len(), 3);
        assert!(config.llm.is_some());
    }

    #[test]
    fn missing_config_is_an_error() {
        let err = load_config("/nonexistent/agora.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn bad_extension_path_fails_build() {
        let mut config = AgoraConfig::default();
        config.schema.extension_path = Some("/nonexistent/fields.toml".into());
        assert!(build_engine(&config).is_err());
    }

    #[tokio::test]
    async fn configured_engine_runs_with_extensions() {
        let fields = write_config(
            r#"
[layers.context.fields.exchange]
type = "string"
default = "SZSE"
"#,
        );
        let mut config = AgoraConfig::default();
        config.engine.selected_analysts = vec!["market_analyst".into()];
        config.schema.extension_path = Some(fields.path().display().to_string());

        let engine = build_engine(&config).unwrap();
        assert!(engine.schema().get_field_info(DataLayer::Context, "exchange").is_some());

        let result = engine.analyze(AnalysisRequest::new("600519.SH", "2024-01-15")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.context.get_str(DataLayer::Context, "ticker"), Some("600519"));
    }
}
