use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;

/// A market-data fetcher handed to analyst agents. Mockable for testing.
#[async_trait]
pub trait DataTool: Send + Sync {
    fn name(&self) -> &str;

    /// The analyst domain this tool serves (`market`, `news`, `social`, ...).
    fn domain(&self) -> &str;

    async fn fetch(&self, ticker: &str, trade_date: &str) -> Result<Value, AgentError>;
}

/// Opaque bag of data tools. The engine passes it through to agents and never
/// looks inside.
#[derive(Clone, Default)]
pub struct Toolkit {
    tools: Vec<Arc<dyn DataTool>>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn DataTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools_for(&self, domain: &str) -> Vec<Arc<dyn DataTool>> {
        self.tools
            .iter()
            .filter(|t| t.domain() == domain)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("Toolkit").field("tools", &names).finish()
    }
}
