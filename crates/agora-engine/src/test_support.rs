//! Scripted stand-ins for the LLM, agents, memory banks and phases.
//!
//! Used by unit tests across the crate and by the integration tests, so
//! whole runs can be exercised without the Claude CLI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agora_memory::{Memory, MemoryError, MemoryMatch, MemoryProvider};
use agora_models::context::LegacyState;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::access::{DataAccessManager, SharedContext};
use crate::agent::Agent;
use crate::error::{AgentError, EngineError};
use crate::llm::LlmProvider;
use crate::phases::{AnalysisPhase, PhaseExecutor, PhaseOutputs};

const DEFAULT_REPLY: &str = "No strong view. Recommendation: HOLD.";

/// LLM that answers by matching its system prompt against scripted needles.
///
/// Rules are tried in insertion order; the first needle found in the system
/// prompt picks the reply. Every user prompt is recorded.
#[derive(Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, String)>,
    fallback: Option<String>,
    failure: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    /// Same reply to everything.
    pub fn constant(reply: &str) -> Self {
        Self {
            fallback: Some(reply.to_string()),
            ..Self::default()
        }
    }

    /// Every call fails with an LLM error.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Handle on the user prompts seen so far.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, AgentError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user_prompt.to_string());

        if let Some(message) = &self.failure {
            return Err(AgentError::Llm(message.clone()));
        }
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| system_prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| DEFAULT_REPLY.to_string());
        Ok(reply)
    }
}

/// Agent returning a fixed state update, optionally after a delay.
pub struct ScriptedAgent {
    id: String,
    update: Option<Value>,
    delay: Option<Duration>,
    completed: Arc<AtomicUsize>,
}

impl ScriptedAgent {
    /// `update` must be a JSON object; its keys are legacy state keys.
    pub fn new(id: &str, update: Value) -> Self {
        Self {
            id: id.to_string(),
            update: Some(update),
            delay: None,
            completed: Arc::default(),
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            update: None,
            delay: None,
            completed: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Counts runs that got past the delay.
    pub fn completed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.completed)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _state: &LegacyState) -> Result<LegacyState, AgentError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        match &self.update {
            Some(Value::Object(update)) => Ok(update.clone()),
            Some(other) => Err(AgentError::Parse(format!("scripted update is not an object: {other}"))),
            None => Err(AgentError::Llm(format!("{} scripted to fail", self.id))),
        }
    }
}

/// Memory bank that always recalls the same recommendation.
pub struct StaticMemory {
    name: String,
    recommendation: String,
}

#[async_trait]
impl Memory for StaticMemory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_memories(
        &self,
        situation: &str,
        n_matches: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let recalled = MemoryMatch {
            matched_situation: situation.to_string(),
            recommendation: self.recommendation.clone(),
            similarity_score: 1.0,
        };
        Ok(std::iter::repeat(recalled).take(n_matches.min(1)).collect())
    }

    async fn add_situations(&self, _entries: &[(String, String)]) -> Result<(), MemoryError> {
        Ok(())
    }
}

pub struct StaticMemoryProvider {
    recommendation: String,
}

impl StaticMemoryProvider {
    pub fn with_recommendation(recommendation: &str) -> Self {
        Self {
            recommendation: recommendation.to_string(),
        }
    }
}

impl MemoryProvider for StaticMemoryProvider {
    fn is_enabled(&self) -> bool {
        true
    }

    fn get_memory(&self, name: &str) -> Option<Arc<dyn Memory>> {
        Some(Arc::new(StaticMemory {
            name: name.to_string(),
            recommendation: self.recommendation.clone(),
        }))
    }
}

/// Phase executor that always fails, by error or by panic.
pub struct FailingPhase {
    phase: AnalysisPhase,
    panic: bool,
}

impl FailingPhase {
    pub fn new(phase: AnalysisPhase) -> Self {
        Self { phase, panic: false }
    }

    pub fn panicking(phase: AnalysisPhase) -> Self {
        Self { phase, panic: true }
    }
}

#[async_trait]
impl PhaseExecutor for FailingPhase {
    fn phase(&self) -> AnalysisPhase {
        self.phase
    }

    async fn execute(
        &self,
        _context: &SharedContext,
        _manager: &DataAccessManager,
        _cancel: &CancellationToken,
    ) -> Result<PhaseOutputs, EngineError> {
        if self.panic {
            panic!("{} executor panicked", self.phase);
        }
        Err(EngineError::agent(
            self.phase.as_str(),
            AgentError::Unavailable("scripted phase failure".into()),
        ))
    }
}
