use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agora_models::config::MemoryConfig;
use agora_models::memory_record::memory_name_for_agent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MemoryError;
use crate::situation::SituationMemory;
use crate::store::SqliteMemoryStore;

/// A past situation similar to the one being asked about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMatch {
    pub matched_situation: String,
    pub recommendation: String,
    pub similarity_score: f64,
}

/// A bank of past situations an agent can consult. Mockable for testing.
#[async_trait]
pub trait Memory: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `n_matches` stored situations, most similar first.
    async fn get_memories(
        &self,
        situation: &str,
        n_matches: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError>;

    /// Store `(situation, recommendation)` pairs.
    async fn add_situations(&self, entries: &[(String, String)]) -> Result<(), MemoryError>;
}

/// Hands out memory banks by name.
pub trait MemoryProvider: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// `None` when memory is disabled.
    fn get_memory(&self, name: &str) -> Option<Arc<dyn Memory>>;

    fn get_memory_by_agent(&self, agent_id: &str) -> Option<Arc<dyn Memory>> {
        self.get_memory(memory_name_for_agent(agent_id))
    }
}

/// Provider over one shared SQLite store. Banks are created on first use.
pub struct StoreMemoryProvider {
    store: Option<Arc<Mutex<SqliteMemoryStore>>>,
    hot_capacity: u64,
    hot_ttl: Duration,
    banks: Mutex<HashMap<String, Arc<SituationMemory>>>,
}

impl StoreMemoryProvider {
    pub fn new(store: SqliteMemoryStore, hot_capacity: u64, hot_ttl: Duration) -> Self {
        Self {
            store: Some(Arc::new(Mutex::new(store))),
            hot_capacity,
            hot_ttl,
            banks: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            hot_capacity: 0,
            hot_ttl: Duration::ZERO,
            banks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        if !config.enabled {
            info!("Memory disabled");
            return Ok(Self::disabled());
        }
        let store = match &config.sqlite_path {
            Some(path) => SqliteMemoryStore::open(path)?,
            None => SqliteMemoryStore::open_in_memory()?,
        };
        info!(path = ?config.sqlite_path, "Memory enabled");
        Ok(Self::new(
            store,
            config.hot_cache_capacity,
            Duration::from_secs(config.hot_cache_ttl_seconds),
        ))
    }
}

impl MemoryProvider for StoreMemoryProvider {
    fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn get_memory(&self, name: &str) -> Option<Arc<dyn Memory>> {
        let store = self.store.as_ref()?;
        let mut banks = self.banks.lock().unwrap_or_else(PoisonError::into_inner);
        let bank = banks.entry(name.to_string()).or_insert_with(|| {
            Arc::new(SituationMemory::new(
                name,
                Arc::clone(store),
                self.hot_capacity,
                self.hot_ttl,
            ))
        });
        Some(Arc::clone(bank) as Arc<dyn Memory>)
    }
}
