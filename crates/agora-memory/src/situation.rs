use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::MemoryError;
use crate::hot::HotCache;
use crate::provider::{Memory, MemoryMatch};
use crate::store::SqliteMemoryStore;

/// One named memory bank: hot cache in front of the shared SQLite store.
///
/// `rusqlite::Connection` is not `Sync`, so the store sits behind a `Mutex`
/// shared by every bank.
pub struct SituationMemory {
    name: String,
    store: Arc<Mutex<SqliteMemoryStore>>,
    hot: HotCache,
}

impl SituationMemory {
    pub fn new(
        name: &str,
        store: Arc<Mutex<SqliteMemoryStore>>,
        hot_capacity: u64,
        hot_ttl: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            store,
            hot: HotCache::new(hot_capacity, hot_ttl),
        }
    }

    fn rank(&self, situation: &str, n_matches: usize) -> Result<Vec<MemoryMatch>, MemoryError> {
        let records = {
            let store = self
                .store
                .lock()
                .map_err(|e| MemoryError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            store.entries(&self.name)?
        };

        let query = tokenize(situation);
        let mut scored: Vec<MemoryMatch> = records
            .into_iter()
            .map(|r| MemoryMatch {
                similarity_score: jaccard(&query, &tokenize(&r.situation)),
                matched_situation: r.situation,
                recommendation: r.recommendation,
            })
            .collect();
        scored.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        scored.truncate(n_matches);
        Ok(scored)
    }
}

#[async_trait]
impl Memory for SituationMemory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_memories(
        &self,
        situation: &str,
        n_matches: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let key = HotCache::key(situation, n_matches);
        if let Some(hit) = self.hot.get(&key).await {
            return Ok(hit);
        }

        let matches = self.rank(situation, n_matches)?;
        debug!(memory = %self.name, matches = matches.len(), "Memory lookup");
        self.hot.insert(key, matches.clone()).await;
        Ok(matches)
    }

    async fn add_situations(&self, entries: &[(String, String)]) -> Result<(), MemoryError> {
        {
            let store = self
                .store
                .lock()
                .map_err(|e| MemoryError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            for (situation, recommendation) in entries {
                store.insert(&self.name, situation, recommendation)?;
            }
        }
        self.hot.invalidate_all();
        Ok(())
    }
}

/// Lowercased ASCII words plus each non-ASCII letter (CJK text has no spaces).
fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut word = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            word.push(ch.to_ascii_lowercase());
            continue;
        }
        if !word.is_empty() {
            tokens.insert(std::mem::take(&mut word));
        }
        if !ch.is_ascii() && ch.is_alphanumeric() {
            tokens.insert(ch.to_string());
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    tokens
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(name: &str) -> SituationMemory {
        let store = Arc::new(Mutex::new(SqliteMemoryStore::open_in_memory().unwrap()));
        SituationMemory::new(name, store, 100, Duration::from_secs(60))
    }

    #[test]
    fn tokenize_mixed_text() {
        let tokens = tokenize("RSI oversold, 放量上涨");
        assert!(tokens.contains("rsi"));
        assert!(tokens.contains("oversold"));
        assert!(tokens.contains("放"));
        assert_eq!(tokens.len(), 6);
    }

    #[tokio::test]
    async fn ranks_closest_situation_first() {
        let memory = bank("bull_memory");
        memory
            .add_situations(&[
                ("inflation rising rates up".into(), "favour banks".into()),
                ("tech selloff high volatility".into(), "reduce exposure".into()),
                ("tech rally low volatility".into(), "add growth".into()),
            ])
            .await
            .unwrap();

        let matches = memory
            .get_memories("tech rally with low volatility", 2)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].recommendation, "add growth");
        assert!(matches[0].similarity_score >= matches[1].similarity_score);
    }

    #[tokio::test]
    async fn lookups_are_cached_until_next_write() {
        let memory = bank("trader_memory");
        memory
            .add_situations(&[("earnings beat".into(), "buy".into())])
            .await
            .unwrap();

        assert_eq!(memory.get_memories("earnings", 2).await.unwrap().len(), 1);
        assert!(memory.hot.get(&HotCache::key("earnings", 2)).await.is_some());

        memory
            .add_situations(&[("earnings miss".into(), "sell".into())])
            .await
            .unwrap();
        assert_eq!(memory.get_memories("earnings", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn banks_share_a_store_but_not_entries() {
        let store = Arc::new(Mutex::new(SqliteMemoryStore::open_in_memory().unwrap()));
        let bull = SituationMemory::new("bull_memory", Arc::clone(&store), 10, Duration::from_secs(60));
        let bear = SituationMemory::new("bear_memory", store, 10, Duration::from_secs(60));

        bull.add_situations(&[("x".into(), "y".into())]).await.unwrap();
        assert!(bear.get_memories("x", 2).await.unwrap().is_empty());
    }
}
