use std::time::Duration;

use moka::future::Cache;

use crate::provider::MemoryMatch;

/// Recent memory lookups keyed by bank, match count and situation text.
///
/// Entries expire after the TTL; a write to the bank clears everything.
pub struct HotCache {
    inner: Cache<String, Vec<MemoryMatch>>,
}

impl HotCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn key(situation: &str, n_matches: usize) -> String {
        format!("{n_matches}:{situation}")
    }

    pub async fn get(&self, key: &str) -> Option<Vec<MemoryMatch>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, matches: Vec<MemoryMatch>) {
        self.inner.insert(key, matches).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_match() -> Vec<MemoryMatch> {
        vec![MemoryMatch {
            matched_situation: "s".into(),
            recommendation: "r".into(),
            similarity_score: 1.0,
        }]
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = HotCache::new(100, Duration::from_secs(60));
        cache.insert(HotCache::key("s", 2), one_match()).await;
        assert_eq!(cache.get(&HotCache::key("s", 2)).await, Some(one_match()));
        assert_eq!(cache.get(&HotCache::key("s", 3)).await, None);
    }

    #[tokio::test]
    async fn invalidate_all_clears() {
        let cache = HotCache::new(100, Duration::from_secs(60));
        cache.insert("k".into(), one_match()).await;
        cache.invalidate_all();
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = HotCache::new(100, Duration::from_millis(50));
        cache.insert("k".into(), one_match()).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("k").await.is_none());
    }
}
