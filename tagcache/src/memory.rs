//! In-process cache backend.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-memory cache store with per-entry expiry.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            // checked_add: the permanent TTL overflows some Instant ranges
            expires_at: ttl.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryCache {
    /// Create new in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.data.write().await.retain(|_, entry| entry.is_live(now));
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = CacheEntry::new(value, ttl);
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    fn supports_add(&self) -> bool {
        true
    }

    async fn add_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<bool> {
        // check and insert under one write lock
        let mut data = self.data.write().await;
        let now = Instant::now();
        if data.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        data.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(true)
    }

    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        let data = self.data.read().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| {
                data.get(*key)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    async fn set_many(&self, items: &[(&str, String)], ttl: Option<Duration>) -> CacheResult<()> {
        let mut data = self.data.write().await;
        for (key, value) in items {
            data.insert(key.to_string(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();

        cache.set_json("test", "\"value\"".to_string(), None).await.unwrap();
        assert_eq!(
            cache.get_json("test").await.unwrap(),
            Some("\"value\"".to_string())
        );

        cache.delete("test").await.unwrap();
        assert_eq!(cache.get_json("test").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_json("short", "1".to_string(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.get_json("short").await.unwrap(), None);
        assert_eq!(cache.len().await, 1);
        cache.purge_expired().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_only_when_absent_or_expired() {
        let cache = InMemoryCache::new();
        assert!(cache.supports_add());

        assert!(cache.add_json("k", "1".to_string(), Some(Duration::from_secs(1))).await.unwrap());
        assert!(!cache.add_json("k", "2".to_string(), None).await.unwrap());
        assert_eq!(cache.get_json("k").await.unwrap(), Some("1".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.add_json("k", "3".to_string(), None).await.unwrap());
        assert_eq!(cache.get_json("k").await.unwrap(), Some("3".to_string()));
    }

    #[tokio::test]
    async fn test_permanent_ttl_does_not_overflow() {
        let cache = InMemoryCache::new();
        cache
            .set_json("tags", "[]".to_string(), Some(crate::config::PERMANENT_TTL))
            .await
            .unwrap();
        assert_eq!(cache.get_json("tags").await.unwrap(), Some("[]".to_string()));
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let cache = InMemoryCache::new();
        cache
            .set_many(&[("a", "1".to_string()), ("b", "2".to_string())], None)
            .await
            .unwrap();

        let values = cache.get_many(&["b", "c", "a"]).await.unwrap();
        assert_eq!(values, vec![Some("2".to_string()), None, Some("1".to_string())]);

        cache.delete_many(&["a", "c"]).await.unwrap();
        assert_eq!(cache.get_many(&["a", "b"]).await.unwrap(), vec![None, Some("2".to_string())]);
    }
}
