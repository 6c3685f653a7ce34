//! Port traits: the backend cache and the durable tag record store.

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::time::Duration;

/// Key/value cache backend.
///
/// Values are JSON strings; typing happens in the manager. Implementations
/// own their own concurrency control and are shared across every manager
/// handle.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a JSON value from the cache.
    ///
    /// Returns `Ok(None)` when the key is absent or expired.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a JSON value in the cache.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The JSON string value
    /// * `ttl` - Optional time-to-live; `None` keeps the entry until deleted
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the cache. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Whether [`add_json`](Self::add_json) is implemented natively and atomically.
    fn supports_add(&self) -> bool {
        false
    }

    /// Store a value only if the key is absent.
    ///
    /// Returns `Ok(true)` if the value was written. Backends without a
    /// native add-if-absent keep this default, which reports
    /// [`CacheError::Unsupported`].
    async fn add_json(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<bool> {
        Err(CacheError::Unsupported("add".to_string()))
    }

    // ========== Batch Operations ==========

    /// Get multiple keys.
    ///
    /// Returns values in the same order as `keys`. The default runs the
    /// single-key gets concurrently.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get_json(key));
        try_join_all(futures).await
    }

    /// Set multiple key/value pairs with one TTL.
    async fn set_many(&self, items: &[(&str, String)], ttl: Option<Duration>) -> CacheResult<()> {
        use futures::future::try_join_all;

        let futures = items
            .iter()
            .map(|(key, value)| self.set_json(key, value.clone(), ttl));

        try_join_all(futures).await?;
        Ok(())
    }

    /// Delete multiple keys.
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        try_join_all(futures).await?;
        Ok(())
    }
}

/// Durable store for tag membership records (`{key, items}`).
///
/// This is the source of truth for a tag's key set whenever the cache copy
/// has been evicted.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Read the items recorded under `key`, if a record exists.
    async fn find_by_key(&self, key: &str) -> CacheResult<Option<Vec<String>>>;

    /// Insert or replace the record for `key`.
    async fn upsert(&self, key: &str, items: &[String]) -> CacheResult<()>;

    /// Delete the record for `key`. Deleting an absent record succeeds.
    async fn delete_by_key(&self, key: &str) -> CacheResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MapStore {
        data: Arc<RwLock<HashMap<String, String>>>,
    }

    #[async_trait]
    impl CacheStore for MapStore {
        async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
            Ok(self.data.read().await.get(key).cloned())
        }

        async fn set_json(&self, key: &str, value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            self.data.write().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.data.write().await.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_batch_operations() {
        let store = MapStore::default();

        store
            .set_many(&[("a", "1".to_string()), ("b", "2".to_string())], None)
            .await
            .unwrap();

        let values = store.get_many(&["a", "missing", "b"]).await.unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("2".to_string())]
        );

        store.delete_many(&["a", "b"]).await.unwrap();
        assert_eq!(store.get_many(&["a", "b"]).await.unwrap(), vec![None, None]);
    }

    #[tokio::test]
    async fn test_add_is_unsupported_by_default() {
        let store = MapStore::default();
        assert!(!store.supports_add());

        let err = store.add_json("a", "1".to_string(), None).await.unwrap_err();
        assert!(matches!(err, CacheError::Unsupported(_)));
    }
}
