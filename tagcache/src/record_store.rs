//! Durable tag record stores.
//!
//! A record is `{key, items}`: the normalized tag key and the cache keys
//! registered under it. [`InMemoryTagStore`] suits tests and single-process
//! setups; [`JsonFileTagStore`] keeps every record in one JSON document on
//! disk so membership survives restarts and cache evictions.

use crate::error::{CacheError, CacheResult};
use crate::traits::TagStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Default record table name, used as the file stem by [`JsonFileTagStore`].
pub const DEFAULT_TABLE: &str = "cache_tags";

/// A persisted tag membership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    /// Normalized tag key, e.g. `cache::tags.User`
    pub key: String,
    /// Cache keys registered under the tag
    pub items: Vec<String>,
}

/// Tag record store held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryTagStore {
    records: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryTagStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every record, ordered by key.
    pub async fn records(&self) -> Vec<TagRecord> {
        let records = self.records.read().await;
        let mut out: Vec<TagRecord> = records
            .iter()
            .map(|(key, items)| TagRecord {
                key: key.clone(),
                items: items.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

#[async_trait]
impl TagStore for InMemoryTagStore {
    async fn find_by_key(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn upsert(&self, key: &str, items: &[String]) -> CacheResult<()> {
        self.records
            .write()
            .await
            .insert(key.to_string(), items.to_vec());
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> CacheResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    records: Vec<TagRecord>,
}

/// Tag record store persisted as a single JSON file.
///
/// Writes go to a sibling temp file which is then renamed over the
/// original, so a crash mid-write leaves the previous document intact.
/// All access is serialized through one lock.
#[derive(Clone)]
pub struct JsonFileTagStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonFileTagStore {
    /// Use `path` as the backing file. It is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Use `<dir>/cache_tags.json` as the backing file.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{}.json", DEFAULT_TABLE)))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CacheResult<BTreeMap<String, Vec<String>>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let document: Document = serde_json::from_slice(&raw).map_err(|e| {
            CacheError::Storage(format!("corrupt tag store {}: {}", self.path.display(), e))
        })?;

        Ok(document
            .records
            .into_iter()
            .map(|record| (record.key, record.items))
            .collect())
    }

    async fn persist(&self, records: BTreeMap<String, Vec<String>>) -> CacheResult<()> {
        let document = Document {
            records: records
                .into_iter()
                .map(|(key, items)| TagRecord { key, items })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TagStore for JsonFileTagStore {
    async fn find_by_key(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn upsert(&self, key: &str, items: &[String]) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(key.to_string(), items.to_vec());
        self.persist(records).await
    }

    async fn delete_by_key(&self, key: &str) -> CacheResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        if records.remove(key).is_some() {
            self.persist(records).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> JsonFileTagStore {
        let dir = std::env::temp_dir().join(format!("tagcache-{}", uuid::Uuid::new_v4()));
        JsonFileTagStore::in_dir(dir)
    }

    #[tokio::test]
    async fn test_in_memory_upsert_find_delete() {
        let store = InMemoryTagStore::new();
        assert_eq!(store.find_by_key("cache::tags.User").await.unwrap(), None);

        let items = vec!["user:1".to_string(), "user:2".to_string()];
        store.upsert("cache::tags.User", &items).await.unwrap();
        assert_eq!(
            store.find_by_key("cache::tags.User").await.unwrap(),
            Some(items)
        );

        store.upsert("cache::tags.User", &["user:1".to_string()]).await.unwrap();
        assert_eq!(
            store.records().await,
            vec![TagRecord {
                key: "cache::tags.User".to_string(),
                items: vec!["user:1".to_string()],
            }]
        );

        store.delete_by_key("cache::tags.User").await.unwrap();
        store.delete_by_key("cache::tags.User").await.unwrap();
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_json_file_store_survives_reopen() {
        let store = temp_store();
        assert_eq!(store.find_by_key("cache::tags.Post").await.unwrap(), None);

        store
            .upsert("cache::tags.Post", &["post:9".to_string()])
            .await
            .unwrap();
        store
            .upsert("cache::tags.User", &["user:1".to_string()])
            .await
            .unwrap();

        let reopened = JsonFileTagStore::new(store.path().to_path_buf());
        assert_eq!(
            reopened.find_by_key("cache::tags.Post").await.unwrap(),
            Some(vec!["post:9".to_string()])
        );

        reopened.delete_by_key("cache::tags.Post").await.unwrap();
        assert_eq!(store.find_by_key("cache::tags.Post").await.unwrap(), None);
        assert_eq!(
            store.find_by_key("cache::tags.User").await.unwrap(),
            Some(vec!["user:1".to_string()])
        );

        if let Some(dir) = store.path().parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    #[tokio::test]
    async fn test_json_file_store_reports_corruption() {
        let store = temp_store();
        if let Some(dir) = store.path().parent() {
            tokio::fs::create_dir_all(dir).await.unwrap();
        }
        tokio::fs::write(store.path(), b"not json").await.unwrap();

        let err = store.find_by_key("cache::tags.User").await.unwrap_err();
        assert!(err.is_storage());

        if let Some(dir) = store.path().parent() {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}
