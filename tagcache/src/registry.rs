//! Tag registry: which cache keys belong to which tags.
//!
//! A [`TagRegistry`] is created by [`CacheManager::with_tags`] and tracks,
//! for each bound tag, the normalized cache keys written through that
//! manager. Membership is persisted twice on [`save`](TagRegistry::save):
//! into the backend cache under the tag key (permanent TTL) and into the
//! durable [`TagStore`], which is consulted when the cache copy is gone.
//!
//! Durable-store failures are swallowed and logged unless the manager is in
//! debug mode, in which case they propagate.

use crate::config::PERMANENT_TTL;
use crate::error::{CacheError, CacheResult};
use crate::logger::FailurePolicy;
use crate::manager::CacheManager;
use crate::traits::{CacheStore, TagStore};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tagcache_log::{debug, trace};

/// Prefix of the default tag key normalization.
pub const DEFAULT_TAG_PREFIX: &str = "cache::tags.";

type TagNormalizerFn = Box<dyn Fn(&str) -> String + Send + Sync>;

static TAG_NORMALIZER: OnceLock<TagNormalizerFn> = OnceLock::new();

/// Install the process-wide tag normalization.
///
/// Can be called once, and only before any tag key has been computed;
/// otherwise returns [`CacheError::InvalidArgument`] and the normalization
/// already in use stays in effect.
pub fn set_tag_normalizer<F>(normalizer: F) -> CacheResult<()>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    TAG_NORMALIZER
        .set(Box::new(normalizer))
        .map_err(|_| CacheError::InvalidArgument("tag normalizer is already set".to_string()))
}

/// Storage key for a tag, `cache::tags.<tag>` unless overridden.
pub fn tag_key(tag: &str) -> String {
    let normalize = TAG_NORMALIZER.get_or_init(default_tag_normalizer);
    normalize(tag)
}

fn default_tag_normalizer() -> TagNormalizerFn {
    Box::new(|tag: &str| format!("{}{}", DEFAULT_TAG_PREFIX, tag))
}

/// One or more tag names.
///
/// Converts from a single `&str`/`String` or from slices, arrays and vectors
/// of either. Any string is a valid tag; an empty list binds a registry that
/// tracks nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags(Vec<String>);

impl Tags {
    /// Deduplicate, keeping first-seen order.
    fn into_unique(self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::with_capacity(self.0.len());
        for tag in self.0 {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

impl From<&str> for Tags {
    fn from(tag: &str) -> Self {
        Tags(vec![tag.to_string()])
    }
}

impl From<String> for Tags {
    fn from(tag: String) -> Self {
        Tags(vec![tag])
    }
}

impl From<&String> for Tags {
    fn from(tag: &String) -> Self {
        Tags(vec![tag.clone()])
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Tags(tags)
    }
}

impl From<Vec<&str>> for Tags {
    fn from(tags: Vec<&str>) -> Self {
        Tags(tags.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Tags {
    fn from(tags: &[&str]) -> Self {
        Tags(tags.iter().map(|t| t.to_string()).collect())
    }
}

impl From<&[String]> for Tags {
    fn from(tags: &[String]) -> Self {
        Tags(tags.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Tags {
    fn from(tags: [&str; N]) -> Self {
        Tags(tags.iter().map(|t| t.to_string()).collect())
    }
}

/// In-memory tag membership for one manager binding.
///
/// Not shared between manager clones. Mutations through the owning manager
/// are serialized by the mutex it keeps the registry in.
pub struct TagRegistry<S: CacheStore> {
    store: Arc<S>,
    records: Arc<dyn TagStore>,
    policy: Arc<FailurePolicy>,
    tags: Vec<String>,
    items: HashMap<String, Vec<String>>,
}

impl<S: CacheStore> TagRegistry<S> {
    /// Bind a registry to `tags`, loading each tag's key set.
    ///
    /// Each set comes from the backend cache if present, else from the
    /// durable store (and is then written back to the cache), else starts
    /// empty.
    pub async fn load(manager: &CacheManager<S>, tags: impl Into<Tags>) -> CacheResult<Self> {
        let tags = tags.into().into_unique();

        let mut registry = Self {
            store: manager.store().clone(),
            records: manager.records().clone(),
            policy: manager.policy().clone(),
            tags: Vec::new(),
            items: HashMap::with_capacity(tags.len()),
        };

        for tag in &tags {
            let items = registry.load_items(tag).await?;
            registry.items.insert(tag.clone(), items);
        }
        registry.tags = tags;

        debug!(
            target: "tagcache::registry",
            "Bound registry to tags [{}]",
            registry.tags.join(", ")
        );

        Ok(registry)
    }

    /// Tags tracked by this registry.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Keys currently registered under `tag`, in insertion order.
    pub fn items(&self, tag: &str) -> Option<&[String]> {
        self.items.get(tag).map(Vec::as_slice)
    }

    /// Register `key` under every tracked tag. Not persisted until
    /// [`save`](Self::save).
    pub fn add(&mut self, key: &str) -> &mut Self {
        for items in self.items.values_mut() {
            items.push(key.to_string());
        }
        self
    }

    /// Remove the first occurrence of `key` under every tracked tag,
    /// including an occurrence at position zero.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        for items in self.items.values_mut() {
            if let Some(pos) = items.iter().position(|item| item == key) {
                items.remove(pos);
            }
        }
        self
    }

    /// Persist every tag's deduplicated key set to the cache and the
    /// durable store.
    pub async fn save(&mut self) -> CacheResult<&mut Self> {
        for tag in &self.tags {
            let key = tag_key(tag);
            let items = match self.items.get_mut(tag) {
                Some(items) => {
                    dedup_in_order(items);
                    items.clone()
                }
                None => continue,
            };

            let json = serde_json::to_string(&items)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            self.store.set_json(&key, json, Some(PERMANENT_TTL)).await?;

            if let Err(e) = self.records.upsert(&key, &items).await {
                self.absorb(tag, &key, e)?;
            }

            trace!(
                target: "tagcache::registry",
                "Saved {} keys under {}",
                items.len(),
                key
            );
        }

        Ok(self)
    }

    /// Delete every registered key from the cache, then the tag entries
    /// themselves from both the cache and the durable store.
    ///
    /// Afterwards every tracked tag has an empty key set; the registry
    /// keeps tracking the same tags.
    pub async fn flush_cache(&mut self) -> CacheResult<&mut Self> {
        for tag in &self.tags {
            let key = tag_key(tag);

            if let Some(items) = self.items.get(tag) {
                if !items.is_empty() {
                    let keys: Vec<&str> = items.iter().map(String::as_str).collect();
                    self.store.delete_many(&keys).await?;
                }
            }

            self.store.delete(&key).await?;

            if let Err(e) = self.records.delete_by_key(&key).await {
                self.absorb(tag, &key, e)?;
            }

            debug!(target: "tagcache::registry", "Flushed tag {}", tag);
        }

        for items in self.items.values_mut() {
            items.clear();
        }

        Ok(self)
    }

    async fn load_items(&self, tag: &str) -> CacheResult<Vec<String>> {
        let key = tag_key(tag);

        if let Some(json) = self.store.get_json(&key).await? {
            return serde_json::from_str(&json)
                .map_err(|e| CacheError::Deserialization(e.to_string()));
        }

        match self.records.find_by_key(&key).await {
            Ok(Some(items)) => {
                // repopulate the evicted cache copy
                let json = serde_json::to_string(&items)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                self.store.set_json(&key, json, Some(PERMANENT_TTL)).await?;
                Ok(items)
            }
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                self.absorb(tag, &key, e)?;
                Ok(Vec::new())
            }
        }
    }

    /// Durable-store failure policy: propagate in debug mode, otherwise
    /// report with `{tag, key}` context and carry on.
    fn absorb(&self, tag: &str, key: &str, err: CacheError) -> CacheResult<()> {
        if self.policy.is_debug() {
            return Err(err);
        }

        match self.policy.logger() {
            Some(logger) => logger.warning(&err.to_string(), &[("tag", tag), ("key", key)]),
            None => debug!(
                target: "tagcache::registry",
                "Ignored tag store failure for {} ({}): {}",
                tag,
                key,
                err
            ),
        }
        Ok(())
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items.retain(|item| seen.insert(item.clone()));
}

impl<S: CacheStore> std::fmt::Debug for TagRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRegistry")
            .field("tags", &self.tags)
            .field("items", &self.items)
            .field("debug", &self.policy.is_debug())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;
    use crate::memory::InMemoryCache;
    use crate::record_store::InMemoryTagStore;
    use async_trait::async_trait;

    /// Durable store that fails every call.
    struct BrokenTagStore;

    #[async_trait]
    impl TagStore for BrokenTagStore {
        async fn find_by_key(&self, _key: &str) -> CacheResult<Option<Vec<String>>> {
            Err(CacheError::Storage("database is down".to_string()))
        }

        async fn upsert(&self, _key: &str, _items: &[String]) -> CacheResult<()> {
            Err(CacheError::Storage("database is down".to_string()))
        }

        async fn delete_by_key(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Storage("database is down".to_string()))
        }
    }

    fn manager() -> (CacheManager<InMemoryCache>, InMemoryCache, InMemoryTagStore) {
        let cache = InMemoryCache::new();
        let records = InMemoryTagStore::new();
        let manager = CacheManager::new(cache.clone(), records.clone());
        (manager, cache, records)
    }

    #[test]
    fn test_default_tag_key() {
        assert_eq!(tag_key("User"), "cache::tags.User");
    }

    #[test]
    fn test_tags_conversions_dedup() {
        assert_eq!(Tags::from("a").into_unique(), vec!["a"]);
        assert_eq!(Tags::from(["a", "b", "a"]).into_unique(), vec!["a", "b"]);
        assert_eq!(Tags::from(vec!["x".to_string()]).into_unique(), vec!["x"]);
        assert_eq!(Tags::from(["ok", " "]).into_unique(), vec!["ok", " "]);
        assert!(Tags::from(Vec::<String>::new()).into_unique().is_empty());
    }

    #[tokio::test]
    async fn test_load_starts_empty() {
        let (manager, _, _) = manager();
        let registry = TagRegistry::load(&manager, "User").await.unwrap();

        assert_eq!(registry.tags(), ["User".to_string()]);
        assert_eq!(registry.items("User"), Some(&[][..]));
        assert_eq!(registry.items("Post"), None);
    }

    #[tokio::test]
    async fn test_load_without_tags_tracks_nothing() {
        let (manager, cache, records) = manager();
        let mut registry = TagRegistry::load(&manager, Vec::<String>::new()).await.unwrap();
        assert!(registry.tags().is_empty());

        registry.add("user:1").save().await.unwrap();
        registry.flush_cache().await.unwrap();

        assert!(cache.is_empty().await);
        assert!(records.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_deduplicates() {
        let (manager, cache, records) = manager();
        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();

        registry.add("user:1").add("user:1");
        registry.save().await.unwrap();

        assert_eq!(
            records.find_by_key("cache::tags.User").await.unwrap(),
            Some(vec!["user:1".to_string()])
        );
        assert_eq!(
            cache.get_json("cache::tags.User").await.unwrap(),
            Some(r#"["user:1"]"#.to_string())
        );

        let reloaded = TagRegistry::load(&manager, "User").await.unwrap();
        assert_eq!(reloaded.items("User"), Some(&["user:1".to_string()][..]));
    }

    #[tokio::test]
    async fn test_remove_first_position() {
        // position zero used to be mistaken for "not found"
        let (manager, _, _) = manager();
        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();

        registry.add("user:1").add("user:2").add("user:1");
        registry.remove("user:1");
        assert_eq!(
            registry.items("User"),
            Some(&["user:2".to_string(), "user:1".to_string()][..])
        );

        registry.remove("user:404");
        assert_eq!(registry.items("User").map(<[String]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_add_and_remove_apply_to_every_tag() {
        let (manager, _, _) = manager();
        let mut registry = TagRegistry::load(&manager, ["User", "Admin"]).await.unwrap();

        registry.add("user:1");
        assert_eq!(registry.items("User"), Some(&["user:1".to_string()][..]));
        assert_eq!(registry.items("Admin"), Some(&["user:1".to_string()][..]));

        registry.remove("user:1");
        assert_eq!(registry.items("User"), Some(&[][..]));
        assert_eq!(registry.items("Admin"), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_durable_store_is_fallback_after_eviction() {
        let (manager, cache, _) = manager();
        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();
        registry.add("user:7").save().await.unwrap();

        // the cache evicts the tag entry independently
        cache.delete("cache::tags.User").await.unwrap();

        let reloaded = TagRegistry::load(&manager, "User").await.unwrap();
        assert_eq!(reloaded.items("User"), Some(&["user:7".to_string()][..]));
        assert_eq!(
            cache.get_json("cache::tags.User").await.unwrap(),
            Some(r#"["user:7"]"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_user_scenario() {
        let (manager, cache, records) = manager();
        cache.set_json("user:1", "1".to_string(), None).await.unwrap();

        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();
        registry.add("user:1").add("user:2").save().await.unwrap();
        assert_eq!(
            records.find_by_key("cache::tags.User").await.unwrap(),
            Some(vec!["user:1".to_string(), "user:2".to_string()])
        );

        registry.remove("user:2").save().await.unwrap();
        assert_eq!(
            records.find_by_key("cache::tags.User").await.unwrap(),
            Some(vec!["user:1".to_string()])
        );

        registry.flush_cache().await.unwrap();
        assert_eq!(cache.get_json("user:1").await.unwrap(), None);
        assert_eq!(cache.get_json("cache::tags.User").await.unwrap(), None);
        assert_eq!(records.find_by_key("cache::tags.User").await.unwrap(), None);
        assert_eq!(registry.items("User"), Some(&[][..]));

        let reloaded = TagRegistry::load(&manager, "User").await.unwrap();
        assert_eq!(reloaded.items("User"), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_durable_failures_are_logged_outside_debug() {
        let logger = Arc::new(RecordingLogger::default());
        let manager = CacheManager::new(InMemoryCache::new(), BrokenTagStore)
            .with_logger(logger.clone());

        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();
        assert_eq!(registry.items("User"), Some(&[][..]));

        registry.add("user:1").save().await.unwrap();
        registry.flush_cache().await.unwrap();

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        for (message, context) in entries {
            assert!(message.contains("database is down"));
            assert_eq!(
                context,
                vec![
                    ("tag".to_string(), "User".to_string()),
                    ("key".to_string(), "cache::tags.User".to_string()),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_durable_failures_propagate_in_debug() {
        let manager = CacheManager::new(InMemoryCache::new(), BrokenTagStore).with_debug(true);

        let err = TagRegistry::load(&manager, "User").await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_save_still_updates_cache_when_durable_store_fails() {
        let cache = InMemoryCache::new();
        let manager = CacheManager::new(cache.clone(), BrokenTagStore);

        let mut registry = TagRegistry::load(&manager, "User").await.unwrap();
        registry.add("user:1").save().await.unwrap();

        assert_eq!(
            cache.get_json("cache::tags.User").await.unwrap(),
            Some(r#"["user:1"]"#.to_string())
        );
    }
}
