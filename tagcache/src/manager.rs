//! High-level cache manager with tag tracking.

use crate::config::{CacheConfig, PERMANENT_TTL};
use crate::error::{CacheError, CacheResult};
use crate::logger::{FailurePolicy, Logger};
use crate::registry::{TagRegistry, Tags};
use crate::traits::{CacheStore, TagStore};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tagcache_log::debug;
use tokio::sync::Mutex;

/// Maps a caller's key to the key stored in the backend.
///
/// Identity unless configured otherwise.
#[derive(Clone, Default)]
pub struct KeyNormalizer(Option<Arc<dyn Fn(&str) -> String + Send + Sync>>);

impl KeyNormalizer {
    /// Leave keys unchanged.
    pub fn identity() -> Self {
        Self(None)
    }

    /// Use a custom mapping.
    pub fn new<F>(normalize: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Some(Arc::new(normalize)))
    }

    /// Prefix every key with `prefix:`.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |key| format!("{}:{}", prefix, key))
    }

    /// Apply the mapping.
    pub fn apply(&self, key: &str) -> String {
        match &self.0 {
            Some(normalize) => normalize(key),
            None => key.to_string(),
        }
    }
}

/// Post-read transform applied to every value found in the backend.
///
/// Receives the caller's (non-normalized) key and the stored JSON value and
/// returns the value handed to the caller. Defaults are not passed through
/// it.
pub type GetHook = Arc<dyn Fn(&str, serde_json::Value) -> serde_json::Value + Send + Sync>;

/// Shared handle to a manager's bound registry.
pub type SharedRegistry<S> = Arc<Mutex<TagRegistry<S>>>;

/// Cache facade over a [`CacheStore`] that keeps tag membership in sync.
///
/// A manager returned by [`with_tags`](Self::with_tags) owns a
/// [`TagRegistry`]; every successful `set`/`delete` through it registers or
/// unregisters the normalized key and saves the registry before returning.
/// The registry mutex is held across that mutate-then-save sequence, so
/// concurrent writers through one bound manager never lose updates.
///
/// Cloning shares the backend and the durable store but drops the bound
/// registry; rebind with `with_tags`. A bound manager and its registry share
/// the debug flag and logger, so `with_debug`/`with_logger` on a bound
/// manager apply to its registry too.
///
/// `remember`, `indecrement` and the non-native path of `add` are
/// read-modify-write sequences and are not atomic across callers.
pub struct CacheManager<S: CacheStore> {
    store: Arc<S>,
    records: Arc<dyn TagStore>,
    ttl: Duration,
    policy: Arc<FailurePolicy>,
    normalizer: KeyNormalizer,
    get_hook: Option<GetHook>,
    registry: Option<SharedRegistry<S>>,
}

impl<S: CacheStore> Clone for CacheManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            records: self.records.clone(),
            ttl: self.ttl,
            policy: Arc::new(self.policy.detached()),
            normalizer: self.normalizer.clone(),
            get_hook: self.get_hook.clone(),
            registry: None,
        }
    }
}

impl<S: CacheStore> CacheManager<S> {
    /// Create a manager with the default configuration.
    pub fn new<R>(store: S, records: R) -> Self
    where
        R: TagStore + 'static,
    {
        Self::with_config(store, records, &CacheConfig::default())
    }

    /// Create a manager taking TTL and debug mode from `config`.
    pub fn with_config<R>(store: S, records: R, config: &CacheConfig) -> Self
    where
        R: TagStore + 'static,
    {
        Self::from_shared(Arc::new(store), Arc::new(records), config)
    }

    /// Create a manager over already shared stores.
    pub fn from_shared(store: Arc<S>, records: Arc<dyn TagStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            records,
            ttl: config.default_ttl,
            policy: Arc::new(FailurePolicy::new(config.debug, None)),
            normalizer: KeyNormalizer::identity(),
            get_hook: None,
            registry: None,
        }
    }

    /// Report swallowed durable-store failures to `logger`.
    pub fn with_logger(self, logger: Arc<dyn Logger>) -> Self {
        self.policy.set_logger(Some(logger));
        self
    }

    /// Propagate durable-store failures instead of logging them.
    pub fn with_debug(self, debug: bool) -> Self {
        self.policy.set_debug(debug);
        self
    }

    /// Transform every value read by `get` and the `get_many` family.
    pub fn with_get_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.get_hook = Some(Arc::new(hook));
        self
    }

    /// Map keys before they reach the backend.
    pub fn with_key_normalizer(mut self, normalizer: KeyNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Clone bound to a fresh registry for `tags`.
    ///
    /// Tags do not accumulate: binding a manager that is already bound
    /// replaces its tags in the clone and leaves the receiver untouched.
    pub async fn with_tags(&self, tags: impl Into<Tags>) -> CacheResult<Self> {
        let mut clone = self.clone();
        let registry = TagRegistry::load(&clone, tags).await?;
        clone.registry = Some(Arc::new(Mutex::new(registry)));
        Ok(clone)
    }

    /// Clone with a different default TTL.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        let mut clone = self.clone();
        clone.ttl = ttl;
        clone
    }

    /// The bound registry, if any.
    pub fn registry(&self) -> Option<SharedRegistry<S>> {
        self.registry.clone()
    }

    /// The backend shared by every clone.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The durable tag record store.
    pub fn records(&self) -> &Arc<dyn TagStore> {
        &self.records
    }

    /// Default TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether durable-store failures propagate.
    pub fn is_debug(&self) -> bool {
        self.policy.is_debug()
    }

    /// The configured logger.
    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.policy.logger()
    }

    pub(crate) fn policy(&self) -> &Arc<FailurePolicy> {
        &self.policy
    }

    /// Backend key for `key`.
    pub fn normalized(&self, key: &str) -> String {
        self.normalizer.apply(key)
    }

    // ========== Reads ==========

    /// Get a typed value from the cache.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let json = self.store.get_json(&self.normalized(key)).await?;
        json.map(|json| self.read(key, &json)).transpose()
    }

    /// Get a value, or `default` when it is missing.
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Get a value, or compute one (without storing it) when it is missing.
    pub async fn get_or_else<T, F>(&self, key: &str, default: F) -> CacheResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        Ok(self.get(key).await?.unwrap_or_else(default))
    }

    /// Get several values, keyed by the caller's original keys.
    pub async fn get_many<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> CacheResult<HashMap<String, Option<T>>> {
        Ok(self.fetch_many(keys).await?.into_iter().collect())
    }

    /// Get several values, using `default` for every missing one.
    pub async fn get_many_or<T>(&self, keys: &[&str], default: T) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Clone,
    {
        self.get_many_or_else(keys, |_| default.clone()).await
    }

    /// Get several values, computing each missing one from its original key.
    pub async fn get_many_or_else<T, F>(
        &self,
        keys: &[&str],
        mut default: F,
    ) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned,
        F: FnMut(&str) -> T,
    {
        Ok(self
            .fetch_many(keys)
            .await?
            .into_iter()
            .map(|(key, value)| {
                let value = value.unwrap_or_else(|| default(key.as_str()));
                (key, value)
            })
            .collect())
    }

    /// Get several values, each with its own default.
    pub async fn get_many_with_defaults<T>(
        &self,
        entries: Vec<(&str, T)>,
    ) -> CacheResult<HashMap<String, T>>
    where
        T: DeserializeOwned,
    {
        let keys: Vec<&str> = entries.iter().map(|(key, _)| *key).collect();
        let fetched = self.fetch_many(&keys).await?;

        Ok(fetched
            .into_iter()
            .zip(entries)
            .map(|((key, value), (_, default))| (key, value.unwrap_or(default)))
            .collect())
    }

    async fn fetch_many<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> CacheResult<Vec<(String, Option<T>)>> {
        let normalized: Vec<String> = keys.iter().map(|key| self.normalized(key)).collect();
        let refs: Vec<&str> = normalized.iter().map(String::as_str).collect();
        let values = self.store.get_many(&refs).await?;

        if values.len() != keys.len() {
            return Err(CacheError::Other(format!(
                "backend returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }

        keys.iter()
            .zip(values)
            .map(|(key, json)| -> CacheResult<(String, Option<T>)> {
                let value = json.map(|json| self.read(key, &json)).transpose()?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    fn read<T: DeserializeOwned>(&self, key: &str, json: &str) -> CacheResult<T> {
        let Some(hook) = &self.get_hook else {
            return decode(json);
        };

        let value: serde_json::Value = decode(json)?;
        serde_json::from_value(hook(key, value))
            .map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    // ========== Writes ==========

    /// Store a value; `None` uses the default TTL.
    ///
    /// On a bound manager the normalized key is registered and the registry
    /// saved once the backend write succeeded.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let key = self.normalized(key);
        let json = encode(value)?;

        self.store
            .set_json(&key, json, Some(ttl.unwrap_or(self.ttl)))
            .await?;

        self.register(&[key]).await
    }

    /// Store a value until it is deleted or its tags are flushed.
    pub async fn forever<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set(key, value, Some(PERMANENT_TTL)).await
    }

    /// Store several values with one TTL and a single registry save.
    pub async fn set_many<T: Serialize>(
        &self,
        values: &[(&str, T)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let mut encoded: Vec<(String, String)> = Vec::with_capacity(values.len());
        for (key, value) in values {
            encoded.push((self.normalized(key), encode(value)?));
        }

        let items: Vec<(&str, String)> = encoded
            .iter()
            .map(|(key, json)| (key.as_str(), json.clone()))
            .collect();
        self.store
            .set_many(&items, Some(ttl.unwrap_or(self.ttl)))
            .await?;

        let keys: Vec<String> = encoded.into_iter().map(|(key, _)| key).collect();
        self.register(&keys).await
    }

    /// Store a value only if the key is absent. Returns whether it was stored.
    ///
    /// Atomic when the backend supports a native add; otherwise a `get`
    /// followed by `set`, which concurrent callers can interleave.
    pub async fn add<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        if self.store.supports_add() {
            let normalized = self.normalized(key);
            let added = self
                .store
                .add_json(&normalized, encode(value)?, Some(ttl.unwrap_or(self.ttl)))
                .await?;
            if added {
                self.register(&[normalized]).await?;
            }
            return Ok(added);
        }

        if self.store.get_json(&self.normalized(key)).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }

    /// Get a value, or compute, store and return it.
    ///
    /// Concurrent misses may each run `factory`.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    /// Add `step` to a numeric value (missing counts as 0) and store it with
    /// the default TTL. Returns the new value. Not atomic.
    ///
    /// Overflow is an error and leaves the stored value unchanged.
    pub async fn indecrement(&self, key: &str, step: i64) -> CacheResult<i64> {
        let value = self
            .get_or(key, 0i64)
            .await?
            .checked_add(step)
            .ok_or_else(|| CacheError::Other(format!("counter overflow on {}", key)))?;
        self.set(key, &value, None).await?;
        Ok(value)
    }

    // ========== Deletes ==========

    /// Delete a key and unregister it from the bound registry.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.normalized(key);
        self.store.delete(&key).await?;
        self.unregister(&[key]).await
    }

    /// Delete several keys with a single registry save.
    pub async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        let normalized: Vec<String> = keys.iter().map(|key| self.normalized(key)).collect();
        let refs: Vec<&str> = normalized.iter().map(String::as_str).collect();
        self.store.delete_many(&refs).await?;
        self.unregister(&normalized).await
    }

    /// Get a value and delete the key. The delete runs even on a miss.
    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let value = self.get(key).await?;
        self.delete(key).await?;
        Ok(value)
    }

    /// [`pull`](Self::pull) with a default for a miss.
    pub async fn pull_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.pull(key).await?.unwrap_or(default))
    }

    // ========== Registry sync ==========

    async fn register(&self, keys: &[String]) -> CacheResult<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };

        let mut registry = registry.lock().await;
        for key in keys {
            registry.add(key);
        }
        registry.save().await?;
        debug!(target: "tagcache::manager", "Registered {} keys", keys.len());
        Ok(())
    }

    async fn unregister(&self, keys: &[String]) -> CacheResult<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };

        let mut registry = registry.lock().await;
        for key in keys {
            registry.remove(key);
        }
        registry.save().await?;
        debug!(target: "tagcache::manager", "Unregistered {} keys", keys.len());
        Ok(())
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(json: &str) -> CacheResult<T> {
    serde_json::from_str(json).map_err(|e| CacheError::Deserialization(e.to_string()))
}
