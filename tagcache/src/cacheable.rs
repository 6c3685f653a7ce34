//! Per-type caching for entities.
//!
//! An entity type holds (or shares) a [`Cacher`] scoped to a tag, usually
//! its own type name, and implements [`Cacheable`] to expose `cache` and
//! `flush_cache`. The first call binds the base manager to the tag; every
//! later call, from any instance sharing the `Cacher`, reuses that binding.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tagcache::*;
//!
//! struct User {
//!     id: u64,
//!     cacher: Arc<Cacher<InMemoryCache>>,
//! }
//!
//! impl Cacheable for User {
//!     type Store = InMemoryCache;
//!
//!     fn cacher(&self) -> &Cacher<InMemoryCache> {
//!         &self.cacher
//!     }
//! }
//!
//! # async fn example(user: User) -> Result<(), CacheError> {
//! let posts: u32 = user
//!     .cache(&format!("user:{}:posts", user.id), || async { Ok(42) }, None)
//!     .await?;
//! user.flush_cache().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DEFAULT_TTL;
use crate::error::CacheResult;
use crate::manager::CacheManager;
use crate::traits::CacheStore;
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::time::Duration;
use tagcache_log::debug;
use tokio::sync::OnceCell;

/// Lazily tag-bound manager for one entity type.
pub struct Cacher<S: CacheStore> {
    manager: Option<CacheManager<S>>,
    tag: String,
    ttl: Duration,
    bound: OnceCell<CacheManager<S>>,
}

impl<S: CacheStore> Cacher<S> {
    /// Scope `manager` to `tag`. Without a manager, caching is a pass-through.
    pub fn new(manager: Option<CacheManager<S>>, tag: impl Into<String>) -> Self {
        Self {
            manager,
            tag: tag.into(),
            ttl: DEFAULT_TTL,
            bound: OnceCell::new(),
        }
    }

    /// Scope `manager` to the type name of `T`.
    pub fn for_type<T: ?Sized>(manager: Option<CacheManager<S>>) -> Self {
        Self::new(manager, std::any::type_name::<T>())
    }

    /// Default TTL for [`cache`](Self::cache).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The tag entries are grouped under.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The tag-bound manager, binding it on first use.
    ///
    /// `None` when no base manager is configured. Concurrent first callers
    /// bind once; a failed bind is retried by the next caller.
    pub async fn manager(&self) -> CacheResult<Option<&CacheManager<S>>> {
        let Some(manager) = &self.manager else {
            return Ok(None);
        };

        let bound = self
            .bound
            .get_or_try_init(|| async {
                debug!(target: "tagcache::cacheable", "Binding cache to tag {}", self.tag);
                manager.with_tags(self.tag.as_str()).await
            })
            .await?;
        Ok(Some(bound))
    }

    /// Return the cached value for `key`, or compute and store it.
    ///
    /// `ttl` falls back to the cacher's default. Without a base manager the
    /// factory runs on every call.
    pub async fn cache<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        match self.manager().await? {
            Some(manager) => {
                manager
                    .remember(key, Some(ttl.unwrap_or(self.ttl)), factory)
                    .await
            }
            None => factory().await,
        }
    }

    /// Drop every entry cached under this tag.
    pub async fn flush_cache(&self) -> CacheResult<()> {
        let Some(manager) = self.manager().await? else {
            return Ok(());
        };

        if let Some(registry) = manager.registry() {
            registry.lock().await.flush_cache().await?;
        }
        Ok(())
    }
}

impl<S: CacheStore> std::fmt::Debug for Cacher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cacher")
            .field("tag", &self.tag)
            .field("ttl", &self.ttl)
            .field("configured", &self.manager.is_some())
            .field("bound", &self.bound.initialized())
            .finish()
    }
}

/// Caching capability for entity types holding a [`Cacher`].
pub trait Cacheable {
    /// Backend of the underlying manager.
    type Store: CacheStore;

    /// The cacher scoped to this type.
    fn cacher(&self) -> &Cacher<Self::Store>;

    /// See [`Cacher::cache`].
    fn cache<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Option<Duration>,
    ) -> impl Future<Output = CacheResult<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.cacher().cache(key, factory, ttl)
    }

    /// See [`Cacher::flush_cache`].
    fn flush_cache(&self) -> impl Future<Output = CacheResult<()>> {
        self.cacher().flush_cache()
    }
}
