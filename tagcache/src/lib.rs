//! Tag-indexed cache manager.
//!
//! Wraps a key/value cache backend so that entries can be grouped under
//! tags and flushed as a group. Tag membership is kept both in the cache
//! and in a durable record store, so it survives cache eviction.
//!
//! # Features
//!
//! - `redis` - Enable the Redis backend (enabled by default)
//!
//! # Examples
//!
//! ## Tagged entries
//!
//! ```no_run
//! use tagcache::*;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let manager = CacheManager::new(InMemoryCache::new(), InMemoryTagStore::new());
//!
//! let users = manager.with_tags("User").await?;
//! users.set("user:1", &"alice", None).await?;
//! users.set("user:2", &"bob", None).await?;
//!
//! // Drop every entry tagged "User"
//! if let Some(registry) = users.registry() {
//!     registry.lock().await.flush_cache().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Redis backend with file-backed tag records
//!
//! ```no_run
//! use tagcache::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let config = CacheConfig::from_env()?;
//!     let redis = RedisCache::new(config.clone()).await?;
//!     let records = JsonFileTagStore::in_dir("/var/lib/myapp");
//!
//!     let manager = CacheManager::with_config(redis, records, &config)
//!         .with_logger(std::sync::Arc::new(StructuredLogger::default()));
//!
//!     let posts = manager.with_tags(["Post", "Feed"]).await?;
//!     let count: u64 = posts
//!         .remember("post:count", None, || async { Ok(128) })
//!         .await?;
//!     println!("{}", count);
//!     Ok(())
//! }
//! ```

pub mod cacheable;
pub mod config;
pub mod error;
pub mod logger;
pub mod manager;
pub mod memory;
pub mod record_store;
pub mod registry;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use cacheable::*;
pub use config::*;
pub use error::*;
pub use logger::*;
pub use manager::*;
pub use memory::*;
pub use record_store::*;
pub use registry::*;
pub use traits::*;

#[cfg(feature = "redis")]
pub use redis_cache::*;
