//! Redis cache implementation.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;

/// Redis cache store.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    config: CacheConfig,
}

impl RedisCache {
    /// Create a new Redis cache instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tagcache::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), CacheError> {
    ///     let config = CacheConfig::redis("redis://localhost:6379");
    ///     let cache = RedisCache::new(config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        if config.url.is_empty() {
            return Err(CacheError::Config("Redis URL is empty".to_string()));
        }

        let client =
            Client::open(config.url.as_str()).map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection = tokio::time::timeout(
            config.connection_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self { connection, config })
    }

    /// Get the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    fn build_key(&self, key: &str) -> String {
        self.config.build_key(key)
    }

    fn build_keys(&self, keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| self.build_key(key)).collect()
    }

    async fn timed<T>(
        &self,
        op: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> CacheResult<T> {
        tokio::time::timeout(self.config.operation_timeout, op)
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::from)
    }
}

// Redis rejects EX 0, so sub-second TTLs round up to one second.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = self.timed(conn.get(&key)).await?;
        Ok(value)
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        if let Some(ttl) = ttl {
            let _: () = self.timed(conn.set_ex(&key, value, ttl_seconds(ttl))).await?;
        } else {
            let _: () = self.timed(conn.set(&key, value)).await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.del(&key)).await?;
        Ok(())
    }

    fn supports_add(&self) -> bool {
        true
    }

    async fn add_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<bool> {
        let key = self.build_key(key);
        let mut conn = self.connection.clone();

        // SET key value NX [EX ttl] replies OK or nil
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_seconds(ttl));
        }
        let reply: Option<String> = self.timed(cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.build_keys(keys);
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("MGET");
        cmd.arg(&keys);
        let values: Vec<Option<String>> = self.timed(cmd.query_async(&mut conn)).await?;
        Ok(values)
    }

    async fn set_many(&self, items: &[(&str, String)], ttl: Option<Duration>) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in items {
            let key = self.build_key(key);
            match ttl {
                Some(ttl) => pipe.set_ex(key, value, ttl_seconds(ttl)).ignore(),
                None => pipe.set(key, value).ignore(),
            };
        }
        let _: () = self.timed(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = self.build_keys(keys);
        let mut conn = self.connection.clone();
        let _: () = self.timed(conn.del(&keys)).await?;
        Ok(())
    }
}
