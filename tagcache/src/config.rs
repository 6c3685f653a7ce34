//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use std::env;
use std::time::Duration;

/// Default TTL applied when a caller passes none (60 seconds).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// TTL used for entries that must persist until explicitly flushed.
pub const PERMANENT_TTL: Duration = Duration::from_secs(999_999_999);

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connection URL for network backends
    pub url: String,

    /// Key prefix applied by network backends to every key
    pub key_prefix: Option<String>,

    /// Default TTL for cache entries written through the manager
    pub default_ttl: Duration,

    /// Propagate durable-store failures instead of logging them
    pub debug: bool,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Operation timeout
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: None,
            default_ttl: DEFAULT_TTL,
            debug: false,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
        }
    }
}

impl CacheConfig {
    /// Create a new Redis cache configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagcache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379");
    /// assert_eq!(config.default_ttl.as_secs(), 60);
    /// ```
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from `TAGCACHE_*` environment variables.
    ///
    /// - `TAGCACHE_REDIS_URL` - backend URL
    /// - `TAGCACHE_KEY_PREFIX` - key prefix
    /// - `TAGCACHE_DEFAULT_TTL` - default TTL in seconds
    /// - `TAGCACHE_DEBUG=1|true` - propagate durable-store failures
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("TAGCACHE_REDIS_URL") {
            config.url = url;
        }

        if let Ok(prefix) = env::var("TAGCACHE_KEY_PREFIX") {
            if !prefix.is_empty() {
                config.key_prefix = Some(prefix);
            }
        }

        if let Ok(ttl) = env::var("TAGCACHE_DEFAULT_TTL") {
            let seconds: u64 = ttl.trim().parse().map_err(|_| {
                CacheError::Config(format!("TAGCACHE_DEFAULT_TTL must be seconds, got {:?}", ttl))
            })?;
            config.default_ttl = Duration::from_secs(seconds);
        }

        if let Ok(debug) = env::var("TAGCACHE_DEBUG") {
            config.debug = debug == "1" || debug.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Enable or disable debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Build the final key with prefix if configured.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }
}
