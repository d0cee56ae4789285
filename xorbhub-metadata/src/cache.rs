//! Fast-tier cache
//!
//! Optional Redis layer in front of the registry: an exact membership set, a
//! probabilistic membership filter and a short-TTL content cache, per
//! [`Namespace`]. Callers treat every error as a miss; correctness never
//! depends on this layer.
//!
//! Key layout with the default `xet` prefix:
//! - `xet:blocks:all` membership set
//! - `xet:bloom:blocks` bloom filter (RedisBloom), falling back to the set
//! - `xet:block:{hash}` hot content

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use xorbhub_core::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Object family a cache entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Blocks,
    Shards,
}

impl Namespace {
    pub fn plural(&self) -> &'static str {
        match self {
            Namespace::Blocks => "blocks",
            Namespace::Shards => "shards",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            Namespace::Blocks => "block",
            Namespace::Shards => "shard",
        }
    }
}

/// Fast-tier operations
#[async_trait]
pub trait FastCache: Send + Sync {
    /// Exact membership
    async fn is_member(&self, ns: Namespace, id: &str) -> Result<bool>;
    async fn add_member(&self, ns: Namespace, id: &str) -> Result<()>;
    async fn remove_member(&self, ns: Namespace, id: &str) -> Result<()>;

    /// Probabilistic membership: no false negatives, possible false positives
    async fn bloom_check(&self, ns: Namespace, id: &str) -> Result<bool>;
    async fn bloom_add(&self, ns: Namespace, id: &str) -> Result<()>;

    /// Short-TTL content
    async fn get_content(&self, ns: Namespace, id: &str) -> Result<Option<Bytes>>;
    async fn put_content(&self, ns: Namespace, id: &str, data: &Bytes, ttl: Duration) -> Result<()>;
    async fn evict_content(&self, ns: Namespace, id: &str) -> Result<()>;
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix
    pub prefix: String,
    /// Upper bound for any single Redis call
    pub op_timeout: Duration,
    /// Consecutive failures before calls are short-circuited
    pub failure_threshold: u64,
    /// How long to short-circuit before probing Redis again
    pub recovery_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "xet".to_string(),
            op_timeout: Duration::from_millis(500),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Redis fast tier
pub struct RedisCache {
    conn: MultiplexedConnection,
    config: CacheConfig,
    breaker: CircuitBreaker,
    /// Set once BF.* fails, after which the membership set stands in
    bloom_unsupported: AtomicBool,
}

impl RedisCache {
    /// Create a new cache connection
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = tokio::time::timeout(config.op_timeout * 10, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Timeout(config.op_timeout * 10))??;
        info!(prefix = %config.prefix, "Connected to Redis cache");
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout,
            name: "redis".to_string(),
        });
        Ok(Self {
            conn,
            config,
            breaker,
            bloom_unsupported: AtomicBool::new(false),
        })
    }

    /// Build a cache key with prefix
    fn key(&self, parts: &[&str]) -> String {
        let mut key = self.config.prefix.clone();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        key
    }

    fn members_key(&self, ns: Namespace) -> String {
        self.key(&[ns.plural(), "all"])
    }

    fn bloom_key(&self, ns: Namespace) -> String {
        self.key(&["bloom", ns.plural()])
    }

    fn content_key(&self, ns: Namespace, id: &str) -> String {
        self.key(&[ns.singular(), id])
    }

    /// Run one Redis call under the timeout and circuit breaker
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, redis::RedisError>> + Send,
    {
        let timeout = self.config.op_timeout;
        let bounded = async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(res) => res.map_err(CacheError::from),
                Err(_) => Err(CacheError::Timeout(timeout)),
            }
        };
        match self.breaker.call(bounded).await {
            Ok(v) => Ok(v),
            Err(CircuitBreakerError::Open(name)) => Err(CacheError::Unavailable(name)),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    fn is_unknown_command(err: &CacheError) -> bool {
        match err {
            // WRONGTYPE and friends are real failures, not a missing module
            CacheError::Redis(e) => e.to_string().to_ascii_lowercase().contains("unknown command"),
            _ => false,
        }
    }
}

#[async_trait]
impl FastCache for RedisCache {
    async fn is_member(&self, ns: Namespace, id: &str) -> Result<bool> {
        let key = self.members_key(ns);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.sismember::<_, _, bool>(key, id).await })
            .await
    }

    async fn add_member(&self, ns: Namespace, id: &str) -> Result<()> {
        let key = self.members_key(ns);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.sadd::<_, _, ()>(key, id).await })
            .await
    }

    async fn remove_member(&self, ns: Namespace, id: &str) -> Result<()> {
        let key = self.members_key(ns);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.srem::<_, _, ()>(key, id).await })
            .await
    }

    async fn bloom_check(&self, ns: Namespace, id: &str) -> Result<bool> {
        if !self.bloom_unsupported.load(Ordering::Relaxed) {
            let key = self.bloom_key(ns);
            let mut conn = self.conn.clone();
            let res = self
                .guarded(async move {
                    redis::cmd("BF.EXISTS")
                        .arg(key)
                        .arg(id)
                        .query_async::<_, bool>(&mut conn)
                        .await
                })
                .await;
            match res {
                Err(ref e) if Self::is_unknown_command(e) => {
                    warn!(error = %e, "BF.EXISTS unavailable, falling back to membership set");
                    self.bloom_unsupported.store(true, Ordering::Relaxed);
                }
                other => return other,
            }
        }
        self.is_member(ns, id).await
    }

    async fn bloom_add(&self, ns: Namespace, id: &str) -> Result<()> {
        if !self.bloom_unsupported.load(Ordering::Relaxed) {
            let key = self.bloom_key(ns);
            let mut conn = self.conn.clone();
            let res = self
                .guarded(async move {
                    redis::cmd("BF.ADD")
                        .arg(key)
                        .arg(id)
                        .query_async::<_, ()>(&mut conn)
                        .await
                })
                .await;
            match res {
                Err(ref e) if Self::is_unknown_command(e) => {
                    warn!(error = %e, "BF.ADD unavailable, falling back to membership set");
                    self.bloom_unsupported.store(true, Ordering::Relaxed);
                }
                other => return other,
            }
        }
        self.add_member(ns, id).await
    }

    async fn get_content(&self, ns: Namespace, id: &str) -> Result<Option<Bytes>> {
        let key = self.content_key(ns, id);
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = self
            .guarded(async move { conn.get::<_, Option<Vec<u8>>>(key).await })
            .await?;
        debug!(ns = ns.plural(), hit = data.is_some(), "Cache get");
        Ok(data.map(Bytes::from))
    }

    async fn put_content(&self, ns: Namespace, id: &str, data: &Bytes, ttl: Duration) -> Result<()> {
        let key = self.content_key(ns, id);
        let mut conn = self.conn.clone();
        let value = data.to_vec();
        self.guarded(async move { conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await })
            .await
    }

    async fn evict_content(&self, ns: Namespace, id: &str) -> Result<()> {
        let key = self.content_key(ns, id);
        let mut conn = self.conn.clone();
        self.guarded(async move { conn.del::<_, ()>(key).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        assert_eq!(Namespace::Blocks.plural(), "blocks");
        assert_eq!(Namespace::Shards.singular(), "shard");
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.prefix, "xet");
        assert!(config.op_timeout < Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_command_detection() {
        let err = CacheError::Redis(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "unknown command",
            "BF.EXISTS".to_string(),
        )));
        assert!(RedisCache::is_unknown_command(&err));
        assert!(!RedisCache::is_unknown_command(&CacheError::Timeout(Duration::from_secs(1))));

        let wrong_type = CacheError::Redis(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "An error was signalled by the server",
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        )));
        assert!(!RedisCache::is_unknown_command(&wrong_type));
    }
}
