//! XorbHub Metadata
//!
//! Durable registry of files, blocks, xorbs, placements and shards, plus the
//! optional fast tier in front of it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Registry                            │
//! │   ┌──────────────────────┐    ┌──────────────────────┐     │
//! │   │   PostgresRegistry   │    │    MemoryRegistry    │     │
//! │   │  (sqlx transactions) │    │ (single write lock)  │     │
//! │   └──────────────────────┘    └──────────────────────┘     │
//! ├────────────────────────────────────────────────────────────┤
//! │                       FastCache                            │
//! │   ┌──────────────────────┐    ┌──────────────────────┐     │
//! │   │      RedisCache      │    │     MemoryCache      │     │
//! │   │ (BF.* + sets + TTL)  │    │ (bloom + sets + TTL) │     │
//! │   └──────────────────────┘    └──────────────────────┘     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every multi-row mutation (file layout, xorb seal) is all-or-nothing.

pub mod cache;
pub mod memory;
pub mod memory_cache;
pub mod models;
pub mod postgres;
pub mod registry;

pub use cache::{CacheConfig, CacheError, FastCache, Namespace, RedisCache};
pub use memory::MemoryRegistry;
pub use memory_cache::MemoryCache;
pub use models::*;
pub use postgres::{DbConfig, DbError, PostgresRegistry};
pub use registry::Registry;

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Metadata error types
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A write would break a registry invariant (double placement, overrun)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        MetadataError::Database(DbError::Sqlx(err))
    }
}

impl From<MetadataError> for xorbhub_core::XorbError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => xorbhub_core::XorbError::NotFound(what),
            MetadataError::Database(DbError::Sqlx(e)) => {
                xorbhub_core::XorbError::TransientStore(e.to_string())
            }
            other => xorbhub_core::XorbError::Internal(other.to_string()),
        }
    }
}

/// Open the registry: PostgreSQL when a URL is configured, otherwise in-memory.
pub async fn open_registry(database_url: Option<&str>, db_config: DbConfig) -> Result<Arc<dyn Registry>> {
    match database_url {
        Some(url) => {
            let registry = PostgresRegistry::new(DbConfig {
                url: url.to_string(),
                ..db_config
            })
            .await?;
            registry.migrate().await?;
            info!("Using PostgreSQL registry");
            Ok(Arc::new(registry))
        }
        None => {
            warn!("No database configured, using in-memory registry (not persistent)");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}

/// Connect the fast tier. A failed connection logs and disables the tier.
pub async fn open_cache(redis_url: Option<&str>, config: CacheConfig) -> Option<Arc<dyn FastCache>> {
    let url = redis_url?;
    match RedisCache::new(CacheConfig {
        url: url.to_string(),
        ..config
    })
    .await
    {
        Ok(cache) => {
            info!("Redis cache connected");
            Some(Arc::new(cache))
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis, running without cache");
            None
        }
    }
}
