//! XorbHub Storage
//!
//! Durable object storage and local caching:
//! - `ObjectStore` trait for pluggable blob storage with presigned reads
//! - `MemoryObjectStore` for testing, `LocalObjectStore` for single-node deployments
//! - `TimeoutStore` to bound every remote call
//! - `UrlSigner` for time-limited, optionally range-bound download URLs
//! - `DiskCache` for a size-capped local blob cache
//! - Storage key layout for blocks, xorbs, shards and raw objects

pub mod backend;
pub mod disk_cache;
pub mod keys;
pub mod local;
pub mod memory;
pub mod presign;
pub mod timeout;

pub use backend::{ObjectMeta, ObjectStore, StorageStats};
pub use disk_cache::{CacheNamespace, CleanupReport, DiskCache};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use presign::{parse_signed_url, SignatureError, SignedQuery, UrlSigner};
pub use timeout::TimeoutStore;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for the local backend; `None` selects the in-memory backend
    pub path: Option<std::path::PathBuf>,

    /// Base URL that presigned object URLs are rooted at
    pub public_base_url: String,

    /// Per-call timeout applied to every store operation
    pub call_timeout: std::time::Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            public_base_url: "http://localhost:8080".to_string(),
            call_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl StorageConfig {
    /// Create a config for a local backend rooted at `path`
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}
