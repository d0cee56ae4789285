//! Application State
//!
//! Shared context for handlers and background jobs. Collaborators are
//! created once here and passed down explicitly; nothing is global.

use crate::access::{AllowAll, ReadAccess};
use crate::chunker::ChunkerService;
use crate::compactor::{Compactor, CompactorConfig};
use crate::config::GatewayConfig;
use crate::metrics::DedupMetrics;
use crate::oracle::{OracleConfig, TieredOracle};
use crate::reconstruction::ReconstructionService;
use crate::shard_manager::ShardManager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xorbhub_core::{Chunker, FixedSizeChunker, Result};
use xorbhub_metadata::{
    open_cache, open_registry, CacheConfig, DbConfig, FastCache, MemoryCache, MemoryRegistry, Registry,
};
use xorbhub_storage::{DiskCache, LocalObjectStore, MemoryObjectStore, ObjectStore, TimeoutStore, UrlSigner};

/// Application state shared across all handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn ObjectStore>,
    pub cache: Option<Arc<dyn FastCache>>,
    pub disk: Option<Arc<DiskCache>>,
    pub oracle: Arc<TieredOracle>,
    pub signer: UrlSigner,
    pub access: Arc<dyn ReadAccess>,
    pub chunker: Arc<dyn Chunker>,
    pub metrics: Arc<DedupMetrics>,

    pub chunking: Arc<ChunkerService>,
    pub compactor: Arc<Compactor>,
    pub shards: Arc<ShardManager>,
    pub reconstruction: Arc<ReconstructionService>,

    shutdown: CancellationToken,
}

impl AppState {
    /// Create application state with configuration.
    ///
    /// Connects PostgreSQL and Redis when configured; anything missing or
    /// unreachable falls back to an in-process implementation.
    pub async fn with_config(config: GatewayConfig) -> Result<Self> {
        let registry = open_registry(
            config.database.url.as_deref(),
            DbConfig {
                max_connections: config.database.max_connections,
                ..Default::default()
            },
        )
        .await?;

        let mut cache = open_cache(
            config.cache.redis_url.as_deref(),
            CacheConfig {
                prefix: config.cache.prefix.clone(),
                op_timeout: config.cache.op_timeout(),
                ..Default::default()
            },
        )
        .await;
        if cache.is_none() && config.cache.memory_fallback {
            info!(max_bytes = config.cache.memory_max_bytes, "Using in-memory fast tier");
            cache = Some(Arc::new(MemoryCache::with_byte_budget(config.cache.memory_max_bytes)));
        }

        let signer = match &config.storage.signing_secret {
            Some(secret) => UrlSigner::from_passphrase(secret, &config.server.public_base_url),
            None => {
                warn!("No signing secret configured, presigned URLs will not survive a restart");
                UrlSigner::ephemeral(&config.server.public_base_url)
            }
        };

        let backend: Arc<dyn ObjectStore> = match &config.storage.path {
            Some(path) => {
                info!(path = %path.display(), "Using local object store");
                Arc::new(LocalObjectStore::new(path, signer.clone())?)
            }
            None => {
                warn!("No storage path configured, using in-memory object store (not persistent)");
                Arc::new(MemoryObjectStore::new(signer.clone()))
            }
        };
        let store: Arc<dyn ObjectStore> = Arc::new(TimeoutStore::new(backend, config.storage.call_timeout()));

        Ok(Self::builder(config)
            .registry(registry)
            .store(store, signer)
            .cache(cache)
            .build())
    }

    /// Builder with in-memory defaults for every collaborator
    pub fn builder(config: GatewayConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            registry: None,
            store: None,
            cache: None,
            access: None,
            chunker: None,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the periodic maintenance loop
    pub fn spawn_background(&self) -> JoinHandle<()> {
        crate::worker::build_worker(self).start()
    }

    /// Stop background work
    pub fn shutdown(&self) {
        info!("Stopping background work");
        self.shutdown.cancel();
    }
}

pub struct AppStateBuilder {
    config: GatewayConfig,
    registry: Option<Arc<dyn Registry>>,
    store: Option<(Arc<dyn ObjectStore>, UrlSigner)>,
    cache: Option<Arc<dyn FastCache>>,
    access: Option<Arc<dyn ReadAccess>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl AppStateBuilder {
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// `signer` must be the one the store presigns with; the objects route
    /// verifies against it.
    pub fn store(mut self, store: Arc<dyn ObjectStore>, signer: UrlSigner) -> Self {
        self.store = Some((store, signer));
        self
    }

    pub fn cache(mut self, cache: Option<Arc<dyn FastCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn access(mut self, access: Arc<dyn ReadAccess>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn build(self) -> AppState {
        let config = self.config;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        let (store, signer) = self.store.unwrap_or_else(|| {
            let signer = UrlSigner::ephemeral(&config.server.public_base_url);
            let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new(signer.clone()));
            (store, signer)
        });
        let access = self.access.unwrap_or_else(|| Arc::new(AllowAll));
        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(FixedSizeChunker::new(config.chunking.block_size)));
        let disk = config
            .cache
            .disk_dir
            .as_ref()
            .map(|dir| Arc::new(DiskCache::new(dir, config.cache.disk_max_bytes)));

        let oracle = Arc::new(TieredOracle::new(
            registry.clone(),
            store.clone(),
            self.cache.clone(),
            disk.clone(),
            OracleConfig {
                cache_timeout: config.cache.op_timeout(),
                store_timeout: config.storage.call_timeout(),
                hot_ttl: config.cache.hot_ttl(),
                redirect_ttl: config.storage.redirect_ttl(),
            },
        ));
        let metrics = Arc::new(DedupMetrics::new());

        let chunking = Arc::new(ChunkerService::new(
            registry.clone(),
            store.clone(),
            oracle.clone(),
            chunker.clone(),
            metrics.clone(),
        ));
        let compactor = Arc::new(Compactor::new(
            registry.clone(),
            store.clone(),
            CompactorConfig {
                xorb_target_size: config.compaction.xorb_target_size,
                batch_limit: config.compaction.batch_limit,
                always_flush_remainder: config.compaction.always_flush_remainder,
            },
        ));
        let shards = Arc::new(
            ShardManager::new(registry.clone(), store.clone(), oracle.clone())
                .with_compaction_threshold(config.shards.compaction_threshold),
        );
        let reconstruction = Arc::new(
            ReconstructionService::new(registry.clone(), store.clone(), access.clone())
                .with_window_size(config.reconstruction.window_size)
                .with_url_ttl(config.reconstruction.url_ttl()),
        );

        AppState {
            config,
            registry,
            store,
            cache: self.cache,
            disk,
            oracle,
            signer,
            access,
            chunker,
            metrics,
            chunking,
            compactor,
            shards,
            reconstruction,
            shutdown: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_config_defaults_to_memory() {
        let state = AppState::with_config(GatewayConfig::default()).await.unwrap();
        assert!(state.cache.is_some());
        assert!(state.disk.is_none());
        assert_eq!(state.chunker.name(), FixedSizeChunker::new(4 * 1024 * 1024).name());
        assert_eq!(state.registry.stats().await.unwrap().block_count, 0);
    }

    #[tokio::test]
    async fn test_memory_fallback_can_be_disabled() {
        let mut config = GatewayConfig::default();
        config.cache.memory_fallback = false;
        let state = AppState::with_config(config).await.unwrap();
        assert!(state.cache.is_none());
    }

    #[tokio::test]
    async fn test_local_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.storage.path = Some(dir.path().join("objects"));
        config.storage.signing_secret = Some("hunter2".to_string());
        let state = AppState::with_config(config).await.unwrap();

        state
            .store
            .put("cas/blocks/aa/bb/x", bytes::Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert!(dir.path().join("objects/cas/blocks/aa/bb/x").exists());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let state = AppState::builder(GatewayConfig::default()).build();
        let token = state.shutdown_token();
        assert!(!token.is_cancelled());
        state.shutdown();
        assert!(token.is_cancelled());
    }
}
