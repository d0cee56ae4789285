//! Tiered existence and content oracle
//!
//! Lookups walk an ordered list of tiers, fastest first. The first positive
//! answer wins and every faster tier is backfilled so the next lookup stops
//! earlier.
//!
//! ```text
//! existence:  Bloom ─▶ Membership ─▶ Registry ─▶ Origin
//! content:    HotCache ─▶ DiskCache ─▶ Origin (presigned redirect)
//! ```
//!
//! Cache tiers are optional and never required for a correct answer: a cache
//! error or timeout is logged and treated as a miss. Registry and origin
//! failures are remembered, so a lookup that found nothing while an
//! authoritative tier was down reports a transient error instead of "absent".

use crate::metrics;
use bytes::Bytes;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use xorbhub_core::{ContentHash, Result, XorbError};
use xorbhub_metadata::{FastCache, Namespace, NewBlock, NewShard, Registry};
use xorbhub_storage::{keys, CacheNamespace, DiskCache, ObjectStore};

/// Object family the oracle is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Block,
    Shard,
}

impl ObjectKind {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Block => "block",
            ObjectKind::Shard => "shard",
        }
    }

    fn namespace(&self) -> Namespace {
        match self {
            ObjectKind::Block => Namespace::Blocks,
            ObjectKind::Shard => Namespace::Shards,
        }
    }

    fn disk_namespace(&self) -> CacheNamespace {
        match self {
            ObjectKind::Block => CacheNamespace::Blocks,
            ObjectKind::Shard => CacheNamespace::Shards,
        }
    }

    /// Strictness for existence checks served to clients. Shards are retired
    /// by compaction and a bloom filter cannot forget, so they skip it.
    pub fn head_strictness(&self) -> Strictness {
        match self {
            ObjectKind::Block => Strictness::Lenient,
            ObjectKind::Shard => Strictness::Confirmed,
        }
    }

    /// Durable storage key for `id`
    pub fn storage_key(&self, id: &ContentHash) -> String {
        match self {
            ObjectKind::Block => keys::block_key(&id.to_hex()),
            ObjectKind::Shard => keys::shard_key(&id.to_hex()),
        }
    }
}

/// A lookup tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Bloom,
    Membership,
    Registry,
    HotCache,
    DiskCache,
    Origin,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Bloom => "bloom",
            Tier::Membership => "membership",
            Tier::Registry => "registry",
            Tier::HotCache => "hot_cache",
            Tier::DiskCache => "disk_cache",
            Tier::Origin => "origin",
        }
    }

    /// Tiers whose failure means "unknown" rather than "absent"
    fn is_authoritative(&self) -> bool {
        matches!(self, Tier::Registry | Tier::Origin)
    }
}

/// Default existence probe order
pub const EXISTENCE_TIERS: [Tier; 4] = [Tier::Bloom, Tier::Membership, Tier::Registry, Tier::Origin];

/// Default content source order
pub const CONTENT_TIERS: [Tier; 3] = [Tier::HotCache, Tier::DiskCache, Tier::Origin];

/// How much a positive answer must be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// A bloom positive is accepted; a rare false positive only costs a skipped upload
    Lenient,
    /// Only exact tiers may answer
    Confirmed,
}

/// Result of an existence lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Found { tier: Tier, size: Option<u64> },
    Missing,
}

impl Existence {
    pub fn is_found(&self) -> bool {
        matches!(self, Existence::Found { .. })
    }
}

/// Result of a content lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Bytes { tier: Tier, data: Bytes },
    /// Present only at the origin; fetch it there
    Redirect { url: String },
    Missing,
}

/// Oracle timeouts and TTLs
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Bound for any single cache call
    pub cache_timeout: Duration,
    /// Bound for any single registry or origin call
    pub store_timeout: Duration,
    /// Hot content TTL
    pub hot_ttl: Duration,
    /// Expiry of redirect URLs
    pub redirect_ttl: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(500),
            store_timeout: Duration::from_secs(30),
            hot_ttl: Duration::from_secs(3600),
            redirect_ttl: Duration::from_secs(3600),
        }
    }
}

enum Probe {
    Hit(Option<u64>),
    Miss,
}

/// Tiered lookups over blocks and shards
pub struct TieredOracle {
    registry: Arc<dyn Registry>,
    store: Arc<dyn ObjectStore>,
    cache: Option<Arc<dyn FastCache>>,
    disk: Option<Arc<DiskCache>>,
    existence_tiers: Vec<Tier>,
    content_tiers: Vec<Tier>,
    config: OracleConfig,
}

impl TieredOracle {
    pub fn new(
        registry: Arc<dyn Registry>,
        store: Arc<dyn ObjectStore>,
        cache: Option<Arc<dyn FastCache>>,
        disk: Option<Arc<DiskCache>>,
        config: OracleConfig,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            disk,
            existence_tiers: EXISTENCE_TIERS.to_vec(),
            content_tiers: CONTENT_TIERS.to_vec(),
            config,
        }
    }

    /// Replace the existence probe order
    pub fn with_existence_tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.existence_tiers = tiers;
        self
    }

    /// Replace the content source order
    pub fn with_content_tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.content_tiers = tiers;
        self
    }

    pub fn existence_tiers(&self) -> &[Tier] {
        &self.existence_tiers
    }

    pub fn content_tiers(&self) -> &[Tier] {
        &self.content_tiers
    }

    /// Run one tier call under a timeout. Failures are logged and counted.
    async fn attempt<T, E, F>(&self, kind: ObjectKind, tier: Tier, fut: F) -> std::result::Result<T, String>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let limit = if tier.is_authoritative() {
            self.config.store_timeout
        } else {
            self.config.cache_timeout
        };
        let outcome = match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", limit),
        };
        warn!(kind = kind.label(), tier = tier.label(), error = %outcome, "Tier call failed, treating as miss");
        metrics::record_tier_error(kind.label(), tier.label());
        Err(outcome)
    }

    // ===== Existence =====

    /// Does `id` exist anywhere?
    pub async fn exists(&self, kind: ObjectKind, id: &ContentHash, strictness: Strictness) -> Result<Existence> {
        let mut degraded: Option<String> = None;

        for (i, &tier) in self.existence_tiers.iter().enumerate() {
            if tier == Tier::Bloom && strictness == Strictness::Confirmed {
                continue;
            }
            match self.probe(tier, kind, id).await {
                Ok(Probe::Hit(size)) => {
                    debug!(kind = kind.label(), id = %id, tier = tier.label(), "Existence hit");
                    metrics::record_tier_hit(kind.label(), tier.label());
                    self.backfill_existence(&self.existence_tiers[..i], kind, id, size).await;
                    return Ok(Existence::Found { tier, size });
                }
                Ok(Probe::Miss) => {}
                Err(e) if tier.is_authoritative() => degraded = Some(e),
                Err(_) => {}
            }
        }

        match degraded {
            Some(e) => Err(XorbError::TransientStore(format!(
                "{} {} unresolved: {}",
                kind.label(),
                id,
                e
            ))),
            None => Ok(Existence::Missing),
        }
    }

    async fn probe(&self, tier: Tier, kind: ObjectKind, id: &ContentHash) -> std::result::Result<Probe, String> {
        let hex = id.to_hex();
        let ns = kind.namespace();
        let hit = match tier {
            Tier::Bloom => match &self.cache {
                Some(cache) => self
                    .attempt(kind, tier, cache.bloom_check(ns, &hex))
                    .await?
                    .then_some(None),
                None => None,
            },
            Tier::Membership => match &self.cache {
                Some(cache) => self
                    .attempt(kind, tier, cache.is_member(ns, &hex))
                    .await?
                    .then_some(None),
                None => None,
            },
            Tier::Registry => match kind {
                ObjectKind::Block => self
                    .attempt(kind, tier, self.registry.get_block(id))
                    .await?
                    .map(|b| (b.size > 0).then_some(b.size)),
                ObjectKind::Shard => self
                    .attempt(kind, tier, self.registry.get_shard(id))
                    .await?
                    .map(|s| Some(s.size)),
            },
            Tier::Origin => self
                .attempt(kind, tier, self.store.head(&kind.storage_key(id)))
                .await?
                .map(|meta| Some(meta.size)),
            // content-only tiers
            Tier::HotCache | Tier::DiskCache => None,
        };
        Ok(match hit {
            Some(size) => Probe::Hit(size),
            None => Probe::Miss,
        })
    }

    /// Record `id` in every tier of `faster`. Best effort.
    async fn backfill_existence(&self, faster: &[Tier], kind: ObjectKind, id: &ContentHash, size: Option<u64>) {
        let hex = id.to_hex();
        let ns = kind.namespace();
        for &tier in faster {
            match tier {
                Tier::Bloom => {
                    if let Some(cache) = &self.cache {
                        let _ = self.attempt(kind, tier, cache.bloom_add(ns, &hex)).await;
                    }
                }
                Tier::Membership => {
                    if let Some(cache) = &self.cache {
                        let _ = self.attempt(kind, tier, cache.add_member(ns, &hex)).await;
                    }
                }
                Tier::Registry => {
                    let _ = self.register(kind, id, size).await;
                }
                _ => {}
            }
        }
    }

    /// Register an object found only at the origin
    async fn register(&self, kind: ObjectKind, id: &ContentHash, size: Option<u64>) -> std::result::Result<(), String> {
        match kind {
            ObjectKind::Block => {
                let block = NewBlock {
                    hash: *id,
                    size: size.unwrap_or(0),
                };
                self.attempt(kind, Tier::Registry, self.registry.get_or_create_block(block))
                    .await
                    .map(|_| ())
            }
            ObjectKind::Shard => {
                let Some(size) = size else {
                    return Ok(());
                };
                let shard = NewShard {
                    shard_id: *id,
                    storage_key: kind.storage_key(id),
                    size,
                };
                self.attempt(kind, Tier::Registry, self.registry.register_shard(shard))
                    .await
                    .map(|_| ())
            }
        }
    }

    // ===== Content =====

    /// Bytes of `id`, or a presigned redirect when only the origin has it
    pub async fn fetch(&self, kind: ObjectKind, id: &ContentHash) -> Result<Content> {
        let hex = id.to_hex();
        let mut degraded: Option<String> = None;

        for (i, &tier) in self.content_tiers.iter().enumerate() {
            let found = match tier {
                Tier::HotCache => match &self.cache {
                    Some(cache) => self
                        .attempt(kind, tier, cache.get_content(kind.namespace(), &hex))
                        .await
                        .ok()
                        .flatten(),
                    None => None,
                },
                Tier::DiskCache => match &self.disk {
                    Some(disk) => match disk.get(kind.disk_namespace(), &hex).await {
                        Some(data) if id.verify(&data) => Some(data),
                        Some(_) => {
                            warn!(kind = kind.label(), id = %id, "Disk cache entry failed verification, dropping");
                            disk.remove(kind.disk_namespace(), &hex).await;
                            None
                        }
                        None => None,
                    },
                    None => None,
                },
                Tier::Origin => {
                    let key = kind.storage_key(id);
                    match self.attempt(kind, tier, self.store.head(&key)).await {
                        Ok(Some(_)) => {
                            match self
                                .attempt(kind, tier, self.store.presign_get(&key, self.config.redirect_ttl, None))
                                .await
                            {
                                Ok(url) => {
                                    metrics::record_tier_hit(kind.label(), tier.label());
                                    return Ok(Content::Redirect { url });
                                }
                                Err(e) => degraded = Some(e),
                            }
                        }
                        Ok(None) => {}
                        Err(e) => degraded = Some(e),
                    }
                    None
                }
                Tier::Bloom | Tier::Membership | Tier::Registry => None,
            };

            if let Some(data) = found {
                debug!(kind = kind.label(), id = %id, tier = tier.label(), "Content hit");
                metrics::record_tier_hit(kind.label(), tier.label());
                self.backfill_content(&self.content_tiers[..i], kind, &hex, &data).await;
                return Ok(Content::Bytes { tier, data });
            }
        }

        match degraded {
            Some(e) => Err(XorbError::TransientStore(format!("{} {} unresolved: {}", kind.label(), id, e))),
            None => Ok(Content::Missing),
        }
    }

    async fn backfill_content(&self, faster: &[Tier], kind: ObjectKind, hex: &str, data: &Bytes) {
        for &tier in faster {
            match tier {
                Tier::HotCache => {
                    if let Some(cache) = &self.cache {
                        let _ = self
                            .attempt(kind, tier, cache.put_content(kind.namespace(), hex, data, self.config.hot_ttl))
                            .await;
                    }
                }
                Tier::DiskCache => {
                    if let Some(disk) = &self.disk {
                        disk.put(kind.disk_namespace(), hex, data).await;
                    }
                }
                _ => {}
            }
        }
    }

    // ===== Writes =====

    /// Verified write: origin first, then registry, then every cache tier.
    ///
    /// A digest mismatch fails before anything is touched.
    pub async fn put(&self, kind: ObjectKind, id: &ContentHash, data: Bytes) -> Result<u64> {
        id.ensure(&data)?;
        let size = data.len() as u64;
        let key = kind.storage_key(id);

        self.store.put(&key, data.clone()).await?;

        match kind {
            ObjectKind::Block => {
                self.registry
                    .get_or_create_block(NewBlock { hash: *id, size })
                    .await?;
            }
            ObjectKind::Shard => {
                self.registry
                    .register_shard(NewShard {
                        shard_id: *id,
                        storage_key: key,
                        size,
                    })
                    .await?;
            }
        }

        let hex = id.to_hex();
        self.backfill_content(&[Tier::HotCache, Tier::DiskCache], kind, &hex, &data)
            .await;
        self.backfill_existence(&[Tier::Bloom, Tier::Membership], kind, id, Some(size))
            .await;

        debug!(kind = kind.label(), id = %id, size, "Stored object");
        Ok(size)
    }

    /// Mark `id` present in the membership tiers after a write that bypassed [`Self::put`]
    pub async fn remember(&self, kind: ObjectKind, id: &ContentHash) {
        self.backfill_existence(&[Tier::Bloom, Tier::Membership], kind, id, None)
            .await;
    }

    /// Drop `id` from the cache tiers. The bloom filter cannot forget.
    pub async fn forget(&self, kind: ObjectKind, id: &ContentHash) {
        let hex = id.to_hex();
        if let Some(cache) = &self.cache {
            let _ = self
                .attempt(kind, Tier::Membership, cache.remove_member(kind.namespace(), &hex))
                .await;
            let _ = self
                .attempt(kind, Tier::HotCache, cache.evict_content(kind.namespace(), &hex))
                .await;
        }
        if let Some(disk) = &self.disk {
            disk.remove(kind.disk_namespace(), &hex).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use xorbhub_metadata::{CacheError, MemoryCache, MemoryRegistry};
    use xorbhub_storage::{MemoryObjectStore, UrlSigner};

    /// Cache whose every call fails, as with Redis unreachable
    struct DeadCache;

    #[async_trait]
    impl FastCache for DeadCache {
        async fn is_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn add_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn remove_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn bloom_check(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn bloom_add(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn get_content(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<Option<Bytes>> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn put_content(
            &self,
            _: Namespace,
            _: &str,
            _: &Bytes,
            _: Duration,
        ) -> xorbhub_metadata::cache::Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn evict_content(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    /// Cache that never answers
    struct StalledCache;

    #[async_trait]
    impl FastCache for StalledCache {
        async fn is_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<bool> {
            std::future::pending().await
        }
        async fn add_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            std::future::pending().await
        }
        async fn remove_member(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            std::future::pending().await
        }
        async fn bloom_check(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<bool> {
            std::future::pending().await
        }
        async fn bloom_add(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            std::future::pending().await
        }
        async fn get_content(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<Option<Bytes>> {
            std::future::pending().await
        }
        async fn put_content(
            &self,
            _: Namespace,
            _: &str,
            _: &Bytes,
            _: Duration,
        ) -> xorbhub_metadata::cache::Result<()> {
            std::future::pending().await
        }
        async fn evict_content(&self, _: Namespace, _: &str) -> xorbhub_metadata::cache::Result<()> {
            std::future::pending().await
        }
    }

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        store: Arc<MemoryObjectStore>,
        cache: Option<Arc<dyn FastCache>>,
    }

    impl Fixture {
        fn new(cache: Option<Arc<dyn FastCache>>) -> Self {
            Self {
                registry: Arc::new(MemoryRegistry::new()),
                store: Arc::new(MemoryObjectStore::new(UrlSigner::ephemeral("http://test"))),
                cache,
            }
        }

        fn oracle(&self, disk: Option<Arc<DiskCache>>) -> TieredOracle {
            TieredOracle::new(
                self.registry.clone(),
                self.store.clone(),
                self.cache.clone(),
                disk,
                OracleConfig::default(),
            )
        }
    }

    fn block(n: u8) -> (ContentHash, Bytes) {
        let data = Bytes::from(vec![n; 2048]);
        (ContentHash::compute(&data), data)
    }

    #[tokio::test]
    async fn test_put_then_exists_and_fetch() {
        let fx = Fixture::new(Some(Arc::new(MemoryCache::new())));
        let oracle = fx.oracle(None);
        let (hash, data) = block(1);

        assert_eq!(
            oracle.exists(ObjectKind::Block, &hash, Strictness::Lenient).await.unwrap(),
            Existence::Missing
        );

        assert_eq!(oracle.put(ObjectKind::Block, &hash, data.clone()).await.unwrap(), 2048);

        // bloom answers first under lenient lookups
        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Lenient).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Bloom, .. }));

        // confirmed lookups skip the bloom filter
        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Confirmed).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Membership, .. }));

        match oracle.fetch(ObjectKind::Block, &hash).await.unwrap() {
            Content::Bytes { tier, data: got } => {
                assert_eq!(tier, Tier::HotCache);
                assert_eq!(got, data);
            }
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_put_rejects_mismatch_without_side_effects() {
        let cache = Arc::new(MemoryCache::new());
        let fx = Fixture::new(Some(cache.clone()));
        let oracle = fx.oracle(None);
        let (hash, _) = block(1);
        let (_, other) = block(2);

        let err = oracle.put(ObjectKind::Block, &hash, other).await.unwrap_err();
        assert!(matches!(err, XorbError::Integrity { .. }));
        assert!(fx.store.keys().is_empty());
        assert!(fx.registry.get_block(&hash).await.unwrap().is_none());
        assert!(!cache.is_member(Namespace::Blocks, &hash.to_hex()).await.unwrap());
        assert_eq!(cache.content_len(), 0);
    }

    #[tokio::test]
    async fn test_origin_hit_registers_and_backfills() {
        let cache = Arc::new(MemoryCache::new());
        let fx = Fixture::new(Some(cache.clone()));
        let oracle = fx.oracle(None);
        let (hash, data) = block(3);

        // present at the origin only
        fx.store.put(&keys::block_key(&hash.to_hex()), data).await.unwrap();

        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Confirmed).await.unwrap();
        assert_eq!(
            found,
            Existence::Found {
                tier: Tier::Origin,
                size: Some(2048)
            }
        );

        let rec = fx.registry.get_block(&hash).await.unwrap().unwrap();
        assert_eq!(rec.size, 2048);
        assert!(cache.is_member(Namespace::Blocks, &hash.to_hex()).await.unwrap());
        assert!(cache.bloom_check(Namespace::Blocks, &hash.to_hex()).await.unwrap());
    }

    #[tokio::test]
    async fn test_origin_only_content_redirects() {
        let fx = Fixture::new(None);
        let oracle = fx.oracle(None);
        let (hash, data) = block(4);
        let key = keys::block_key(&hash.to_hex());
        fx.store.put(&key, data).await.unwrap();

        match oracle.fetch(ObjectKind::Block, &hash).await.unwrap() {
            Content::Redirect { url } => {
                assert!(url.starts_with("http://test/objects/"));
                assert!(url.contains(&key));
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        let (absent, _) = block(5);
        assert_eq!(oracle.fetch(ObjectKind::Block, &absent).await.unwrap(), Content::Missing);
    }

    #[tokio::test]
    async fn test_disk_hit_backfills_hot_cache() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskCache::new(dir.path(), 1024 * 1024));
        let cache = Arc::new(MemoryCache::new());
        let fx = Fixture::new(Some(cache.clone()));
        let oracle = fx.oracle(Some(disk.clone()));
        let (hash, data) = block(6);

        disk.put(CacheNamespace::Blocks, &hash.to_hex(), &data).await;

        match oracle.fetch(ObjectKind::Block, &hash).await.unwrap() {
            Content::Bytes { tier, .. } => assert_eq!(tier, Tier::DiskCache),
            other => panic!("expected bytes, got {:?}", other),
        }
        assert_eq!(cache.content_len(), 1);

        match oracle.fetch(ObjectKind::Block, &hash).await.unwrap() {
            Content::Bytes { tier, .. } => assert_eq!(tier, Tier::HotCache),
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskCache::new(dir.path(), 1024 * 1024));
        let fx = Fixture::new(None);
        let oracle = fx.oracle(Some(disk.clone()));
        let (hash, _) = block(7);

        disk.put(CacheNamespace::Blocks, &hash.to_hex(), &Bytes::from_static(b"garbage"))
            .await;

        assert_eq!(oracle.fetch(ObjectKind::Block, &hash).await.unwrap(), Content::Missing);
        assert!(disk.get(CacheNamespace::Blocks, &hash.to_hex()).await.is_none());
    }

    #[tokio::test]
    async fn test_dead_cache_degrades_to_registry() {
        let fx = Fixture::new(Some(Arc::new(DeadCache)));
        let oracle = fx.oracle(None);
        let (hash, data) = block(8);

        oracle.put(ObjectKind::Block, &hash, data.clone()).await.unwrap();

        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Lenient).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Registry, .. }));
        assert!(matches!(
            oracle.fetch(ObjectKind::Block, &hash).await.unwrap(),
            Content::Redirect { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_cache_times_out() {
        let fx = Fixture::new(Some(Arc::new(StalledCache)));
        let oracle = fx.oracle(None);
        let (hash, data) = block(9);

        oracle.put(ObjectKind::Block, &hash, data).await.unwrap();
        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Lenient).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Registry, .. }));
    }

    #[tokio::test]
    async fn test_shard_put_registers_shard() {
        let fx = Fixture::new(None);
        let oracle = fx.oracle(None);
        let data = Bytes::from_static(b"XSHD shard-ish bytes");
        let id = ContentHash::compute(&data);

        oracle.put(ObjectKind::Shard, &id, data).await.unwrap();
        let rec = fx.registry.get_shard(&id).await.unwrap().unwrap();
        assert_eq!(rec.storage_key, keys::shard_key(&id.to_hex()));

        let found = oracle.exists(ObjectKind::Shard, &id, Strictness::Lenient).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Registry, .. }));
    }

    #[tokio::test]
    async fn test_custom_tier_order() {
        let fx = Fixture::new(Some(Arc::new(MemoryCache::new())));
        let oracle = fx
            .oracle(None)
            .with_existence_tiers(vec![Tier::Origin])
            .with_content_tiers(vec![Tier::Origin]);
        let (hash, data) = block(10);

        oracle.put(ObjectKind::Block, &hash, data).await.unwrap();
        let found = oracle.exists(ObjectKind::Block, &hash, Strictness::Lenient).await.unwrap();
        assert!(matches!(found, Existence::Found { tier: Tier::Origin, .. }));
        assert!(matches!(
            oracle.fetch(ObjectKind::Block, &hash).await.unwrap(),
            Content::Redirect { .. }
        ));
    }
}
