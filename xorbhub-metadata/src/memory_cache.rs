//! In-process fast tier
//!
//! Stands in for Redis in tests and single-node deployments. Content entries
//! expire lazily on read. The content tier is bounded both in entries and in
//! bytes; making room drops expired entries first, then the entries closest
//! to expiry.

use crate::cache::{FastCache, Namespace, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use xorbhub_core::BloomFilter;

struct Inner {
    members: HashMap<Namespace, HashSet<String>>,
    blooms: HashMap<Namespace, BloomFilter>,
    content: HashMap<(Namespace, String), (Bytes, Instant)>,
    content_bytes: u64,
}

impl Inner {
    fn remove_content(&mut self, key: &(Namespace, String)) {
        if let Some((data, _)) = self.content.remove(key) {
            self.content_bytes -= data.len() as u64;
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let before = self.content.len();
        self.content.retain(|_, (_, expires)| *expires > now);
        if self.content.len() != before {
            self.content_bytes = self.content.values().map(|(d, _)| d.len() as u64).sum();
        }
    }

    /// Drop the entry that expires first
    fn evict_one(&mut self) -> bool {
        let victim = self
            .content
            .iter()
            .min_by_key(|(_, (_, expires))| *expires)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                self.remove_content(&key);
                true
            }
            None => false,
        }
    }
}

pub struct MemoryCache {
    inner: RwLock<Inner>,
    bloom_capacity: usize,
    max_entries: usize,
    /// Total content bytes kept; a single entry larger than this is not cached
    max_bytes: u64,
}

pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 512 * 1024 * 1024;

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_limits(100_000, 10_000, DEFAULT_MAX_CONTENT_BYTES)
    }

    pub fn with_byte_budget(max_bytes: u64) -> Self {
        Self::with_limits(100_000, 10_000, max_bytes)
    }

    pub fn with_limits(bloom_capacity: usize, max_entries: usize, max_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                members: HashMap::new(),
                blooms: HashMap::new(),
                content: HashMap::new(),
                content_bytes: 0,
            }),
            bloom_capacity,
            max_entries,
            max_bytes,
        }
    }

    /// Bytes held by the content tier, expired entries included until purged
    pub fn content_bytes(&self) -> u64 {
        self.inner.read().content_bytes
    }

    /// Number of live content entries
    pub fn content_len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .content
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn is_member(&self, ns: Namespace, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .members
            .get(&ns)
            .map(|s| s.contains(id))
            .unwrap_or(false))
    }

    async fn add_member(&self, ns: Namespace, id: &str) -> Result<()> {
        self.inner
            .write()
            .members
            .entry(ns)
            .or_default()
            .insert(id.to_string());
        Ok(())
    }

    async fn remove_member(&self, ns: Namespace, id: &str) -> Result<()> {
        if let Some(set) = self.inner.write().members.get_mut(&ns) {
            set.remove(id);
        }
        Ok(())
    }

    async fn bloom_check(&self, ns: Namespace, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .blooms
            .get(&ns)
            .map(|b| b.contains(id.as_bytes()))
            .unwrap_or(false))
    }

    async fn bloom_add(&self, ns: Namespace, id: &str) -> Result<()> {
        let capacity = self.bloom_capacity;
        self.inner
            .write()
            .blooms
            .entry(ns)
            .or_insert_with(|| BloomFilter::with_rate(capacity, 0.01))
            .insert(id.as_bytes());
        Ok(())
    }

    async fn get_content(&self, ns: Namespace, id: &str) -> Result<Option<Bytes>> {
        let key = (ns, id.to_string());
        {
            let inner = self.inner.read();
            match inner.content.get(&key) {
                Some((data, expires)) if *expires > Instant::now() => return Ok(Some(data.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        self.inner.write().remove_content(&key);
        Ok(None)
    }

    async fn put_content(&self, ns: Namespace, id: &str, data: &Bytes, ttl: Duration) -> Result<()> {
        let size = data.len() as u64;
        if size > self.max_bytes || self.max_entries == 0 {
            return Ok(());
        }
        let key = (ns, id.to_string());
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.remove_content(&key);

        let over = |inner: &Inner| {
            inner.content.len() >= self.max_entries || inner.content_bytes + size > self.max_bytes
        };
        if over(&*inner) {
            inner.purge_expired(now);
        }
        while over(&*inner) {
            if !inner.evict_one() {
                break;
            }
        }

        inner.content_bytes += size;
        inner.content.insert(key, (data.clone(), now + ttl));
        Ok(())
    }

    async fn evict_content(&self, ns: Namespace, id: &str) -> Result<()> {
        self.inner.write().remove_content(&(ns, id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership_is_namespaced() {
        let cache = MemoryCache::new();
        cache.add_member(Namespace::Blocks, "aa").await.unwrap();
        assert!(cache.is_member(Namespace::Blocks, "aa").await.unwrap());
        assert!(!cache.is_member(Namespace::Shards, "aa").await.unwrap());
        cache.remove_member(Namespace::Blocks, "aa").await.unwrap();
        assert!(!cache.is_member(Namespace::Blocks, "aa").await.unwrap());
    }

    #[tokio::test]
    async fn test_bloom() {
        let cache = MemoryCache::new();
        assert!(!cache.bloom_check(Namespace::Blocks, "aa").await.unwrap());
        cache.bloom_add(Namespace::Blocks, "aa").await.unwrap();
        assert!(cache.bloom_check(Namespace::Blocks, "aa").await.unwrap());
    }

    #[tokio::test]
    async fn test_content_expires() {
        let cache = MemoryCache::new();
        let data = Bytes::from_static(b"hot");
        cache
            .put_content(Namespace::Blocks, "aa", &data, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get_content(Namespace::Blocks, "aa").await.unwrap(), Some(data));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get_content(Namespace::Blocks, "aa").await.unwrap().is_none());
        assert_eq!(cache.content_len(), 0);
    }

    #[tokio::test]
    async fn test_entry_limit_evicts_soonest_expiry() {
        let cache = MemoryCache::with_limits(100, 2, u64::MAX);
        let data = Bytes::from_static(b"1");
        cache.put_content(Namespace::Blocks, "a", &data, Duration::from_secs(10)).await.unwrap();
        cache.put_content(Namespace::Blocks, "b", &data, Duration::from_secs(60)).await.unwrap();
        cache.put_content(Namespace::Blocks, "c", &data, Duration::from_secs(60)).await.unwrap();

        assert!(cache.get_content(Namespace::Blocks, "a").await.unwrap().is_none());
        assert!(cache.get_content(Namespace::Blocks, "b").await.unwrap().is_some());
        assert!(cache.get_content(Namespace::Blocks, "c").await.unwrap().is_some());
        assert_eq!(cache.content_len(), 2);
    }

    #[tokio::test]
    async fn test_byte_budget_is_enforced() {
        let cache = MemoryCache::with_limits(100, 10_000, 10 * 1024);
        let ttl = Duration::from_secs(60);
        let block = Bytes::from(vec![7u8; 4 * 1024]);
        for i in 0..20 {
            cache
                .put_content(Namespace::Blocks, &format!("block{}", i), &block, ttl)
                .await
                .unwrap();
            assert!(cache.content_bytes() <= 10 * 1024);
        }
        assert_eq!(cache.content_len(), 2);
        assert_eq!(cache.content_bytes(), 8 * 1024);
        assert!(cache.get_content(Namespace::Blocks, "block19").await.unwrap().is_some());

        // larger than the whole budget: never cached
        let huge = Bytes::from(vec![0u8; 11 * 1024]);
        cache.put_content(Namespace::Blocks, "huge", &huge, ttl).await.unwrap();
        assert!(cache.get_content(Namespace::Blocks, "huge").await.unwrap().is_none());
        assert_eq!(cache.content_bytes(), 8 * 1024);
    }

    #[tokio::test]
    async fn test_overwrite_and_evict_keep_byte_count() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put_content(Namespace::Shards, "s", &Bytes::from(vec![1u8; 100]), ttl).await.unwrap();
        cache.put_content(Namespace::Shards, "s", &Bytes::from(vec![1u8; 40]), ttl).await.unwrap();
        assert_eq!(cache.content_bytes(), 40);
        cache.evict_content(Namespace::Shards, "s").await.unwrap();
        assert_eq!(cache.content_bytes(), 0);
    }
}
