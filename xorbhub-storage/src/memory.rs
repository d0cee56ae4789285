//! In-memory object store
//!
//! Used for testing and development. Not persistent.

use crate::backend::{slice_range, ObjectMeta, ObjectStore, StorageStats};
use crate::presign::UrlSigner;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use xorbhub_core::error::Result;
use xorbhub_core::HttpRange;

/// In-memory object store
pub struct MemoryObjectStore {
    /// Object storage
    objects: RwLock<HashMap<String, Bytes>>,

    /// Signs download URLs served by the gateway
    signer: UrlSigner,

    /// Current bytes used
    bytes_used: AtomicU64,

    /// Operation counters
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryObjectStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signer,
            bytes_used: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of keys under `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    /// Clear all stored objects
    pub fn clear(&self) {
        self.objects.write().clear();
        self.bytes_used.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let data_len = data.len() as u64;
        let mut objects = self.objects.write();

        // If replacing, subtract old size
        if let Some(old) = objects.insert(key.to_string(), data) {
            self.bytes_used.fetch_sub(old.len() as u64, Ordering::SeqCst);
        }
        self.bytes_used.fetch_add(data_len, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.objects.read().get(key).cloned())
    }

    async fn get_range(&self, key: &str, range: HttpRange) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let data = match self.objects.read().get(key) {
            Some(data) => data.clone(),
            None => return Ok(None),
        };
        slice_range(key, &data, range).map(Some)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects.read().get(key).map(|d| ObjectMeta {
            size: d.len() as u64,
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.objects.write().remove(key) {
            Some(old) => {
                self.bytes_used.fetch_sub(old.len() as u64, Ordering::SeqCst);
                self.deletes.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        range: Option<HttpRange>,
    ) -> Result<String> {
        Ok(self.signer.sign(key, expires_in, range))
    }

    async fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            object_count: self.objects.read().len() as u64,
            bytes_used: self.bytes_used.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        })
    }
}
