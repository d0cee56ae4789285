//! An [`ObjectStore`] wrapper that bounds every call with a timeout.
//!
//! An elapsed timeout surfaces as [`XorbError::TransientStore`], which read
//! paths treat as a miss and fall through to the next tier.

use crate::backend::{ObjectMeta, ObjectStore, StorageStats};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use xorbhub_core::error::{Result, XorbError};
use xorbhub_core::HttpRange;

pub struct TimeoutStore {
    inner: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, op: &str, key: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, key, timeout_ms = self.timeout.as_millis() as u64, "object store call timed out");
                Err(XorbError::TransientStore(format!(
                    "{} {} timed out after {:?}",
                    op, key, self.timeout
                )))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for TimeoutStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.bounded("put", key, self.inner.put(key, data)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn get_range(&self, key: &str, range: HttpRange) -> Result<Option<Bytes>> {
        self.bounded("get_range", key, self.inner.get_range(key, range)).await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.bounded("head", key, self.inner.head(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("delete", key, self.inner.delete(key)).await
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        range: Option<HttpRange>,
    ) -> Result<String> {
        self.bounded("presign", key, self.inner.presign_get(key, expires_in, range))
            .await
    }

    async fn stats(&self) -> Result<StorageStats> {
        self.bounded("stats", "*", self.inner.stats()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryObjectStore;
    use crate::presign::UrlSigner;

    /// Store whose reads never complete
    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            std::future::pending().await
        }
        async fn get_range(&self, _key: &str, _range: HttpRange) -> Result<Option<Bytes>> {
            std::future::pending().await
        }
        async fn head(&self, _key: &str) -> Result<Option<ObjectMeta>> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn presign_get(&self, key: &str, _e: Duration, _r: Option<HttpRange>) -> Result<String> {
            Ok(key.to_string())
        }
        async fn stats(&self) -> Result<StorageStats> {
            Ok(StorageStats::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_becomes_transient_error() {
        let store = TimeoutStore::new(Arc::new(StalledStore), Duration::from_secs(2));
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, XorbError::TransientStore(_)));
        assert!(err.is_transient());
        assert!(store.head("k").await.is_err());
    }

    #[tokio::test]
    async fn test_passes_through() {
        let inner = Arc::new(MemoryObjectStore::new(UrlSigner::ephemeral("http://t")));
        let store = TimeoutStore::new(inner, Duration::from_secs(2));
        store.put("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), Bytes::from_static(b"v"));
    }
}
