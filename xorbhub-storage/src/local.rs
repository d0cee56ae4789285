//! Local filesystem object store
//!
//! Stores one file per key under a root directory, mirroring the key's
//! `/`-separated layout. Writes are atomic: data goes to a temporary file in
//! the same directory and is renamed into place.

use crate::backend::{slice_range, ObjectMeta, ObjectStore, StorageStats};
use crate::keys::is_safe_key;
use crate::presign::UrlSigner;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use xorbhub_core::error::{Result, XorbError};
use xorbhub_core::HttpRange;

pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>, signer: UrlSigner) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            signer,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        if !is_safe_key(key) {
            return Err(XorbError::Storage(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

fn not_found_is_none<T>(res: std::io::Result<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(XorbError::Io(e)),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension(format!("tmp-{}", rand::random::<u32>()));
        tokio::fs::write(&tmp_path, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key, size = data.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path(key)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(not_found_is_none(tokio::fs::read(&path).await)?.map(Bytes::from))
    }

    async fn get_range(&self, key: &str, range: HttpRange) -> Result<Option<Bytes>> {
        let path = self.path(key)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut file = match not_found_is_none(tokio::fs::File::open(&path).await)? {
            Some(f) => f,
            None => return Ok(None),
        };
        let len = file.metadata().await?.len();
        if len == 0 || range.start >= len {
            // Let the shared helper produce the same answer as other backends
            return slice_range(key, &Bytes::new(), range).map(Some);
        }
        let end = range.end.min(len - 1);
        if end < range.start {
            return slice_range(key, &Bytes::new(), range).map(Some);
        }
        let mut buf = vec![0u8; (end - range.start + 1) as usize];
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.path(key)?;
        Ok(not_found_is_none(tokio::fs::metadata(&path).await)?
            .filter(|m| m.is_file())
            .map(|m| ObjectMeta { size: m.len() }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        let removed = not_found_is_none(tokio::fs::remove_file(&path).await)?.is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            debug!(key, "deleted object");
        }
        Ok(removed)
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        range: Option<HttpRange>,
    ) -> Result<String> {
        self.path(key)?;
        Ok(self.signer.sign(key, expires_in, range))
    }

    async fn stats(&self) -> Result<StorageStats> {
        let root = self.root.clone();
        let (object_count, bytes_used) = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .fold((0u64, 0u64), |(n, b), m| (n + 1, b + m.len()))
        })
        .await
        .map_err(|e| XorbError::Internal(e.to_string()))?;

        Ok(StorageStats {
            object_count,
            bytes_used,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        })
    }
}
