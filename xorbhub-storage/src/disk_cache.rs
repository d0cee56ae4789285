//! Local disk cache for CAS objects
//!
//! A size-capped blob cache keyed by content digest. Entries live at
//! `{root}/{namespace}/{hex[0..2]}/{hex[2..4]}/{hex}`. Reads and writes never
//! fail the caller: I/O problems are logged and behave as a miss.
//! [`DiskCache::cleanup`] evicts oldest-modified files until usage is at or
//! below 80% of the cap.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use xorbhub_core::error::{Result, XorbError};

/// Fraction of the cap that cleanup shrinks usage to
const LOW_WATER_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Blocks,
    Shards,
}

impl CacheNamespace {
    fn dir(&self) -> &'static str {
        match self {
            CacheNamespace::Blocks => "blocks",
            CacheNamespace::Shards => "shards",
        }
    }
}

/// Result of a cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: u64,
    pub bytes_freed: u64,
    pub bytes_remaining: u64,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn path(&self, ns: CacheNamespace, hash: &str) -> Option<PathBuf> {
        if hash.len() < 4 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            self.root
                .join(ns.dir())
                .join(&hash[..2])
                .join(&hash[2..4])
                .join(hash),
        )
    }

    /// Cached bytes for `hash`, if any
    pub async fn get(&self, ns: CacheNamespace, hash: &str) -> Option<Bytes> {
        let path = self.path(ns, hash)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(hash = %&hash[..8.min(hash.len())], error = %e, "disk cache read failed");
                None
            }
        }
    }

    /// Store bytes for `hash`; failures are logged and ignored
    pub async fn put(&self, ns: CacheNamespace, hash: &str, data: &Bytes) {
        let Some(path) = self.path(ns, hash) else {
            return;
        };
        if let Err(e) = write_atomic(&path, data).await {
            warn!(hash = %&hash[..8.min(hash.len())], error = %e, "disk cache write failed");
        }
    }

    pub async fn remove(&self, ns: CacheNamespace, hash: &str) {
        if let Some(path) = self.path(ns, hash) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "disk cache remove failed");
                }
            }
        }
    }

    /// Total bytes currently on disk
    pub async fn usage(&self) -> Result<u64> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| XorbError::Internal(e.to_string()))?;
        Ok(files.iter().map(|(_, size, _)| size).sum())
    }

    /// Evict oldest-modified entries while usage exceeds the cap
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let root = self.root.clone();
        let max_bytes = self.max_bytes;
        tokio::task::spawn_blocking(move || cleanup_blocking(&root, max_bytes))
            .await
            .map_err(|e| XorbError::Internal(e.to_string()))?
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", rand::random::<u32>()));
    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn scan(root: &Path) -> Vec<(PathBuf, u64, SystemTime)> {
    if !root.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((e.into_path(), meta.len(), mtime))
        })
        .collect()
}

fn cleanup_blocking(root: &Path, max_bytes: u64) -> Result<CleanupReport> {
    let mut files = scan(root);
    let total: u64 = files.iter().map(|(_, size, _)| size).sum();
    let mut report = CleanupReport {
        bytes_remaining: total,
        ..Default::default()
    };
    if total <= max_bytes {
        debug!(total, max_bytes, "disk cache within cap");
        return Ok(report);
    }

    info!(total, max_bytes, "disk cache cleanup triggered");
    let target = (max_bytes as f64 * LOW_WATER_RATIO) as u64;
    files.sort_by_key(|(_, _, mtime)| *mtime);

    for (path, size, _) in files {
        if report.bytes_remaining <= target {
            break;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.files_removed += 1;
                report.bytes_freed += size;
                report.bytes_remaining -= size;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to evict cache file"),
        }
    }

    info!(
        files_removed = report.files_removed,
        bytes_freed = report.bytes_freed,
        bytes_remaining = report.bytes_remaining,
        "disk cache cleanup finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn hash(n: u8) -> String {
        xorbhub_core::ContentHash::compute(&[n]).to_hex()
    }

    #[tokio::test]
    async fn test_put_get_namespaced() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path(), 1 << 20);
        let h = hash(1);

        cache.put(CacheNamespace::Blocks, &h, &Bytes::from_static(b"block")).await;
        assert_eq!(cache.get(CacheNamespace::Blocks, &h).await.unwrap(), Bytes::from_static(b"block"));
        assert!(cache.get(CacheNamespace::Shards, &h).await.is_none());

        cache.remove(CacheNamespace::Blocks, &h).await;
        assert!(cache.get(CacheNamespace::Blocks, &h).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_hash_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path(), 1 << 20);
        cache.put(CacheNamespace::Blocks, "../../x", &Bytes::from_static(b"x")).await;
        assert!(cache.get(CacheNamespace::Blocks, "../../x").await.is_none());
        assert_eq!(cache.usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_oldest_to_low_water() {
        let dir = TempDir::new().unwrap();
        // 10 files × 100 bytes, cap 500 → shrink to ≤ 400
        let cache = DiskCache::new(dir.path(), 500);
        for i in 0..10u8 {
            cache.put(CacheNamespace::Blocks, &hash(i), &Bytes::from(vec![i; 100])).await;
            let path = cache.path(CacheNamespace::Blocks, &hash(i)).unwrap();
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + i as u64 * 60);
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }

        let report = cache.cleanup().await.unwrap();
        assert_eq!(report.files_removed, 6);
        assert_eq!(report.bytes_remaining, 400);

        for i in 0..6u8 {
            assert!(cache.get(CacheNamespace::Blocks, &hash(i)).await.is_none());
        }
        for i in 6..10u8 {
            assert!(cache.get(CacheNamespace::Blocks, &hash(i)).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_cleanup_under_cap_is_noop() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path(), 1000);
        cache.put(CacheNamespace::Shards, &hash(1), &Bytes::from(vec![0u8; 100])).await;
        let report = cache.cleanup().await.unwrap();
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.bytes_remaining, 100);
    }

    #[tokio::test]
    async fn test_cleanup_missing_root() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path().join("absent"), 10);
        assert_eq!(cache.cleanup().await.unwrap(), CleanupReport::default());
    }
}
