//! Object store trait
//!
//! Defines the interface that every durable blob backend follows. Keys are
//! opaque `/`-separated strings produced by [`crate::keys`].

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use xorbhub_core::error::Result;
use xorbhub_core::HttpRange;

/// Metadata returned by an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Total number of stored objects
    pub object_count: u64,

    /// Total bytes used by objects
    pub bytes_used: u64,

    /// Operation counters
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl StorageStats {
    /// Average object size in bytes
    pub fn avg_object_size(&self) -> u64 {
        if self.object_count == 0 {
            0
        } else {
            self.bytes_used / self.object_count
        }
    }
}

/// Async durable object store
///
/// All implementations must be Send + Sync for use in async contexts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, replacing any previous value
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Retrieve an object
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Retrieve an inclusive byte range of an object. The end is clamped to
    /// the object size; a start past the end is an error.
    async fn get_range(&self, key: &str, range: HttpRange) -> Result<Option<Bytes>>;

    /// Check existence and size
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Delete an object. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Produce a time-limited download URL, optionally restricted to a byte range
    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        range: Option<HttpRange>,
    ) -> Result<String>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats>;
}

/// Slice `data` by an inclusive range, clamping the end
pub(crate) fn slice_range(key: &str, data: &Bytes, range: HttpRange) -> Result<Bytes> {
    let len = data.len() as u64;
    if len == 0 && range.start == 0 {
        return Ok(Bytes::new());
    }
    if range.start >= len || range.end < range.start {
        return Err(xorbhub_core::XorbError::Storage(format!(
            "range {}-{} not satisfiable for {} ({} bytes)",
            range.start, range.end, key, len
        )));
    }
    let end = range.end.min(len - 1);
    Ok(data.slice(range.start as usize..=end as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_range_clamps_end() {
        let data = Bytes::from_static(b"0123456789");
        let r = slice_range("k", &data, HttpRange { start: 8, end: 100 }).unwrap();
        assert_eq!(&r[..], b"89");
        let r = slice_range("k", &data, HttpRange { start: 2, end: 4 }).unwrap();
        assert_eq!(&r[..], b"234");
    }

    #[test]
    fn test_slice_range_rejects_start_past_end() {
        let data = Bytes::from_static(b"abc");
        assert!(slice_range("k", &data, HttpRange { start: 3, end: 5 }).is_err());
        assert!(slice_range("k", &data, HttpRange { start: 2, end: 1 }).is_err());
    }

    #[test]
    fn test_avg_object_size() {
        let stats = StorageStats {
            object_count: 4,
            bytes_used: 100,
            ..Default::default()
        };
        assert_eq!(stats.avg_object_size(), 25);
        assert_eq!(StorageStats::default().avg_object_size(), 0);
    }
}
