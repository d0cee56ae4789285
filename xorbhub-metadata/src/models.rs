//! Registry models
//!
//! Plain records shared by every [`crate::Registry`] implementation. The
//! PostgreSQL backend maps its rows onto these types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use xorbhub_core::ContentHash;

/// A file as known to the versioning subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    /// Opaque content identifier, also the raw object's storage name
    pub content_hash: String,
    pub size: u64,
    /// Stored as a large object and therefore eligible for chunking
    pub lfs: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub content_hash: String,
    pub size: u64,
    pub lfs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub id: i64,
    pub hash: ContentHash,
    /// 0 when registered from an origin existence check with unknown size
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlock {
    pub hash: ContentHash,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XorbRecord {
    pub id: i64,
    pub xorb_id: ContentHash,
    pub storage_key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewXorb {
    pub xorb_id: ContentHash,
    pub storage_key: String,
    pub size: u64,
}

/// Where one block lives inside a new xorb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPlacement {
    pub block: ContentHash,
    pub offset: u64,
    pub length: u64,
}

/// A block's placement joined with its xorb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlacement {
    pub xorb_id: ContentHash,
    pub storage_key: String,
    pub offset: u64,
    pub length: u64,
}

/// One row of the placement table as exported into shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementView {
    pub block: ContentHash,
    pub xorb_id: ContentHash,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub sequence: u32,
    pub block: BlockRecord,
}

/// Outcome of committing a file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutCommit {
    Committed { blocks: usize },
    /// Another sweep already chunked this file; nothing was written
    AlreadyChunked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardRecord {
    pub id: i64,
    pub shard_id: ContentHash,
    pub storage_key: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewShard {
    pub shard_id: ContentHash,
    pub storage_key: String,
    pub size: u64,
}

/// Aggregate counters for the admin surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub block_count: u64,
    pub block_bytes: u64,
    pub placed_blocks: u64,
    pub xorb_count: u64,
    pub xorb_bytes: u64,
    pub shard_count: u64,
    pub shard_bytes: u64,
    pub chunked_files: u64,
}

/// Block counts by size bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeDistribution {
    pub under_1mb: u64,
    #[serde(rename = "1mb_4mb")]
    pub mb1_to_4: u64,
    #[serde(rename = "4mb_8mb")]
    pub mb4_to_8: u64,
    pub over_8mb: u64,
}

impl SizeDistribution {
    const MB: u64 = 1024 * 1024;

    /// Count one block of `size` bytes
    pub fn record(&mut self, size: u64) {
        match size {
            s if s < Self::MB => self.under_1mb += 1,
            s if s < 4 * Self::MB => self.mb1_to_4 += 1,
            s if s < 8 * Self::MB => self.mb4_to_8 += 1,
            _ => self.over_8mb += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.under_1mb + self.mb1_to_4 + self.mb4_to_8 + self.over_8mb
    }
}
