//! Registry trait
//!
//! The durable source of truth for the CAS data model. Implementations must
//! make [`Registry::commit_file_layout`] and [`Registry::seal_xorb`] atomic:
//! either every row appears or none does.

use crate::models::*;
use crate::Result;
use async_trait::async_trait;
use xorbhub_core::ContentHash;

#[async_trait]
pub trait Registry: Send + Sync {
    // ===== Files =====

    /// Insert or update a file by path. Clears the deleted flag.
    async fn upsert_file(&self, file: NewFile) -> Result<FileRecord>;

    /// Mark a file deleted; it stops being served or chunked
    async fn mark_file_deleted(&self, path: &str) -> Result<bool>;

    /// Resolve a live file by content identifier
    async fn get_file_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>>;

    /// Live, chunk-eligible, non-empty files without a layout, oldest first
    async fn files_pending_chunking(&self, limit: usize) -> Result<Vec<FileRecord>>;

    // ===== Blocks =====

    async fn get_block(&self, hash: &ContentHash) -> Result<Option<BlockRecord>>;

    /// Idempotent block registration. A row with unknown size (0) takes the
    /// new size.
    async fn get_or_create_block(&self, block: NewBlock) -> Result<BlockRecord>;

    /// Blocks with a known size and no placement, in registration order
    async fn unplaced_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>>;

    // ===== Layouts =====

    async fn has_layout(&self, file_id: i64) -> Result<bool>;

    /// Register every block and the full ordered layout in one transaction
    async fn commit_file_layout(&self, file_id: i64, blocks: &[NewBlock]) -> Result<LayoutCommit>;

    /// Layout ordered by sequence; empty when the file is not chunked
    async fn file_layout(&self, file_id: i64) -> Result<Vec<LayoutEntry>>;

    // ===== Xorbs & placements =====

    /// Create the xorb and one placement per block in one transaction.
    ///
    /// Rejects with [`crate::MetadataError::Conflict`] if any block is already
    /// placed, unknown, or if the placements do not tile the xorb exactly.
    async fn seal_xorb(&self, xorb: NewXorb, placements: &[NewPlacement]) -> Result<XorbRecord>;

    async fn placement_for_block(&self, hash: &ContentHash) -> Result<Option<ResolvedPlacement>>;

    /// Every placement, ordered by block registration
    async fn placement_snapshot(&self) -> Result<Vec<PlacementView>>;

    // ===== Shards =====

    /// Get-or-create; the flag is true when a new row was written
    async fn register_shard(&self, shard: NewShard) -> Result<(ShardRecord, bool)>;

    async fn get_shard(&self, shard_id: &ContentHash) -> Result<Option<ShardRecord>>;

    /// Shards strictly smaller than `threshold` bytes, oldest first
    async fn small_shards(&self, threshold: u64) -> Result<Vec<ShardRecord>>;

    async fn delete_shard(&self, shard_id: &ContentHash) -> Result<bool>;

    // ===== Statistics =====

    async fn stats(&self) -> Result<RegistryStats>;

    async fn block_size_distribution(&self) -> Result<SizeDistribution>;
}

/// Validate placements against the xorb they claim to tile
pub(crate) fn check_tiling(xorb: &NewXorb, placements: &[NewPlacement]) -> Result<()> {
    if placements.is_empty() {
        return Err(crate::MetadataError::Invalid("xorb without placements".into()));
    }
    let mut total = 0u64;
    for p in placements {
        let end = p.offset.checked_add(p.length).ok_or_else(|| {
            crate::MetadataError::Conflict(format!("placement of {} overflows", p.block))
        })?;
        if end > xorb.size {
            return Err(crate::MetadataError::Conflict(format!(
                "placement of {} ends at {} past xorb size {}",
                p.block, end, xorb.size
            )));
        }
        total += p.length;
    }
    if total != xorb.size {
        return Err(crate::MetadataError::Conflict(format!(
            "placements cover {} bytes but xorb {} is {} bytes",
            total, xorb.xorb_id, xorb.size
        )));
    }
    let mut seen = std::collections::HashSet::new();
    if !placements.iter().all(|p| seen.insert(p.block)) {
        return Err(crate::MetadataError::Conflict(
            "block placed twice in one xorb".into(),
        ));
    }
    Ok(())
}
