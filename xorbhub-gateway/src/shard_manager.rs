//! Shard publication and merging
//!
//! A shard is an immutable export of the placement table. Its id is the
//! digest of its bytes, so regenerating an unchanged table yields the same
//! shard and registers nothing new.
//!
//! Merging writes and registers the replacement before removing any source,
//! so a crash mid-merge leaves every original shard intact.

use crate::oracle::{ObjectKind, TieredOracle};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use xorbhub_core::shard::{self, ShardEntry};
use xorbhub_core::{ContentHash, Result, SHARD_COMPACTION_THRESHOLD};
use xorbhub_metadata::{NewShard, Registry, ShardRecord};
use xorbhub_storage::{keys, ObjectStore};

/// A published global shard
#[derive(Debug, Clone)]
pub struct GeneratedShard {
    pub record: ShardRecord,
    pub entries: usize,
    /// False when an identical shard already existed
    pub created: bool,
}

/// Outcome of one shard merge
#[derive(Debug, Clone, Default)]
pub struct ShardCompaction {
    pub merged: Option<ShardRecord>,
    pub sources_merged: usize,
    pub sources_deleted: usize,
    pub entries: u64,
}

pub struct ShardManager {
    registry: Arc<dyn Registry>,
    store: Arc<dyn ObjectStore>,
    oracle: Arc<TieredOracle>,
    compaction_threshold: u64,
}

impl ShardManager {
    pub fn new(registry: Arc<dyn Registry>, store: Arc<dyn ObjectStore>, oracle: Arc<TieredOracle>) -> Self {
        Self {
            registry,
            store,
            oracle,
            compaction_threshold: SHARD_COMPACTION_THRESHOLD,
        }
    }

    pub fn with_compaction_threshold(mut self, threshold: u64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Serialize the current placement table into a shard.
    ///
    /// Returns `None` when nothing is placed yet.
    pub async fn generate_global_shard(&self) -> Result<Option<GeneratedShard>> {
        let snapshot = self.registry.placement_snapshot().await?;
        if snapshot.is_empty() {
            debug!("No placements, skipping shard generation");
            return Ok(None);
        }

        let entries: Vec<ShardEntry> = snapshot
            .iter()
            .map(|p| ShardEntry {
                block: p.block,
                xorb: p.xorb_id,
                offset: p.offset,
                length: p.length,
            })
            .collect();
        let data = shard::encode(&entries)?;
        let shard_id = ContentHash::compute(&data);

        if let Some(record) = self.registry.get_shard(&shard_id).await? {
            debug!(shard = %shard_id, "Placement table unchanged since last shard");
            return Ok(Some(GeneratedShard {
                record,
                entries: entries.len(),
                created: false,
            }));
        }

        let (record, created) = self.publish(shard_id, data).await?;
        info!(shard = %shard_id, entries = entries.len(), size = record.size, "Generated global shard");
        Ok(Some(GeneratedShard {
            record,
            entries: entries.len(),
            created,
        }))
    }

    /// Merge every shard below the size threshold into one.
    ///
    /// Needs at least two readable sources. Only sources that were read and
    /// merged are deleted, and only after the replacement is registered.
    pub async fn compact_shards(&self) -> Result<ShardCompaction> {
        let candidates = self.registry.small_shards(self.compaction_threshold).await?;
        if candidates.len() < 2 {
            debug!(candidates = candidates.len(), "Not enough small shards to merge");
            return Ok(ShardCompaction::default());
        }

        let mut sources = Vec::with_capacity(candidates.len());
        let mut entries = 0u64;
        for record in candidates {
            match self.store.get(&record.storage_key).await {
                Ok(Some(data)) => match shard::entry_count(&data) {
                    Ok(count) => {
                        entries += count as u64;
                        sources.push((record, data));
                    }
                    Err(e) => warn!(shard = %record.shard_id, error = %e, "Skipping malformed shard"),
                },
                Ok(None) => warn!(shard = %record.shard_id, "Shard object missing, skipping"),
                Err(e) => warn!(shard = %record.shard_id, error = %e, "Failed to read shard, skipping"),
            }
        }
        if sources.len() < 2 {
            debug!(readable = sources.len(), "Not enough readable shards to merge");
            return Ok(ShardCompaction::default());
        }

        let blobs: Vec<&[u8]> = sources.iter().map(|(_, data)| data.as_ref()).collect();
        let merged = shard::merge(&blobs)?;
        let merged_id = ContentHash::compute(&merged);
        let (record, _) = self.publish(merged_id, merged).await?;

        let mut deleted = 0;
        for (source, _) in &sources {
            if source.shard_id == merged_id {
                continue;
            }
            if let Err(e) = self.retire(source).await {
                error!(shard = %source.shard_id, error = %e, "Failed to delete merged shard");
                continue;
            }
            deleted += 1;
        }

        info!(
            merged = %merged_id,
            sources = sources.len(),
            deleted,
            entries,
            "Compacted shards"
        );
        Ok(ShardCompaction {
            merged: Some(record),
            sources_merged: sources.len(),
            sources_deleted: deleted,
            entries,
        })
    }

    async fn publish(&self, shard_id: ContentHash, data: bytes::Bytes) -> Result<(ShardRecord, bool)> {
        let storage_key = keys::shard_key(&shard_id.to_hex());
        let size = data.len() as u64;
        self.store.put(&storage_key, data).await?;
        let registered = self
            .registry
            .register_shard(NewShard {
                shard_id,
                storage_key,
                size,
            })
            .await?;
        self.oracle.remember(ObjectKind::Shard, &shard_id).await;
        Ok(registered)
    }

    async fn retire(&self, source: &ShardRecord) -> Result<()> {
        self.registry.delete_shard(&source.shard_id).await?;
        self.oracle.forget(ObjectKind::Shard, &source.shard_id).await;
        if let Err(e) = self.store.delete(&source.storage_key).await {
            // the registry no longer references it; the object is only garbage now
            warn!(key = %source.storage_key, error = %e, "Failed to delete shard object");
        }
        Ok(())
    }
}
