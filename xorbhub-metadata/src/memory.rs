//! In-memory registry
//!
//! Used for testing, development and single-process deployments without a
//! database. Every operation runs under one write lock, so multi-row writes
//! are all-or-nothing exactly like the PostgreSQL transactions.

use crate::models::*;
use crate::registry::{check_tiling, Registry};
use crate::{MetadataError, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use xorbhub_core::ContentHash;

#[derive(Default)]
struct State {
    next_id: i64,
    files: BTreeMap<i64, FileRecord>,
    blocks: BTreeMap<i64, BlockRecord>,
    block_ids: HashMap<ContentHash, i64>,
    /// file id → ordered block ids
    layouts: HashMap<i64, Vec<i64>>,
    xorbs: BTreeMap<i64, XorbRecord>,
    xorb_ids: HashMap<ContentHash, i64>,
    /// block id → (xorb row id, offset, length)
    placements: HashMap<i64, (i64, u64, u64)>,
    shards: BTreeMap<i64, ShardRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn get_or_create_block(&mut self, block: NewBlock) -> BlockRecord {
        if let Some(id) = self.block_ids.get(&block.hash).copied() {
            if let Some(existing) = self.blocks.get_mut(&id) {
                if existing.size == 0 && block.size > 0 {
                    existing.size = block.size;
                }
                return existing.clone();
            }
        }
        let id = self.next_id();
        let record = BlockRecord {
            id,
            hash: block.hash,
            size: block.size,
            created_at: Utc::now(),
        };
        self.blocks.insert(id, record.clone());
        self.block_ids.insert(block.hash, id);
        record
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn upsert_file(&self, file: NewFile) -> Result<FileRecord> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if let Some(existing) = state.files.values_mut().find(|f| f.path == file.path) {
            if existing.content_hash != file.content_hash {
                state.layouts.remove(&existing.id);
            }
            existing.content_hash = file.content_hash;
            existing.size = file.size;
            existing.lfs = file.lfs;
            existing.is_deleted = false;
            return Ok(existing.clone());
        }
        let id = state.next_id();
        let record = FileRecord {
            id,
            path: file.path,
            content_hash: file.content_hash,
            size: file.size,
            lfs: file.lfs,
            is_deleted: false,
            created_at: Utc::now(),
        };
        state.files.insert(id, record.clone());
        Ok(record)
    }

    async fn mark_file_deleted(&self, path: &str) -> Result<bool> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        match state.files.values_mut().find(|f| f.path == path && !f.is_deleted) {
            Some(f) => {
                f.is_deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_file_by_hash(&self, content_hash: &str) -> Result<Option<FileRecord>> {
        let state = self.state.read();
        Ok(state
            .files
            .values()
            .find(|f| f.content_hash == content_hash && !f.is_deleted)
            .cloned())
    }

    async fn files_pending_chunking(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let state = self.state.read();
        Ok(state
            .files
            .values()
            .filter(|f| f.lfs && !f.is_deleted && f.size > 0 && !state.layouts.contains_key(&f.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_block(&self, hash: &ContentHash) -> Result<Option<BlockRecord>> {
        let state = self.state.read();
        Ok(state
            .block_ids
            .get(hash)
            .and_then(|id| state.blocks.get(id))
            .cloned())
    }

    async fn get_or_create_block(&self, block: NewBlock) -> Result<BlockRecord> {
        Ok(self.state.write().get_or_create_block(block))
    }

    async fn unplaced_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>> {
        let state = self.state.read();
        Ok(state
            .blocks
            .values()
            .filter(|b| b.size > 0 && !state.placements.contains_key(&b.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn has_layout(&self, file_id: i64) -> Result<bool> {
        Ok(self.state.read().layouts.contains_key(&file_id))
    }

    async fn commit_file_layout(&self, file_id: i64, blocks: &[NewBlock]) -> Result<LayoutCommit> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if !state.files.contains_key(&file_id) {
            return Err(MetadataError::NotFound(format!("file {}", file_id)));
        }
        if state.layouts.contains_key(&file_id) {
            return Ok(LayoutCommit::AlreadyChunked);
        }
        if blocks.is_empty() {
            return Err(MetadataError::Invalid("empty layout".into()));
        }
        let ids: Vec<i64> = blocks
            .iter()
            .map(|b| state.get_or_create_block(*b).id)
            .collect();
        state.layouts.insert(file_id, ids);
        Ok(LayoutCommit::Committed {
            blocks: blocks.len(),
        })
    }

    async fn file_layout(&self, file_id: i64) -> Result<Vec<LayoutEntry>> {
        let state = self.state.read();
        let Some(ids) = state.layouts.get(&file_id) else {
            return Ok(Vec::new());
        };
        ids.iter()
            .enumerate()
            .map(|(seq, id)| {
                let block = state
                    .blocks
                    .get(id)
                    .cloned()
                    .ok_or_else(|| MetadataError::NotFound(format!("block row {}", id)))?;
                Ok(LayoutEntry {
                    sequence: seq as u32,
                    block,
                })
            })
            .collect()
    }

    async fn seal_xorb(&self, xorb: NewXorb, placements: &[NewPlacement]) -> Result<XorbRecord> {
        check_tiling(&xorb, placements)?;
        let mut guard = self.state.write();
        let state = &mut *guard;

        // Validate everything before the first write
        let mut block_ids = Vec::with_capacity(placements.len());
        for p in placements {
            let id = *state
                .block_ids
                .get(&p.block)
                .ok_or_else(|| MetadataError::Conflict(format!("unknown block {}", p.block)))?;
            if state.placements.contains_key(&id) {
                return Err(MetadataError::Conflict(format!("block {} already placed", p.block)));
            }
            block_ids.push(id);
        }

        let record = match state.xorb_ids.get(&xorb.xorb_id).and_then(|id| state.xorbs.get(id)) {
            Some(existing) => existing.clone(),
            None => {
                let id = state.next_id();
                let record = XorbRecord {
                    id,
                    xorb_id: xorb.xorb_id,
                    storage_key: xorb.storage_key,
                    size: xorb.size,
                    created_at: Utc::now(),
                };
                state.xorbs.insert(id, record.clone());
                state.xorb_ids.insert(record.xorb_id, id);
                record
            }
        };
        for (block_id, p) in block_ids.into_iter().zip(placements) {
            state.placements.insert(block_id, (record.id, p.offset, p.length));
        }
        Ok(record)
    }

    async fn placement_for_block(&self, hash: &ContentHash) -> Result<Option<ResolvedPlacement>> {
        let state = self.state.read();
        let placement = state
            .block_ids
            .get(hash)
            .and_then(|id| state.placements.get(id))
            .and_then(|(xorb_row, offset, length)| {
                state.xorbs.get(xorb_row).map(|x| ResolvedPlacement {
                    xorb_id: x.xorb_id,
                    storage_key: x.storage_key.clone(),
                    offset: *offset,
                    length: *length,
                })
            });
        Ok(placement)
    }

    async fn placement_snapshot(&self) -> Result<Vec<PlacementView>> {
        let state = self.state.read();
        // blocks is keyed by row id, so iteration follows registration order
        Ok(state
            .blocks
            .values()
            .filter_map(|b| {
                let (xorb_row, offset, length) = state.placements.get(&b.id)?;
                let xorb = state.xorbs.get(xorb_row)?;
                Some(PlacementView {
                    block: b.hash,
                    xorb_id: xorb.xorb_id,
                    offset: *offset,
                    length: *length,
                })
            })
            .collect())
    }

    async fn register_shard(&self, shard: NewShard) -> Result<(ShardRecord, bool)> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if let Some(existing) = state.shards.values().find(|s| s.shard_id == shard.shard_id) {
            return Ok((existing.clone(), false));
        }
        let id = state.next_id();
        let record = ShardRecord {
            id,
            shard_id: shard.shard_id,
            storage_key: shard.storage_key,
            size: shard.size,
            created_at: Utc::now(),
        };
        state.shards.insert(id, record.clone());
        Ok((record, true))
    }

    async fn get_shard(&self, shard_id: &ContentHash) -> Result<Option<ShardRecord>> {
        let state = self.state.read();
        Ok(state.shards.values().find(|s| &s.shard_id == shard_id).cloned())
    }

    async fn small_shards(&self, threshold: u64) -> Result<Vec<ShardRecord>> {
        let state = self.state.read();
        Ok(state
            .shards
            .values()
            .filter(|s| s.size < threshold)
            .cloned()
            .collect())
    }

    async fn delete_shard(&self, shard_id: &ContentHash) -> Result<bool> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let id = state
            .shards
            .values()
            .find(|s| &s.shard_id == shard_id)
            .map(|s| s.id);
        Ok(match id {
            Some(id) => state.shards.remove(&id).is_some(),
            None => false,
        })
    }

    async fn stats(&self) -> Result<RegistryStats> {
        let state = self.state.read();
        Ok(RegistryStats {
            block_count: state.blocks.len() as u64,
            block_bytes: state.blocks.values().map(|b| b.size).sum(),
            placed_blocks: state.placements.len() as u64,
            xorb_count: state.xorbs.len() as u64,
            xorb_bytes: state.xorbs.values().map(|x| x.size).sum(),
            shard_count: state.shards.len() as u64,
            shard_bytes: state.shards.values().map(|s| s.size).sum(),
            chunked_files: state.layouts.len() as u64,
        })
    }

    async fn block_size_distribution(&self) -> Result<SizeDistribution> {
        let state = self.state.read();
        let mut dist = SizeDistribution::default();
        for block in state.blocks.values() {
            dist.record(block.size);
        }
        Ok(dist)
    }
}
