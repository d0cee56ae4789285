//! Xorb compaction
//!
//! Folds standalone blocks into sealed containers. Each sweep walks the
//! unplaced blocks in registration order and seals a xorb whenever the
//! accumulated bytes reach the target size.
//!
//! The remainder below the target is sealed only when the sweep has not
//! sealed a full xorb, so every sweep with pending blocks makes progress
//! while busy sweeps keep packing full containers. Setting
//! `always_flush_remainder` seals it unconditionally.
//!
//! Assumes a single compaction worker: two concurrent sweeps could select the
//! same blocks. The registry rejects the second seal, so the result stays
//! consistent but the losing sweep's upload is wasted.

use crate::metrics;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use xorbhub_core::{ContentHash, Result, XorbError, DEFAULT_XORB_TARGET_SIZE};
use xorbhub_metadata::{BlockRecord, NewPlacement, NewXorb, Registry, XorbRecord};
use xorbhub_storage::{keys, ObjectStore};

/// Compactor configuration
#[derive(Debug, Clone)]
pub struct CompactorConfig {
    /// Accumulated bytes that trigger sealing a xorb
    pub xorb_target_size: u64,
    /// Unplaced blocks considered per sweep
    pub batch_limit: usize,
    /// Seal the below-target remainder even after a full xorb
    pub always_flush_remainder: bool,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            xorb_target_size: DEFAULT_XORB_TARGET_SIZE,
            batch_limit: 1000,
            always_flush_remainder: false,
        }
    }
}

/// Totals of one compaction sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub xorbs_sealed: usize,
    pub blocks_placed: usize,
    pub bytes_packed: u64,
    /// Blocks that could not be read or failed verification
    pub blocks_skipped: usize,
    /// Batches whose upload or transaction failed
    pub seal_failures: usize,
    /// Fetched blocks left for the next sweep
    pub blocks_deferred: usize,
}

struct Batch {
    blocks: Vec<(BlockRecord, Bytes)>,
    bytes: u64,
}

impl Batch {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            bytes: 0,
        }
    }

    fn push(&mut self, block: BlockRecord, data: Bytes) {
        self.bytes += data.len() as u64;
        self.blocks.push((block, data));
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

pub struct Compactor {
    registry: Arc<dyn Registry>,
    store: Arc<dyn ObjectStore>,
    config: CompactorConfig,
}

impl Compactor {
    pub fn new(registry: Arc<dyn Registry>, store: Arc<dyn ObjectStore>, config: CompactorConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    /// Run one sweep over the unplaced blocks
    pub async fn run_sweep(&self) -> Result<CompactionReport> {
        let candidates = self.registry.unplaced_blocks(self.config.batch_limit).await?;
        let mut report = CompactionReport::default();
        if candidates.is_empty() {
            debug!("No unplaced blocks");
            return Ok(report);
        }

        let mut batch = Batch::new();
        let mut sealed_full = false;

        for block in candidates {
            let data = match self.fetch_block(&block).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "Skipping block for this sweep");
                    report.blocks_skipped += 1;
                    continue;
                }
            };
            batch.push(block, data);

            if batch.bytes >= self.config.xorb_target_size {
                let full = std::mem::replace(&mut batch, Batch::new());
                if self.seal_and_record(full, &mut report).await {
                    sealed_full = true;
                }
            }
        }

        if !batch.is_empty() {
            if !sealed_full || self.config.always_flush_remainder {
                self.seal_and_record(batch, &mut report).await;
            } else {
                report.blocks_deferred = batch.blocks.len();
            }
        }

        info!(
            xorbs = report.xorbs_sealed,
            placed = report.blocks_placed,
            bytes = report.bytes_packed,
            skipped = report.blocks_skipped,
            deferred = report.blocks_deferred,
            failures = report.seal_failures,
            "Compaction sweep finished"
        );
        Ok(report)
    }

    /// Read a standalone block and check it against its registry row
    async fn fetch_block(&self, block: &BlockRecord) -> Result<Bytes> {
        let partial = |reason: String| XorbError::PartialBatch {
            block: block.hash.to_hex(),
            reason,
        };

        let data = self
            .store
            .get(&keys::block_key(&block.hash.to_hex()))
            .await
            .map_err(|e| partial(e.to_string()))?
            .ok_or_else(|| partial("object missing".to_string()))?;

        if data.len() as u64 != block.size {
            return Err(partial(format!(
                "object is {} bytes, registry says {}",
                data.len(),
                block.size
            )));
        }
        if !block.hash.verify(&data) {
            return Err(partial("content digest mismatch".to_string()));
        }
        Ok(data)
    }

    async fn seal_and_record(&self, batch: Batch, report: &mut CompactionReport) -> bool {
        let count = batch.blocks.len();
        match self.seal(batch).await {
            Ok(xorb) => {
                report.xorbs_sealed += 1;
                report.blocks_placed += count;
                report.bytes_packed += xorb.size;
                metrics::record_xorbs_sealed(1, xorb.size);
                true
            }
            Err(e) => {
                error!(blocks = count, error = %e, "Failed to seal xorb");
                report.seal_failures += 1;
                false
            }
        }
    }

    /// Concatenate, upload, then register the xorb and its placements atomically
    async fn seal(&self, batch: Batch) -> Result<XorbRecord> {
        let mut buf = BytesMut::with_capacity(batch.bytes as usize);
        let mut placements = Vec::with_capacity(batch.blocks.len());
        for (block, data) in &batch.blocks {
            placements.push(NewPlacement {
                block: block.hash,
                offset: buf.len() as u64,
                length: data.len() as u64,
            });
            buf.extend_from_slice(data);
        }
        let bytes = buf.freeze();

        let xorb_id = ContentHash::compute_parallel(&bytes);
        let storage_key = keys::xorb_key(&xorb_id.to_hex());
        let size = bytes.len() as u64;

        self.store.put(&storage_key, bytes).await?;
        let xorb = self
            .registry
            .seal_xorb(
                NewXorb {
                    xorb_id,
                    storage_key,
                    size,
                },
                &placements,
            )
            .await?;

        info!(xorb = %xorb.xorb_id, blocks = placements.len(), size, "Sealed xorb");
        Ok(xorb)
    }
}
