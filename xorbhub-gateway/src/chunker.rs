//! Chunking of raw objects into blocks
//!
//! Turns an un-chunked file into content-addressed blocks plus an ordered
//! layout. Block bytes are uploaded first; the registry rows (blocks and the
//! whole layout) are committed in one transaction afterwards, so a crash
//! leaves at worst orphaned block objects and never a partial layout.

use crate::metrics::{self, DedupMetrics};
use crate::oracle::{Existence, ObjectKind, Strictness, TieredOracle};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use xorbhub_core::{Chunker, Result, XorbError};
use xorbhub_metadata::{FileRecord, LayoutCommit, NewBlock, Registry};
use xorbhub_storage::{keys, ObjectStore};

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Chunked { blocks: usize, uploaded: usize },
    AlreadyChunked,
}

/// Totals of one chunking sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub files_chunked: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub blocks_uploaded: usize,
    pub blocks_deduped: usize,
}

pub struct ChunkerService {
    registry: Arc<dyn Registry>,
    store: Arc<dyn ObjectStore>,
    oracle: Arc<TieredOracle>,
    chunker: Arc<dyn Chunker>,
    metrics: Arc<DedupMetrics>,
}

impl ChunkerService {
    pub fn new(
        registry: Arc<dyn Registry>,
        store: Arc<dyn ObjectStore>,
        oracle: Arc<TieredOracle>,
        chunker: Arc<dyn Chunker>,
        metrics: Arc<DedupMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            oracle,
            chunker,
            metrics,
        }
    }

    /// Chunk one file. A file that already has a layout is left untouched.
    ///
    /// Fails before any registry write if the raw object cannot be read or
    /// its size disagrees with the file record.
    #[instrument(skip(self, file), fields(file_id = file.id, path = %file.path))]
    pub async fn chunk_file(&self, file: &FileRecord) -> Result<ChunkOutcome> {
        if self.registry.has_layout(file.id).await? {
            debug!("File already chunked");
            return Ok(ChunkOutcome::AlreadyChunked);
        }

        let raw_key = keys::raw_object_key(&file.content_hash);
        let data = self
            .store
            .get(&raw_key)
            .await?
            .ok_or_else(|| XorbError::NotFound(format!("raw object {}", raw_key)))?;
        if data.len() as u64 != file.size {
            return Err(XorbError::SerializationInvariant(format!(
                "raw object {} is {} bytes, file record says {}",
                raw_key,
                data.len(),
                file.size
            )));
        }

        let blocks = self.chunker.split(&data);
        let mut seen = HashSet::new();
        let mut uploaded = Vec::new();
        for block in &blocks {
            if !seen.insert(block.hash) {
                continue;
            }
            let present = self
                .oracle
                .exists(ObjectKind::Block, &block.hash, Strictness::Confirmed)
                .await?;
            if let Existence::Found { .. } = present {
                self.metrics.record(true, block.size());
                continue;
            }
            self.store
                .put(&keys::block_key(&block.hash.to_hex()), block.data.clone())
                .await?;
            self.metrics.record(false, block.size());
            uploaded.push(block.hash);
        }

        let rows: Vec<NewBlock> = blocks
            .iter()
            .map(|b| NewBlock {
                hash: b.hash,
                size: b.size(),
            })
            .collect();

        match self.registry.commit_file_layout(file.id, &rows).await? {
            LayoutCommit::AlreadyChunked => {
                // another sweep won the race; our uploads are content-addressed duplicates
                debug!("Layout committed concurrently");
                Ok(ChunkOutcome::AlreadyChunked)
            }
            LayoutCommit::Committed { blocks: count } => {
                for hash in &seen {
                    self.oracle.remember(ObjectKind::Block, hash).await;
                }
                info!(
                    blocks = count,
                    uploaded = uploaded.len(),
                    strategy = self.chunker.name(),
                    "Chunked file"
                );
                Ok(ChunkOutcome::Chunked {
                    blocks: count,
                    uploaded: uploaded.len(),
                })
            }
        }
    }

    /// Chunk up to `limit` pending files, oldest first.
    ///
    /// A failing file is logged and retried on a later sweep.
    pub async fn run_sweep(&self, limit: usize) -> Result<ChunkReport> {
        let pending = self.registry.files_pending_chunking(limit).await?;
        let mut report = ChunkReport::default();

        for file in &pending {
            match self.chunk_file(file).await {
                Ok(ChunkOutcome::Chunked { blocks, uploaded }) => {
                    report.files_chunked += 1;
                    report.blocks_uploaded += uploaded;
                    report.blocks_deduped += blocks - uploaded;
                }
                Ok(ChunkOutcome::AlreadyChunked) => report.files_skipped += 1,
                Err(e) => {
                    warn!(file_id = file.id, path = %file.path, error = %e, "Failed to chunk file");
                    report.files_failed += 1;
                }
            }
        }

        if report.files_chunked > 0 {
            metrics::record_files_chunked(report.files_chunked as u64);
        }
        Ok(report)
    }
}
