//! Background jobs
//!
//! Wraps each maintenance service as a [`PeriodicJob`] and assembles the
//! gateway's worker from configuration.

use crate::chunker::ChunkerService;
use crate::compactor::Compactor;
use crate::scheduler::{BackgroundWorker, PeriodicJob, PeriodicTask};
use crate::shard_manager::ShardManager;
use crate::state::AppState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use xorbhub_storage::DiskCache;

/// Chunk pending files
pub struct ChunkingJob {
    service: Arc<ChunkerService>,
    files_per_sweep: usize,
}

impl ChunkingJob {
    pub fn new(service: Arc<ChunkerService>, files_per_sweep: usize) -> Self {
        Self {
            service,
            files_per_sweep,
        }
    }
}

#[async_trait]
impl PeriodicJob for ChunkingJob {
    fn name(&self) -> &'static str {
        "chunking"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let report = self.service.run_sweep(self.files_per_sweep).await?;
        if report.files_chunked + report.files_failed > 0 {
            info!(
                chunked = report.files_chunked,
                failed = report.files_failed,
                uploaded = report.blocks_uploaded,
                deduped = report.blocks_deduped,
                "Chunking sweep finished"
            );
        }
        Ok(())
    }
}

/// Pack unplaced blocks into xorbs
pub struct CompactionJob {
    compactor: Arc<Compactor>,
}

impl CompactionJob {
    pub fn new(compactor: Arc<Compactor>) -> Self {
        Self { compactor }
    }
}

#[async_trait]
impl PeriodicJob for CompactionJob {
    fn name(&self) -> &'static str {
        "compaction"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let report = self.compactor.run_sweep().await?;
        debug!(?report, "Compaction sweep finished");
        Ok(())
    }
}

/// Publish the global shard
pub struct ShardGenerationJob {
    manager: Arc<ShardManager>,
}

impl ShardGenerationJob {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PeriodicJob for ShardGenerationJob {
    fn name(&self) -> &'static str {
        "shard_generation"
    }

    async fn run(&self) -> anyhow::Result<()> {
        match self.manager.generate_global_shard().await? {
            Some(shard) if shard.created => {}
            Some(_) => debug!("Global shard unchanged"),
            None => debug!("No placements yet, skipping shard generation"),
        }
        Ok(())
    }
}

/// Merge small shards
pub struct ShardCompactionJob {
    manager: Arc<ShardManager>,
}

impl ShardCompactionJob {
    pub fn new(manager: Arc<ShardManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PeriodicJob for ShardCompactionJob {
    fn name(&self) -> &'static str {
        "shard_compaction"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let outcome = self.manager.compact_shards().await?;
        debug!(merged = outcome.sources_merged, deleted = outcome.sources_deleted, "Shard compaction finished");
        Ok(())
    }
}

/// Keep the disk cache under its cap
pub struct DiskCleanupJob {
    disk: Arc<DiskCache>,
}

impl DiskCleanupJob {
    pub fn new(disk: Arc<DiskCache>) -> Self {
        Self { disk }
    }
}

#[async_trait]
impl PeriodicJob for DiskCleanupJob {
    fn name(&self) -> &'static str {
        "disk_cleanup"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let report = self.disk.cleanup().await?;
        if report.files_removed > 0 {
            info!(
                removed = report.files_removed,
                freed = report.bytes_freed,
                remaining = report.bytes_remaining,
                "Disk cache cleaned"
            );
        }
        Ok(())
    }
}

/// Build the gateway's background worker.
///
/// Registration order is execution order within one tick: chunking feeds
/// compaction, which feeds shard generation.
pub fn build_worker(state: &AppState) -> BackgroundWorker {
    let config = &state.config;
    let secs = Duration::from_secs;

    let mut worker = BackgroundWorker::new(state.shutdown_token())
        .with_task(PeriodicTask::new(
            Arc::new(ChunkingJob::new(state.chunking.clone(), config.chunking.files_per_sweep)),
            secs(config.chunking.interval_secs),
        ))
        .with_task(
            PeriodicTask::new(
                Arc::new(CompactionJob::new(state.compactor.clone())),
                secs(config.compaction.interval_secs),
            )
            .delayed(),
        )
        .with_task(
            PeriodicTask::new(
                Arc::new(ShardGenerationJob::new(state.shards.clone())),
                secs(config.shards.generate_interval_secs),
            )
            .delayed(),
        )
        .with_task(
            PeriodicTask::new(
                Arc::new(ShardCompactionJob::new(state.shards.clone())),
                secs(config.shards.compact_interval_secs),
            )
            .delayed(),
        );

    if let Some(disk) = &state.disk {
        worker = worker.with_task(
            PeriodicTask::new(
                Arc::new(DiskCleanupJob::new(disk.clone())),
                secs(config.cache.cleanup_interval_secs),
            )
            .delayed(),
        );
    }
    worker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use bytes::Bytes;
    use xorbhub_core::ContentHash;
    use xorbhub_metadata::NewFile;
    use xorbhub_storage::keys;

    #[tokio::test]
    async fn test_worker_job_order() {
        let state = AppState::builder(GatewayConfig::default()).build();
        let worker = build_worker(&state);
        let names: Vec<_> = worker.tasks().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec!["chunking", "compaction", "shard_generation", "shard_compaction"]
        );
        assert_eq!(worker.tasks()[0].interval(), Duration::from_secs(60));
        assert_eq!(worker.tasks()[1].interval(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_disk_cleanup_registered_with_disk_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.cache.disk_dir = Some(dir.path().to_path_buf());
        let state = AppState::builder(config).build();
        let worker = build_worker(&state);
        assert_eq!(worker.tasks().last().map(|t| t.name()), Some("disk_cleanup"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_runs_after_slow_interval() {
        let mut config = GatewayConfig::default();
        config.chunking.block_size = 1024;
        config.compaction.xorb_target_size = 1024 * 1024;
        let state = AppState::builder(config).build();

        let data = Bytes::from(vec![42u8; 3000]);
        let content_hash = ContentHash::compute(&data).to_hex();
        state
            .store
            .put(&keys::raw_object_key(&content_hash), data)
            .await
            .unwrap();
        state
            .registry
            .upsert_file(NewFile {
                path: "model.bin".to_string(),
                content_hash,
                size: 3000,
                lfs: true,
            })
            .await
            .unwrap();

        let mut worker = build_worker(&state);
        // only chunking is due at start
        assert_eq!(worker.run_due().await, 1);
        assert_eq!(state.registry.stats().await.unwrap().xorb_count, 0);

        tokio::time::advance(Duration::from_secs(600)).await;
        worker.run_due().await;

        let stats = state.registry.stats().await.unwrap();
        assert_eq!(stats.chunked_files, 1);
        assert_eq!(stats.xorb_count, 1);
        assert_eq!(stats.shard_count, 1);
    }
}
