//! Storage statistics for operators

use crate::cas_api::CasResult;
use crate::metrics::DedupSnapshot;
use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use xorbhub_core::XorbError;
use xorbhub_metadata::{RegistryStats, SizeDistribution};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/stats", get(get_stats))
        .route("/admin/distribution", get(get_distribution))
}

#[derive(Debug, Serialize)]
pub struct BlockTotals {
    pub count: u64,
    pub logical_size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct XorbTotals {
    pub count: u64,
    pub physical_size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct ShardTotals {
    pub count: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct StorageSummary {
    /// Logical over physical bytes, two decimals; 1.0 until anything is packed
    pub deduplication_ratio: f64,
    pub savings_bytes: u64,
    pub chunked_files: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub blocks: BlockTotals,
    pub xorbs: XorbTotals,
    pub shards: ShardTotals,
    pub metrics: StorageSummary,
    pub dedup: DedupSnapshot,
}

impl StatsResponse {
    fn new(stats: RegistryStats, dedup: DedupSnapshot) -> Self {
        let ratio = if stats.xorb_bytes > 0 {
            stats.block_bytes as f64 / stats.xorb_bytes as f64
        } else {
            1.0
        };
        Self {
            blocks: BlockTotals {
                count: stats.block_count,
                logical_size_bytes: stats.block_bytes,
            },
            xorbs: XorbTotals {
                count: stats.xorb_count,
                physical_size_bytes: stats.xorb_bytes,
            },
            shards: ShardTotals {
                count: stats.shard_count,
                size_bytes: stats.shard_bytes,
            },
            metrics: StorageSummary {
                deduplication_ratio: (ratio * 100.0).round() / 100.0,
                savings_bytes: stats.block_bytes.saturating_sub(stats.xorb_bytes),
                chunked_files: stats.chunked_files,
            },
            dedup,
        }
    }
}

/// GET /admin/stats
#[instrument(skip(state))]
async fn get_stats(State(state): State<Arc<AppState>>) -> CasResult<Json<StatsResponse>> {
    let stats = state.registry.stats().await.map_err(XorbError::from)?;
    Ok(Json(StatsResponse::new(stats, state.metrics.snapshot())))
}

/// GET /admin/distribution
#[instrument(skip(state))]
async fn get_distribution(State(state): State<Arc<AppState>>) -> CasResult<Json<SizeDistribution>> {
    let distribution = state
        .registry
        .block_size_distribution()
        .await
        .map_err(XorbError::from)?;
    Ok(Json(distribution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DedupMetrics;

    #[test]
    fn test_ratio_defaults_to_one_without_xorbs() {
        let stats = RegistryStats {
            block_count: 3,
            block_bytes: 300,
            ..Default::default()
        };
        let response = StatsResponse::new(stats, DedupMetrics::new().snapshot());
        assert_eq!(response.metrics.deduplication_ratio, 1.0);
        assert_eq!(response.metrics.savings_bytes, 300);
    }

    #[test]
    fn test_ratio_rounds_to_two_decimals() {
        let stats = RegistryStats {
            block_bytes: 1000,
            xorb_count: 1,
            xorb_bytes: 300,
            ..Default::default()
        };
        let response = StatsResponse::new(stats, DedupMetrics::new().snapshot());
        assert_eq!(response.metrics.deduplication_ratio, 3.33);
        assert_eq!(response.metrics.savings_bytes, 700);
    }
}
