//! Dedup metrics
//!
//! `DedupMetrics` keeps the running dedup counters for the lifetime of the
//! process and mirrors every observation into the `metrics` facade, which the
//! binary exposes at GET /metrics in Prometheus text format.

use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Observations between two summary log lines
pub const LOG_EVERY: u64 = 100;

/// Snapshot of the dedup counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DedupSnapshot {
    pub dedup_hits: u64,
    pub dedup_misses: u64,
    pub bytes_saved: u64,
    pub bytes_uploaded: u64,
    pub dedup_ratio: f64,
}

/// Running dedup counters
#[derive(Debug, Default)]
pub struct DedupMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    bytes_saved: AtomicU64,
    bytes_uploaded: AtomicU64,
}

impl DedupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dedup observation. A hit saved `size` bytes of upload; a
    /// miss uploaded them.
    pub fn record(&self, hit: bool, size: u64) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.bytes_saved.fetch_add(size, Ordering::Relaxed);
            counter!("xorbhub_dedup_hits_total").increment(1);
            counter!("xorbhub_bytes_saved_total").increment(size);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.bytes_uploaded.fetch_add(size, Ordering::Relaxed);
            counter!("xorbhub_dedup_misses_total").increment(1);
            counter!("xorbhub_bytes_uploaded_total").increment(size);
        }

        let total = self.observations();
        gauge!("xorbhub_dedup_ratio").set(self.ratio());
        if total % LOG_EVERY == 0 {
            self.log_stats();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn observations(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// hits / (hits + misses), 0 without observations
    pub fn ratio(&self) -> f64 {
        let total = self.observations();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> DedupSnapshot {
        DedupSnapshot {
            dedup_hits: self.hits(),
            dedup_misses: self.misses(),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            dedup_ratio: self.ratio(),
        }
    }

    pub fn log_stats(&self) {
        let s = self.snapshot();
        info!(
            hits = s.dedup_hits,
            misses = s.dedup_misses,
            ratio = format!("{:.2}%", s.dedup_ratio * 100.0),
            saved_mb = format!("{:.2}", s.bytes_saved as f64 / (1024.0 * 1024.0)),
            uploaded_mb = format!("{:.2}", s.bytes_uploaded as f64 / (1024.0 * 1024.0)),
            "Dedup stats"
        );
    }
}

/// Initialize the Prometheus metrics exporter and install it as the global recorder.
/// Returns the handle for rendering metrics on the /metrics endpoint.
pub fn init_metrics() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    Ok(builder.install_recorder()?)
}

/// Create metrics route that can be merged into any Router
pub fn routes<S: Clone + Send + Sync + 'static>(
    handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Router<S> {
    let handle = Arc::new(handle);
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a CAS API request
pub fn record_cas_request(op: &'static str, status: u16) {
    counter!("cas_requests_total", "op" => op, "status" => status.to_string()).increment(1);
}

/// Record which tier answered a lookup
pub fn record_tier_hit(kind: &'static str, tier: &'static str) {
    counter!("cas_tier_hits_total", "kind" => kind, "tier" => tier).increment(1);
}

/// Record a tier probe that failed or timed out
pub fn record_tier_error(kind: &'static str, tier: &'static str) {
    counter!("cas_tier_errors_total", "kind" => kind, "tier" => tier).increment(1);
}

/// Record a background job run
pub fn record_job_run(job: &'static str, ok: bool, duration_secs: f64) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("background_job_runs_total", "job" => job, "outcome" => outcome).increment(1);
    histogram!("background_job_duration_seconds", "job" => job).record(duration_secs);
}

/// Record sealed xorbs
pub fn record_xorbs_sealed(count: u64, bytes: u64) {
    counter!("xorbs_sealed_total").increment(count);
    counter!("xorb_bytes_sealed_total").increment(bytes);
}

/// Record chunked files
pub fn record_files_chunked(count: u64) {
    counter!("files_chunked_total").increment(count);
}
