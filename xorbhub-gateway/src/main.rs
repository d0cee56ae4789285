//! XorbHub gateway
//!
//! Provides:
//! - CAS API for blocks, shards and file reconstructions
//! - Signed object downloads for the built-in storage backends
//! - Admin statistics and Prometheus metrics
//! - Background chunking, compaction and shard maintenance

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xorbhub_gateway::{app, metrics, AppState, GatewayConfig};

#[derive(Parser)]
#[command(name = "xorbhub-gateway")]
#[command(about = "XorbHub content-addressed storage gateway")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "XORBHUB_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides the config file)
    #[arg(long)]
    http_addr: Option<String>,

    /// PostgreSQL database URL (enables persistent registry)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis URL for the fast tier
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Root directory for the local object store
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,

    /// Serve requests without running background jobs
    #[arg(long, default_value = "false")]
    no_background: bool,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if cli.database_url.is_some() {
        config.database.url = cli.database_url;
    }
    if cli.redis_url.is_some() {
        config.cache.redis_url = cli.redis_url;
    }
    if cli.storage_dir.is_some() {
        config.storage.path = cli.storage_dir;
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging.level, config.logging.json);
    config.validate().context("invalid configuration")?;

    info!(
        http = %config.server.http_addr,
        database = config.database.url.is_some(),
        redis = config.cache.redis_url.is_some(),
        block_size = config.chunking.block_size,
        xorb_target = config.compaction.xorb_target_size,
        "Starting XorbHub gateway"
    );

    let prometheus = match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, /metrics disabled");
            None
        }
    };

    let http_addr: SocketAddr = config
        .server
        .http_addr
        .parse()
        .with_context(|| format!("invalid http address {}", config.server.http_addr))?;

    let state = Arc::new(
        AppState::with_config(config)
            .await
            .context("failed to initialize application state")?,
    );

    let worker = if cli.no_background {
        info!("Background jobs disabled");
        None
    } else {
        Some(state.spawn_background())
    };

    let mut router = app(state.clone());
    if let Some(handle) = prometheus {
        router = router.merge(metrics::routes(handle));
    }

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            error!(error = %e, "Background worker ended abnormally");
        }
    }
    state.metrics.log_stats();

    info!("Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
