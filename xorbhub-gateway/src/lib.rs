//! XorbHub CAS gateway library
//!
//! Dedup engine services plus the HTTP router, exposed for the binary and
//! for integration tests.

#![allow(clippy::too_many_arguments)]

pub mod access;
pub mod admin_api;
pub mod cas_api;
pub mod chunker;
pub mod compactor;
pub mod config;
pub mod metrics;
pub mod objects_api;
pub mod oracle;
pub mod reconstruction;
pub mod scheduler;
pub mod shard_manager;
pub mod state;
pub mod worker;

pub use access::{AllowAll, ReadAccess};
pub use cas_api::{CasError, CasResult};
pub use config::{ConfigError, GatewayConfig};
pub use oracle::{Content, Existence, ObjectKind, Strictness, Tier, TieredOracle};
pub use state::{AppState, AppStateBuilder};

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

async fn health() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    concat!("xorbhub-gateway/", env!("CARGO_PKG_VERSION"))
}

/// Build the HTTP router over `state`
pub fn app(state: Arc<AppState>) -> Router {
    let cors = if state.config.server.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .merge(cas_api::routes())
        .merge(objects_api::routes())
        .merge(admin_api::routes())
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
