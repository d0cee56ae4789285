//! CAS HTTP surface
//!
//! Blocks and shards share one set of semantics:
//! - `HEAD` 200 if any tier knows the object, 404 otherwise
//! - `GET` 200 with bytes from a cache, 307 to a presigned origin URL, or 404
//! - `PUT` verifies the body digest (400 on mismatch) and stores it
//!
//! plus `GET /reconstructions/:file_id`.

use crate::metrics;
use crate::oracle::{Content, Existence, ObjectKind};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use xorbhub_core::{ContentHash, XorbError};

/// Errors surfaced to HTTP clients
#[derive(Error, Debug)]
pub enum CasError {
    #[error(transparent)]
    Xorb(#[from] XorbError),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),
}

pub type CasResult<T> = Result<T, CasError>;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl CasError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            CasError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            CasError::RangeNotSatisfiable(_) => (StatusCode::RANGE_NOT_SATISFIABLE, "range_not_satisfiable"),
            CasError::Xorb(e) => match e {
                XorbError::Integrity { .. } => (StatusCode::BAD_REQUEST, "integrity_error"),
                XorbError::InvalidHash(_) => (StatusCode::BAD_REQUEST, "invalid_hash"),
                XorbError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                XorbError::TransientStore(_) | XorbError::PartialBatch { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
                }
                XorbError::SerializationInvariant(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "serialization_invariant")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        }
    }
}

impl IntoResponse for CasError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Request rejected");
        }
        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Record the final status of one CAS operation
pub(crate) fn observe(op: &'static str, result: CasResult<Response>) -> Response {
    let response = result.into_response();
    metrics::record_cas_request(op, response.status().as_u16());
    response
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/blocks/:hash",
            get(get_block).head(head_block).put(put_block),
        )
        .route(
            "/shards/:id",
            get(get_shard).head(head_shard).put(put_shard),
        )
        .route("/reconstructions/:file_id", get(get_reconstruction))
}

// =============================================================================
// SHARED SEMANTICS
// =============================================================================

async fn head_object(state: &AppState, kind: ObjectKind, raw: &str) -> CasResult<Response> {
    let id = ContentHash::from_hex(raw)?;
    match state.oracle.exists(kind, &id, kind.head_strictness()).await? {
        Existence::Found { tier, size } => {
            if kind == ObjectKind::Block {
                state.metrics.record(true, size.unwrap_or(0));
            }
            debug!(kind = kind.label(), id = %id, tier = tier.label(), "Existence hit");
            Ok(StatusCode::OK.into_response())
        }
        Existence::Missing => Err(XorbError::NotFound(format!("{} {}", kind.label(), id)).into()),
    }
}

async fn get_object(state: &AppState, kind: ObjectKind, raw: &str) -> CasResult<Response> {
    let id = ContentHash::from_hex(raw)?;
    match state.oracle.fetch(kind, &id).await? {
        Content::Bytes { tier, data } => {
            debug!(kind = kind.label(), id = %id, tier = tier.label(), size = data.len(), "Serving from cache");
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/octet-stream")],
                data,
            )
                .into_response())
        }
        Content::Redirect { url } => Ok(Redirect::temporary(&url).into_response()),
        Content::Missing => Err(XorbError::NotFound(format!("{} {}", kind.label(), id)).into()),
    }
}

async fn put_object(state: &AppState, kind: ObjectKind, raw: &str, body: Bytes) -> CasResult<(ContentHash, u64)> {
    let id = ContentHash::from_hex(raw)?;
    let size = match state.oracle.put(kind, &id, body).await {
        Ok(size) => size,
        Err(e @ XorbError::Integrity { .. }) => {
            warn!(kind = kind.label(), id = %id, error = %e, "Rejected upload");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    if kind == ObjectKind::Block {
        state.metrics.record(false, size);
    }
    info!(kind = kind.label(), id = %id, size, "Stored upload");
    Ok((id, size))
}

// =============================================================================
// BLOCKS
// =============================================================================

#[derive(Serialize)]
struct BlockPutResponse {
    hash: String,
    size: u64,
}

/// HEAD /blocks/:hash
#[instrument(skip(state))]
async fn head_block(State(state): State<Arc<AppState>>, Path(hash): Path<String>) -> Response {
    observe("head_block", head_object(&state, ObjectKind::Block, &hash).await)
}

/// GET /blocks/:hash
#[instrument(skip(state))]
async fn get_block(State(state): State<Arc<AppState>>, Path(hash): Path<String>) -> Response {
    observe("get_block", get_object(&state, ObjectKind::Block, &hash).await)
}

/// PUT /blocks/:hash
#[instrument(skip(state, body), fields(size = body.len()))]
async fn put_block(State(state): State<Arc<AppState>>, Path(hash): Path<String>, body: Bytes) -> Response {
    let result = put_object(&state, ObjectKind::Block, &hash, body)
        .await
        .map(|(id, size)| {
            Json(BlockPutResponse {
                hash: id.to_hex(),
                size,
            })
            .into_response()
        });
    observe("put_block", result)
}

// =============================================================================
// SHARDS
// =============================================================================

#[derive(Serialize)]
struct ShardPutResponse {
    shard_id: String,
    size: u64,
}

/// HEAD /shards/:id
#[instrument(skip(state))]
async fn head_shard(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    observe("head_shard", head_object(&state, ObjectKind::Shard, &id).await)
}

/// GET /shards/:id
#[instrument(skip(state))]
async fn get_shard(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    observe("get_shard", get_object(&state, ObjectKind::Shard, &id).await)
}

/// PUT /shards/:id
#[instrument(skip(state, body), fields(size = body.len()))]
async fn put_shard(State(state): State<Arc<AppState>>, Path(id): Path<String>, body: Bytes) -> Response {
    let result = put_object(&state, ObjectKind::Shard, &id, body)
        .await
        .map(|(id, size)| {
            Json(ShardPutResponse {
                shard_id: id.to_hex(),
                size,
            })
            .into_response()
        });
    observe("put_shard", result)
}

// =============================================================================
// RECONSTRUCTION
// =============================================================================

/// GET /reconstructions/:file_id
#[instrument(skip(state))]
async fn get_reconstruction(State(state): State<Arc<AppState>>, Path(file_id): Path<String>) -> Response {
    let result = state
        .reconstruction
        .reconstruct(&file_id)
        .await
        .map(|plan| Json(plan).into_response())
        .map_err(CasError::from);
    observe("get_reconstruction", result)
}
