//! Presigned object downloads
//!
//! Serves the capability URLs handed out by the memory and local backends.
//! The signature is checked before the store is touched; a URL signed for a
//! byte range only ever serves bytes inside that range.

use crate::cas_api::{observe, CasError, CasResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use xorbhub_core::{HttpRange, XorbError};
use xorbhub_storage::{keys, SignedQuery};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/objects/*key", get(get_signed_object))
}

/// A `Range: bytes=` request; `end` is open when absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestedRange {
    start: u64,
    end: Option<u64>,
}

fn parse_range_header(raw: &str) -> Option<RequestedRange> {
    let ranges = raw.trim().strip_prefix("bytes=")?;
    // multi-range requests are not supported
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse().ok()?),
    };
    if matches!(end, Some(e) if e < start) {
        return None;
    }
    Some(RequestedRange { start, end })
}

/// Combine the signed range and the client's `Range` header
fn effective_range(signed: Option<HttpRange>, requested: Option<RequestedRange>) -> CasResult<Option<HttpRange>> {
    match (signed, requested) {
        (None, None) => Ok(None),
        (Some(signed), None) => Ok(Some(signed)),
        (None, Some(req)) => Ok(Some(HttpRange {
            start: req.start,
            end: req.end.unwrap_or(u64::MAX),
        })),
        (Some(signed), Some(req)) => {
            let end = req.end.unwrap_or(signed.end);
            if req.start < signed.start || end > signed.end {
                return Err(CasError::Forbidden(format!(
                    "range {}-{} outside signed range {}-{}",
                    req.start, end, signed.start, signed.end
                )));
            }
            Ok(Some(HttpRange { start: req.start, end }))
        }
    }
}

async fn serve(state: &AppState, key: &str, query: &SignedQuery, headers: &HeaderMap) -> CasResult<Response> {
    if !keys::is_safe_key(key) {
        return Err(CasError::Forbidden(format!("invalid key {}", key)));
    }
    let signed = state
        .signer
        .verify(key, query)
        .map_err(|e| CasError::Forbidden(e.to_string()))?;

    let requested = match headers.get(header::RANGE) {
        Some(value) => {
            let raw = value.to_str().unwrap_or_default();
            Some(parse_range_header(raw).ok_or_else(|| CasError::RangeNotSatisfiable(raw.to_string()))?)
        }
        None => None,
    };
    let range = effective_range(signed, requested)?;

    let meta = state
        .store
        .head(key)
        .await?
        .ok_or_else(|| XorbError::NotFound(format!("object {}", key)))?;

    let Some(range) = range.filter(|_| meta.size > 0) else {
        let data = state
            .store
            .get(key)
            .await?
            .ok_or_else(|| XorbError::NotFound(format!("object {}", key)))?;
        debug!(key, size = data.len(), "Serving whole object");
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response());
    };

    if range.start >= meta.size {
        return Err(CasError::RangeNotSatisfiable(format!(
            "start {} past object size {}",
            range.start, meta.size
        )));
    }
    let end = range.end.min(meta.size - 1);
    let data = state
        .store
        .get_range(key, HttpRange { start: range.start, end })
        .await?
        .ok_or_else(|| XorbError::NotFound(format!("object {}", key)))?;

    debug!(key, start = range.start, end, "Serving object range");
    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, end, meta.size),
            ),
        ],
        data,
    )
        .into_response())
}

/// GET /objects/*key
#[instrument(skip(state, query, headers))]
async fn get_signed_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    query: Option<Query<SignedQuery>>,
    headers: HeaderMap,
) -> Response {
    let result = match query {
        Some(Query(query)) => serve(&state, &key, &query, &headers).await,
        None => Err(CasError::Forbidden("missing or malformed signature".to_string())),
    };
    observe("get_object", result)
}
