//! Integration tests for the XorbHub gateway
//!
//! Drive the full router with in-memory collaborators.
//! Run with: cargo test --test integration_tests -p xorbhub-gateway

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use xorbhub_core::shard::{self, ShardEntry};
use xorbhub_core::{ContentHash, HttpRange, QueryReconstructionResponse};
use xorbhub_gateway::{app, AppState, GatewayConfig};
use xorbhub_metadata::cache::Result as CacheResult;
use xorbhub_metadata::{CacheError, FastCache, MemoryCache, Namespace, NewFile};
use xorbhub_storage::{keys, MemoryObjectStore, ObjectStore, UrlSigner};

const BASE: &str = "http://gw.test";

// ============================================================================
// Harness
// ============================================================================

fn state_with(config: GatewayConfig, cache: Option<Arc<dyn FastCache>>) -> Arc<AppState> {
    let signer = UrlSigner::new([9u8; 32], BASE);
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new(signer.clone()));
    Arc::new(
        AppState::builder(config)
            .store(store, signer)
            .cache(cache)
            .build(),
    )
}

fn memory_cache() -> Option<Arc<dyn FastCache>> {
    Some(Arc::new(MemoryCache::new()))
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }
}

async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    Reply { status, headers, body }
}

async fn call(router: &Router, method: Method, uri: &str, body: Bytes) -> Reply {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .unwrap();
    send(router, request).await
}

/// GET a presigned URL through the router, optionally with a Range header
async fn download(router: &Router, url: &str, range: Option<HttpRange>) -> Reply {
    let path = url.strip_prefix(BASE).expect("url rooted at gateway");
    let mut builder = Request::builder().method(Method::GET).uri(path);
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range.header_value());
    }
    send(router, builder.body(Body::empty()).unwrap()).await
}

/// Fetch every term of a reconstruction and concatenate the bytes
async fn reassemble(router: &Router, plan: &QueryReconstructionResponse) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, term) in plan.terms.iter().enumerate() {
        let fetch = plan.fetch_info[&term.hash]
            .iter()
            .find(|f| f.range.start == i as u32)
            .expect("fetch info for term");
        let reply = download(router, &fetch.url, fetch.url_range).await;
        assert!(reply.status.is_success(), "download failed: {}", reply.status);
        assert_eq!(reply.body.len() as u64, term.unpacked_length);
        out.extend_from_slice(&reply.body);
    }
    out
}

/// Bytes whose 1 KiB windows are pairwise distinct
fn patterned(len: usize) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| ((i * 7 + (i / 1024) * 13) % 251) as u8)
            .collect::<Vec<u8>>(),
    )
}

async fn add_raw_file(state: &AppState, path: &str, data: &Bytes) -> String {
    let content_hash = ContentHash::compute(data).to_hex();
    state
        .store
        .put(&keys::raw_object_key(&content_hash), data.clone())
        .await
        .unwrap();
    state
        .registry
        .upsert_file(NewFile {
            path: path.to_string(),
            content_hash: content_hash.clone(),
            size: data.len() as u64,
            lfs: true,
        })
        .await
        .unwrap();
    content_hash
}

fn small_block_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.chunking.block_size = 1024;
    config.compaction.xorb_target_size = 4096;
    config
}

/// Every call fails immediately
struct BrokenCache;

#[async_trait]
impl FastCache for BrokenCache {
    async fn is_member(&self, _: Namespace, _: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn add_member(&self, _: Namespace, _: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn remove_member(&self, _: Namespace, _: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn bloom_check(&self, _: Namespace, _: &str) -> CacheResult<bool> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn bloom_add(&self, _: Namespace, _: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn get_content(&self, _: Namespace, _: &str) -> CacheResult<Option<Bytes>> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn put_content(&self, _: Namespace, _: &str, _: &Bytes, _: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
    async fn evict_content(&self, _: Namespace, _: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

// ============================================================================
// Service Endpoints
// ============================================================================

#[tokio::test]
async fn test_health_and_version() {
    let router = app(state_with(GatewayConfig::default(), None));

    let reply = call(&router, Method::GET, "/health", Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(&reply.body[..], b"OK");

    let reply = call(&router, Method::GET, "/version", Bytes::new()).await;
    assert!(String::from_utf8_lossy(&reply.body).starts_with("xorbhub-gateway/"));
}

// ============================================================================
// Block API
// ============================================================================

#[tokio::test]
async fn test_block_put_head_get_with_cache() {
    let state = state_with(GatewayConfig::default(), memory_cache());
    let router = app(state.clone());
    let data = Bytes::from_static(b"some block bytes");
    let hash = ContentHash::compute(&data).to_hex();
    let uri = format!("/blocks/{}", hash);

    let reply = call(&router, Method::PUT, &uri, data.clone()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let body = reply.json();
    assert_eq!(body["hash"], hash);
    assert_eq!(body["size"], 16);

    let reply = call(&router, Method::HEAD, &uri, Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);

    // served straight from the hot cache
    let reply = call(&router, Method::GET, &uri, Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, data);

    assert_eq!(state.metrics.misses(), 1);
    assert_eq!(state.metrics.hits(), 1);
}

#[tokio::test]
async fn test_block_get_redirects_to_origin_without_cache() {
    let router = app(state_with(GatewayConfig::default(), None));
    let data = Bytes::from_static(b"origin only");
    let uri = format!("/blocks/{}", ContentHash::compute(&data).to_hex());

    assert_eq!(call(&router, Method::PUT, &uri, data.clone()).await.status, StatusCode::OK);

    let reply = call(&router, Method::GET, &uri, Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::TEMPORARY_REDIRECT);
    let location = reply.headers[header::LOCATION].to_str().unwrap().to_string();

    let fetched = download(&router, &location, None).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body, data);
}

#[tokio::test]
async fn test_unknown_and_malformed_blocks() {
    let router = app(state_with(GatewayConfig::default(), memory_cache()));
    let missing = ContentHash::compute(b"never uploaded").to_hex();

    let reply = call(&router, Method::HEAD, &format!("/blocks/{}", missing), Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = call(&router, Method::GET, &format!("/blocks/{}", missing), Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["error"], "not_found");

    let reply = call(&router, Method::GET, "/blocks/not-a-hash", Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "invalid_hash");
}

#[tokio::test]
async fn test_put_digest_mismatch_has_no_side_effects() {
    let state = state_with(GatewayConfig::default(), memory_cache());
    let router = app(state.clone());
    let claimed = ContentHash::compute(b"what the client promised").to_hex();
    let uri = format!("/blocks/{}", claimed);

    let reply = call(&router, Method::PUT, &uri, Bytes::from_static(b"what it sent")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "integrity_error");

    assert_eq!(call(&router, Method::HEAD, &uri, Bytes::new()).await.status, StatusCode::NOT_FOUND);
    assert_eq!(state.store.stats().await.unwrap().object_count, 0);
    assert_eq!(state.registry.stats().await.unwrap().block_count, 0);
}

#[tokio::test]
async fn test_failing_cache_only_costs_speed() {
    let cache: Arc<dyn FastCache> = Arc::new(BrokenCache);
    let router = app(state_with(GatewayConfig::default(), Some(cache)));
    let data = Bytes::from_static(b"cache is down");
    let uri = format!("/blocks/{}", ContentHash::compute(&data).to_hex());

    assert_eq!(call(&router, Method::PUT, &uri, data.clone()).await.status, StatusCode::OK);
    assert_eq!(call(&router, Method::HEAD, &uri, Bytes::new()).await.status, StatusCode::OK);

    let reply = call(&router, Method::GET, &uri, Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::TEMPORARY_REDIRECT);
    let location = reply.headers[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(download(&router, &location, None).await.body, data);
}

// ============================================================================
// Shard API
// ============================================================================

#[tokio::test]
async fn test_shard_put_head_get() {
    let state = state_with(GatewayConfig::default(), memory_cache());
    let router = app(state.clone());
    let shard = Bytes::from_static(b"XSHD\x00\x00\x00\x01\x00\x00\x00\x00");
    let id = ContentHash::compute(&shard).to_hex();
    let uri = format!("/shards/{}", id);

    let reply = call(&router, Method::PUT, &uri, shard.clone()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["shard_id"], id);

    assert_eq!(call(&router, Method::HEAD, &uri, Bytes::new()).await.status, StatusCode::OK);
    let reply = call(&router, Method::GET, &uri, Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, shard);

    assert_eq!(state.registry.stats().await.unwrap().shard_count, 1);
    // shard traffic does not count toward block dedup
    assert_eq!(state.metrics.observations(), 0);
}

fn shard_with_entry(seed: u8) -> Bytes {
    let entry = ShardEntry {
        block: ContentHash::compute(&[seed]),
        xorb: ContentHash::compute(&[seed, seed]),
        offset: 0,
        length: 1,
    };
    shard::encode(&[entry]).unwrap()
}

#[tokio::test]
async fn test_retired_shard_is_gone_for_head_and_get() {
    let state = state_with(GatewayConfig::default(), memory_cache());
    let router = app(state.clone());

    let mut uris = Vec::new();
    for seed in [1u8, 2] {
        let data = shard_with_entry(seed);
        let uri = format!("/shards/{}", ContentHash::compute(&data).to_hex());
        assert_eq!(call(&router, Method::PUT, &uri, data).await.status, StatusCode::OK);
        assert_eq!(call(&router, Method::HEAD, &uri, Bytes::new()).await.status, StatusCode::OK);
        uris.push(uri);
    }

    let outcome = state.shards.compact_shards().await.unwrap();
    assert_eq!(outcome.sources_merged, 2);
    assert_eq!(outcome.sources_deleted, 2);

    // the bloom tier still remembers the retired ids; HEAD must not trust it
    for uri in &uris {
        assert_eq!(
            call(&router, Method::HEAD, uri, Bytes::new()).await.status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&router, Method::GET, uri, Bytes::new()).await.status,
            StatusCode::NOT_FOUND
        );
    }

    let merged = outcome.merged.unwrap();
    let uri = format!("/shards/{}", merged.shard_id.to_hex());
    assert_eq!(call(&router, Method::HEAD, &uri, Bytes::new()).await.status, StatusCode::OK);
}

// ============================================================================
// Reconstruction
// ============================================================================

#[tokio::test]
async fn test_chunk_compact_reconstruct_roundtrip() {
    let state = state_with(small_block_config(), memory_cache());
    let router = app(state.clone());
    let data = patterned(10_000);
    let file_id = add_raw_file(&state, "model.safetensors", &data).await;

    let report = state.chunking.run_sweep(10).await.unwrap();
    assert_eq!(report.files_chunked, 1);
    assert_eq!(report.blocks_uploaded, 10);

    // two full xorbs; the 1808-byte remainder waits for the next sweep
    let report = state.compactor.run_sweep().await.unwrap();
    assert_eq!(report.xorbs_sealed, 2);
    assert_eq!(report.blocks_deferred, 2);

    let reply = call(&router, Method::GET, &format!("/reconstructions/{}", file_id), Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let plan: QueryReconstructionResponse = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(plan.offset_into_first_range, 0);
    assert_eq!(plan.terms.len(), 10);
    let ranged = plan
        .fetch_info
        .values()
        .flatten()
        .filter(|f| f.url_range.is_some())
        .count();
    assert_eq!(ranged, 8);
    assert_eq!(reassemble(&router, &plan).await, data.to_vec());

    // the next sweep packs the remainder and every term becomes ranged
    let report = state.compactor.run_sweep().await.unwrap();
    assert_eq!(report.xorbs_sealed, 1);
    let plan = state.reconstruction.reconstruct(&file_id).await.unwrap();
    assert!(plan.fetch_info.values().flatten().all(|f| f.url_range.is_some()));
    assert_eq!(reassemble(&router, &plan).await, data.to_vec());

    let reply = call(&router, Method::GET, "/admin/stats", Bytes::new()).await;
    let stats = reply.json();
    assert_eq!(stats["blocks"]["count"], 10);
    assert_eq!(stats["blocks"]["logical_size_bytes"], 10_000);
    assert_eq!(stats["xorbs"]["count"], 3);
    assert_eq!(stats["xorbs"]["physical_size_bytes"], 10_000);
    assert_eq!(stats["metrics"]["deduplication_ratio"], 1.0);

    let reply = call(&router, Method::GET, "/admin/distribution", Bytes::new()).await;
    assert_eq!(reply.json()["under_1mb"], 10);
}

#[tokio::test]
async fn test_synthetic_windows_for_unchunked_file() {
    let mut config = GatewayConfig::default();
    config.reconstruction.window_size = 1024;
    let state = state_with(config, None);
    let router = app(state.clone());
    let data = patterned(2500);
    let file_id = add_raw_file(&state, "raw.bin", &data).await;

    let reply = call(&router, Method::GET, &format!("/reconstructions/{}", file_id), Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let plan: QueryReconstructionResponse = serde_json::from_slice(&reply.body).unwrap();

    let lengths: Vec<u64> = plan.terms.iter().map(|t| t.unpacked_length).collect();
    assert_eq!(lengths, vec![1024, 1024, 452]);
    assert!(plan.terms.iter().all(|t| t.hash != file_id));
    assert_eq!(reassemble(&router, &plan).await, data.to_vec());
}

#[tokio::test]
async fn test_reconstruction_of_unknown_file_is_404() {
    let router = app(state_with(GatewayConfig::default(), None));
    let reply = call(&router, Method::GET, "/reconstructions/deadbeef", Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Signed Objects
// ============================================================================

#[tokio::test]
async fn test_signed_object_access_rules() {
    let state = state_with(GatewayConfig::default(), None);
    let router = app(state.clone());
    let key = "cas/xorbs/ab/cd/abcdef";
    state
        .store
        .put(key, Bytes::from_static(b"0123456789abcdef"))
        .await
        .unwrap();

    let url = state
        .store
        .presign_get(key, Duration::from_secs(60), Some(HttpRange { start: 4, end: 9 }))
        .await
        .unwrap();

    // the signed range is served by default
    let reply = download(&router, &url, None).await;
    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&reply.body[..], b"456789");
    assert_eq!(reply.headers[header::CONTENT_RANGE], "bytes 4-9/16");

    // a narrower Range header is honored
    let reply = download(&router, &url, Some(HttpRange { start: 5, end: 6 })).await;
    assert_eq!(reply.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&reply.body[..], b"56");

    // widening past the signed range is refused
    let reply = download(&router, &url, Some(HttpRange { start: 0, end: 15 })).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    // tampered signature
    let tampered = format!("{}0", url);
    assert_eq!(download(&router, &tampered, None).await.status, StatusCode::FORBIDDEN);

    // signature for another key
    let retargeted = url.replace("abcdef?", "abcdee?");
    assert_eq!(download(&router, &retargeted, None).await.status, StatusCode::FORBIDDEN);

    // no signature at all
    let reply = call(&router, Method::GET, &format!("/objects/{}", key), Bytes::new()).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test(start_paused = true)]
async fn test_background_worker_drives_pipeline() {
    let mut config = small_block_config();
    config.compaction.interval_secs = 1;
    config.shards.generate_interval_secs = 1;
    config.shards.compact_interval_secs = 1;
    let state = state_with(config, memory_cache());
    let data = patterned(5000);
    add_raw_file(&state, "weights.bin", &data).await;

    let handle = state.spawn_background();
    let mut stats = state.registry.stats().await.unwrap();
    for _ in 0..100 {
        if stats.shard_count > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        stats = state.registry.stats().await.unwrap();
    }
    state.shutdown();
    handle.await.unwrap();

    assert_eq!(stats.chunked_files, 1);
    assert!(stats.xorb_count >= 1);
    assert!(stats.shard_count >= 1);
}
