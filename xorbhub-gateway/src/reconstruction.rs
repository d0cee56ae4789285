//! Reconstruction service
//!
//! Answers "how do I rebuild file X" with the wire document from
//! [`xorbhub_core::reconstruction`]. A chunked file is described block by
//! block: xorb-placed blocks as range-bound fetches into their container,
//! standalone blocks as whole-object fetches. A file that has not been
//! chunked yet is described as fixed windows over its raw object, so every
//! file is served through the same protocol.
//!
//! Placement state is re-read on every request.

use crate::access::ReadAccess;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use xorbhub_core::{
    plan_windows, window_key, HttpRange, QueryReconstructionResponse, Result, XorbError,
    RECONSTRUCTION_WINDOW_SIZE,
};
use xorbhub_metadata::{FileRecord, LayoutEntry, Registry};
use xorbhub_storage::{keys, ObjectStore};

/// Default expiry of reconstruction URLs
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

struct Fetch {
    hash: String,
    length: u64,
    url: String,
    url_range: Option<HttpRange>,
}

pub struct ReconstructionService {
    registry: Arc<dyn Registry>,
    store: Arc<dyn ObjectStore>,
    access: Arc<dyn ReadAccess>,
    window_size: u64,
    url_ttl: Duration,
}

impl ReconstructionService {
    pub fn new(registry: Arc<dyn Registry>, store: Arc<dyn ObjectStore>, access: Arc<dyn ReadAccess>) -> Self {
        Self {
            registry,
            store,
            access,
            window_size: RECONSTRUCTION_WINDOW_SIZE,
            url_ttl: DEFAULT_URL_TTL,
        }
    }

    pub fn with_window_size(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_url_ttl(mut self, ttl: Duration) -> Self {
        self.url_ttl = ttl;
        self
    }

    /// Build the reconstruction for the file whose content identifier is `file_id`
    #[instrument(skip(self))]
    pub async fn reconstruct(&self, file_id: &str) -> Result<QueryReconstructionResponse> {
        let file = self
            .registry
            .get_file_by_hash(file_id)
            .await?
            .filter(|f| self.access.can_read(f))
            .ok_or_else(|| XorbError::NotFound(format!("file {}", file_id)))?;

        let layout = self.registry.file_layout(file.id).await?;
        let response = if layout.is_empty() {
            debug!(size = file.size, "No layout, using synthetic windows");
            self.synthetic(file_id, &file).await?
        } else {
            debug!(blocks = layout.len(), "Using block layout");
            self.from_layout(&layout).await?
        };

        let total = response.total_length();
        if total != file.size {
            return Err(XorbError::SerializationInvariant(format!(
                "reconstruction of {} covers {} bytes, file is {}",
                file_id, total, file.size
            )));
        }

        info!(terms = response.terms.len(), size = file.size, "Generated reconstruction");
        Ok(response)
    }

    async fn from_layout(&self, layout: &[LayoutEntry]) -> Result<QueryReconstructionResponse> {
        let fetches = try_join_all(layout.iter().map(|entry| self.resolve(entry))).await?;

        let mut response = QueryReconstructionResponse::default();
        for f in fetches {
            response.push(f.hash, f.length, f.url, f.url_range);
        }
        Ok(response)
    }

    /// Where the bytes of one layout entry live right now
    async fn resolve(&self, entry: &LayoutEntry) -> Result<Fetch> {
        let block = &entry.block;
        let fetch = match self.registry.placement_for_block(&block.hash).await? {
            Some(placement) => {
                let range = HttpRange::from_offset_len(placement.offset, placement.length);
                let url = self
                    .store
                    .presign_get(&placement.storage_key, self.url_ttl, Some(range))
                    .await?;
                Fetch {
                    hash: block.hash.to_hex(),
                    length: placement.length,
                    url,
                    url_range: Some(range),
                }
            }
            None => {
                let key = keys::block_key(&block.hash.to_hex());
                let url = self.store.presign_get(&key, self.url_ttl, None).await?;
                Fetch {
                    hash: block.hash.to_hex(),
                    length: block.size,
                    url,
                    url_range: None,
                }
            }
        };
        Ok(fetch)
    }

    /// Fixed windows over the raw object behind `file`
    async fn synthetic(&self, file_id: &str, file: &FileRecord) -> Result<QueryReconstructionResponse> {
        let key = keys::raw_object_key(&file.content_hash);
        let meta = self
            .store
            .head(&key)
            .await?
            .ok_or_else(|| XorbError::NotFound(format!("raw object for {}", file_id)))?;
        if meta.size != file.size {
            return Err(XorbError::SerializationInvariant(format!(
                "raw object {} is {} bytes, file is {}",
                key, meta.size, file.size
            )));
        }

        let url = self.store.presign_get(&key, self.url_ttl, None).await?;
        let windows = plan_windows(file.size, self.window_size);
        let total = windows.len();

        let mut response = QueryReconstructionResponse::default();
        for w in &windows {
            response.push(
                window_key(file_id, w.index, total),
                w.len(),
                url.clone(),
                Some(w.http_range()),
            );
        }
        Ok(response)
    }
}
