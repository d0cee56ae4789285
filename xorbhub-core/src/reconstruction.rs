//! Reconstruction wire types
//!
//! The reconstruction document tells a remote client how to rebuild a file
//! from byte-range fetches. Field names and nesting are consumed verbatim by
//! an external client library and must not change.
//!
//! ```json
//! {
//!   "offset_into_first_range": 0,
//!   "terms": [{"hash": "..", "unpacked_length": 4194304, "range": {"start": 0, "end": 1}}],
//!   "fetch_info": {"..": [{"range": {"start": 0, "end": 1}, "url": "..", "url_range": {"start": 0, "end": 4194303}}]}
//! }
//! ```

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Half-open index range over terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: u32,
    pub end: u32,
}

impl ChunkRange {
    /// The range covering only term `index`
    pub fn single(index: u32) -> Self {
        Self {
            start: index,
            end: index + 1,
        }
    }
}

/// Inclusive byte range for an HTTP `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRange {
    pub start: u64,
    pub end: u64,
}

impl HttpRange {
    /// Inclusive range for `length` bytes at `offset`. A zero length yields `{offset, offset}`.
    pub fn from_offset_len(offset: u64, length: u64) -> Self {
        Self {
            start: offset,
            end: offset + length.saturating_sub(1),
        }
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One logical piece of the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionTerm {
    pub hash: String,
    pub unpacked_length: u64,
    pub range: ChunkRange,
}

/// Where to fetch the bytes of a term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInfo {
    pub range: ChunkRange,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_range: Option<HttpRange>,
}

/// Reconstruction response document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReconstructionResponse {
    pub offset_into_first_range: u64,
    pub terms: Vec<ReconstructionTerm>,
    pub fetch_info: BTreeMap<String, Vec<FetchInfo>>,
}

impl QueryReconstructionResponse {
    /// Append a term and its fetch descriptor, keeping index ranges aligned
    pub fn push(&mut self, hash: String, unpacked_length: u64, url: String, url_range: Option<HttpRange>) {
        let range = ChunkRange::single(self.terms.len() as u32);
        self.terms.push(ReconstructionTerm {
            hash: hash.clone(),
            unpacked_length,
            range,
        });
        self.fetch_info.entry(hash).or_default().push(FetchInfo {
            range,
            url,
            url_range,
        });
    }

    /// Total bytes the client will reassemble
    pub fn total_length(&self) -> u64 {
        self.terms.iter().map(|t| t.unpacked_length).sum()
    }
}

/// A window of an un-chunked object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: u32,
    pub start: u64,
    /// Exclusive end
    pub end: u64,
}

impl Window {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Inclusive byte range; an empty window maps to `{0, 0}`
    pub fn http_range(&self) -> HttpRange {
        if self.is_empty() {
            HttpRange { start: 0, end: 0 }
        } else {
            HttpRange {
                start: self.start,
                end: self.end - 1,
            }
        }
    }
}

/// Split `size` bytes into windows of at most `window_size` bytes.
///
/// An empty object still yields one zero-length window so every file has at
/// least one term.
pub fn plan_windows(size: u64, window_size: u64) -> Vec<Window> {
    let window_size = window_size.max(1);
    if size == 0 {
        return vec![Window {
            index: 0,
            start: 0,
            end: 0,
        }];
    }
    (0..size.div_ceil(window_size))
        .map(|i| {
            let start = i * window_size;
            Window {
                index: i as u32,
                start,
                end: (start + window_size).min(size),
            }
        })
        .collect()
}

/// Correlation key for window `index` of `file_id`.
///
/// With a single window the file's own identifier is used; otherwise a digest
/// of `"{file_id}-chunk{index}"`. Only links terms to fetch entries.
pub fn window_key(file_id: &str, index: u32, total: usize) -> String {
    if total == 1 {
        file_id.to_string()
    } else {
        ContentHash::compute(format!("{}-chunk{}", file_id, index).as_bytes()).to_hex()
    }
}
