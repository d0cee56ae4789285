//! Block chunking
//!
//! Blocks are the fundamental unit of deduplication in XorbHub.
//! A [`Chunker`] turns a raw object into an ordered list of content-addressed
//! blocks. The only contract is determinism: identical bytes always produce
//! identical block boundaries.

use crate::hash::ContentHash;
use crate::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// A content-addressed window of a raw object
#[derive(Clone)]
pub struct Block {
    /// Digest of `data`
    pub hash: ContentHash,

    /// Block bytes (a zero-copy slice of the source object)
    pub data: Bytes,
}

impl Block {
    /// Create a block, computing its digest
    pub fn new(data: Bytes) -> Self {
        let hash = ContentHash::compute(&data);
        Self { hash, data }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Verify the block's integrity by recomputing its hash
    pub fn verify(&self) -> bool {
        self.hash.verify(&self.data)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Strategy that decides block boundaries
pub trait Chunker: Send + Sync {
    /// Split `data` into ordered blocks whose concatenation is `data`
    fn split(&self, data: &Bytes) -> Vec<Block>;

    /// Human-readable strategy name for logs
    fn name(&self) -> &'static str;
}

/// Fixed-size windows; the last block carries the remainder
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeChunker {
    window: usize,
}

impl FixedSizeChunker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl Chunker for FixedSizeChunker {
    fn split(&self, data: &Bytes) -> Vec<Block> {
        split_into_blocks(data, self.window)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Split an object into fixed windows of `block_size` bytes.
///
/// The input is sliced, not copied. An empty object yields no blocks.
pub fn split_into_blocks(data: &Bytes, block_size: usize) -> Vec<Block> {
    let block_size = block_size.max(1);
    let mut blocks = Vec::with_capacity(data.len().div_ceil(block_size));
    let mut start = 0;
    while start < data.len() {
        let end = (start + block_size).min(data.len());
        blocks.push(Block::new(data.slice(start..end)));
        start = end;
    }
    blocks
}

/// Concatenate blocks back into the original object
pub fn reassemble_blocks(blocks: &[Block]) -> Bytes {
    let total: usize = blocks.iter().map(|b| b.data.len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for block in blocks {
        out.extend_from_slice(&block.data);
    }
    out.freeze()
}
