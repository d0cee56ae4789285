//! XorbHub Core Library
//!
//! Core abstractions for the XorbHub content-addressed storage engine.
//! This crate provides:
//! - Content hashing (Blake3, 32-byte digests rendered as lowercase hex)
//! - Fixed-window block chunking behind a pluggable [`Chunker`] strategy
//! - The binary shard format for block→xorb placement snapshots
//! - Reconstruction wire types and the synthetic window planner
//! - An in-process bloom filter and a circuit breaker for remote calls
//! - Common error handling

pub mod bloom;
pub mod chunk;
pub mod circuit_breaker;
pub mod error;
pub mod hash;
pub mod reconstruction;
pub mod shard;

pub use bloom::BloomFilter;
pub use chunk::{reassemble_blocks, split_into_blocks, Block, Chunker, FixedSizeChunker};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use error::{Result, XorbError};
pub use hash::ContentHash;
pub use reconstruction::{
    plan_windows, window_key, ChunkRange, FetchInfo, HttpRange, QueryReconstructionResponse,
    ReconstructionTerm, Window,
};
pub use shard::{ShardEntry, SHARD_ENTRY_SIZE, SHARD_HEADER_SIZE, SHARD_MAGIC, SHARD_VERSION};

/// Block size constants
pub const MIN_BLOCK_SIZE: usize = 1024; // 1 KB
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024; // 4 MB
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// Accumulated unplaced bytes that trigger sealing a xorb
pub const DEFAULT_XORB_TARGET_SIZE: u64 = 100 * 1024 * 1024; // 100 MB

/// Largest window handed to a client in a synthetic reconstruction.
/// Clients address ranges with 32-bit offsets, so this must stay well below 4 GB.
pub const RECONSTRUCTION_WINDOW_SIZE: u64 = 64 * 1024 * 1024; // 64 MB

/// Shards smaller than this are merged by shard compaction
pub const SHARD_COMPACTION_THRESHOLD: u64 = 1024 * 1024; // 1 MB
