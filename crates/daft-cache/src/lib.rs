//! Byte-budgeted block cache for intermediate transform results.
//!
//! Blocks are immutable `Arc<[Complex64]>` slices identified by a
//! [`BlockKey`]. The cache keeps at most [`CacheConfig::budget_bytes`] of
//! block data resident and evicts the least recently used blocks first.
//!
//! # Get-or-compute
//!
//! [`BlockCache::get_or_compute`] is single-flight per key: the first caller
//! runs the compute closure while later callers for the same key wait for its
//! result instead of duplicating the work. A failed computation caches
//! nothing, and one of the waiters takes over.
//!
//! # Spill tier
//!
//! With a spill store attached ([`BlockCache::with_spill`]), evicted blocks
//! are written to that [`ArrayStore`](daft_store::ArrayStore) and read back on
//! the next request instead of being recomputed.
//!
//! # Example
//!
//! ```
//! use daft_cache::{BlockCache, BlockKey, CacheConfig, CacheError};
//! use daft_store::Complex64;
//! use std::sync::Arc;
//!
//! let cache = BlockCache::new(CacheConfig::with_budget(1 << 20));
//! let key = BlockKey::new(0, 1, 4, 0);
//! let block = cache
//!     .get_or_compute(key, || {
//!         Ok::<_, CacheError>(Arc::from(vec![Complex64::new(1.0, 0.0); 4]))
//!     })
//!     .unwrap();
//! assert_eq!(block.len(), 4);
//! assert_eq!(cache.stats().misses, 1);
//! ```

pub mod block_cache;

pub use block_cache::{BlockCache, CacheStats};

use daft_store::{Complex64, StoreError, COMPLEX128_BYTES};
use std::sync::Arc;
use thiserror::Error;

/// Immutable block of transform output.
pub type Block = Arc<[Complex64]>;

/// Resident size of a block in bytes.
#[must_use]
pub fn block_bytes(block: &[Complex64]) -> usize {
    block.len() * COMPLEX128_BYTES
}

/// Identity of one chunk of one decomposition node.
///
/// `start`, `stride` and `len` identify the node's elements in the original
/// signal; `chunk` is the index of the block within the node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub start: u64,
    pub stride: u64,
    pub len: u64,
    pub chunk: u64,
}

impl BlockKey {
    #[must_use]
    pub fn new(start: u64, stride: u64, len: u64, chunk: u64) -> Self {
        Self {
            start,
            stride,
            len,
            chunk,
        }
    }

    /// Dataset name used when this block is spilled.
    #[must_use]
    pub fn spill_name(&self) -> String {
        format!(
            "spill-{}-{}-{}-{}",
            self.len, self.stride, self.start, self.chunk
        )
    }
}

/// Cache sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum bytes of resident block data.
    pub budget_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn with_budget(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }
}

/// Cache failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A single block is larger than the whole budget.
    ///
    /// Evicting everything else would still not make room, so this is a
    /// configuration problem (chunk size too large for the budget).
    #[error("block of {needed} bytes exceeds cache budget of {budget} bytes")]
    Exhausted { needed: usize, budget: usize },

    /// Reading or writing the spill tier failed.
    #[error("spill store error: {0}")]
    Spill(#[from] StoreError),
}
