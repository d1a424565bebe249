//! # DAFT: Disk-Array Fourier Transform
//!
//! Forward discrete Fourier transform of complex signals too large for main
//! memory. The signal is split by radix-2 decimation in time until every piece
//! fits in core, the pieces are transformed with an in-memory FFT, and the
//! partial results are merged chunk by chunk with butterfly passes. At no point
//! does any step need more than one leaf's worth of values per operand.
//!
//! ## Crate Structure
//!
//! - **`plan`**: recursive even/odd split of a length-`N` signal into leaves no
//!   longer than the chunk size, with explicit index maps.
//! - **`leaf`**: strided gather plus in-core FFT of one leaf.
//! - **`butterfly`**: twiddle factors and chunked radix-2 combine.
//! - **`graph`**: the task DAG of one transform and its evaluation into memory
//!   or into a dataset store.
//! - **`scheduler`**: level-by-level parallel executor, cancellation, and the
//!   [`Daft`] engine handle.
//! - **`kernel`**: the [`FftKernel`] seam (`rustfft` by default).
//! - **`signal`**: input sources, in memory or from a store.
//! - **`config`** / **`logging`**: layered Figment configuration and tracing
//!   subscriber setup.
//!
//! Dataset storage lives in the `daft-store` crate and the bounded block cache
//! in `daft-cache`; their main types are re-exported here.
//!
//! ## Example
//!
//! ```
//! use daft::{compute, naive_dft, BlockCache, CacheConfig, Complex64};
//!
//! let signal: Vec<Complex64> = (0..16).map(|i| Complex64::new(i as f64, 0.0)).collect();
//! let cache = BlockCache::new(CacheConfig::default());
//! let spectrum = compute(&signal, 4, &cache).unwrap();
//!
//! let reference = naive_dft(&signal);
//! assert!(spectrum.iter().zip(&reference).all(|(a, b)| (a - b).norm() < 1e-9));
//! ```

pub mod butterfly;
pub mod config;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod leaf;
pub mod logging;
pub mod plan;
pub mod scheduler;
pub mod signal;

pub use daft_cache::{Block, BlockCache, BlockKey, CacheConfig, CacheError, CacheStats};
#[cfg(feature = "storage_hdf5")]
pub use daft_store::Hdf5Store;
pub use daft_store::{ArrayStore, MemoryStore, MmapStore, StoreError};

pub use error::{DaftError, DaftResult};
pub use graph::ComputationGraph;
pub use kernel::{naive_dft, Complex64, FftKernel, NaiveDft, RustFftKernel};
pub use plan::{plan, NodeSpan, Plan};
pub use scheduler::{CancelToken, Daft, Executor, DEFAULT_CHUNKSIZE};
pub use signal::{DatasetSource, SignalSource};

/// Transform an in-memory signal, returning the full spectrum.
///
/// # Errors
///
/// Planning errors for unsupported lengths, kernel errors for non-finite
/// input, and cache errors when a single block exceeds the cache budget.
pub fn compute(
    signal: &[Complex64],
    chunksize: usize,
    cache: &BlockCache,
) -> DaftResult<Vec<Complex64>> {
    Daft::new().with_chunksize(chunksize).compute(signal, cache)
}

/// Transform an in-memory signal into dataset `name` of `store`.
///
/// The dataset only appears under `name` once fully written. Returns the
/// number of elements written.
pub fn write_to_store(
    signal: &[Complex64],
    store: &dyn ArrayStore,
    name: &str,
    chunksize: usize,
    cache: &BlockCache,
) -> DaftResult<u64> {
    Daft::new()
        .with_chunksize(chunksize)
        .write_to_store(signal, store, name, cache)
}

/// Transform a signal held entirely in memory with default settings.
pub fn fft_in_memory(signal: &[Complex64]) -> DaftResult<Vec<Complex64>> {
    compute(signal, DEFAULT_CHUNKSIZE, &BlockCache::new(CacheConfig::default()))
}
