//! Persistent array storage for out-of-core transforms.
//!
//! Every backend stores named, pre-sized, one-dimensional arrays of complex128
//! values and exposes range-indexed reads and writes through [`ArrayStore`].
//!
//! - [`MemoryStore`]: process-local store, used by tests and as a scratch tier
//! - [`MmapStore`]: one memory-mapped `.c128` file per dataset in a directory
//! - `Hdf5Store`: one HDF5 file, datasets readable from h5py/MATLAB
//!   (feature `storage_hdf5`)
//!
//! Datasets that are still being produced live under a temporary name (see
//! [`partial_name`]) and are renamed into place once complete, so a reader
//! never observes a half-written dataset under its final name.

pub mod error;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5_store;
pub mod memory;
pub mod mmap;

pub use error::{StoreError, StoreResult};
#[cfg(feature = "storage_hdf5")]
pub use hdf5_store::Hdf5Store;
pub use memory::MemoryStore;
pub use mmap::MmapStore;

use std::io::Read;

/// Complex double-precision sample, the only element type a store holds.
pub type Complex64 = num_complex::Complex<f64>;

/// Size of one stored element in bytes (two little-endian `f64`).
pub const COMPLEX128_BYTES: usize = 16;

/// Largest physical span read in one request when gathering strided data.
const STRIDED_WINDOW: u64 = 1 << 16;

/// Suffix of datasets that have not been finalized yet.
const PARTIAL_SUFFIX: &str = ".partial";

/// Name under which a dataset is staged before it is renamed to `name`.
#[must_use]
pub fn partial_name(name: &str) -> String {
    format!("{name}{PARTIAL_SUFFIX}")
}

/// Range-indexed storage of named complex128 datasets.
///
/// Implementations must be safe to share between worker threads. Writes to
/// disjoint ranges of the same dataset may happen concurrently.
pub trait ArrayStore: Send + Sync {
    /// Create (or truncate and recreate) a zero-filled dataset of `len` elements.
    fn create_dataset(&self, name: &str, len: u64) -> StoreResult<()>;

    /// Write `values` starting at element `offset`.
    fn write_slice(&self, name: &str, offset: u64, values: &[Complex64]) -> StoreResult<()>;

    /// Read `len` elements starting at element `offset`.
    fn read_slice(&self, name: &str, offset: u64, len: usize) -> StoreResult<Vec<Complex64>>;

    /// Number of elements in the dataset.
    fn dataset_len(&self, name: &str) -> StoreResult<u64>;

    /// Whether a dataset with this name exists.
    fn contains(&self, name: &str) -> bool;

    /// Delete a dataset.
    fn remove_dataset(&self, name: &str) -> StoreResult<()>;

    /// Rename a dataset, replacing any dataset already called `to`.
    fn rename_dataset(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Gather `count` elements at `start, start + stride, start + 2*stride, ...`.
    ///
    /// The default implementation issues contiguous reads of at most
    /// `STRIDED_WINDOW` physical elements and keeps every `stride`-th value.
    fn read_strided(
        &self,
        name: &str,
        start: u64,
        stride: u64,
        count: usize,
    ) -> StoreResult<Vec<Complex64>> {
        if stride == 0 {
            return Err(StoreError::InvalidStride);
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        if stride == 1 {
            return self.read_slice(name, start, count);
        }

        let len = self.dataset_len(name)?;
        let last = start + stride * (count as u64 - 1);
        check_range(name, last, 1, len)?;

        let per_window = (STRIDED_WINDOW / stride).max(1) as usize;
        let mut out = Vec::with_capacity(count);
        let mut gathered = 0usize;
        while gathered < count {
            let take = per_window.min(count - gathered);
            let first = start + stride * gathered as u64;
            let span = (take as u64 - 1) * stride + 1;
            let window = self.read_slice(name, first, span as usize)?;
            out.extend(window.iter().step_by(stride as usize).take(take));
            gathered += take;
        }
        Ok(out)
    }
}

/// Validate that `offset..offset + count` lies within a dataset of `len` elements.
pub(crate) fn check_range(name: &str, offset: u64, count: u64, len: u64) -> StoreResult<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(StoreError::OutOfBounds {
            name: name.to_string(),
            offset,
            count,
            len,
        }),
    }
}

/// Reject names that cannot be used as a file or link name.
pub(crate) fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Encode values as interleaved little-endian `f64` pairs into `dst`.
pub(crate) fn encode_le(dst: &mut [u8], values: &[Complex64]) {
    for (bytes, value) in dst.chunks_exact_mut(COMPLEX128_BYTES).zip(values) {
        bytes[..8].copy_from_slice(&value.re.to_le_bytes());
        bytes[8..].copy_from_slice(&value.im.to_le_bytes());
    }
}

/// Decode interleaved little-endian `f64` pairs.
pub(crate) fn decode_le(src: &[u8]) -> Vec<Complex64> {
    src.chunks_exact(COMPLEX128_BYTES)
        .map(|bytes| Complex64::new(read_f64(&bytes[..8]), read_f64(&bytes[8..])))
        .collect()
}

fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    f64::from_le_bytes(buf)
}

/// Load a raw file of interleaved little-endian `(re, im)` `f64` pairs into a
/// new dataset. Returns the number of elements imported.
pub fn import_interleaved<R: Read>(
    store: &dyn ArrayStore,
    name: &str,
    mut reader: R,
    len: u64,
) -> StoreResult<u64> {
    const BLOCK: usize = 1 << 16;

    store.create_dataset(name, len)?;
    let mut buf = vec![0u8; BLOCK * COMPLEX128_BYTES];
    let mut offset = 0u64;
    while offset < len {
        let take = BLOCK.min((len - offset) as usize);
        let bytes = &mut buf[..take * COMPLEX128_BYTES];
        reader.read_exact(bytes)?;
        store.write_slice(name, offset, &decode_le(bytes))?;
        offset += take as u64;
    }
    tracing::debug!(dataset = name, elements = len, "Imported interleaved samples");
    Ok(len)
}
