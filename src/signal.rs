//! Read-only input signals.

use daft_store::ArrayStore;

use crate::error::{DaftError, DaftResult};
use crate::kernel::Complex64;

/// A read-only complex signal that supports strided gathers.
///
/// Leaves of the decomposition read every `2^depth`-th sample, so sources are
/// asked for `count` elements at `start, start + stride, ...` rather than for
/// contiguous ranges.
pub trait SignalSource: Send + Sync {
    /// Number of samples.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gather `count` samples at `start + i * stride`.
    fn gather(&self, start: u64, stride: u64, count: usize) -> DaftResult<Vec<Complex64>>;
}

fn check_gather(len: u64, start: u64, stride: u64, count: usize) -> DaftResult<()> {
    if count == 0 {
        return Ok(());
    }
    let last = (count as u64 - 1)
        .checked_mul(stride)
        .and_then(|span| span.checked_add(start));
    match last {
        Some(last) if last < len => Ok(()),
        _ => Err(DaftError::Source(format!(
            "gather of {count} samples from {start} with stride {stride} exceeds signal length {len}"
        ))),
    }
}

impl SignalSource for [Complex64] {
    fn len(&self) -> u64 {
        <[Complex64]>::len(self) as u64
    }

    fn gather(&self, start: u64, stride: u64, count: usize) -> DaftResult<Vec<Complex64>> {
        check_gather(SignalSource::len(self), start, stride, count)?;
        Ok(self
            .iter()
            .skip(start as usize)
            .step_by(stride.max(1) as usize)
            .take(count)
            .copied()
            .collect())
    }
}

impl SignalSource for Vec<Complex64> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn gather(&self, start: u64, stride: u64, count: usize) -> DaftResult<Vec<Complex64>> {
        self.as_slice().gather(start, stride, count)
    }
}

/// Signal stored as a dataset of an [`ArrayStore`].
pub struct DatasetSource<'a> {
    store: &'a dyn ArrayStore,
    name: String,
    len: u64,
}

impl std::fmt::Debug for DatasetSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetSource")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

impl<'a> DatasetSource<'a> {
    /// Attach to an existing dataset.
    pub fn open(store: &'a dyn ArrayStore, name: &str) -> DaftResult<Self> {
        let len = store.dataset_len(name)?;
        Ok(Self {
            store,
            name: name.to_string(),
            len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SignalSource for DatasetSource<'_> {
    fn len(&self) -> u64 {
        self.len
    }

    fn gather(&self, start: u64, stride: u64, count: usize) -> DaftResult<Vec<Complex64>> {
        check_gather(self.len, start, stride, count)?;
        Ok(self.store.read_strided(&self.name, start, stride, count)?)
    }
}
