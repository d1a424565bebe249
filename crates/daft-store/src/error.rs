//! Error type shared by all store backends.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for store results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures creating, reading, writing or renaming datasets.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The named dataset does not exist.
    #[error("dataset '{0}' not found")]
    NotFound(String),

    /// The name cannot be used as a dataset name.
    ///
    /// Names are restricted to ASCII alphanumerics, `-`, `_` and `.` so they
    /// map onto file names and HDF5 link names without escaping.
    #[error("invalid dataset name '{0}'")]
    InvalidName(String),

    /// A read or write touched elements past the end of the dataset.
    #[error("range {offset}+{count} out of bounds for dataset '{name}' of length {len}")]
    OutOfBounds {
        name: String,
        offset: u64,
        count: u64,
        len: u64,
    },

    /// A strided gather was requested with a stride of zero.
    #[error("stride must be greater than zero")]
    InvalidStride,

    /// A dataset file exists but its header or size is inconsistent.
    #[error("corrupt dataset file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Underlying file system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the HDF5 library.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
