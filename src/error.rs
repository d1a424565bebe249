//! Error types for the transform engine.
//!
//! `DaftError` is the single error type returned by planning, computation and
//! store write-out. Errors from the collaborator crates convert into it with
//! `?`:
//!
//! - **`Store`**: wraps [`daft_store::StoreError`] (dataset create/read/write/rename).
//! - **`CacheExhausted`** / **`Store`**: produced from [`daft_cache::CacheError`].
//!
//! No error is retried anywhere in the engine. Every failure aborts the whole
//! computation and propagates synchronously to the caller of `compute` or
//! `write_to_store`.

use daft_cache::CacheError;
use daft_store::StoreError;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type DaftResult<T> = std::result::Result<T, DaftError>;

/// Primary error type for planning and executing out-of-core transforms.
#[derive(Error, Debug)]
pub enum DaftError {
    /// The signal length cannot be halved down to the chunk size.
    ///
    /// Raised at planning time, before any transform work starts. `at` is the
    /// odd sub-problem length that could not be split further.
    ///
    /// # Example
    ///
    /// ```
    /// use daft::{plan, DaftError};
    ///
    /// let err = plan(100, 7).unwrap_err();
    /// assert!(matches!(err, DaftError::UnsupportedLength { len: 100, at: 25, .. }));
    /// ```
    #[error("unsupported length {len}: sub-problem of length {at} is odd and exceeds chunksize {chunksize}")]
    UnsupportedLength {
        len: u64,
        chunksize: usize,
        at: u64,
    },

    /// A chunk size of zero was requested.
    #[error("chunksize must be at least 1")]
    InvalidChunkSize,

    /// The in-core FFT kernel rejected its input or misbehaved.
    ///
    /// Typical cause: non-finite samples with finiteness checking enabled.
    #[error("compute error: {0}")]
    Compute(String),

    /// Creating, reading, writing or renaming a dataset failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A single block does not fit the cache budget even when it is empty.
    ///
    /// **Recovery Strategy**: lower the chunk size or raise `cache.budget_bytes`.
    #[error("cache exhausted: block of {needed} bytes exceeds budget of {budget} bytes")]
    CacheExhausted { needed: usize, budget: usize },

    /// Butterfly inputs of different lengths.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Reading the input signal failed.
    #[error("signal source error: {0}")]
    Source(String),

    /// The computation was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("computation cancelled")]
    Cancelled,

    /// Configuration values parsed but are not usable.
    #[error("configuration validation error: {0}")]
    Config(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<CacheError> for DaftError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Exhausted { needed, budget } => Self::CacheExhausted { needed, budget },
            CacheError::Spill(store) => Self::Store(store),
        }
    }
}

impl From<figment::Error> for DaftError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_errors_map_onto_engine_errors() {
        let err: DaftError = CacheError::Exhausted {
            needed: 32,
            budget: 16,
        }
        .into();
        assert!(matches!(
            err,
            DaftError::CacheExhausted {
                needed: 32,
                budget: 16
            }
        ));

        let err: DaftError = CacheError::Spill(StoreError::NotFound("x".into())).into();
        assert!(matches!(err, DaftError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn unsupported_length_message_names_the_odd_split() {
        let err = DaftError::UnsupportedLength {
            len: 100,
            chunksize: 7,
            at: 25,
        };
        assert_eq!(
            err.to_string(),
            "unsupported length 100: sub-problem of length 25 is odd and exceeds chunksize 7"
        );
    }
}
