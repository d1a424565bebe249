//! Radix-2 decimation-in-time butterflies.
//!
//! With `E` and `O` the length-`L` transforms of the even and odd samples,
//! the length-`2L` transform is
//!
//! ```text
//! X[k]     = E[k] + w(k, 2L)·O[k]
//! X[k + L] = E[k] - w(k, 2L)·O[k]      for 0 <= k < L
//! w(j, M)  = exp(-2πi·j/M)
//! ```
//!
//! [`combine_chunk`] evaluates this for one aligned window `k in offset..offset+n`
//! of both halves, producing the matching windows of the low (`k`) and high
//! (`k + L`) output halves. Windows are independent, so a combine never needs
//! more than one window of each half in memory.

use std::f64::consts::PI;

use crate::error::{DaftError, DaftResult};
use crate::kernel::Complex64;

/// Twiddle factor `exp(-2πi·j/m)`.
#[must_use]
pub fn twiddle(j: u64, m: u64) -> Complex64 {
    // Reduce to [0, m) before converting so large indices keep precision.
    let phase = (j % m) as f64 / m as f64;
    Complex64::from_polar(1.0, -2.0 * PI * phase)
}

/// Twiddles `w(offset + i, out_len)` for `i in 0..count`.
#[must_use]
pub fn twiddles(offset: u64, count: usize, out_len: u64) -> Vec<Complex64> {
    (0..count as u64)
        .map(|i| twiddle(offset + i, out_len))
        .collect()
}

/// Butterfly over one aligned window of the even and odd halves.
///
/// `offset` is the index of the window's first element within a half and
/// `out_len` is the combined output length `2L`. Returns `(low, high)`: the
/// output windows starting at `offset` and `offset + L`.
pub fn combine_chunk(
    even: &[Complex64],
    odd: &[Complex64],
    offset: u64,
    out_len: u64,
) -> DaftResult<(Vec<Complex64>, Vec<Complex64>)> {
    if even.len() != odd.len() {
        return Err(DaftError::LengthMismatch {
            expected: even.len(),
            actual: odd.len(),
        });
    }

    let mut low = Vec::with_capacity(even.len());
    let mut high = Vec::with_capacity(even.len());
    for ((&e, &o), w) in even
        .iter()
        .zip(odd)
        .zip(twiddles(offset, even.len(), out_len))
    {
        let t = w * o;
        low.push(e + t);
        high.push(e - t);
    }
    Ok((low, high))
}

/// Combine two whole half transforms into the double-length transform.
pub fn combine(even: &[Complex64], odd: &[Complex64]) -> DaftResult<Vec<Complex64>> {
    let out_len = 2 * even.len() as u64;
    let (mut low, high) = combine_chunk(even, odd, 0, out_len)?;
    low.extend(high);
    Ok(low)
}
