//! In-core FFT kernels.
//!
//! The engine only needs a forward, unscaled transform of a block that fits
//! in memory. [`RustFftKernel`] is the production kernel; [`NaiveDft`] is an
//! O(n²) direct evaluation used as a reference.

use num_complex::Complex;
use parking_lot::Mutex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::error::{DaftError, DaftResult};

/// Complex double-precision sample.
pub type Complex64 = Complex<f64>;

/// Forward, unscaled DFT of an in-memory block.
///
/// Implementations must return exactly as many values as they receive.
pub trait FftKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn fft(&self, values: Vec<Complex64>) -> DaftResult<Vec<Complex64>>;
}

fn check_finite(values: &[Complex64]) -> DaftResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(DaftError::Compute(format!(
            "non-finite input at block index {index}"
        ))),
        None => Ok(()),
    }
}

/// Kernel backed by `rustfft`, planning each block length once.
pub struct RustFftKernel {
    planner: Mutex<FftPlanner<f64>>,
    check_finite: bool,
}

impl std::fmt::Debug for RustFftKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustFftKernel")
            .field("check_finite", &self.check_finite)
            .finish()
    }
}

impl Default for RustFftKernel {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RustFftKernel {
    /// With `check_finite`, blocks containing NaN or infinity are rejected.
    #[must_use]
    pub fn new(check_finite: bool) -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            check_finite,
        }
    }
}

impl FftKernel for RustFftKernel {
    fn name(&self) -> &'static str {
        "rustfft"
    }

    fn fft(&self, mut values: Vec<Complex64>) -> DaftResult<Vec<Complex64>> {
        if self.check_finite {
            check_finite(&values)?;
        }
        if values.len() <= 1 {
            return Ok(values);
        }
        // The planner caches plans per length; only planning needs the lock.
        let fft = self.planner.lock().plan_fft_forward(values.len());
        fft.process(&mut values);
        Ok(values)
    }
}

/// Direct O(n²) DFT evaluation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveDft;

impl FftKernel for NaiveDft {
    fn name(&self) -> &'static str {
        "naive-dft"
    }

    fn fft(&self, values: Vec<Complex64>) -> DaftResult<Vec<Complex64>> {
        check_finite(&values)?;
        Ok(naive_dft(&values))
    }
}

/// Reference forward DFT, `X[k] = Σ x[t]·exp(-2πi·k·t/n)`.
#[must_use]
pub fn naive_dft(input: &[Complex64]) -> Vec<Complex64> {
    let n = input.len();
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(t, &x)| {
                    // Reduce k*t mod n first so the angle stays small.
                    let phase = ((k * t) % n) as f64 / n as f64;
                    x * Complex64::from_polar(1.0, -2.0 * PI * phase)
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_abs_diff(a: &[Complex64], b: &[Complex64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).norm())
            .fold(0.0, f64::max)
    }

    #[test]
    fn rustfft_matches_direct_dft() {
        let input: Vec<Complex64> = (0..12)
            .map(|i| Complex64::new((i as f64).sin(), (i as f64 * 0.3).cos()))
            .collect();
        let fast = RustFftKernel::default().fft(input.clone()).unwrap();
        let slow = naive_dft(&input);
        assert!(max_abs_diff(&fast, &slow) < 1e-12);
    }

    #[test]
    fn transform_is_unscaled() {
        let ones = vec![Complex64::new(1.0, 0.0); 8];
        let out = RustFftKernel::default().fft(ones).unwrap();
        assert!((out[0] - Complex64::new(8.0, 0.0)).norm() < 1e-12);
        assert!(out[1..].iter().all(|v| v.norm() < 1e-12));
    }

    #[test]
    fn non_finite_input_is_a_compute_error() {
        let mut input = vec![Complex64::new(1.0, 0.0); 4];
        input[2].im = f64::NAN;
        let err = RustFftKernel::default().fft(input.clone()).unwrap_err();
        assert!(matches!(err, DaftError::Compute(msg) if msg.contains("index 2")));

        assert!(RustFftKernel::new(false).fft(input).is_ok());
    }

    #[test]
    fn trivial_lengths_pass_through() {
        let kernel = RustFftKernel::default();
        assert!(kernel.fft(Vec::new()).unwrap().is_empty());
        let one = vec![Complex64::new(3.0, -1.0)];
        assert_eq!(kernel.fft(one.clone()).unwrap(), one);
    }
}
