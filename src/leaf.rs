//! In-core transforms of decomposition leaves.

use crate::error::{DaftError, DaftResult};
use crate::kernel::{Complex64, FftKernel};
use crate::plan::NodeSpan;
use crate::signal::SignalSource;

/// Gathers a leaf's samples from the signal and transforms them in memory.
///
/// The gather is strided (`start, start + stride, ...`) because a leaf at
/// depth `d` holds every `2^d`-th sample of the original signal.
pub struct LeafTransformer<'a, S: ?Sized> {
    source: &'a S,
    kernel: &'a dyn FftKernel,
}

impl<'a, S: SignalSource + ?Sized> LeafTransformer<'a, S> {
    pub fn new(source: &'a S, kernel: &'a dyn FftKernel) -> Self {
        Self { source, kernel }
    }

    /// Forward DFT of the samples addressed by `leaf`.
    ///
    /// Kernel errors are returned unchanged.
    pub fn transform(&self, leaf: NodeSpan) -> DaftResult<Vec<Complex64>> {
        let count = usize::try_from(leaf.len)
            .map_err(|_| DaftError::Source(format!("leaf of {} samples", leaf.len)))?;
        let input = self.source.gather(leaf.start, leaf.stride, count)?;
        let output = self.kernel.fft(input)?;
        if output.len() != count {
            return Err(DaftError::Compute(format!(
                "kernel '{}' returned {} values for a block of {}",
                self.kernel.name(),
                output.len(),
                count
            )));
        }
        tracing::trace!(start = leaf.start, stride = leaf.stride, len = count, "Transformed leaf");
        Ok(output)
    }
}
