//! Softmax operations for attention mechanism
//!
//! Row-wise softmax with max subtraction. Two kernels implement the
//! [`SoftmaxKernel`] contract (non-negative output summing to 1):
//! - [`StableSoftmax`]: exact `exp(x - max)`
//! - [`LookupSoftmax`]: `exp(x - max)` read from a precomputed table, for
//!   reduced-precision targets where a transcendental unit is too costly

use crate::config::SoftmaxKind;
use crate::numeric::Accumulator;

/// Row softmax used by the scoring stage
///
/// Implementations must leave every entry non-negative and the row summing
/// to 1 within the accumulator's rounding. Empty rows are left untouched.
pub trait SoftmaxKernel<A: Accumulator>: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Normalize one row in place
    fn softmax_in_place(&self, row: &mut [A]);

    /// Normalize a copy of one row
    fn softmax(&self, row: &[A]) -> Vec<A> {
        let mut out = row.to_vec();
        self.softmax_in_place(&mut out);
        out
    }
}

// ============================================================================
// Exact softmax
// ============================================================================

/// Softmax with numerical stability
///
/// For each row:
/// 1. Find max value for numerical stability
/// 2. Compute exp(x - max)
/// 3. Normalize by sum
#[derive(Debug, Clone, Copy, Default)]
pub struct StableSoftmax;

impl<A: Accumulator> SoftmaxKernel<A> for StableSoftmax {
    fn name(&self) -> &str {
        "stable"
    }

    fn softmax_in_place(&self, row: &mut [A]) {
        if row.is_empty() {
            return;
        }

        let max_val = row.iter().fold(A::NEG_INFINITY, |a, &b| a.max(b));

        let mut sum = A::ZERO;
        for x in row.iter_mut() {
            *x = (*x - max_val).exp();
            sum += *x;
        }

        // sum >= 1 because the max element contributes exp(0)
        for x in row.iter_mut() {
            *x = *x / sum;
        }
    }
}

// ============================================================================
// Table-driven softmax
// ============================================================================

/// Softmax whose exponentials come from a lookup table
///
/// `table[i] = exp(-i * step)` with `step = input_range / table_size`.
/// An entry `x` of a row uses `table[floor((max - x) / step)]`, clamped to the
/// last entry. The row maximum always maps to `table[0] = 1`.
#[derive(Debug, Clone)]
pub struct LookupSoftmax<A> {
    table: Vec<A>,
    inv_step: f64,
}

impl<A: Accumulator> LookupSoftmax<A> {
    /// Build a table of `table_size` entries over `[0, input_range)`
    pub fn new(table_size: usize, input_range: f64) -> Self {
        let table_size = table_size.max(2);
        let step = input_range / table_size as f64;
        let table = (0..table_size)
            .map(|i| A::from_f64((-(i as f64) * step).exp()))
            .collect();
        LookupSoftmax {
            table,
            inv_step: 1.0 / step,
        }
    }

    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    #[inline]
    fn lookup(&self, distance: f64) -> A {
        // NaN and negative distances cast to index 0
        let idx = (distance * self.inv_step) as usize;
        self.table[idx.min(self.table.len() - 1)]
    }
}

impl<A: Accumulator> SoftmaxKernel<A> for LookupSoftmax<A> {
    fn name(&self) -> &str {
        "lookup"
    }

    fn softmax_in_place(&self, row: &mut [A]) {
        if row.is_empty() {
            return;
        }

        let max_val = row.iter().fold(A::NEG_INFINITY, |a, &b| a.max(b));

        let mut sum = A::ZERO;
        for x in row.iter_mut() {
            *x = self.lookup((max_val - *x).to_f64());
            sum += *x;
        }
        for x in row.iter_mut() {
            *x = *x / sum;
        }
    }
}

/// Instantiate the configured softmax kernel
pub fn build_softmax<A: Accumulator>(kind: SoftmaxKind) -> Box<dyn SoftmaxKernel<A>> {
    match kind {
        SoftmaxKind::Stable => Box::new(StableSoftmax),
        SoftmaxKind::Lookup {
            table_size,
            input_range,
        } => Box::new(LookupSoftmax::<A>::new(table_size, input_range)),
    }
}

// ============================================================================
// Tests
// ============================================================================
