//! Value aggregation: `Context = AttnWeights · Value`, for one head

use crate::error::MhaResult;
use crate::kernels::attention::{weighted_matmul, weighted_row};
use crate::numeric::Accumulator;
use crate::tensor::Matrix;

/// Context of one head
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAggregation;

impl ContextAggregation {
    /// Context row of a single query position
    pub fn row<A: Accumulator>(&self, weights_row: &[A], value: &Matrix<A>) -> Vec<A> {
        let mut out = vec![A::ZERO; value.cols()];
        weighted_row(weights_row, value, &mut out);
        out
    }

    /// Full `[seq_len, head_dim_value]` context
    pub fn compute<A: Accumulator>(
        &self,
        weights: &Matrix<A>,
        value: &Matrix<A>,
    ) -> MhaResult<Matrix<A>> {
        weighted_matmul(weights, value)
    }
}
