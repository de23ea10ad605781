//! Scaled dot-product scores followed by row softmax, for one head

use rayon::prelude::*;

use crate::error::MhaResult;
use crate::kernels::attention::{qkt_matmul, scaled_scores_row, SoftmaxKernel};
use crate::numeric::Accumulator;
use crate::tensor::Matrix;

/// Produces the row-stochastic AttnWeights matrix of one head
///
/// `AttnWeights[i] = softmax(Query[i] · Key^T / sqrt(head_dim_key))`. There is
/// no masking: every query position attends to every key position.
pub struct AttentionScore<'k, A: Accumulator> {
    softmax: &'k dyn SoftmaxKernel<A>,
    scale: A,
}

impl<'k, A: Accumulator> AttentionScore<'k, A> {
    pub fn new(softmax: &'k dyn SoftmaxKernel<A>, head_dim_key: usize) -> Self {
        AttentionScore {
            softmax,
            scale: A::from_f64(1.0 / (head_dim_key as f64).sqrt()),
        }
    }

    /// Attention weights of a single query position
    pub fn row(&self, q_row: &[A], key: &Matrix<A>) -> Vec<A> {
        let mut out = vec![A::ZERO; key.rows()];
        scaled_scores_row(q_row, key, self.scale, &mut out);
        self.softmax.softmax_in_place(&mut out);
        out
    }

    /// Attention weights of every query position
    pub fn compute(&self, query: &Matrix<A>, key: &Matrix<A>) -> MhaResult<Matrix<A>> {
        let mut weights = qkt_matmul(query, key, self.scale)?;
        let seq_k = weights.cols();
        if seq_k > 0 {
            let softmax = self.softmax;
            weights
                .as_mut_slice()
                .par_chunks_mut(seq_k)
                .for_each(|row| softmax.softmax_in_place(row));
        }
        Ok(weights)
    }
}
