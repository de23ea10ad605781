//! One head pipeline: project Q/K/V, score, aggregate
//!
//! Heads share no mutable state. Each run owns its intermediate matrices and
//! only borrows the routed inputs and its slice of the layer parameters.

use crate::attention::context::ContextAggregation;
use crate::attention::data_prep::HeadInputs;
use crate::attention::score::AttentionScore;
use crate::attention::state::HeadStage;
use crate::error::MhaResult;
use crate::kernels::attention::SoftmaxKernel;
use crate::kernels::Dense;
use crate::numeric::{Accumulator, Element};
use crate::tensor::Matrix;
use crate::weights::HeadWeights;

/// Everything one head produced during an invocation
#[derive(Debug, Clone, PartialEq)]
pub struct HeadOutput<A> {
    pub head: usize,
    /// `[seq_len, head_dim_key]`
    pub query: Matrix<A>,
    /// `[seq_len, head_dim_key]`
    pub key: Matrix<A>,
    /// `[seq_len, head_dim_value]`
    pub value: Matrix<A>,
    /// `[seq_len, seq_len]`, row-stochastic
    pub attn_weights: Matrix<A>,
    /// `[seq_len, head_dim_value]`
    pub context: Matrix<A>,
}

/// Stage composition of a single head
pub struct HeadPipeline<'k, A: Accumulator> {
    score: AttentionScore<'k, A>,
    dense: Dense,
}

impl<'k, A: Accumulator> HeadPipeline<'k, A> {
    pub fn new(softmax: &'k dyn SoftmaxKernel<A>, head_dim_key: usize, dense: Dense) -> Self {
        HeadPipeline {
            score: AttentionScore::new(softmax, head_dim_key),
            dense,
        }
    }

    /// Run the head to completion
    pub fn run<D, W, B>(
        &self,
        inputs: &HeadInputs<'_, D>,
        weights: &HeadWeights<'_, W, B>,
    ) -> MhaResult<HeadOutput<A>>
    where
        D: Element,
        W: Element,
        B: Element,
    {
        let head = inputs.head;
        let seq_len = inputs.seq_len;

        tracing::trace!(head, stage = ?HeadStage::Projecting, "head stage");
        let query = self.dense.project_rows(inputs.query, seq_len, &weights.query);
        let key = self.dense.project_rows(inputs.key, seq_len, &weights.key);
        let value = self.dense.project_rows(inputs.value, seq_len, &weights.value);

        tracing::trace!(head, stage = ?HeadStage::Scoring, "head stage");
        let attn_weights = self.score.compute(&query, &key)?;

        tracing::trace!(head, stage = ?HeadStage::Aggregating, "head stage");
        let context = ContextAggregation.compute(&attn_weights, &value)?;

        tracing::trace!(head, stage = ?HeadStage::Done, "head stage");
        Ok(HeadOutput {
            head,
            query,
            key,
            value,
            attn_weights,
            context,
        })
    }
}
