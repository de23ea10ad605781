//! Multi-head self-attention as a fixed-shape dataflow pipeline
//!
//! ```text
//! DataPrep -> HeadPipeline[0..num_heads) -> OutputProjection
//!             (project Q/K/V -> score -> aggregate)
//! ```
//!
//! Two schedules execute the same graph:
//! - `FullyParallel`: heads run as rayon tasks on a pool of
//!   `ceil(num_heads / resource_sharing_factor)` workers, rows inside a head
//!   are also split across the pool.
//! - `Streaming`: every stage is a scoped thread joined by bounded channels
//!   (see [`stream`]).

pub mod context;
pub mod data_prep;
pub mod head;
pub mod output;
pub mod reference;
pub mod score;
pub mod state;
pub mod stream;

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;

pub use context::ContextAggregation;
pub use data_prep::{DataPrep, HeadInputs};
pub use head::{HeadOutput, HeadPipeline};
pub use output::OutputProjection;
pub use reference::reference_forward;
pub use score::AttentionScore;
pub use state::{HeadStage, InvocationTrace, PipelineState};
pub use stream::StreamingPipeline;

use crate::config::{ExecutionMode, MhaConfig, WeightLayout};
use crate::error::{MhaError, MhaResult};
use crate::kernels::attention::{build_softmax, SoftmaxKernel};
use crate::kernels::Dense;
use crate::numeric::{Accumulator, Element, NumericKind};
use crate::tensor::Matrix;
use crate::weights::LayerWeights;

/// Every intermediate of one fully-parallel invocation
#[derive(Debug, Clone)]
pub struct ForwardOutput<A> {
    /// Per-head results, in head order
    pub heads: Vec<HeadOutput<A>>,
    /// `[seq_len, num_heads * head_dim_value]`
    pub concat_context: Matrix<A>,
    /// `[seq_len, feature_dim]`
    pub output: Matrix<A>,
    pub trace: InvocationTrace,
}

fn check_kind(role: &'static str, configured: NumericKind, actual: NumericKind) -> MhaResult<()> {
    if configured != actual {
        return Err(MhaError::NumericTypeMismatch {
            role,
            configured,
            actual,
        });
    }
    Ok(())
}

/// Multi-head attention layer
///
/// `W` is the weight element type, `B` the bias element type and `A` the
/// accumulator in which every intermediate is held. The three must match the
/// configured [`crate::config::NumericSpec`].
///
/// The layer holds no per-invocation state; [`Self::forward`] can be called
/// any number of times, also concurrently from several threads.
pub struct MultiHeadAttention<W: Element, B: Element, A: Accumulator> {
    config: MhaConfig,
    layout: WeightLayout,
    dense: Dense,
    softmax: Box<dyn SoftmaxKernel<A>>,
    pool: rayon::ThreadPool,
    _params: PhantomData<fn() -> (W, B)>,
}

impl<W: Element, B: Element, A: Accumulator> MultiHeadAttention<W, B, A> {
    /// Validate the configuration and build the worker pool
    pub fn new(config: MhaConfig) -> MhaResult<Self> {
        config.validate()?;
        check_kind("weight", config.numeric.weight, W::KIND)?;
        check_kind("bias", config.numeric.bias, B::KIND)?;
        check_kind("accumulator", config.numeric.accumulator, A::KIND)?;

        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mha-worker-{}", i))
            .build()?;

        tracing::debug!(
            num_heads = config.num_heads,
            workers,
            mode = ?config.mode,
            dense = ?config.dense_strategy,
            "multi-head attention layer created"
        );

        Ok(MultiHeadAttention {
            layout: config.layout(),
            dense: Dense::new(config.dense_strategy, config.resource_sharing_factor),
            softmax: build_softmax(config.softmax),
            pool,
            config,
            _params: PhantomData,
        })
    }

    /// Replace the configured softmax with a custom kernel
    pub fn with_softmax(mut self, softmax: Box<dyn SoftmaxKernel<A>>) -> Self {
        tracing::debug!(kernel = softmax.name(), "softmax kernel replaced");
        self.softmax = softmax;
        self
    }

    pub fn config(&self) -> &MhaConfig {
        &self.config
    }

    pub fn softmax_name(&self) -> &str {
        self.softmax.name()
    }

    /// Threads in the fully-parallel worker pool
    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compute `Output = Concat_h(Attention_h) · OutputWeight + OutputBias`
    ///
    /// `query_source` and `kv_source` are row-major `[seq_len, feature_dim]`.
    /// Passing the same buffer twice gives self-attention. The result is
    /// `[seq_len, feature_dim]`.
    pub fn forward<D: Element>(
        &self,
        query_source: &[D],
        kv_source: &[D],
        weights: &LayerWeights<'_, W, B>,
    ) -> MhaResult<Matrix<A>> {
        let span = tracing::info_span!(
            "mha_forward",
            mode = ?self.config.mode,
            num_heads = self.config.num_heads,
            seq_len = self.config.seq_len
        );
        let _enter = span.enter();

        self.validate_call(query_source, kv_source, weights)?;
        let mut trace = InvocationTrace::new();
        let output = match self.config.mode {
            ExecutionMode::FullyParallel => {
                let (_, _, output) =
                    self.run_parallel(query_source, kv_source, weights, &mut trace)?;
                output
            }
            ExecutionMode::Streaming => {
                StreamingPipeline::new(&self.config, self.softmax.as_ref(), self.dense).run(
                    query_source,
                    kv_source,
                    weights,
                    &mut trace,
                )?
            }
        };
        trace.advance(PipelineState::Done)?;
        Ok(output)
    }

    /// Like [`Self::forward`], but keeps every intermediate
    ///
    /// Always runs the fully-parallel schedule, since the streaming schedule
    /// never materializes the per-head matrices.
    pub fn forward_detailed<D: Element>(
        &self,
        query_source: &[D],
        kv_source: &[D],
        weights: &LayerWeights<'_, W, B>,
    ) -> MhaResult<ForwardOutput<A>> {
        let span = tracing::info_span!(
            "mha_forward_detailed",
            num_heads = self.config.num_heads,
            seq_len = self.config.seq_len
        );
        let _enter = span.enter();

        self.validate_call(query_source, kv_source, weights)?;
        let mut trace = InvocationTrace::new();
        let (heads, concat_context, output) =
            self.run_parallel(query_source, kv_source, weights, &mut trace)?;
        trace.advance(PipelineState::Done)?;
        Ok(ForwardOutput {
            heads,
            concat_context,
            output,
            trace,
        })
    }

    fn validate_call<D: Element>(
        &self,
        query_source: &[D],
        kv_source: &[D],
        weights: &LayerWeights<'_, W, B>,
    ) -> MhaResult<()> {
        DataPrep::new(&self.config).validate(query_source, kv_source)?;
        weights.validate(&self.config)
    }

    #[allow(clippy::type_complexity)]
    fn run_parallel<D: Element>(
        &self,
        query_source: &[D],
        kv_source: &[D],
        weights: &LayerWeights<'_, W, B>,
        trace: &mut InvocationTrace,
    ) -> MhaResult<(Vec<HeadOutput<A>>, Matrix<A>, Matrix<A>)> {
        trace.advance(PipelineState::Preparing)?;
        let routed = DataPrep::new(&self.config).route(query_source, kv_source);

        trace.advance(PipelineState::Projecting)?;
        let pipeline = HeadPipeline::new(self.softmax.as_ref(), self.config.head_dim_key, self.dense);
        let layout = &self.layout;
        let fan_out = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.install(|| {
                routed
                    .par_iter()
                    .map(|inputs| pipeline.run(inputs, &weights.head(layout, inputs.head)))
                    .collect::<MhaResult<Vec<_>>>()
            })
        }));
        let heads = match fan_out {
            Ok(result) => result?,
            Err(_) => return Err(MhaError::WorkerPanicked("head pool".to_string())),
        };
        // Every head has passed through scoring and aggregation once fan-in completes
        trace.advance(PipelineState::Scoring)?;
        trace.advance(PipelineState::Aggregating)?;

        trace.advance(PipelineState::Concatenating)?;
        let output = OutputProjection::new(self.layout, self.dense);
        let contexts: Vec<&Matrix<A>> = heads.iter().map(|h| &h.context).collect();
        let concat = output.concat(&contexts, self.config.seq_len)?;

        trace.advance(PipelineState::ProjectingOutput)?;
        let projected = self
            .pool
            .install(|| output.project(&concat, &weights.output(layout)))?;

        Ok((heads, concat, projected))
    }
}
