//! Streaming schedule
//!
//! Every stage runs on its own scoped thread and talks to its neighbours
//! through bounded `sync_channel`s of capacity `stream_depth`, so a slow
//! consumer backpressures its producer.
//!
//! ```text
//!                    ┌─> q_proj[h] ──> score[h] ──> aggregate[h] ─┐
//! data_prep ─ rows ──┤                  ^ Key         ^ Value      ├─> output
//!                    └─> kv_proj[h] ────┴─────────────┘            │
//!                        (one set per head)          ctx rows ─────┘
//! ```
//!
//! Key and Value are needed in full before the first score or context row
//! can be produced, so `data_prep` emits every key/value row before the
//! first query row and `kv_proj` hands the finished matrices over through
//! one-slot channels. Query, attention and context rows stream one position
//! at a time. The output stage runs on the calling thread and reads context
//! row `p` from every head in head order before projecting it.
//!
//! One call spawns `4 * num_heads + 1` stage threads, independent of the
//! worker pool size.

use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::attention::context::ContextAggregation;
use crate::attention::data_prep::DataPrep;
use crate::attention::output::OutputProjection;
use crate::attention::score::AttentionScore;
use crate::attention::state::{InvocationTrace, PipelineState};
use crate::config::MhaConfig;
use crate::error::{MhaError, MhaResult};
use crate::kernels::attention::SoftmaxKernel;
use crate::kernels::Dense;
use crate::numeric::{Accumulator, Element};
use crate::tensor::Matrix;
use crate::weights::LayerWeights;

type StageHandle<'scope> = (String, ScopedJoinHandle<'scope, MhaResult<()>>);

fn closed(stage: &str) -> MhaError {
    MhaError::ChannelClosed(stage.to_string())
}

fn spawn_stage<'scope, 'env, F>(
    scope: &'scope Scope<'scope, 'env>,
    handles: &mut Vec<StageHandle<'scope>>,
    stage: String,
    f: F,
) -> MhaResult<()>
where
    F: FnOnce() -> MhaResult<()> + Send + 'scope,
{
    tracing::trace!(%stage, "spawning stream stage");
    let handle = thread::Builder::new()
        .name(format!("mha-{}", stage))
        .spawn_scoped(scope, f)?;
    handles.push((stage, handle));
    Ok(())
}

/// Keep the first error that is not a hang-up; a hang-up is usually the
/// consequence of another stage failing.
fn merge_error(current: Option<MhaError>, new: MhaError) -> MhaError {
    match current {
        Some(cur) if !matches!(cur, MhaError::ChannelClosed(_)) => cur,
        Some(cur) if matches!(new, MhaError::ChannelClosed(_)) => cur,
        _ => new,
    }
}

/// Thread-per-stage execution of one layer invocation
pub struct StreamingPipeline<'a, A: Accumulator> {
    config: &'a MhaConfig,
    softmax: &'a dyn SoftmaxKernel<A>,
    dense: Dense,
}

impl<'a, A: Accumulator> StreamingPipeline<'a, A> {
    pub fn new(config: &'a MhaConfig, softmax: &'a dyn SoftmaxKernel<A>, dense: Dense) -> Self {
        StreamingPipeline {
            config,
            softmax,
            dense,
        }
    }

    /// Run the pipeline; inputs and weights must already be validated
    pub fn run<D, W, B>(
        &self,
        query_source: &[D],
        kv_source: &[D],
        weights: &LayerWeights<'_, W, B>,
        trace: &mut InvocationTrace,
    ) -> MhaResult<Matrix<A>>
    where
        D: Element,
        W: Element,
        B: Element,
    {
        let config = self.config;
        let layout = config.layout();
        let prep = DataPrep::new(config);
        let depth = config.stream_depth.max(1);
        let seq_len = config.seq_len;
        let (hdk, hdv) = (config.head_dim_key, config.head_dim_value);
        let dense = self.dense;
        let output = OutputProjection::new(layout, dense);
        let output_weights = weights.output(&layout);

        tracing::debug!(
            num_heads = config.num_heads,
            depth,
            "starting streaming pipeline"
        );

        thread::scope(|s| -> MhaResult<Matrix<A>> {
            let mut handles = Vec::new();
            let mut q_txs = Vec::with_capacity(config.num_heads);
            let mut kv_txs = Vec::with_capacity(config.num_heads);
            let mut ctx_rxs: Vec<Receiver<Vec<A>>> = Vec::with_capacity(config.num_heads);

            trace.advance(PipelineState::Preparing)?;
            trace.advance(PipelineState::Projecting)?;

            for h in 0..config.num_heads {
                let head_weights = weights.head(&layout, h);
                let (q_tx, q_rx) = sync_channel::<&[D]>(depth);
                let (kv_tx, kv_rx) = sync_channel::<&[D]>(depth);
                let (qp_tx, qp_rx) = sync_channel::<Vec<A>>(depth);
                let (k_tx, k_rx) = sync_channel::<Matrix<A>>(1);
                let (v_tx, v_rx) = sync_channel::<Matrix<A>>(1);
                let (attn_tx, attn_rx) = sync_channel::<Vec<A>>(depth);
                let (ctx_tx, ctx_rx) = sync_channel::<Vec<A>>(depth);
                q_txs.push(q_tx);
                kv_txs.push(kv_tx);
                ctx_rxs.push(ctx_rx);

                let stage = format!("q_proj[{}]", h);
                let name = stage.clone();
                spawn_stage(s, &mut handles, stage, move || {
                    for _ in 0..seq_len {
                        let row = q_rx.recv().map_err(|_| closed(&name))?;
                        let projected: Vec<A> = dense.project_row(row, &head_weights.query);
                        qp_tx.send(projected).map_err(|_| closed(&name))?;
                    }
                    Ok(())
                })?;

                let stage = format!("kv_proj[{}]", h);
                let name = stage.clone();
                spawn_stage(s, &mut handles, stage, move || {
                    let mut key: Vec<A> = Vec::with_capacity(seq_len * hdk);
                    let mut value: Vec<A> = Vec::with_capacity(seq_len * hdv);
                    for _ in 0..seq_len {
                        let row = kv_rx.recv().map_err(|_| closed(&name))?;
                        key.extend(dense.project_row::<D, W, B, A>(row, &head_weights.key));
                        value.extend(dense.project_row::<D, W, B, A>(row, &head_weights.value));
                    }
                    k_tx.send(Matrix::from_vec(seq_len, hdk, key)?)
                        .map_err(|_| closed(&name))?;
                    v_tx.send(Matrix::from_vec(seq_len, hdv, value)?)
                        .map_err(|_| closed(&name))?;
                    Ok(())
                })?;

                let score = AttentionScore::new(self.softmax, hdk);
                let stage = format!("score[{}]", h);
                let name = stage.clone();
                spawn_stage(s, &mut handles, stage, move || {
                    let key = k_rx.recv().map_err(|_| closed(&name))?;
                    for _ in 0..seq_len {
                        let q_row = qp_rx.recv().map_err(|_| closed(&name))?;
                        attn_tx
                            .send(score.row(&q_row, &key))
                            .map_err(|_| closed(&name))?;
                    }
                    Ok(())
                })?;

                let stage = format!("aggregate[{}]", h);
                let name = stage.clone();
                spawn_stage(s, &mut handles, stage, move || {
                    let value = v_rx.recv().map_err(|_| closed(&name))?;
                    for _ in 0..seq_len {
                        let attn_row = attn_rx.recv().map_err(|_| closed(&name))?;
                        ctx_tx
                            .send(ContextAggregation.row(&attn_row, &value))
                            .map_err(|_| closed(&name))?;
                    }
                    Ok(())
                })?;
            }

            trace.advance(PipelineState::Scoring)?;
            trace.advance(PipelineState::Aggregating)?;

            spawn_stage(s, &mut handles, "data_prep".to_string(), move || {
                for row in prep.positions(kv_source) {
                    for tx in &kv_txs {
                        tx.send(row).map_err(|_| closed("data_prep"))?;
                    }
                }
                drop(kv_txs);
                for row in prep.positions(query_source) {
                    for tx in &q_txs {
                        tx.send(row).map_err(|_| closed("data_prep"))?;
                    }
                }
                Ok(())
            })?;

            let collected = (|| -> MhaResult<Matrix<A>> {
                trace.advance(PipelineState::Concatenating)?;
                trace.advance(PipelineState::ProjectingOutput)?;
                let mut data = Vec::with_capacity(config.output_len());
                let mut head_rows = Vec::with_capacity(ctx_rxs.len());
                for _ in 0..seq_len {
                    head_rows.clear();
                    for rx in &ctx_rxs {
                        head_rows.push(rx.recv().map_err(|_| closed("output"))?);
                    }
                    let concat = output.concat_row(&head_rows);
                    data.extend(output.project_row(&concat, &output_weights));
                }
                Matrix::from_vec(seq_len, config.feature_dim, data)
            })();
            // Unblock any head still waiting to deliver a context row
            drop(ctx_rxs);

            let mut stage_error = None;
            for (stage, handle) in handles {
                let outcome = match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(MhaError::WorkerPanicked(stage)),
                };
                if let Err(err) = outcome {
                    tracing::debug!(error = %err, "stream stage failed");
                    stage_error = Some(merge_error(stage_error, err));
                }
            }

            match (collected, stage_error) {
                (Ok(out), None) => Ok(out),
                (Err(err), None) => Err(err),
                (Ok(_), Some(err)) => Err(err),
                (Err(err), Some(stage_err)) => Err(merge_error(Some(stage_err), err)),
            }
        })
    }
}
