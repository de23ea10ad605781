//! Attention matrix multiplication kernels
//!
//! Provides the QK^T score matmul and the weighted matmul (softmax weights @ V)
//! for a single head. Key is kept in its natural `[seq_k, d_k]` layout, so the
//! score for `(i, j)` is the dot product of Query row `i` and Key row `j`.

use rayon::prelude::*;

use crate::error::{MhaError, MhaResult};
use crate::numeric::Accumulator;
use crate::tensor::Matrix;

// ============================================================================
// QK^T Matmul
// ============================================================================

/// Scaled scores of one query row against every key row
///
/// `out[j] = scale * sum_d q_row[d] * key[j, d]`
#[inline]
pub fn scaled_scores_row<A: Accumulator>(q_row: &[A], key: &Matrix<A>, scale: A, out: &mut [A]) {
    debug_assert_eq!(q_row.len(), key.cols());
    debug_assert_eq!(out.len(), key.rows());

    for (o, k_row) in out.iter_mut().zip(key.rows_iter()) {
        let mut sum = A::ZERO;
        for (&q, &k) in q_row.iter().zip(k_row) {
            sum += q * k;
        }
        *o = sum * scale;
    }
}

/// Query-Key^T matrix multiplication with scaling
///
/// # Arguments
/// * `query` - Query matrix [seq_q, d_k]
/// * `key` - Key matrix [seq_k, d_k]
/// * `scale` - Factor applied to every raw score (normally `1/sqrt(d_k)`)
///
/// # Returns
/// * Scaled scores [seq_q, seq_k]
pub fn qkt_matmul<A: Accumulator>(
    query: &Matrix<A>,
    key: &Matrix<A>,
    scale: A,
) -> MhaResult<Matrix<A>> {
    if query.cols() != key.cols() {
        return Err(MhaError::ShapeMismatch {
            tensor: "key row width".to_string(),
            expected: query.cols(),
            actual: key.cols(),
        });
    }

    let seq_k = key.rows();
    let mut scores = Matrix::zeros(query.rows(), seq_k);
    if seq_k == 0 {
        return Ok(scores);
    }
    scores
        .as_mut_slice()
        .par_chunks_mut(seq_k)
        .enumerate()
        .for_each(|(i, out_row)| scaled_scores_row(query.row(i), key, scale, out_row));
    Ok(scores)
}

// ============================================================================
// Weighted Matmul (softmax weights @ V)
// ============================================================================

/// One context row: `out[j] = sum_k weights_row[k] * value[k, j]`
#[inline]
pub fn weighted_row<A: Accumulator>(weights_row: &[A], value: &Matrix<A>, out: &mut [A]) {
    debug_assert_eq!(weights_row.len(), value.rows());
    debug_assert_eq!(out.len(), value.cols());

    out.iter_mut().for_each(|o| *o = A::ZERO);
    for (&w, v_row) in weights_row.iter().zip(value.rows_iter()) {
        for (o, &v) in out.iter_mut().zip(v_row) {
            *o += w * v;
        }
    }
}

/// Attention-weighted value multiplication
///
/// # Arguments
/// * `weights` - Attention weights [seq_q, seq_k]
/// * `value` - Value matrix [seq_k, d_v]
///
/// # Returns
/// * Context [seq_q, d_v]
pub fn weighted_matmul<A: Accumulator>(
    weights: &Matrix<A>,
    value: &Matrix<A>,
) -> MhaResult<Matrix<A>> {
    if weights.cols() != value.rows() {
        return Err(MhaError::ShapeMismatch {
            tensor: "value rows".to_string(),
            expected: weights.cols(),
            actual: value.rows(),
        });
    }

    let d_v = value.cols();
    let mut output = Matrix::zeros(weights.rows(), d_v);
    if d_v == 0 {
        return Ok(output);
    }
    output
        .as_mut_slice()
        .par_chunks_mut(d_v)
        .enumerate()
        .for_each(|(i, out_row)| weighted_row(weights.row(i), value, out_row));
    Ok(output)
}

// ============================================================================
// Tests
// ============================================================================
