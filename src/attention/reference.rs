//! Sequential f64 forward pass used to validate the pipeline
//!
//! Written directly from the formulas with explicit indexing; no kernels,
//! no threads and no reuse of the pipeline stages.

use crate::config::MhaConfig;
use crate::error::{check_len, MhaResult};
use crate::numeric::Element;
use crate::tensor::Matrix;
use crate::weights::LayerWeights;

/// Multi-head attention evaluated in f64, one loop nest per formula
pub fn reference_forward<D, W, B>(
    config: &MhaConfig,
    query_source: &[D],
    kv_source: &[D],
    weights: &LayerWeights<'_, W, B>,
) -> MhaResult<Matrix<f64>>
where
    D: Element,
    W: Element,
    B: Element,
{
    config.validate()?;
    check_len("query_source", query_source.len(), config.source_len())?;
    check_len("kv_source", kv_source.len(), config.source_len())?;
    weights.validate(config)?;

    let n = config.seq_len;
    let f = config.feature_dim;
    let dk = config.head_dim_key;
    let dv = config.head_dim_value;
    let heads = config.num_heads;
    let scale = 1.0 / (dk as f64).sqrt();

    let x = |src: &[D], p: usize, k: usize| src[p * f + k].to_f64();

    let mut concat = vec![0.0f64; n * heads * dv];
    for h in 0..heads {
        let mut q = vec![0.0f64; n * dk];
        let mut key = vec![0.0f64; n * dk];
        let mut v = vec![0.0f64; n * dv];
        for p in 0..n {
            for j in 0..dk {
                let mut sq = weights.query_bias[h * dk + j].to_f64();
                let mut sk = weights.key_bias[h * dk + j].to_f64();
                for k in 0..f {
                    let w_idx = h * f * dk + k * dk + j;
                    sq += x(query_source, p, k) * weights.query_weight[w_idx].to_f64();
                    sk += x(kv_source, p, k) * weights.key_weight[w_idx].to_f64();
                }
                q[p * dk + j] = sq;
                key[p * dk + j] = sk;
            }
            for j in 0..dv {
                let mut sv = weights.value_bias[h * dv + j].to_f64();
                for k in 0..f {
                    sv += x(kv_source, p, k) * weights.value_weight[h * f * dv + k * dv + j].to_f64();
                }
                v[p * dv + j] = sv;
            }
        }

        for i in 0..n {
            let mut scores = vec![0.0f64; n];
            for (j, s) in scores.iter_mut().enumerate() {
                let mut dot = 0.0;
                for d in 0..dk {
                    dot += q[i * dk + d] * key[j * dk + d];
                }
                *s = dot * scale;
            }
            let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for s in scores.iter_mut() {
                *s = (*s - max).exp();
                sum += *s;
            }
            for s in scores.iter_mut() {
                *s /= sum;
            }

            for d in 0..dv {
                let mut c = 0.0;
                for (j, &w) in scores.iter().enumerate() {
                    c += w * v[j * dv + d];
                }
                concat[i * heads * dv + h * dv + d] = c;
            }
        }
    }

    let mut out = vec![0.0f64; n * f];
    for i in 0..n {
        for m in 0..f {
            let mut acc = weights.output_bias[m].to_f64();
            for c in 0..heads * dv {
                acc += concat[i * heads * dv + c] * weights.output_weight[c * f + m].to_f64();
            }
            out[i * f + m] = acc;
        }
    }
    Matrix::from_vec(n, f, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_uniform_attention() {
        // Zero Query/Key weights make every score 0, so each row of the
        // attention is uniform and Context is the mean Value row.
        let config = MhaConfig::new(1, 1, 1, 1, 2);
        let zero = [0.0f64];
        let one = [1.0f64];
        let two = [2.0f64];
        let weights = LayerWeights {
            query_weight: &zero[..],
            query_bias: &zero[..],
            key_weight: &zero[..],
            key_bias: &zero[..],
            value_weight: &one[..],
            value_bias: &zero[..],
            output_weight: &two[..],
            output_bias: &one[..],
        };
        let src = [1.0f64, 3.0];

        let out = reference_forward(&config, &src, &src, &weights).unwrap();
        // mean value 2.0, times 2 plus 1
        assert_eq!(out.as_slice(), &[5.0, 5.0]);
    }

    #[test]
    fn test_reference_rejects_short_source() {
        let config = MhaConfig::new(1, 1, 1, 1, 2);
        let z = [0.0f64];
        let weights = LayerWeights {
            query_weight: &z[..],
            query_bias: &z[..],
            key_weight: &z[..],
            key_bias: &z[..],
            value_weight: &z[..],
            value_bias: &z[..],
            output_weight: &z[..],
            output_bias: &z[..],
        };
        assert!(reference_forward(&config, &[0.0f64], &[0.0, 0.0], &weights).is_err());
    }
}
