//! Borrowed views over the flattened layer parameters
//!
//! The parameters are owned by the caller and only read during an
//! invocation. Per-head slices are cut out with the offsets from
//! [`WeightLayout`]; an inconsistent offset would silently read another
//! head's parameters, so every array length is checked up front by
//! [`LayerWeights::validate`].

use crate::config::{MhaConfig, WeightLayout};
use crate::error::{check_len, MhaResult};
use crate::numeric::Element;

/// One affine map `y = x · W + b` with row-major `W: in_dim × out_dim`
#[derive(Debug, Clone, Copy)]
pub struct Projection<'a, W, B> {
    pub weight: &'a [W],
    pub bias: &'a [B],
    pub in_dim: usize,
    pub out_dim: usize,
}

impl<'a, W: Element, B: Element> Projection<'a, W, B> {
    /// Build a projection, checking the weight and bias lengths
    pub fn new(weight: &'a [W], bias: &'a [B], in_dim: usize, out_dim: usize) -> MhaResult<Self> {
        check_len("projection weight", weight.len(), in_dim * out_dim)?;
        check_len("projection bias", bias.len(), out_dim)?;
        Ok(Projection {
            weight,
            bias,
            in_dim,
            out_dim,
        })
    }

    /// Weight row `k` (the coefficients applied to input element `k`)
    #[inline]
    pub fn weight_row(&self, k: usize) -> &'a [W] {
        &self.weight[k * self.out_dim..(k + 1) * self.out_dim]
    }
}

/// Query, Key and Value projections of a single head
#[derive(Debug, Clone, Copy)]
pub struct HeadWeights<'a, W, B> {
    pub query: Projection<'a, W, B>,
    pub key: Projection<'a, W, B>,
    pub value: Projection<'a, W, B>,
}

/// All parameters of one multi-head attention layer, flattened row-major
///
/// | field | layout |
/// |---|---|
/// | `query_weight`, `key_weight` | `[num_heads][feature_dim][head_dim_key]` |
/// | `value_weight` | `[num_heads][feature_dim][head_dim_value]` |
/// | `query_bias`, `key_bias` | `[num_heads][head_dim_key]` |
/// | `value_bias` | `[num_heads][head_dim_value]` |
/// | `output_weight` | `[num_heads][head_dim_value][feature_dim]` |
/// | `output_bias` | `[feature_dim]` |
#[derive(Debug, Clone, Copy)]
pub struct LayerWeights<'a, W, B> {
    pub query_weight: &'a [W],
    pub query_bias: &'a [B],
    pub key_weight: &'a [W],
    pub key_bias: &'a [B],
    pub value_weight: &'a [W],
    pub value_bias: &'a [B],
    pub output_weight: &'a [W],
    pub output_bias: &'a [B],
}

impl<'a, W: Element, B: Element> LayerWeights<'a, W, B> {
    /// Check every array length against the configuration
    pub fn validate(&self, config: &MhaConfig) -> MhaResult<()> {
        let layout = config.layout();
        check_len("query_weight", self.query_weight.len(), layout.key_weight_len())?;
        check_len("query_bias", self.query_bias.len(), layout.key_bias_len())?;
        check_len("key_weight", self.key_weight.len(), layout.key_weight_len())?;
        check_len("key_bias", self.key_bias.len(), layout.key_bias_len())?;
        check_len("value_weight", self.value_weight.len(), layout.value_weight_len())?;
        check_len("value_bias", self.value_bias.len(), layout.value_bias_len())?;
        check_len(
            "output_weight",
            self.output_weight.len(),
            layout.output_weight_len(),
        )?;
        check_len("output_bias", self.output_bias.len(), layout.output_bias_len())?;
        Ok(())
    }

    /// Parameters of head `head`. Arrays must have passed [`Self::validate`].
    pub fn head(&self, layout: &WeightLayout, head: usize) -> HeadWeights<'a, W, B> {
        HeadWeights {
            query: Projection {
                weight: &self.query_weight[layout.query_weight_range(head)],
                bias: &self.query_bias[layout.query_bias_range(head)],
                in_dim: layout.feature_dim,
                out_dim: layout.head_dim_key,
            },
            key: Projection {
                weight: &self.key_weight[layout.key_weight_range(head)],
                bias: &self.key_bias[layout.key_bias_range(head)],
                in_dim: layout.feature_dim,
                out_dim: layout.head_dim_key,
            },
            value: Projection {
                weight: &self.value_weight[layout.value_weight_range(head)],
                bias: &self.value_bias[layout.value_bias_range(head)],
                in_dim: layout.feature_dim,
                out_dim: layout.head_dim_value,
            },
        }
    }

    /// The final projection over ConcatContext rows
    pub fn output(&self, layout: &WeightLayout) -> Projection<'a, W, B> {
        Projection {
            weight: self.output_weight,
            bias: self.output_bias,
            in_dim: layout.num_heads * layout.head_dim_value,
            out_dim: layout.feature_dim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MhaError;

    struct Params {
        qw: Vec<f32>,
        qb: Vec<f32>,
        kw: Vec<f32>,
        kb: Vec<f32>,
        vw: Vec<f32>,
        vb: Vec<f32>,
        ow: Vec<f32>,
        ob: Vec<f32>,
    }

    impl Params {
        // Every element encodes its own flat index so slices can be identified.
        fn indexed(config: &MhaConfig) -> Self {
            let l = config.layout();
            let seq = |n: usize| (0..n).map(|i| i as f32).collect::<Vec<_>>();
            Params {
                qw: seq(l.key_weight_len()),
                qb: seq(l.key_bias_len()),
                kw: seq(l.key_weight_len()),
                kb: seq(l.key_bias_len()),
                vw: seq(l.value_weight_len()),
                vb: seq(l.value_bias_len()),
                ow: seq(l.output_weight_len()),
                ob: seq(l.output_bias_len()),
            }
        }

        fn view(&self) -> LayerWeights<'_, f32, f32> {
            LayerWeights {
                query_weight: &self.qw,
                query_bias: &self.qb,
                key_weight: &self.kw,
                key_bias: &self.kb,
                value_weight: &self.vw,
                value_bias: &self.vb,
                output_weight: &self.ow,
                output_bias: &self.ob,
            }
        }
    }

    #[test]
    fn test_validate_accepts_matching_lengths() {
        let config = MhaConfig::new(2, 3, 4, 5, 6);
        let params = Params::indexed(&config);
        assert!(params.view().validate(&config).is_ok());
    }

    #[test]
    fn test_validate_names_offending_array() {
        let config = MhaConfig::new(2, 3, 4, 5, 6);
        let mut params = Params::indexed(&config);
        params.vb.pop();
        let err = params.view().validate(&config).unwrap_err();
        match err {
            MhaError::ShapeMismatch {
                tensor,
                expected,
                actual,
            } => {
                assert_eq!(tensor, "value_bias");
                assert_eq!(expected, 8);
                assert_eq!(actual, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_head_slices_start_at_head_stride() {
        let config = MhaConfig::new(3, 2, 4, 5, 1);
        let params = Params::indexed(&config);
        let layout = config.layout();
        let head = params.view().head(&layout, 2);

        assert_eq!(head.query.weight.len(), 10);
        assert_eq!(head.query.weight[0], 20.0);
        assert_eq!(head.key.bias, &[4.0, 5.0]);
        assert_eq!(head.value.weight[0], 40.0);
        assert_eq!(head.value.bias, &[8.0, 9.0, 10.0, 11.0]);
        assert_eq!(head.value.in_dim, 5);
        assert_eq!(head.value.out_dim, 4);
    }

    #[test]
    fn test_output_projection_dims() {
        let config = MhaConfig::new(3, 2, 4, 5, 1);
        let params = Params::indexed(&config);
        let out = params.view().output(&config.layout());
        assert_eq!(out.in_dim, 12);
        assert_eq!(out.out_dim, 5);
        assert_eq!(out.weight_row(4), &[20.0, 21.0, 22.0, 23.0, 24.0]);
    }

    #[test]
    fn test_projection_new_checks_lengths() {
        let w = vec![0.0f32; 6];
        let b = vec![0.0f32; 3];
        assert!(Projection::new(&w, &b, 2, 3).is_ok());
        assert!(Projection::new(&w, &b, 3, 3).is_err());
        assert!(Projection::new(&w, &b[..2], 2, 3).is_err());
    }
}
