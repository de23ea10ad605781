//! Layer parameter fixtures

use mhaforge::{Element, LayerWeights, MhaConfig};

use super::SimpleRng;

// ============================================================================
// Owned layer parameters
// ============================================================================

/// Owned flattened parameters of one layer
#[derive(Debug, Clone)]
pub struct OwnedLayer<W, B> {
    pub query_weight: Vec<W>,
    pub query_bias: Vec<B>,
    pub key_weight: Vec<W>,
    pub key_bias: Vec<B>,
    pub value_weight: Vec<W>,
    pub value_bias: Vec<B>,
    pub output_weight: Vec<W>,
    pub output_bias: Vec<B>,
}

impl<W: Element, B: Element> OwnedLayer<W, B> {
    /// Uniform random parameters in `[-0.5, 0.5]`
    pub fn random(config: &MhaConfig, rng: &mut SimpleRng) -> Self {
        let l = config.layout();
        OwnedLayer {
            query_weight: rng.fill(l.key_weight_len(), 0.5),
            query_bias: rng.fill(l.key_bias_len(), 0.5),
            key_weight: rng.fill(l.key_weight_len(), 0.5),
            key_bias: rng.fill(l.key_bias_len(), 0.5),
            value_weight: rng.fill(l.value_weight_len(), 0.5),
            value_bias: rng.fill(l.value_bias_len(), 0.5),
            output_weight: rng.fill(l.output_weight_len(), 0.5),
            output_bias: rng.fill(l.output_bias_len(), 0.5),
        }
    }

    /// Single-head layer whose every projection is the identity
    ///
    /// Requires `num_heads == 1` and all dimensions equal.
    pub fn identity(dim: usize) -> Self {
        let eye = identity_matrix::<W>(dim);
        let zero = vec![B::from_f64(0.0); dim];
        OwnedLayer {
            query_weight: eye.clone(),
            query_bias: zero.clone(),
            key_weight: eye.clone(),
            key_bias: zero.clone(),
            value_weight: eye.clone(),
            value_bias: zero.clone(),
            output_weight: eye,
            output_bias: zero,
        }
    }

    pub fn view(&self) -> LayerWeights<'_, W, B> {
        LayerWeights {
            query_weight: &self.query_weight,
            query_bias: &self.query_bias,
            key_weight: &self.key_weight,
            key_bias: &self.key_bias,
            value_weight: &self.value_weight,
            value_bias: &self.value_bias,
            output_weight: &self.output_weight,
            output_bias: &self.output_bias,
        }
    }

    /// Convert every parameter to other element types
    pub fn cast<W2: Element, B2: Element>(&self) -> OwnedLayer<W2, B2> {
        fn conv<S: Element, D: Element>(v: &[S]) -> Vec<D> {
            v.iter().map(|&x| D::from_f64(x.to_f64())).collect()
        }
        OwnedLayer {
            query_weight: conv(&self.query_weight),
            query_bias: conv(&self.query_bias),
            key_weight: conv(&self.key_weight),
            key_bias: conv(&self.key_bias),
            value_weight: conv(&self.value_weight),
            value_bias: conv(&self.value_bias),
            output_weight: conv(&self.output_weight),
            output_bias: conv(&self.output_bias),
        }
    }
}

/// Row-major `dim × dim` identity
pub fn identity_matrix<T: Element>(dim: usize) -> Vec<T> {
    let mut m = vec![T::from_f64(0.0); dim * dim];
    for i in 0..dim {
        m[i * dim + i] = T::from_f64(1.0);
    }
    m
}

/// Random `[seq_len, feature_dim]` activations in `[-1, 1]`
pub fn random_source<T: Element>(config: &MhaConfig, rng: &mut SimpleRng) -> Vec<T> {
    rng.fill(config.source_len(), 1.0)
}
