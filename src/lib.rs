//! mhaforge - multi-head attention as a fixed-shape dataflow pipeline
//!
//! Every tensor extent is fixed by an [`MhaConfig`] when the layer is
//! built. One call to [`MultiHeadAttention::forward`] takes a query source
//! and a key/value source of shape `[seq_len, feature_dim]` and returns an
//! output of the same shape:
//!
//! ```ignore
//! use mhaforge::{LayerWeights, MhaConfig, MultiHeadAttention};
//!
//! let config = MhaConfig::from_json_file("layer.json")?;
//! let layer = MultiHeadAttention::<f32, f32, f32>::new(config)?;
//! let out = layer.forward(&x, &x, &weights)?;
//! ```

#![allow(clippy::needless_range_loop)] // Index arithmetic mirrors the tensor formulas
#![allow(clippy::type_complexity)]

pub mod attention;
pub mod config;
pub mod error;
pub mod kernels;
pub mod logging;
pub mod numeric;
pub mod tensor;
pub mod weights;

pub use attention::{
    reference_forward, ForwardOutput, HeadOutput, InvocationTrace, MultiHeadAttention,
    PipelineState,
};
pub use config::{DenseStrategy, ExecutionMode, MhaConfig, NumericSpec, SoftmaxKind, WeightLayout};
pub use error::{ErrorCategory, MhaError, MhaResult};
pub use kernels::attention::{LookupSoftmax, SoftmaxKernel, StableSoftmax};
pub use logging::{init_logging_default, init_logging_from_env, init_with_config, LoggingConfig};
pub use numeric::{Accumulator, Element, NumericKind};
pub use tensor::Matrix;
pub use weights::{LayerWeights, Projection};
