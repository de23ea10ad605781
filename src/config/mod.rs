//! Configuration for the multi-head attention pipeline
//!
//! [`MhaConfig`] fixes every tensor extent for the lifetime of a
//! [`crate::MultiHeadAttention`] instance, together with the numeric
//! representation and the execution knobs (time-multiplexing degree,
//! fully-parallel vs streaming schedule, dense and softmax kernels).
//!
//! Configurations are normally produced by a model conversion front end and
//! loaded from JSON:
//!
//! ```ignore
//! let config = MhaConfig::from_json_file("layer0.json")?;
//! ```

use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::{io_context, MhaResult};
use crate::numeric::NumericKind;

/// Schedule used to run one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Every stage materializes its full tensor; heads and rows run on a worker pool
    #[default]
    FullyParallel,
    /// Stages run concurrently, connected by bounded row channels
    Streaming,
}

/// Dense kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenseStrategy {
    /// One accumulation chain per output element
    #[default]
    Latency,
    /// Multiplications time-multiplexed over `resource_sharing_factor` rounds
    Resource,
}

/// Softmax kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SoftmaxKind {
    /// Max-subtracted exponentials, computed exactly
    #[default]
    Stable,
    /// Max-subtracted exponentials read from a precomputed table
    Lookup {
        /// Number of table entries
        table_size: usize,
        /// Width of the tabulated interval `[0, input_range)` of `max - x`
        input_range: f64,
    },
}

/// Numeric representation of weights, biases and accumulators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericSpec {
    pub weight: NumericKind,
    pub bias: NumericKind,
    pub accumulator: NumericKind,
}

impl Default for NumericSpec {
    fn default() -> Self {
        NumericSpec {
            weight: NumericKind::F32,
            bias: NumericKind::F32,
            accumulator: NumericKind::F32,
        }
    }
}

/// Configuration for one multi-head attention layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MhaConfig {
    /// Number of attention heads
    pub num_heads: usize,

    /// Width of the per-head Query/Key vectors
    pub head_dim_key: usize,

    /// Width of the per-head Value/Context vectors
    pub head_dim_value: usize,

    /// Width of the input and output activations
    pub feature_dim: usize,

    /// Number of positions per invocation
    pub seq_len: usize,

    /// Weight, bias and accumulator types
    pub numeric: NumericSpec,

    /// Time-multiplexing degree (>= 1)
    pub resource_sharing_factor: usize,

    /// Fully-parallel or streaming schedule
    pub mode: ExecutionMode,

    /// Dense kernel used by every projection
    pub dense_strategy: DenseStrategy,

    /// Softmax kernel used by the scoring stage
    pub softmax: SoftmaxKind,

    /// Capacity of each inter-stage channel in streaming mode
    pub stream_depth: usize,
}

impl Default for MhaConfig {
    fn default() -> Self {
        MhaConfig {
            num_heads: 4,
            head_dim_key: 16,
            head_dim_value: 16,
            feature_dim: 64,
            seq_len: 32,
            numeric: NumericSpec::default(),
            resource_sharing_factor: 1,
            mode: ExecutionMode::FullyParallel,
            dense_strategy: DenseStrategy::Latency,
            softmax: SoftmaxKind::Stable,
            stream_depth: 2,
        }
    }
}

impl MhaConfig {
    /// Create a config with the given extents and default knobs
    pub fn new(
        num_heads: usize,
        head_dim_key: usize,
        head_dim_value: usize,
        feature_dim: usize,
        seq_len: usize,
    ) -> Self {
        MhaConfig {
            num_heads,
            head_dim_key,
            head_dim_value,
            feature_dim,
            seq_len,
            ..Default::default()
        }
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> MhaResult<Self> {
        let config: MhaConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MhaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| io_context(e, &format!("reading {}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> MhaResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_head_dims(mut self, head_dim_key: usize, head_dim_value: usize) -> Self {
        self.head_dim_key = head_dim_key;
        self.head_dim_value = head_dim_value;
        self
    }

    pub fn with_feature_dim(mut self, feature_dim: usize) -> Self {
        self.feature_dim = feature_dim;
        self
    }

    pub fn with_seq_len(mut self, seq_len: usize) -> Self {
        self.seq_len = seq_len;
        self
    }

    pub fn with_numeric(mut self, numeric: NumericSpec) -> Self {
        self.numeric = numeric;
        self
    }

    pub fn with_resource_sharing_factor(mut self, factor: usize) -> Self {
        self.resource_sharing_factor = factor;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dense_strategy(mut self, strategy: DenseStrategy) -> Self {
        self.dense_strategy = strategy;
        self
    }

    pub fn with_softmax(mut self, softmax: SoftmaxKind) -> Self {
        self.softmax = softmax;
        self
    }

    pub fn with_stream_depth(mut self, depth: usize) -> Self {
        self.stream_depth = depth;
        self
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> MhaResult<()> {
        let extents = [
            ("num_heads", self.num_heads),
            ("head_dim_key", self.head_dim_key),
            ("head_dim_value", self.head_dim_value),
            ("feature_dim", self.feature_dim),
            ("seq_len", self.seq_len),
        ];
        for (name, value) in extents {
            if value == 0 {
                return Err(config_error!("{} must be > 0", name));
            }
        }

        let head_dim_max = self.head_dim_key.max(self.head_dim_value);
        let products = [
            ("seq_len * feature_dim", [self.seq_len, self.feature_dim, 1]),
            ("seq_len * seq_len", [self.seq_len, self.seq_len, 1]),
            (
                "num_heads * feature_dim * head_dim",
                [self.num_heads, self.feature_dim, head_dim_max],
            ),
            (
                "seq_len * num_heads * head_dim_value",
                [self.seq_len, self.num_heads, self.head_dim_value],
            ),
        ];
        for (name, factors) in products {
            if checked_product(&factors).is_none() {
                return Err(config_error!("{} overflows usize", name));
            }
        }

        if self.resource_sharing_factor == 0 {
            return Err(config_error!("resource_sharing_factor must be >= 1"));
        }
        if self.stream_depth == 0 {
            return Err(config_error!("stream_depth must be >= 1"));
        }
        if !self.numeric.accumulator.is_accumulator() {
            return Err(config_error!(
                "accumulator type must be f32 or f64, got {}",
                self.numeric.accumulator
            ));
        }
        if let SoftmaxKind::Lookup {
            table_size,
            input_range,
        } = self.softmax
        {
            if table_size < 2 {
                return Err(config_error!(
                    "softmax table_size must be >= 2, got {}",
                    table_size
                ));
            }
            if !(input_range.is_finite() && input_range > 0.0) {
                return Err(config_error!(
                    "softmax input_range must be finite and > 0, got {}",
                    input_range
                ));
            }
        }
        Ok(())
    }

    /// Element count of each source tensor (`seq_len * feature_dim`)
    pub fn source_len(&self) -> usize {
        self.seq_len * self.feature_dim
    }

    /// Element count of the output tensor (`seq_len * feature_dim`)
    pub fn output_len(&self) -> usize {
        self.seq_len * self.feature_dim
    }

    /// Width of one ConcatContext row
    pub fn concat_width(&self) -> usize {
        self.num_heads * self.head_dim_value
    }

    /// Attention score scale `1 / sqrt(head_dim_key)`
    pub fn score_scale(&self) -> f64 {
        1.0 / (self.head_dim_key as f64).sqrt()
    }

    /// Heads grouped onto one worker: `ceil(num_heads / resource_sharing_factor)`
    pub fn head_groups(&self) -> usize {
        self.num_heads
            .div_ceil(self.resource_sharing_factor.max(1))
            .max(1)
    }

    /// Worker threads for the fully-parallel schedule
    ///
    /// One worker per head group, capped at the number of logical CPUs.
    pub fn worker_count(&self) -> usize {
        self.head_groups().min(num_cpus::get().max(1))
    }

    /// Offset arithmetic of the flattened weight arrays
    pub fn layout(&self) -> WeightLayout {
        WeightLayout {
            num_heads: self.num_heads,
            head_dim_key: self.head_dim_key,
            head_dim_value: self.head_dim_value,
            feature_dim: self.feature_dim,
        }
    }
}

fn checked_product(factors: &[usize]) -> Option<usize> {
    factors.iter().try_fold(1usize, |acc, &f| acc.checked_mul(f))
}

/// Per-head offsets into the flattened weight and bias arrays
///
/// Query/Key weights are `[head][feature_dim][head_dim_key]`, Value weights
/// `[head][feature_dim][head_dim_value]`, biases `[head][head_dim]`, and the
/// output weight `[head][head_dim_value][feature_dim]`. Head `h` always
/// starts at `h * stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightLayout {
    pub num_heads: usize,
    pub head_dim_key: usize,
    pub head_dim_value: usize,
    pub feature_dim: usize,
}

impl WeightLayout {
    /// Elements per head in the Query and Key weight arrays
    pub fn key_weight_stride(&self) -> usize {
        self.feature_dim * self.head_dim_key
    }

    /// Elements per head in the Value weight array
    pub fn value_weight_stride(&self) -> usize {
        self.feature_dim * self.head_dim_value
    }

    /// Elements per head in the output weight array
    pub fn output_weight_stride(&self) -> usize {
        self.head_dim_value * self.feature_dim
    }

    pub fn query_weight_range(&self, head: usize) -> Range<usize> {
        let stride = self.key_weight_stride();
        head * stride..(head + 1) * stride
    }

    pub fn key_weight_range(&self, head: usize) -> Range<usize> {
        self.query_weight_range(head)
    }

    pub fn value_weight_range(&self, head: usize) -> Range<usize> {
        let stride = self.value_weight_stride();
        head * stride..(head + 1) * stride
    }

    pub fn query_bias_range(&self, head: usize) -> Range<usize> {
        self.key_bias_range(head)
    }

    pub fn key_bias_range(&self, head: usize) -> Range<usize> {
        head * self.head_dim_key..(head + 1) * self.head_dim_key
    }

    pub fn value_bias_range(&self, head: usize) -> Range<usize> {
        head * self.head_dim_value..(head + 1) * self.head_dim_value
    }

    /// Rows of the output weight (and columns of ConcatContext) owned by `head`
    pub fn concat_range(&self, head: usize) -> Range<usize> {
        head * self.head_dim_value..(head + 1) * self.head_dim_value
    }

    pub fn output_weight_range(&self, head: usize) -> Range<usize> {
        let stride = self.output_weight_stride();
        head * stride..(head + 1) * stride
    }

    /// Total length of the Query or Key weight array
    pub fn key_weight_len(&self) -> usize {
        self.num_heads * self.key_weight_stride()
    }

    pub fn value_weight_len(&self) -> usize {
        self.num_heads * self.value_weight_stride()
    }

    pub fn key_bias_len(&self) -> usize {
        self.num_heads * self.head_dim_key
    }

    pub fn value_bias_len(&self) -> usize {
        self.num_heads * self.head_dim_value
    }

    pub fn output_weight_len(&self) -> usize {
        self.num_heads * self.output_weight_stride()
    }

    pub fn output_bias_len(&self) -> usize {
        self.feature_dim
    }
}
