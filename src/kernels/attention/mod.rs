//! Attention kernel implementations
//!
//! Provides the per-head numeric kernels of scaled dot-product attention:
//! - QK^T matrix multiplication with the `1/sqrt(d_k)` scale folded in
//! - Row-wise softmax with numerical stability (exact and table-driven)
//! - Attention-weighted value aggregation

pub mod matmul;
pub mod softmax;

// Matmul exports
pub use matmul::{qkt_matmul, scaled_scores_row, weighted_matmul, weighted_row};

// Softmax exports
pub use softmax::{build_softmax, LookupSoftmax, SoftmaxKernel, StableSoftmax};
