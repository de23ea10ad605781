//! Kernel implementations
//!
//! This module organizes the numeric kernels by operation type:
//! - `dense`: affine projections (latency and resource-shared strategies)
//! - `attention`: QK^T scores, row softmax, attention-weighted values

pub mod attention;
pub mod dense;

pub use dense::{dense_latency, dense_resource, Dense};
