//! Common test utilities
//!
//! - [`SimpleRng`]: deterministic generator so failures reproduce
//! - [`OwnedLayer`]: owned parameter arrays with a [`LayerWeights`] view
//! - temp-file helpers for configuration loading tests

#![allow(dead_code)]

mod fixtures;
mod tempfile_helpers;

pub use fixtures::*;
pub use tempfile_helpers::*;

use mhaforge::Element;

/// Simple deterministic random number generator for testing
pub struct SimpleRng {
    seed: u32,
}

impl SimpleRng {
    pub fn new(seed: u32) -> Self {
        SimpleRng { seed }
    }

    /// Uniform in `[0, 1]`
    pub fn gen_f32(&mut self) -> f32 {
        self.seed = self.seed.wrapping_mul(1103515245).wrapping_add(12345);
        (self.seed as f32) / (u32::MAX as f32)
    }

    /// Uniform in `[lo, hi]`
    pub fn gen_range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.gen_f32()
    }

    /// `n` values uniform in `[-scale, scale]`, converted to `T`
    pub fn fill<T: Element>(&mut self, n: usize, scale: f32) -> Vec<T> {
        (0..n)
            .map(|_| T::from_f64(self.gen_range(-scale, scale) as f64))
            .collect()
    }
}

/// Assert two slices agree element-wise within `tol`
pub fn assert_close<T: Element>(actual: &[T], expected: &[T], tol: f64, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{}: length differs", what);
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        let (a, e) = (a.to_f64(), e.to_f64());
        assert!(
            (a - e).abs() <= tol,
            "{}: element {} differs: {} vs {} (tol {})",
            what,
            i,
            a,
            e,
            tol
        );
    }
}
