//! Dense (affine) projection kernels
//!
//! `output[j] = bias[j] + sum_k input[k] * weight[k, j]` with a row-major
//! `in_dim × out_dim` weight. Two accumulation orders are provided:
//!
//! - **Latency**: one accumulation chain per output element, `k` ascending.
//! - **Resource**: the `in_dim * out_dim` multiplications are split into
//!   `reuse_factor` rounds. Round `r` handles flattened weight indices
//!   `r, r + R, r + 2R, ...`, each feeding output element `index % out_dim`.
//!   This is the schedule of a multiplier array shared `R` times.
//!
//! Both produce the same value up to floating-point rounding order.

use rayon::prelude::*;

use crate::config::DenseStrategy;
use crate::numeric::{Accumulator, Element};
use crate::tensor::Matrix;
use crate::weights::Projection;

/// Latency-strategy dense kernel for one input row
pub fn dense_latency<D, W, B, A>(input: &[D], proj: &Projection<'_, W, B>, out: &mut [A])
where
    D: Element,
    W: Element,
    B: Element,
    A: Accumulator,
{
    debug_assert_eq!(input.len(), proj.in_dim);
    debug_assert_eq!(out.len(), proj.out_dim);

    let n_out = proj.out_dim;
    for (j, o) in out.iter_mut().enumerate() {
        let mut acc = A::ZERO;
        for (k, &x) in input.iter().enumerate() {
            acc += A::widen(x) * A::widen(proj.weight[k * n_out + j]);
        }
        *o = acc + A::widen(proj.bias[j]);
    }
}

/// Resource-strategy dense kernel for one input row
pub fn dense_resource<D, W, B, A>(
    input: &[D],
    proj: &Projection<'_, W, B>,
    reuse_factor: usize,
    out: &mut [A],
) where
    D: Element,
    W: Element,
    B: Element,
    A: Accumulator,
{
    debug_assert_eq!(input.len(), proj.in_dim);
    debug_assert_eq!(out.len(), proj.out_dim);

    let n_out = proj.out_dim;
    let total = proj.in_dim * n_out;
    if total == 0 {
        for (o, &b) in out.iter_mut().zip(proj.bias) {
            *o = A::widen(b);
        }
        return;
    }

    let rf = reuse_factor.clamp(1, total);
    let block_factor = total.div_ceil(rf);

    out.iter_mut().for_each(|o| *o = A::ZERO);
    for round in 0..rf {
        for m in 0..block_factor {
            let w_index = round + rf * m;
            if w_index >= total {
                break;
            }
            let k = w_index / n_out;
            let j = w_index % n_out;
            out[j] += A::widen(input[k]) * A::widen(proj.weight[w_index]);
        }
    }
    for (o, &b) in out.iter_mut().zip(proj.bias) {
        *o += A::widen(b);
    }
}

/// Dense kernel selection shared by every projection of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dense {
    pub strategy: DenseStrategy,
    pub reuse_factor: usize,
}

impl Default for Dense {
    fn default() -> Self {
        Dense {
            strategy: DenseStrategy::Latency,
            reuse_factor: 1,
        }
    }
}

impl Dense {
    pub fn new(strategy: DenseStrategy, reuse_factor: usize) -> Self {
        Dense {
            strategy,
            reuse_factor: reuse_factor.max(1),
        }
    }

    /// Project one row into `out`
    #[inline]
    pub fn project_row_into<D, W, B, A>(
        &self,
        input: &[D],
        proj: &Projection<'_, W, B>,
        out: &mut [A],
    ) where
        D: Element,
        W: Element,
        B: Element,
        A: Accumulator,
    {
        match self.strategy {
            DenseStrategy::Latency => dense_latency(input, proj, out),
            DenseStrategy::Resource => dense_resource(input, proj, self.reuse_factor, out),
        }
    }

    /// Project one row into a fresh vector
    pub fn project_row<D, W, B, A>(&self, input: &[D], proj: &Projection<'_, W, B>) -> Vec<A>
    where
        D: Element,
        W: Element,
        B: Element,
        A: Accumulator,
    {
        let mut out = vec![A::ZERO; proj.out_dim];
        self.project_row_into(input, proj, &mut out);
        out
    }

    /// Project every row of a row-major `rows × in_dim` buffer
    ///
    /// Rows are independent and are distributed over the current rayon pool.
    pub fn project_rows<D, W, B, A>(
        &self,
        input: &[D],
        rows: usize,
        proj: &Projection<'_, W, B>,
    ) -> Matrix<A>
    where
        D: Element,
        W: Element,
        B: Element,
        A: Accumulator,
    {
        debug_assert_eq!(input.len(), rows * proj.in_dim);

        let mut output = Matrix::zeros(rows, proj.out_dim);
        if proj.out_dim == 0 {
            return output;
        }
        output
            .as_mut_slice()
            .par_chunks_mut(proj.out_dim)
            .enumerate()
            .for_each(|(p, out_row)| {
                let in_row = &input[p * proj.in_dim..(p + 1) * proj.in_dim];
                self.project_row_into(in_row, proj, out_row);
            });
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn proj_2x3<'a>(w: &'a [f32], b: &'a [f32]) -> Projection<'a, f32, f32> {
        Projection::new(w, b, 2, 3).unwrap()
    }

    #[test]
    fn test_dense_latency_basic() {
        // W = [[1, 2, 3], [4, 5, 6]], b = [0.5, -1, 0]
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [0.5, -1.0, 0.0];
        let proj = proj_2x3(&w, &b);

        let mut out = [0.0f32; 3];
        dense_latency(&[1.0f32, 2.0], &proj, &mut out);
        assert_eq!(out, [9.5, 11.0, 15.0]);
    }

    #[test]
    fn test_dense_resource_matches_latency() {
        let w: Vec<f32> = (0..12).map(|i| i as f32 * 0.25 - 1.0).collect();
        let b = [0.1f32, 0.2, 0.3];
        let proj = Projection::new(&w, &b, 4, 3).unwrap();
        let x = [0.5f32, -1.5, 2.0, 0.75];

        let mut expected = [0.0f32; 3];
        dense_latency(&x, &proj, &mut expected);

        for rf in [1, 2, 3, 5, 12, 40] {
            let mut out = [0.0f32; 3];
            dense_resource(&x, &proj, rf, &mut out);
            for (o, e) in out.iter().zip(expected.iter()) {
                assert!((o - e).abs() < 1e-5, "rf={} got {} expected {}", rf, o, e);
            }
        }
    }

    #[test]
    fn test_dense_is_affine() {
        let w = [0.3f64, -0.7, 1.1, 0.2, 0.9, -0.4];
        let b = [1.0f64, 2.0, -3.0];
        let proj = Projection::new(&w, &b, 2, 3).unwrap();
        let dense = Dense::default();

        let a = [0.25f64, -2.0];
        let c = [1.5f64, 0.5];
        let sum = [a[0] + c[0], a[1] + c[1]];

        let pa: Vec<f64> = dense.project_row(&a, &proj);
        let pc: Vec<f64> = dense.project_row(&c, &proj);
        let ps: Vec<f64> = dense.project_row(&sum, &proj);
        for j in 0..3 {
            assert!((pa[j] + pc[j] - b[j] - ps[j]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dense_half_weights() {
        let w: Vec<f16> = [1.0f32, 0.0, 0.0, 1.0].iter().map(|&v| f16::from_f32(v)).collect();
        let b = [f16::from_f32(0.5), f16::from_f32(-0.5)];
        let proj = Projection::new(&w, &b, 2, 2).unwrap();

        let out: Vec<f32> = Dense::default().project_row(&[3.0f32, 4.0], &proj);
        assert_eq!(out, vec![3.5, 3.5]);
    }

    #[test]
    fn test_project_rows_matches_row_by_row() {
        let w: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let b = [1.0f32, 1.0, 1.0];
        let proj = proj_2x3(&w, &b);
        let input = [1.0f32, 0.0, 0.0, 1.0, 2.0, -1.0];

        let dense = Dense::new(DenseStrategy::Resource, 2);
        let m: Matrix<f32> = dense.project_rows(&input, 3, &proj);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 3);
        for p in 0..3 {
            let row: Vec<f32> = dense.project_row(&input[p * 2..p * 2 + 2], &proj);
            assert_eq!(m.row(p), row.as_slice());
        }
        assert_eq!(m.row(0), &[1.0, 2.0, 3.0]);
    }
}
