//! Head concatenation and the final output projection

use crate::config::WeightLayout;
use crate::error::{MhaError, MhaResult};
use crate::kernels::Dense;
use crate::numeric::{Accumulator, Element};
use crate::tensor::Matrix;
use crate::weights::Projection;

/// Joins per-head contexts and applies the output projection
#[derive(Debug, Clone, Copy)]
pub struct OutputProjection {
    layout: WeightLayout,
    dense: Dense,
}

impl OutputProjection {
    pub fn new(layout: WeightLayout, dense: Dense) -> Self {
        OutputProjection { layout, dense }
    }

    /// ConcatContext `[seq_len, num_heads * head_dim_value]`
    ///
    /// `contexts[h]` lands in columns `h * head_dim_value ..`; the order of
    /// the slice is the head order, independent of completion order.
    pub fn concat<A: Accumulator>(
        &self,
        contexts: &[&Matrix<A>],
        seq_len: usize,
    ) -> MhaResult<Matrix<A>> {
        if contexts.len() != self.layout.num_heads {
            return Err(MhaError::ShapeMismatch {
                tensor: "head contexts".to_string(),
                expected: self.layout.num_heads,
                actual: contexts.len(),
            });
        }
        let d_v = self.layout.head_dim_value;
        for ctx in contexts {
            if ctx.rows() != seq_len || ctx.cols() != d_v {
                return Err(MhaError::ShapeMismatch {
                    tensor: "head context".to_string(),
                    expected: seq_len * d_v,
                    actual: ctx.len(),
                });
            }
        }

        let width = self.layout.num_heads * d_v;
        let mut concat = Matrix::zeros(seq_len, width);
        if width == 0 {
            return Ok(concat);
        }
        for (p, out_row) in concat.as_mut_slice().chunks_exact_mut(width).enumerate() {
            for (h, ctx) in contexts.iter().enumerate() {
                out_row[self.layout.concat_range(h)].copy_from_slice(ctx.row(p));
            }
        }
        Ok(concat)
    }

    /// One ConcatContext row assembled from per-head context rows
    pub fn concat_row<A: Accumulator>(&self, head_rows: &[Vec<A>]) -> Vec<A> {
        let mut row = Vec::with_capacity(self.layout.num_heads * self.layout.head_dim_value);
        for head_row in head_rows {
            row.extend_from_slice(head_row);
        }
        row
    }

    /// `Output = ConcatContext · OutputWeight + OutputBias`
    pub fn project<W, B, A>(
        &self,
        concat: &Matrix<A>,
        proj: &Projection<'_, W, B>,
    ) -> MhaResult<Matrix<A>>
    where
        W: Element,
        B: Element,
        A: Accumulator,
    {
        if concat.cols() != proj.in_dim {
            return Err(MhaError::ShapeMismatch {
                tensor: "concat context width".to_string(),
                expected: proj.in_dim,
                actual: concat.cols(),
            });
        }
        Ok(self
            .dense
            .project_rows(concat.as_slice(), concat.rows(), proj))
    }

    /// Output row of one position
    pub fn project_row<W, B, A>(&self, concat_row: &[A], proj: &Projection<'_, W, B>) -> Vec<A>
    where
        W: Element,
        B: Element,
        A: Accumulator,
    {
        self.dense.project_row(concat_row, proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(num_heads: usize, d_v: usize, feature_dim: usize) -> WeightLayout {
        WeightLayout {
            num_heads,
            head_dim_key: 1,
            head_dim_value: d_v,
            feature_dim,
        }
    }

    #[test]
    fn test_concat_places_heads_in_order() {
        let out = OutputProjection::new(layout(2, 2, 1), Dense::default());
        let h0 = Matrix::from_vec(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let h1 = Matrix::from_vec(2, 2, vec![5.0f32, 6.0, 7.0, 8.0]).unwrap();

        let concat = out.concat(&[&h0, &h1], 2).unwrap();
        assert_eq!(concat.row(0), &[1.0, 2.0, 5.0, 6.0]);
        assert_eq!(concat.row(1), &[3.0, 4.0, 7.0, 8.0]);

        let row = out.concat_row(&[h0.row(1).to_vec(), h1.row(1).to_vec()]);
        assert_eq!(row.as_slice(), concat.row(1));
    }

    #[test]
    fn test_concat_rejects_wrong_head_count() {
        let out = OutputProjection::new(layout(2, 1, 1), Dense::default());
        let h0 = Matrix::from_vec(1, 1, vec![1.0f64]).unwrap();
        assert!(out.concat(&[&h0], 1).is_err());
    }

    #[test]
    fn test_project_applies_bias() {
        let out = OutputProjection::new(layout(2, 1, 1), Dense::default());
        let concat = Matrix::from_vec(1, 2, vec![2.0f64, 3.0]).unwrap();
        let w = [10.0f64, 100.0];
        let b = [0.5f64];
        let proj = Projection::new(&w, &b, 2, 1).unwrap();

        let y = out.project(&concat, &proj).unwrap();
        assert_eq!(y.as_slice(), &[320.5]);
        assert_eq!(out.project_row(concat.row(0), &proj), vec![320.5]);
    }
}
