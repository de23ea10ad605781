//! Row-major matrix container
//!
//! Every intermediate of the pipeline (Query, Key, Value, AttnWeights,
//! Context, ConcatContext, Output) is a freshly allocated [`Matrix`] that is
//! never mutated after the stage producing it returns.

use crate::error::{MhaError, MhaResult};
use crate::numeric::Element;

/// Owned row-major matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    /// Zero-filled matrix
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    /// Wrap a flattened buffer, checking its length against `rows * cols`
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> MhaResult<Self> {
        if data.len() != rows * cols {
            return Err(MhaError::ShapeMismatch {
                tensor: format!("matrix {}x{}", rows, cols),
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Build from equally sized rows
    pub fn from_rows(cols: usize, rows: Vec<Vec<T>>) -> MhaResult<Self> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(MhaError::ShapeMismatch {
                    tensor: format!("matrix row {}", i),
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Matrix {
            rows: n,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow row `i`
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Element at `(i, j)`
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.data[i * self.cols + j]
    }

    /// Iterate over rows in order
    pub fn rows_iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        // chunks_exact(0) panics, and a zero-width matrix has no data anyway
        self.data.chunks_exact(self.cols.max(1)).take(self.rows)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Convert every element into another numeric type
    pub fn cast<R: Element>(&self) -> Matrix<R> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| R::from_f64(v.to_f64())).collect(),
        }
    }

    /// Largest absolute element-wise difference to `other`, in f64
    pub fn max_abs_diff(&self, other: &Matrix<T>) -> MhaResult<f64> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(MhaError::ShapeMismatch {
                tensor: format!("matrix {}x{}", self.rows, self.cols),
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a.to_f64() - b.to_f64()).abs())
            .fold(0.0, f64::max))
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_shape_check() {
        let m = Matrix::from_vec(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.get(0, 2), 3.0);

        assert!(Matrix::from_vec(2, 3, vec![1.0f32; 5]).is_err());
    }

    #[test]
    fn test_from_rows() {
        let m = Matrix::from_rows(2, vec![vec![1.0f64, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.as_slice(), &[1.0, 2.0, 3.0, 4.0]);

        let err = Matrix::from_rows(2, vec![vec![1.0f64, 2.0], vec![3.0]]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rows_iter_zero_width() {
        let m: Matrix<f32> = Matrix::zeros(3, 0);
        assert_eq!(m.rows_iter().count(), 0);

        let m: Matrix<f32> = Matrix::zeros(3, 2);
        assert_eq!(m.rows_iter().count(), 3);
    }

    #[test]
    fn test_cast_and_diff() {
        let m = Matrix::from_vec(1, 2, vec![0.5f64, -1.25]).unwrap();
        let c: Matrix<f32> = m.cast();
        assert_eq!(c.as_slice(), &[0.5f32, -1.25]);

        let other = Matrix::from_vec(1, 2, vec![0.5f64, -1.0]).unwrap();
        assert!((m.max_abs_diff(&other).unwrap() - 0.25).abs() < 1e-12);
    }
}
