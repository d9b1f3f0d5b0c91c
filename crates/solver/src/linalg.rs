//! Dense row-major matrix and slice-based vector helpers.
//!
//! The solver's systems are small (tens to a few hundred unknowns), so a flat
//! `Vec<f64>` with `row * cols + col` indexing is all that is needed.

use nalgebra::DMatrix;
use std::ops::{Index, IndexMut};

/// Dense matrix stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Build from row-major data. Returns `None` if the length does not match.
    pub fn from_row_slice(rows: usize, cols: usize, data: &[f64]) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self {
            rows,
            cols,
            data: data.to_vec(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for j in 0..self.cols {
            self.data.swap(a * self.cols + j, b * self.cols + j);
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// A copy holding only the listed rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut out = Self::zeros(indices.len(), self.cols);
        for (dst, &src) in indices.iter().enumerate() {
            out.row_mut(dst).copy_from_slice(self.row(src));
        }
        out
    }

    pub fn transpose(&self) -> Self {
        let mut t = Self::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                t[(j, i)] = self[(i, j)];
            }
        }
        t
    }

    /// `self * v`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.cols);
        (0..self.rows).map(|i| dot(self.row(i), v)).collect()
    }

    /// `self^T * v` without materialising the transpose.
    pub fn transpose_mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.rows);
        let mut out = vec![0.0; self.cols];
        for (i, &vi) in v.iter().enumerate() {
            axpy(vi, self.row(i), &mut out);
        }
        out
    }

    /// Gram matrix `self^T * self` (n x n).
    pub fn gram(&self) -> Self {
        let n = self.cols;
        let mut g = Self::zeros(n, n);
        for k in 0..self.rows {
            let row = self.row(k);
            for i in 0..n {
                if row[i] == 0.0 {
                    continue;
                }
                for j in i..n {
                    g.data[i * n + j] += row[i] * row[j];
                }
            }
        }
        for i in 0..n {
            for j in 0..i {
                g.data[i * n + j] = g.data[j * n + i];
            }
        }
        g
    }

    /// Outer Gram matrix `self * self^T` (m x m).
    pub fn outer_gram(&self) -> Self {
        let m = self.rows;
        let mut g = Self::zeros(m, m);
        for i in 0..m {
            for j in i..m {
                let v = dot(self.row(i), self.row(j));
                g.data[i * m + j] = v;
                g.data[j * m + i] = v;
            }
        }
        g
    }

    /// Largest absolute entry, 0.0 for an empty matrix.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn to_nalgebra(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.rows, self.cols, &self.data)
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// `y += alpha * x`.
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

pub fn scale(v: &mut [f64], alpha: f64) {
    for x in v.iter_mut() {
        *x *= alpha;
    }
}

pub fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(rows: usize, cols: usize, data: &[f64]) -> Matrix {
        Matrix::from_row_slice(rows, cols, data).unwrap()
    }

    #[test]
    fn test_from_row_slice_rejects_bad_length() {
        assert!(Matrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_mul_vec() {
        let a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.mul_vec(&[1.0, 0.0, -1.0]), vec![-2.0, -2.0]);
    }

    #[test]
    fn test_transpose_mul_vec_matches_transpose() {
        let a = m(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let v = [2.0, -1.0];
        assert_eq!(a.transpose_mul_vec(&v), a.transpose().mul_vec(&v));
    }

    #[test]
    fn test_gram_is_symmetric_product() {
        let a = m(3, 2, &[1.0, 2.0, 0.0, 1.0, 3.0, -1.0]);
        let g = a.gram();
        // column 0 . column 0 = 1 + 0 + 9
        assert_eq!(g[(0, 0)], 10.0);
        // column 0 . column 1 = 2 + 0 - 3
        assert_eq!(g[(0, 1)], -1.0);
        assert_eq!(g[(1, 0)], -1.0);
        assert_eq!(g[(1, 1)], 6.0);
    }

    #[test]
    fn test_outer_gram() {
        let a = m(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let g = a.outer_gram();
        assert_eq!(g.as_slice(), &[5.0, 11.0, 11.0, 25.0]);
    }

    #[test]
    fn test_select_and_swap_rows() {
        let mut a = m(3, 1, &[1.0, 2.0, 3.0]);
        assert_eq!(a.select_rows(&[2, 0]).as_slice(), &[3.0, 1.0]);
        a.swap_rows(0, 2);
        assert_eq!(a.as_slice(), &[3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_vector_helpers() {
        assert_eq!(norm(&[3.0, 4.0]), 5.0);
        let mut y = vec![1.0, 1.0];
        axpy(2.0, &[1.0, -1.0], &mut y);
        assert_eq!(y, vec![3.0, -1.0]);
        scale(&mut y, 0.5);
        assert_eq!(y, vec![1.5, -0.5]);
        assert!(!all_finite(&[1.0, f64::NAN]));
    }
}
