//! Linear solve for the Newton step `J * dx = -F`.
//!
//! LU decomposition with partial (row) pivoting, forward substitution, then
//! back substitution. Pivots below the threshold are recorded as singular and
//! their unknowns zero-filled instead of failing.
//!
//! Constraint graphs are rarely square, so the step is picked by shape:
//! - `m == n`: direct LU on `J`.
//! - `m > n`: normal equations `J^T J dx = -J^T F` (least squares).
//! - `m < n`: minimum-norm solution `J J^T y = -F`, `dx = J^T y`.
//!
//! All-zero rows (constraints touching no free variable) are dropped first.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::linalg::{self, Matrix};

/// Rows with a norm at or below this carry no information.
const ZERO_ROW: f64 = 1e-14;

/// In-place LU factors of a square matrix, `P A = L U`.
#[derive(Debug, Clone)]
pub struct LuDecomposition {
    lu: Matrix,
    perm: Vec<usize>,
    singular: Vec<bool>,
}

impl LuDecomposition {
    /// Factor a square matrix.
    ///
    /// A pivot is singular when its magnitude is below
    /// `pivot_threshold * max(1, max |a_ij|)`.
    pub fn factor(a: &Matrix, pivot_threshold: f64) -> Self {
        debug_assert!(a.is_square(), "LU needs a square matrix");
        let n = a.rows();
        let mut lu = a.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let mut singular = vec![false; n];
        let threshold = pivot_threshold * a.max_abs().max(1.0);

        for k in 0..n {
            let mut max_row = k;
            let mut max_val = lu[(k, k)].abs();
            for row in (k + 1)..n {
                let val = lu[(row, k)].abs();
                if val > max_val {
                    max_val = val;
                    max_row = row;
                }
            }

            if max_val.is_nan() || max_val < threshold {
                // Leave this column out of the elimination.
                singular[k] = true;
                for row in (k + 1)..n {
                    lu[(row, k)] = 0.0;
                }
                continue;
            }

            if max_row != k {
                lu.swap_rows(k, max_row);
                perm.swap(k, max_row);
            }

            let pivot = lu[(k, k)];
            for row in (k + 1)..n {
                let factor = lu[(row, k)] / pivot;
                lu[(row, k)] = factor;
                if factor == 0.0 {
                    continue;
                }
                for j in (k + 1)..n {
                    lu[(row, j)] -= factor * lu[(k, j)];
                }
            }
        }

        Self { lu, perm, singular }
    }

    pub fn singular_count(&self) -> usize {
        self.singular.iter().filter(|s| **s).count()
    }

    pub fn is_singular(&self) -> bool {
        self.singular.iter().any(|s| *s)
    }

    /// Solve `A x = b`, with `x_k = 0` for every singular pivot `k`.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.lu.rows();
        debug_assert_eq!(b.len(), n);

        // Forward substitution, L has a unit diagonal.
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = b[self.perm[i]];
            for (j, yj) in y.iter().enumerate().take(i) {
                sum -= self.lu[(i, j)] * yj;
            }
            y[i] = sum;
        }

        // Back substitution.
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            if self.singular[i] {
                continue;
            }
            let mut sum = y[i];
            for j in (i + 1)..n {
                sum -= self.lu[(i, j)] * x[j];
            }
            x[i] = sum / self.lu[(i, i)];
        }
        x
    }
}

/// How a Newton step was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepMethod {
    /// No informative rows or no free variables: zero step.
    Empty,
    Direct,
    NormalEquations,
    MinimumNorm,
}

/// A solved Newton step and its diagnostics.
#[derive(Debug, Clone)]
pub struct NewtonStep {
    pub dx: Vec<f64>,
    pub method: StepMethod,
    pub singular_pivots: usize,
    /// Rows that took part in the solve.
    pub rows_used: usize,
}

impl NewtonStep {
    fn zero(n: usize) -> Self {
        Self {
            dx: vec![0.0; n],
            method: StepMethod::Empty,
            singular_pivots: 0,
            rows_used: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.dx.iter().all(|v| *v == 0.0)
    }
}

/// Solve `J * dx = -F` for the Newton step.
pub fn solve_lu(jacobian: &Matrix, residuals: &[f64], pivot_threshold: f64) -> NewtonStep {
    let n = jacobian.cols();
    debug_assert_eq!(jacobian.rows(), residuals.len());

    let active: Vec<usize> = (0..jacobian.rows())
        .filter(|&i| linalg::norm(jacobian.row(i)) > ZERO_ROW)
        .collect();
    if n == 0 || active.is_empty() {
        return NewtonStep::zero(n);
    }

    let j = jacobian.select_rows(&active);
    let neg_f: Vec<f64> = active.iter().map(|&i| -residuals[i]).collect();
    let m = active.len();

    let (mut dx, method, lu) = if m == n {
        let lu = LuDecomposition::factor(&j, pivot_threshold);
        (lu.solve(&neg_f), StepMethod::Direct, lu)
    } else if m > n {
        let lu = LuDecomposition::factor(&j.gram(), pivot_threshold);
        let rhs = j.transpose_mul_vec(&neg_f);
        (lu.solve(&rhs), StepMethod::NormalEquations, lu)
    } else {
        let lu = LuDecomposition::factor(&j.outer_gram(), pivot_threshold);
        let y = lu.solve(&neg_f);
        (j.transpose_mul_vec(&y), StepMethod::MinimumNorm, lu)
    };

    let singular_pivots = lu.singular_count();
    if singular_pivots > 0 {
        warn!(
            singular_pivots,
            rows = m,
            cols = n,
            ?method,
            "near-singular pivots in Newton step, zero-filling affected unknowns"
        );
    }
    if !linalg::all_finite(&dx) {
        warn!(?method, "non-finite Newton step discarded");
        dx.iter_mut().for_each(|v| *v = 0.0);
    }

    NewtonStep {
        dx,
        method,
        singular_pivots,
        rows_used: m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn m(rows: usize, cols: usize, data: &[f64]) -> Matrix {
        Matrix::from_row_slice(rows, cols, data).unwrap()
    }

    #[test]
    fn test_identity() {
        let lu = LuDecomposition::factor(&Matrix::identity(3), 1e-12);
        assert!(!lu.is_singular());
        assert_eq!(lu.solve(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_needs_pivoting() {
        // Zero in the (0,0) position forces a row swap.
        let a = m(3, 3, &[0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.0]);
        let x_true = [1.0, -2.0, 3.0];
        let b = a.mul_vec(&x_true);
        let x = LuDecomposition::factor(&a, 1e-12).solve(&b);
        for (got, want) in x.iter().zip(x_true) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_singular_zero_fills() {
        // Second row is twice the first.
        let a = m(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let lu = LuDecomposition::factor(&a, 1e-12);
        assert_eq!(lu.singular_count(), 1);
        let x = lu.solve(&[2.0, 4.0]);
        assert!(x.iter().all(|v| v.is_finite()));
        // The surviving equation is still satisfied.
        assert_abs_diff_eq!(x[0] + 2.0 * x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_pivot_is_singular() {
        let a = m(1, 1, &[f64::NAN]);
        assert!(LuDecomposition::factor(&a, 1e-12).is_singular());
    }

    #[test]
    fn test_square_step() {
        let j = m(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let step = solve_lu(&j, &[2.0, -4.0], 1e-12);
        assert_eq!(step.method, StepMethod::Direct);
        assert_eq!(step.dx, vec![-1.0, 1.0]);
    }

    #[test]
    fn test_overdetermined_uses_normal_equations() {
        // Three observations of one unknown: x = 1, x = 2, x = 3.
        let j = m(3, 1, &[1.0, 1.0, 1.0]);
        let step = solve_lu(&j, &[-1.0, -2.0, -3.0], 1e-12);
        assert_eq!(step.method, StepMethod::NormalEquations);
        assert_abs_diff_eq!(step.dx[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_underdetermined_uses_minimum_norm() {
        // x + y = 2 has minimum-norm solution (1, 1).
        let j = m(1, 2, &[1.0, 1.0]);
        let step = solve_lu(&j, &[-2.0], 1e-12);
        assert_eq!(step.method, StepMethod::MinimumNorm);
        assert_abs_diff_eq!(step.dx[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(step.dx[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rows_are_dropped() {
        let j = m(2, 1, &[0.0, 2.0]);
        let step = solve_lu(&j, &[5.0, 4.0], 1e-12);
        assert_eq!(step.rows_used, 1);
        assert_eq!(step.method, StepMethod::Direct);
        assert_abs_diff_eq!(step.dx[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_information_gives_zero_step() {
        let step = solve_lu(&Matrix::zeros(2, 3), &[1.0, 1.0], 1e-12);
        assert_eq!(step.method, StepMethod::Empty);
        assert!(step.is_zero());
    }

    #[test]
    fn test_conflicting_rows_do_not_blow_up() {
        // Same row twice with different targets: rank one, square.
        let j = m(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        let step = solve_lu(&j, &[-100.0, -150.0], 1e-12);
        assert!(step.singular_pivots > 0);
        assert!(step.dx.iter().all(|v| v.is_finite()));
    }
}
