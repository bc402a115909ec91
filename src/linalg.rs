/// Sparsely Packed symmetric Matrix
pub mod sparse_matrix;

pub use sparse_matrix::SparseMatrix;

use nalgebra::DMatrix;

/// A square linear operator
pub trait Operator {
    fn size(&self) -> usize;

    /// `y = A x`
    fn mult(&self, x: &[f64], y: &mut [f64]);

    /// `y = A^T x`; symmetric operators keep the default
    fn mult_transpose(&self, x: &[f64], y: &mut [f64]) {
        self.mult(x, y)
    }
}

/// `A` with the rows and columns of `constrained` replaced by the identity
pub struct ConstrainedOperator<'a, O: Operator> {
    inner: &'a O,
    constrained: &'a [usize],
}

impl<'a, O: Operator> ConstrainedOperator<'a, O> {
    pub fn new(inner: &'a O, constrained: &'a [usize]) -> Self {
        Self { inner, constrained }
    }

    /// Zero the constrained entries of a right-hand side
    pub fn eliminate_rhs(&self, rhs: &mut [f64]) {
        for dof in self.constrained {
            rhs[*dof] = 0.0;
        }
    }
}

impl<O: Operator> Operator for ConstrainedOperator<'_, O> {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn mult(&self, x: &[f64], y: &mut [f64]) {
        let mut free = x.to_vec();
        for dof in self.constrained {
            free[*dof] = 0.0;
        }
        self.inner.mult(&free, y);
        for dof in self.constrained {
            y[*dof] = x[*dof];
        }
    }
}

/// Outcome of a [CgSolver] run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CgReport {
    pub iterations: usize,
    pub converged: bool,
    /// Preconditioned residual norm at exit
    pub final_norm: f64,
}

/// Jacobi-preconditioned Conjugate Gradient for symmetric positive definite operators
#[derive(Clone, Copy, Debug)]
pub struct CgSolver {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iter: usize,
}

impl Default for CgSolver {
    fn default() -> Self {
        Self {
            rel_tol: 1e-8,
            abs_tol: 0.0,
            max_iter: 300,
        }
    }
}

impl CgSolver {
    /// Solve `A x = b` starting from `x = 0`
    ///
    /// `inverse_diagonal` holds the Jacobi preconditioner; `None` runs plain CG. Failing to reach
    /// the tolerance is reported through [CgReport::converged], not as an error.
    ///
    /// ```
    /// use lagrangian_hydro::linalg::{CgSolver, SparseMatrix};
    ///
    /// let mut a = SparseMatrix::new(2);
    /// a.insert([0, 0], 4.0);
    /// a.insert([0, 1], 1.0);
    /// a.insert([1, 1], 3.0);
    ///
    /// let mut x = [0.0; 2];
    /// let report = CgSolver::default().solve(&a, None, &[1.0, 2.0], &mut x);
    /// assert!(report.converged);
    /// assert!((x[0] - 1.0 / 11.0).abs() < 1e-8);
    /// assert!((x[1] - 7.0 / 11.0).abs() < 1e-8);
    /// ```
    pub fn solve<O: Operator + ?Sized>(
        &self,
        op: &O,
        inverse_diagonal: Option<&[f64]>,
        b: &[f64],
        x: &mut [f64],
    ) -> CgReport {
        let n = op.size();
        assert_eq!(b.len(), n, "right-hand side has the wrong size!");
        assert_eq!(x.len(), n, "solution vector has the wrong size!");

        let precondition = |r: &[f64], z: &mut [f64]| match inverse_diagonal {
            Some(inv) => z.iter_mut().zip(r.iter().zip(inv)).for_each(|(z, (r, d))| *z = r * d),
            None => z.copy_from_slice(r),
        };

        x.fill(0.0);
        let mut r = b.to_vec();
        let mut z = vec![0.0; n];
        precondition(&r, &mut z);
        let mut d = z.clone();
        let mut ad = vec![0.0; n];

        let mut nom = dot(&r, &z);
        let nom0 = nom;
        let threshold = (self.rel_tol * self.rel_tol * nom0).max(self.abs_tol * self.abs_tol);

        if nom <= threshold || nom0 == 0.0 {
            return CgReport {
                iterations: 0,
                converged: true,
                final_norm: nom.max(0.0).sqrt(),
            };
        }

        for iteration in 1..=self.max_iter {
            op.mult(&d, &mut ad);
            let den = dot(&d, &ad);
            if den <= 0.0 {
                log::warn!("CG: operator is not positive definite (d.Ad = {:e})", den);
                return CgReport {
                    iterations: iteration,
                    converged: false,
                    final_norm: nom.max(0.0).sqrt(),
                };
            }

            let alpha = nom / den;
            axpy(alpha, &d, x);
            axpy(-alpha, &ad, &mut r);

            precondition(&r, &mut z);
            let betanom = dot(&r, &z);
            if betanom <= threshold {
                return CgReport {
                    iterations: iteration,
                    converged: true,
                    final_norm: betanom.max(0.0).sqrt(),
                };
            }

            let beta = betanom / nom;
            d.iter_mut().zip(z.iter()).for_each(|(d, z)| *d = z + beta * *d);
            nom = betanom;
        }

        log::warn!(
            "CG: no convergence after {} iterations (|r| = {:e})",
            self.max_iter,
            nom.max(0.0).sqrt()
        );
        CgReport {
            iterations: self.max_iter,
            converged: false,
            final_norm: nom.max(0.0).sqrt(),
        }
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// `y += alpha * x`
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.iter_mut().zip(x).for_each(|(y, x)| *y += alpha * x);
}

/// Inverse of a symmetric positive definite dense matrix via Cholesky Decomposition
pub fn spd_inverse(matrix: DMatrix<f64>) -> Option<DMatrix<f64>> {
    matrix.cholesky().map(|cholesky_decomp| cholesky_decomp.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn laplacian(n: usize) -> SparseMatrix {
        let mut a = SparseMatrix::new(n);
        for i in 0..n {
            a.insert([i, i], 2.0 + i as f64 * 0.1);
            if i + 1 < n {
                a.insert([i, i + 1], -1.0);
            }
        }
        a.finalize();
        a
    }

    #[test]
    fn preconditioned_cg_solves_spd_system() {
        let a = laplacian(50);
        let b: Vec<f64> = (0..50).map(|i| (i as f64).sin()).collect();
        let inv_diag: Vec<f64> = a.diagonal().iter().map(|d| 1.0 / d).collect();

        let mut x = vec![0.0; 50];
        let solver = CgSolver {
            rel_tol: 1e-12,
            ..Default::default()
        };
        let report = solver.solve(&a, Some(&inv_diag), &b, &mut x);
        assert!(report.converged);

        let mut ax = vec![0.0; 50];
        a.mult(&x, &mut ax);
        for (lhs, rhs) in ax.iter().zip(b.iter()) {
            assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
        }
    }

    #[test]
    fn iteration_limit_is_reported() {
        let a = laplacian(40);
        let b = vec![1.0; 40];
        let mut x = vec![0.0; 40];
        let solver = CgSolver {
            rel_tol: 1e-14,
            abs_tol: 0.0,
            max_iter: 2,
        };
        let report = solver.solve(&a, None, &b, &mut x);
        assert!(!report.converged);
        assert_eq!(report.iterations, 2);
    }

    #[test]
    fn constrained_dofs_are_identity() {
        let a = laplacian(5);
        let constrained = [0, 4];
        let op = ConstrainedOperator::new(&a, &constrained);

        let mut b = vec![1.0; 5];
        op.eliminate_rhs(&mut b);
        let mut x = vec![0.0; 5];
        let report = CgSolver {
            rel_tol: 1e-14,
            ..Default::default()
        }
        .solve(&op, None, &b, &mut x);

        assert!(report.converged);
        assert_eq!(x[0], 0.0);
        assert_eq!(x[4], 0.0);
        assert!(x[2] > 0.0);
    }

    #[test]
    fn dense_spd_inverse() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = spd_inverse(m.clone()).unwrap();
        let id = m * inv;
        assert_relative_eq!(id[(0, 1)], 0.0, epsilon = 1e-14);
        assert_relative_eq!(id[(1, 1)], 1.0, epsilon = 1e-14);
        assert!(spd_inverse(DMatrix::from_row_slice(1, 1, &[-1.0])).is_none());
    }
}
