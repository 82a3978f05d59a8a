//! Restarted GMRES for the matrix-free Schur-complement solve.
//!
//! The operator is supplied as a closure computing `z = S * x`, where each
//! application performs one back-solve against the factorized bulk block and
//! one against each particle block. Orthogonalization is selectable between
//! classical and modified Gram-Schmidt (`GS_TYPE` 0 / 1).

use crate::error::ChromsolError;
use crate::linear_solver_error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orthogonalization {
    Classical,
    Modified,
}

impl Orthogonalization {
    pub fn from_config(gs_type: i64) -> Self {
        if gs_type == 0 {
            Orthogonalization::Classical
        } else {
            Orthogonalization::Modified
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GmresStats {
    pub iterations: usize,
    pub restarts: usize,
    pub residual_norm: f64,
}

#[derive(Debug, Clone)]
pub struct Gmres {
    n: usize,
    max_krylov: usize,
    max_restarts: usize,
    ortho: Orthogonalization,
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Gmres {
    pub fn new(n: usize, max_krylov: usize, ortho: Orthogonalization, max_restarts: usize) -> Self {
        let max_krylov = if max_krylov == 0 {
            n
        } else {
            max_krylov.min(n)
        };
        Self {
            n,
            max_krylov,
            max_restarts,
            ortho,
        }
    }

    pub fn matrix_size(&self) -> usize {
        self.n
    }

    /// Solves `A x = rhs` to absolute residual tolerance `tol`, starting
    /// from the initial guess in `x`.
    pub fn solve(
        &self,
        mut matvec: impl FnMut(&[f64], &mut [f64]),
        rhs: &[f64],
        x: &mut [f64],
        tol: f64,
    ) -> Result<GmresStats, ChromsolError> {
        let n = self.n;
        let m = self.max_krylov.max(1);
        let mut total_iters = 0;
        let mut residual = f64::INFINITY;
        let mut scratch = vec![0.0; n];

        for restart in 0..=self.max_restarts {
            // r = rhs - A x
            matvec(x, &mut scratch);
            let mut r: Vec<f64> = rhs.iter().zip(&scratch).map(|(b, ax)| b - ax).collect();
            let beta = norm2(&r);
            residual = beta;
            if beta <= tol {
                return Ok(GmresStats {
                    iterations: total_iters,
                    restarts: restart,
                    residual_norm: beta,
                });
            }

            for v in &mut r {
                *v /= beta;
            }
            let mut basis: Vec<Vec<f64>> = vec![r];
            let mut h_cols: Vec<Vec<f64>> = Vec::with_capacity(m);
            let mut rotations: Vec<(f64, f64)> = Vec::with_capacity(m);
            let mut g = vec![0.0; m + 1];
            g[0] = beta;
            let mut k = 0;

            for j in 0..m {
                matvec(&basis[j], &mut scratch);
                let mut w = scratch.clone();
                let mut h = vec![0.0; j + 2];
                match self.ortho {
                    Orthogonalization::Classical => {
                        for (i, v) in basis.iter().enumerate() {
                            h[i] = dot(v, &scratch);
                        }
                        for (i, v) in basis.iter().enumerate() {
                            for (wk, vk) in w.iter_mut().zip(v) {
                                *wk -= h[i] * vk;
                            }
                        }
                    }
                    Orthogonalization::Modified => {
                        for (i, v) in basis.iter().enumerate() {
                            h[i] = dot(v, &w);
                            for (wk, vk) in w.iter_mut().zip(v) {
                                *wk -= h[i] * vk;
                            }
                        }
                    }
                }
                let w_norm = norm2(&w);
                h[j + 1] = w_norm;

                // apply accumulated Givens rotations to the new column
                for (i, (c, s)) in rotations.iter().enumerate() {
                    let tmp = c * h[i] + s * h[i + 1];
                    h[i + 1] = -s * h[i] + c * h[i + 1];
                    h[i] = tmp;
                }
                let denom = (h[j] * h[j] + h[j + 1] * h[j + 1]).sqrt();
                let (c, s) = if denom == 0.0 {
                    (1.0, 0.0)
                } else {
                    (h[j] / denom, h[j + 1] / denom)
                };
                h[j] = denom;
                h[j + 1] = 0.0;
                rotations.push((c, s));
                g[j + 1] = -s * g[j];
                g[j] *= c;

                h_cols.push(h);
                total_iters += 1;
                k = j + 1;
                residual = g[j + 1].abs();
                if residual <= tol || w_norm == 0.0 {
                    break;
                }
                let mut v_next = w;
                for v in &mut v_next {
                    *v /= w_norm;
                }
                basis.push(v_next);
            }

            // back-substitution on the k x k triangular system
            let mut y = vec![0.0; k];
            for i in (0..k).rev() {
                let mut acc = g[i];
                for (jj, y_jj) in y.iter().enumerate().skip(i + 1) {
                    acc -= h_cols[jj][i] * y_jj;
                }
                y[i] = acc / h_cols[i][i];
            }
            for (i, y_i) in y.iter().enumerate() {
                for (x_k, v_k) in x.iter_mut().zip(&basis[i]) {
                    *x_k += y_i * v_k;
                }
            }

            trace!(
                restart,
                iterations = total_iters,
                residual,
                "GMRES restart cycle complete"
            );
            if residual <= tol {
                return Ok(GmresStats {
                    iterations: total_iters,
                    restarts: restart,
                    residual_norm: residual,
                });
            }
        }

        Err(linear_solver_error!(GmresDidNotConverge {
            residual: residual,
            iterations: total_iters,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    fn test_matrix(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                5.0 + i as f64
            } else {
                1.0 / (1.0 + (i as f64 - j as f64).abs())
            }
        })
    }

    fn solve_with(ortho: Orthogonalization, max_krylov: usize, max_restarts: usize) {
        let n = 8;
        let a = test_matrix(n);
        let b: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64).cos()).collect();
        let gmres = Gmres::new(n, max_krylov, ortho, max_restarts);
        let mut x = vec![0.0; n];
        let a_ref = a.clone();
        let stats = gmres
            .solve(
                move |v, z| {
                    let out = &a_ref * DVector::from_column_slice(v);
                    z.copy_from_slice(out.as_slice());
                },
                &b,
                &mut x,
                1e-12,
            )
            .unwrap();
        assert!(stats.residual_norm <= 1e-12);
        let x_ref = a.lu().solve(&DVector::from_column_slice(&b)).unwrap();
        for i in 0..n {
            assert_relative_eq!(x[i], x_ref[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn classical_gram_schmidt_converges() {
        solve_with(Orthogonalization::Classical, 8, 0);
    }

    #[test]
    fn modified_gram_schmidt_converges() {
        solve_with(Orthogonalization::Modified, 8, 0);
    }

    #[test]
    fn restarted_cycles_converge() {
        solve_with(Orthogonalization::Modified, 3, 40);
    }

    #[test]
    fn reports_non_convergence() {
        let n = 8;
        let a = test_matrix(n);
        let b = vec![1.0; n];
        let gmres = Gmres::new(n, 2, Orthogonalization::Modified, 0);
        let mut x = vec![0.0; n];
        let res = gmres.solve(
            move |v, z| {
                let out = &a * DVector::from_column_slice(v);
                z.copy_from_slice(out.as_slice());
            },
            &b,
            &mut x,
            1e-14,
        );
        assert!(res.is_err());
    }
}
