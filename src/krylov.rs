//! Matrix-free restarted GMRES.
//!
//! The operator is only ever applied to vectors, so Jacobians of the
//! right-hand side never have to be formed.
//!
//! # References
//!
//! 1. Y. Saad, M. H. Schultz, "GMRES: A Generalized Minimal Residual
//!    Algorithm for Solving Nonsymmetric Linear Systems", SIAM J. Sci. Stat.
//!    Comput., Vol. 7, No. 3, pp. 856-869, 1986.

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, KrylovError};

/// Stopping criteria of the linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrylovConfig {
    /// Residual reduction relative to `‖b‖` that counts as converged.
    pub rel_tolerance: f64,
    /// Residual norm that always counts as converged.
    pub abs_tolerance: f64,
    /// Dimension of the Krylov space before restarting.
    pub restart: usize,
    /// Total number of operator applications allowed.
    pub max_iterations: usize,
}

impl Default for KrylovConfig {
    fn default() -> Self {
        KrylovConfig {
            rel_tolerance: 1e-8,
            abs_tolerance: 1e-14,
            restart: 30,
            max_iterations: 200,
        }
    }
}

impl KrylovConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &tol in &[self.rel_tolerance, self.abs_tolerance] {
            if !tol.is_finite() || tol < 0. {
                return Err(ConfigError::InvalidTolerance(tol));
            }
        }
        if self.restart == 0 || self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}

/// Outcome of a solve that made progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrylovSolve {
    /// Number of operator applications in Arnoldi steps.
    pub iterations: usize,
    /// Final residual norm `‖b - A x‖`.
    pub residual: f64,
    /// Residual norm of the zero initial guess, `‖b‖`.
    pub initial_residual: f64,
    /// Whether the tolerance was met.
    pub converged: bool,
}

/// Restarted GMRES with modified Gram–Schmidt and Givens rotations.
#[derive(Debug, Clone)]
pub struct Gmres {
    config: KrylovConfig,
    /// Orthonormal basis, one vector per row, shape `(restart + 1, n)`.
    basis: Array2<f64>,
    /// Hessenberg matrix reduced to triangular form in place, shape
    /// `(restart + 1, restart)`.
    hessenberg: Array2<f64>,
    cs: Array1<f64>,
    sn: Array1<f64>,
    /// Right-hand side of the small least-squares problem.
    g: Array1<f64>,
    w: Array1<f64>,
}

impl Gmres {
    pub fn new(config: KrylovConfig) -> Gmres {
        let m = config.restart.max(1);
        Gmres {
            config,
            basis: Array2::zeros((0, 0)),
            hessenberg: Array2::zeros((m + 1, m)),
            cs: Array1::zeros(m),
            sn: Array1::zeros(m),
            g: Array1::zeros(m + 1),
            w: Array1::zeros(0),
        }
    }

    pub fn config(&self) -> &KrylovConfig {
        &self.config
    }

    /// Solves `A x = b` from the initial guess `x = 0`.
    ///
    /// `apply(v, out)` must fill `out` with `A v`. Returns an error if the
    /// residual could not be reduced at all or became non-finite; a solve that
    /// reduced the residual without reaching the tolerance is returned with
    /// `converged == false`.
    pub fn solve<A>(
        &mut self,
        mut apply: A,
        b: ArrayView1<'_, f64>,
        mut x: ArrayViewMut1<'_, f64>,
    ) -> Result<KrylovSolve, KrylovError>
    where
        A: FnMut(ArrayView1<f64>, ArrayViewMut1<f64>),
    {
        let n = b.len();
        let m = self.hessenberg.ncols();
        if self.basis.dim() != (m + 1, n) {
            self.basis = Array2::zeros((m + 1, n));
            self.w = Array1::zeros(n);
        }
        x.fill(0.);

        let beta0 = norm(b);
        if !beta0.is_finite() {
            return Err(KrylovError::NonFinite { iterations: 0 });
        }
        let tol = self.config.abs_tolerance + self.config.rel_tolerance * beta0;
        let mut residual = beta0;
        let mut total = 0;
        let mut stalled = false;
        // Residual of the current iterate, which starts at `b`.
        let mut r = b.to_owned();

        while residual > tol && total < self.config.max_iterations && !stalled {
            self.basis.row_mut(0).assign(&(&r / residual));
            self.g.fill(0.);
            self.g[0] = residual;

            let mut k_used = 0;
            for k in 0..m {
                apply(self.basis.row(k), self.w.view_mut());
                total += 1;
                for i in 0..=k {
                    let hik = self.w.dot(&self.basis.row(i));
                    self.hessenberg[[i, k]] = hik;
                    self.w.scaled_add(-hik, &self.basis.row(i));
                }
                let h_next = norm(self.w.view());
                if !h_next.is_finite() {
                    return Err(KrylovError::NonFinite { iterations: total });
                }
                self.hessenberg[[k + 1, k]] = h_next;

                for i in 0..k {
                    let (upper, lower) = (self.hessenberg[[i, k]], self.hessenberg[[i + 1, k]]);
                    self.hessenberg[[i, k]] = self.cs[i] * upper + self.sn[i] * lower;
                    self.hessenberg[[i + 1, k]] = -self.sn[i] * upper + self.cs[i] * lower;
                }
                let diag = self.hessenberg[[k, k]];
                let denom = diag.hypot(h_next);
                if denom <= f64::MIN_POSITIVE {
                    // The new direction adds nothing to the least-squares fit.
                    stalled = true;
                    break;
                }
                self.cs[k] = diag / denom;
                self.sn[k] = h_next / denom;
                self.hessenberg[[k, k]] = denom;
                self.hessenberg[[k + 1, k]] = 0.;
                self.g[k + 1] = -self.sn[k] * self.g[k];
                self.g[k] *= self.cs[k];
                residual = self.g[k + 1].abs();
                k_used = k + 1;
                log::trace!("GMRES iter {}: residual = {:.6e}", total, residual);

                if residual <= tol || total >= self.config.max_iterations {
                    break;
                }
                if h_next == 0. {
                    // Invariant subspace reached: the solution is exact.
                    break;
                }
                let next = &self.w / h_next;
                self.basis.row_mut(k + 1).assign(&next);
            }

            // Back substitution for the coefficients in the Krylov basis.
            let mut y = Array1::zeros(k_used);
            for i in (0..k_used).rev() {
                let mut acc = self.g[i];
                for l in i + 1..k_used {
                    acc -= self.hessenberg[[i, l]] * y[l];
                }
                y[i] = acc / self.hessenberg[[i, i]];
            }
            for (i, &yi) in y.iter().enumerate() {
                x.scaled_add(yi, &self.basis.row(i));
            }

            if residual > tol && total < self.config.max_iterations && !stalled {
                // Restart from the true residual.
                apply(x.view(), self.w.view_mut());
                r = &b - &self.w;
                residual = norm(r.view());
                if !residual.is_finite() {
                    return Err(KrylovError::NonFinite { iterations: total });
                }
            }
        }

        if residual > tol && residual >= beta0 {
            return Err(KrylovError::Stagnation {
                iterations: total,
                residual,
            });
        }
        Ok(KrylovSolve {
            iterations: total,
            residual,
            initial_residual: beta0,
            converged: residual <= tol,
        })
    }
}

/// Euclidean norm.
pub(crate) fn norm(x: ArrayView1<'_, f64>) -> f64 {
    x.dot(&x).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn apply_matrix(a: &Array2<f64>) -> impl FnMut(ArrayView1<f64>, ArrayViewMut1<f64>) + '_ {
        move |v: ArrayView1<f64>, mut out: ArrayViewMut1<f64>| out.assign(&a.dot(&v))
    }

    #[test]
    fn solves_nonsymmetric_system() {
        let a = array![[4., 1., 0.], [2., 5., 1.], [0., -1., 3.]];
        let x_true = array![1., -2., 0.5];
        let b = a.dot(&x_true);
        let mut x = Array1::zeros(3);
        let mut gmres = Gmres::new(KrylovConfig::default());
        let solve = gmres.solve(apply_matrix(&a), b.view(), x.view_mut()).unwrap();
        assert!(solve.converged);
        assert!(solve.iterations <= 3);
        for i in 0..3 {
            assert_abs_diff_eq!(x[i], x_true[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn restarts_until_converged() {
        let n = 20;
        let a = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                2. + i as f64 / n as f64
            } else if j == i + 1 {
                -0.5
            } else if i == j + 1 {
                -0.3
            } else {
                0.
            }
        });
        let b = Array1::from_shape_fn(n, |i| (i as f64).sin());
        let mut x = Array1::zeros(n);
        let config = KrylovConfig {
            restart: 4,
            ..KrylovConfig::default()
        };
        let mut gmres = Gmres::new(config);
        let solve = gmres.solve(apply_matrix(&a), b.view(), x.view_mut()).unwrap();
        assert!(solve.converged);
        assert!(solve.iterations > 4);
        let r = &b - &a.dot(&x);
        assert!(norm(r.view()) <= 1e-8 * norm(b.view()) * 10.);
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let a = Array2::<f64>::eye(2);
        let b = Array1::zeros(2);
        let mut x = array![3., 4.];
        let mut gmres = Gmres::new(KrylovConfig::default());
        let solve = gmres.solve(apply_matrix(&a), b.view(), x.view_mut()).unwrap();
        assert!(solve.converged);
        assert_eq!(solve.iterations, 0);
        assert_eq!(x, array![0., 0.]);
    }

    #[test]
    fn singular_operator_stagnates() {
        let b = array![1., 1.];
        let mut x = Array1::zeros(2);
        let mut gmres = Gmres::new(KrylovConfig::default());
        let err = gmres
            .solve(|_v, mut out| out.fill(0.), b.view(), x.view_mut())
            .unwrap_err();
        assert_eq!(
            err,
            KrylovError::Stagnation {
                iterations: 1,
                residual: 2f64.sqrt()
            }
        );
    }

    #[test]
    fn non_finite_operator() {
        let b = array![1., 0.];
        let mut x = Array1::zeros(2);
        let mut gmres = Gmres::new(KrylovConfig::default());
        let err = gmres
            .solve(|_v, mut out| out.fill(f64::NAN), b.view(), x.view_mut())
            .unwrap_err();
        assert_eq!(err, KrylovError::NonFinite { iterations: 1 });
    }

    #[test]
    fn invalid_config() {
        let config = KrylovConfig {
            rel_tolerance: -1.,
            ..KrylovConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTolerance(-1.)));
        let config = KrylovConfig {
            restart: 0,
            ..KrylovConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroIterations));
    }
}
