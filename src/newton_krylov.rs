//! Implicit spectral deferred correction for stiff problems.
//!
//! The sweep structure matches [`ExplicitSdc`](crate::sdc::ExplicitSdc), but
//! every node is advanced with backward Euler. The resulting nonlinear
//! equation
//!
//! ```text
//! y - h F(t, y) = b
//! ```
//!
//! is solved by Newton's method. Each Newton correction solves
//! `(I - h J) δ = -(y - h F(t, y) - b)` with GMRES, where `J v` is supplied by
//! [`JacobianVector::jacobian_vector`], so no Jacobian matrix is ever stored.
//!
//! # References
//!
//! 1. M. L. Minion, "Semi-Implicit Spectral Deferred Correction Methods for
//!    Ordinary Differential Equations", Commun. Math. Sci., Vol. 1, No. 3,
//!    pp. 471-500, 2003.
//!
//! 2. D. A. Knoll, D. E. Keyes, "Jacobian-free Newton–Krylov methods: a survey
//!    of approaches and applications", J. Comput. Phys., Vol. 193, No. 2,
//!    pp. 357-397, 2004.

use ndarray::azip;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::krylov::{norm, Gmres, KrylovConfig};
use crate::quadrature::SpectralQuadrature;
use crate::sdc::{check_step_args, evaluate, SdcConfig, SweepBuffers};
use crate::{ConfigError, JacobianVector, StepError, Stepper};

/// Stopping criteria of the per-node Newton iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Residual norm relative to `‖b‖` that counts as converged.
    pub rel_tolerance: f64,
    /// Residual norm that always counts as converged.
    pub abs_tolerance: f64,
    /// Newton corrections allowed per node before the step fails.
    pub max_iterations: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        NewtonConfig {
            rel_tolerance: 1e-10,
            abs_tolerance: 1e-12,
            max_iterations: 20,
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &tol in &[self.rel_tolerance, self.abs_tolerance] {
            if !tol.is_finite() || tol < 0. {
                return Err(ConfigError::InvalidTolerance(tol));
            }
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}

/// Full configuration of the implicit engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonKrylovConfig {
    pub sdc: SdcConfig,
    pub newton: NewtonConfig,
    pub krylov: KrylovConfig,
}

impl NewtonKrylovConfig {
    pub fn new(sdc: SdcConfig) -> Self {
        NewtonKrylovConfig {
            sdc,
            ..NewtonKrylovConfig::default()
        }
    }

    pub fn with_newton(mut self, newton: NewtonConfig) -> Self {
        self.newton = newton;
        self
    }

    pub fn with_krylov(mut self, krylov: KrylovConfig) -> Self {
        self.krylov = krylov;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sdc.validate()?;
        self.newton.validate()?;
        self.krylov.validate()
    }
}

/// Newton solver for `y - h F(t, y) = b` with scratch space.
#[derive(Debug, Clone)]
struct NewtonSolver {
    config: NewtonConfig,
    gmres: Gmres,
    /// Nonlinear residual, then its negation as the linear right-hand side.
    residual: Array1<f64>,
    delta: Array1<f64>,
}

impl NewtonSolver {
    fn new(config: NewtonConfig, krylov: KrylovConfig) -> NewtonSolver {
        NewtonSolver {
            config,
            gmres: Gmres::new(krylov),
            residual: Array1::zeros(0),
            delta: Array1::zeros(0),
        }
    }

    /// Solves `y - h F(t, y) = b` in place, starting from the value of `y`.
    ///
    /// On success `fy` holds `F(t, y)` and the number of Newton corrections
    /// is returned.
    fn solve<F: JacobianVector>(
        &mut self,
        fun: &mut F,
        t: f64,
        h: f64,
        b: ArrayView1<'_, f64>,
        mut y: ArrayViewMut1<'_, f64>,
        mut fy: ArrayViewMut1<'_, f64>,
        node: usize,
    ) -> Result<usize, StepError> {
        let n = b.len();
        if self.residual.len() != n {
            self.residual = Array1::zeros(n);
            self.delta = Array1::zeros(n);
        }
        let tol = self.config.abs_tolerance + self.config.rel_tolerance * norm(b);
        evaluate(fun, t, y.view(), fy.view_mut(), node)?;

        let mut iteration = 0;
        loop {
            azip!((r in &mut self.residual, &y in &y, &fy in &fy, &b in &b) *r = y - h * fy - b);
            let res_norm = norm(self.residual.view());
            log::trace!(
                "Newton iter {} at t = {} (node {}): residual = {:.6e}",
                iteration,
                t,
                node,
                res_norm
            );
            if res_norm <= tol {
                return Ok(iteration);
            }
            if iteration == self.config.max_iterations || !res_norm.is_finite() {
                return Err(StepError::NewtonNonConvergence {
                    time: t,
                    node,
                    iterations: iteration,
                    residual: res_norm,
                    cause: None,
                });
            }

            self.residual.mapv_inplace(|r| -r);
            let (y_now, fy_now) = (y.view(), fy.view());
            let solve = self
                .gmres
                .solve(
                    |v: ArrayView1<f64>, mut out: ArrayViewMut1<f64>| {
                        fun.jacobian_vector(t, y_now, fy_now, v, out.view_mut());
                        azip!((out in &mut out, &v in &v) *out = v - h * *out);
                    },
                    self.residual.view(),
                    self.delta.view_mut(),
                )
                .map_err(|cause| StepError::NewtonNonConvergence {
                    time: t,
                    node,
                    iterations: iteration,
                    residual: res_norm,
                    cause: Some(cause),
                })?;
            if !solve.converged {
                log::warn!(
                    "GMRES stopped at relative residual {:.3e} after {} iterations (t = {}, node {})",
                    solve.residual / solve.initial_residual,
                    solve.iterations,
                    t,
                    node
                );
            }

            y += &self.delta;
            evaluate(fun, t, y.view(), fy.view_mut(), node)?;
            iteration += 1;
        }
    }
}

/// Newton–Krylov SDC engine.
///
/// The right-hand side must provide directional derivatives; the default
/// finite-difference implementation of [`JacobianVector`] is enough for
/// providers without an analytic Jacobian.
#[derive(Debug, Clone)]
pub struct NewtonKrylovSdc {
    config: NewtonKrylovConfig,
    quadrature: Arc<SpectralQuadrature>,
    buffers: SweepBuffers,
    newton: NewtonSolver,
}

impl NewtonKrylovSdc {
    pub fn new(config: NewtonKrylovConfig) -> Result<NewtonKrylovSdc, ConfigError> {
        config.validate()?;
        let quadrature = config.sdc.quadrature()?;
        Ok(NewtonKrylovSdc {
            config,
            quadrature,
            buffers: SweepBuffers::new(),
            newton: NewtonSolver::new(config.newton, config.krylov),
        })
    }

    pub fn config(&self) -> &NewtonKrylovConfig {
        &self.config
    }

    pub fn quadrature(&self) -> &SpectralQuadrature {
        &self.quadrature
    }

    /// Advances `x0` at `t0` by `dt`.
    ///
    /// `f0` must hold `F(t0, x0)`. On return `x1` holds the solution at
    /// `t0 + dt` and `f1` the right-hand side there. Fails without a usable
    /// result if any node's Newton iteration does not converge.
    pub fn advance<F: JacobianVector>(
        &mut self,
        fun: &mut F,
        t0: f64,
        x0: ArrayView1<'_, f64>,
        f0: ArrayView1<'_, f64>,
        dt: f64,
        mut x1: ArrayViewMut1<'_, f64>,
        mut f1: ArrayViewMut1<'_, f64>,
    ) -> Result<(), StepError> {
        check_step_args(fun.ode_size(), t0, x0, f0, dt, x1.view(), f1.view())?;
        let NewtonKrylovSdc {
            config,
            quadrature,
            buffers,
            newton,
        } = self;
        let q: &SpectralQuadrature = quadrature;
        let num_substeps = q.num_substeps();
        let nodes = q.nodes();
        let mut newton_iterations = 0;

        buffers.start(q.num_nodes(), x0, f0);
        for j in 0..num_substeps {
            let h = dt * q.substep_width(j);
            let t = t0 + dt * nodes[j + 1];
            buffers.work.assign(&buffers.x.row(j));
            buffers.x.row_mut(j + 1).assign(&buffers.work);
            newton_iterations += newton.solve(
                fun,
                t,
                h,
                buffers.work.view(),
                buffers.x.row_mut(j + 1),
                buffers.f.row_mut(j + 1),
                j + 1,
            )?;
        }

        for sweep in 1..=config.sdc.sweeps {
            buffers.next_sweep();
            for j in 0..num_substeps {
                let h = dt * q.substep_width(j);
                let t = t0 + dt * nodes[j + 1];
                buffers.work.assign(&buffers.x.row(j));
                buffers.work.scaled_add(-h, &buffers.f_prev.row(j + 1));
                buffers.add_quadrature(q, j, dt);
                buffers.x.row_mut(j + 1).assign(&buffers.x_prev.row(j + 1));
                newton_iterations += newton.solve(
                    fun,
                    t,
                    h,
                    buffers.work.view(),
                    buffers.x.row_mut(j + 1),
                    buffers.f.row_mut(j + 1),
                    j + 1,
                )?;
            }
            log::trace!(
                "Newton-Krylov SDC sweep {} at t = {}: correction {:.3e}",
                sweep,
                t0,
                buffers.last_correction()
            );
        }

        x1.assign(&buffers.x.row(num_substeps));
        f1.assign(&buffers.f.row(num_substeps));
        log::debug!(
            "Newton-Krylov SDC step t = {} -> {} ({} Newton iterations)",
            t0,
            t0 + dt,
            newton_iterations
        );
        Ok(())
    }
}

impl<F: JacobianVector> Stepper<F> for NewtonKrylovSdc {
    fn step(
        &mut self,
        fun: &mut F,
        t0: f64,
        x0: ArrayView1<'_, f64>,
        f0: ArrayView1<'_, f64>,
        dt: f64,
        x1: ArrayViewMut1<'_, f64>,
        f1: ArrayViewMut1<'_, f64>,
    ) -> Result<(), StepError> {
        self.advance(fun, t0, x0, f0, dt, x1, f1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadrature::QuadratureKind;
    use crate::FnOde;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn linear_decay(_t: f64, x: ArrayView1<f64>, mut dx: ArrayViewMut1<f64>) {
        dx[0] = -50. * x[0];
    }

    #[test]
    fn backward_euler_on_single_substep() {
        // Two nodes and no sweeps is exactly backward Euler.
        let config = NewtonKrylovConfig::new(SdcConfig::new(1, 2, QuadratureKind::Uniform, 0));
        let mut sdc = NewtonKrylovSdc::new(config).unwrap();
        let mut fun = FnOde::new(1, linear_decay);
        let x0 = array![1.];
        let f0 = array![-50.];
        let mut x1 = Array1::zeros(1);
        let mut f1 = Array1::zeros(1);
        sdc.advance(&mut fun, 0., x0.view(), f0.view(), 0.1, x1.view_mut(), f1.view_mut())
            .unwrap();
        assert_abs_diff_eq!(x1[0], 1. / 6., epsilon = 1e-9);
        assert_abs_diff_eq!(f1[0], -50. / 6., epsilon = 1e-7);
    }

    #[test]
    fn stable_for_stiff_decay() {
        let mut sdc = NewtonKrylovSdc::new(NewtonKrylovConfig::default()).unwrap();
        let mut fun = FnOde::new(1, linear_decay);
        let mut x = array![1.];
        let mut f = array![-50.];
        let mut t = 0.;
        for _ in 0..10 {
            let mut x1 = Array1::zeros(1);
            let mut f1 = Array1::zeros(1);
            sdc.advance(&mut fun, t, x.view(), f.view(), 0.5, x1.view_mut(), f1.view_mut())
                .unwrap();
            x = x1;
            f = f1;
            t += 0.5;
        }
        assert!(x[0].abs() < 1e-3);
    }

    #[test]
    fn config_validation() {
        assert!(NewtonKrylovConfig::default().validate().is_ok());
        let config = NewtonKrylovConfig::default().with_newton(NewtonConfig {
            max_iterations: 0,
            ..NewtonConfig::default()
        });
        assert_eq!(config.validate(), Err(ConfigError::ZeroIterations));
        let config = NewtonKrylovConfig::new(SdcConfig::default().with_sweeps(9));
        assert!(NewtonKrylovSdc::new(config).is_err());
        let config = NewtonKrylovConfig::default().with_krylov(KrylovConfig {
            abs_tolerance: f64::NAN,
            ..KrylovConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTolerance(_))
        ));
    }
}
