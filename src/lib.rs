//! High-order time stepping by spectral deferred correction (SDC).
//!
//! The engines turn a first-order base method into a high-order one by
//! sweeping repeatedly over a spectral quadrature grid inside each step:
//!
//! * [`ExplicitSdc`](sdc::ExplicitSdc) corrects with forward Euler and needs
//!   only right-hand-side evaluations.
//! * [`NewtonKrylovSdc`](newton_krylov::NewtonKrylovSdc) corrects with
//!   backward Euler, solving each node with a Newton iteration whose linear
//!   systems are handled matrix-free by GMRES. Use it for stiff problems.
//!
//! Right-hand sides implement [`OdeFunction`] (and [`JacobianVector`] for the
//! implicit engine). [`integrator::TimeIntegrator`] binds an engine to a
//! structure that owns its positions and velocities.

pub mod error;
pub mod euler;
pub mod integrator;
pub mod krylov;
pub mod newton_krylov;
pub mod particles;
pub mod problems;
pub mod quadrature;
pub mod sdc;

pub use crate::error::{ConfigError, KrylovError, StepError};

use ndarray::azip;
use ndarray::prelude::*;

/// Right-hand side `F(t, x)` of the system `dx/dt = F(t, x)`.
pub trait OdeFunction {
    /// Returns the number of elements in the state.
    fn ode_size(&self) -> usize;

    /// Fills `dx` with the derivative of `x` at time `t`.
    fn eval(&mut self, t: f64, x: ArrayView1<'_, f64>, dx: ArrayViewMut1<'_, f64>);
}

/// Directional derivatives of a right-hand side, needed by implicit engines.
pub trait JacobianVector: OdeFunction {
    /// Fills `jv` with the Jacobian of `F` at `(t, x)` applied to `v`.
    ///
    /// `fx` is `F(t, x)`, already evaluated by the caller. The default
    /// implementation uses a forward difference along `v`.
    fn jacobian_vector(
        &mut self,
        t: f64,
        x: ArrayView1<'_, f64>,
        fx: ArrayView1<'_, f64>,
        v: ArrayView1<'_, f64>,
        mut jv: ArrayViewMut1<'_, f64>,
    ) {
        let v_norm = v.dot(&v).sqrt();
        if v_norm == 0. {
            jv.fill(0.);
            return;
        }
        let x_norm = x.dot(&x).sqrt();
        let eps = f64::EPSILON.sqrt() * (1. + x_norm) / v_norm;
        let shifted = eps * &v + &x;
        self.eval(t, shifted.view(), jv.view_mut());
        azip!((jv in &mut jv, &fx in &fx) *jv = (*jv - fx) / eps);
    }
}

/// Right-hand side given by a closure.
///
/// Calling `fun(t, x, dx)` should fill in `dx` with the derivative of `x` at
/// time `t`. Directional derivatives are approximated by finite differences.
pub struct FnOde<F>
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
{
    size: usize,
    fun: F,
}

impl<F> FnOde<F>
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
{
    pub fn new(size: usize, fun: F) -> FnOde<F> {
        FnOde { size, fun }
    }
}

impl<F> OdeFunction for FnOde<F>
where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>),
{
    fn ode_size(&self) -> usize {
        self.size
    }

    fn eval(&mut self, t: f64, x: ArrayView1<'_, f64>, dx: ArrayViewMut1<'_, f64>) {
        (self.fun)(t, x, dx)
    }
}

impl<F> JacobianVector for FnOde<F> where
    F: FnMut(f64, ArrayView1<f64>, ArrayViewMut1<f64>)
{
}

/// A single-step method advancing `x0` at `t0` to `x1` at `t0 + dt`.
///
/// `f0` must hold `F(t0, x0)`; on success `f1` holds `F(t0 + dt, x1)` so
/// that the caller can pass it as `f0` of the next step. Steppers keep only
/// scratch space between calls, never any part of the trajectory.
pub trait Stepper<F: OdeFunction> {
    fn step(
        &mut self,
        fun: &mut F,
        t0: f64,
        x0: ArrayView1<'_, f64>,
        f0: ArrayView1<'_, f64>,
        dt: f64,
        x1: ArrayViewMut1<'_, f64>,
        f1: ArrayViewMut1<'_, f64>,
    ) -> Result<(), StepError>;
}

/// Driver-facing view of an integrator bound to its state.
pub trait OdeIntegrate {
    /// Returns the number of elements in the state.
    fn len(&self) -> usize;
    /// Current time.
    fn time(&self) -> f64;
    /// Current state.
    fn state(&self) -> ArrayView1<'_, f64>;
    /// Advance the state by one step of size `dt`.
    fn advance(&mut self, dt: f64) -> Result<(), StepError>;
    /// Integrate until reaching `t_end` with steps of at most `dt`.
    ///
    /// The last step is shortened to land exactly on `t_end`. A step that
    /// leaves the time unchanged is reported as `StalledTime`.
    fn integrate_to(&mut self, t_end: f64, dt: f64) -> Result<(), StepError> {
        if !dt.is_finite() || dt <= 0. {
            return Err(StepError::NonFiniteStep { dt });
        }
        if !t_end.is_finite() {
            return Err(StepError::NonFiniteEndTime { t_end });
        }
        // Remainders below this are rounding in the accumulated time.
        let slack = 1e-10 * dt;
        loop {
            let time = self.time();
            let remaining = t_end - time;
            if remaining <= slack {
                return Ok(());
            }
            let h = if remaining <= dt + slack { remaining } else { dt };
            self.advance(h)?;
            if !(self.time() > time) {
                return Err(StepError::StalledTime { time, dt: h });
            }
        }
    }
}

/// Returns `true` if every element of `x` is finite.
pub(crate) fn all_finite(x: ArrayView1<'_, f64>) -> bool {
    x.iter().all(|v| v.is_finite())
}

/// Checks that `x` has the expected length.
pub(crate) fn check_len(x: ArrayView1<'_, f64>, expected: usize) -> Result<(), StepError> {
    if x.len() != expected {
        return Err(StepError::DimensionMismatch {
            expected,
            found: x.len(),
        });
    }
    Ok(())
}
