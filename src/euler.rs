//! Forward Euler, the base method of the explicit SDC engine.

use ndarray::azip;
use ndarray::prelude::*;

use crate::sdc::{check_step_args, evaluate};
use crate::{OdeFunction, StepError, Stepper};

/// Explicit Euler method of order 1.
///
/// Used on its own, as the predictor of the SDC engines, and as the kernel of
/// the explicit correction sweeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardEuler;

impl ForwardEuler {
    pub fn new() -> ForwardEuler {
        ForwardEuler
    }

    /// Writes `x + dt * f` into `x_next`, where `f` is the derivative at `x`.
    pub fn advance(
        x: ArrayView1<'_, f64>,
        f: ArrayView1<'_, f64>,
        dt: f64,
        mut x_next: ArrayViewMut1<'_, f64>,
    ) {
        azip!((x_next in &mut x_next, &x in &x, &f in &f) *x_next = x + dt * f);
    }
}

impl<F: OdeFunction> Stepper<F> for ForwardEuler {
    fn step(
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
        ForwardEuler::advance(x0, f0, dt, x1.view_mut());
        evaluate(fun, t0 + dt, x1.view(), f1.view_mut(), 1)?;
        Ok(())
    }
}
