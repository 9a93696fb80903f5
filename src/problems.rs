//! Reference right-hand sides.
//!
//! These cover the cases the engines are exercised on: a smooth scalar
//! problem with a closed-form solution, a stiff chemical system, a
//! reaction–diffusion discretization and a constant-coefficient linear system.

use ndarray::prelude::*;
use ndarray::{array, azip};
use std::f64::consts::PI;

use crate::{JacobianVector, OdeFunction};

/// `dx/dt = x cos(t)` applied to every component.
///
/// With `x(0) = 1` the solution is `exp(sin(t))`.
#[derive(Debug, Clone, Copy)]
pub struct ExpSin {
    size: usize,
}

impl ExpSin {
    pub fn new(size: usize) -> ExpSin {
        ExpSin { size }
    }

    /// Exact solution at `t` for `x(0) = 1`.
    pub fn solution(t: f64) -> f64 {
        t.sin().exp()
    }
}

impl OdeFunction for ExpSin {
    fn ode_size(&self) -> usize {
        self.size
    }

    fn eval(&mut self, t: f64, x: ArrayView1<'_, f64>, mut dx: ArrayViewMut1<'_, f64>) {
        let c = t.cos();
        azip!((dx in &mut dx, &x in &x) *dx = x * c);
    }
}

impl JacobianVector for ExpSin {
    fn jacobian_vector(
        &mut self,
        t: f64,
        _x: ArrayView1<'_, f64>,
        _fx: ArrayView1<'_, f64>,
        v: ArrayView1<'_, f64>,
        mut jv: ArrayViewMut1<'_, f64>,
    ) {
        let c = t.cos();
        azip!((jv in &mut jv, &v in &v) *jv = v * c);
    }
}

/// Robertson's chemical kinetics problem.
///
/// Three species with rate constants `0.04`, `1e4` and `3e7`; the total
/// `y1 + y2 + y3` is conserved.
#[derive(Debug, Clone, Copy)]
pub struct Robertson {
    k1: f64,
    k2: f64,
    k3: f64,
}

impl Default for Robertson {
    fn default() -> Self {
        Robertson {
            k1: 0.04,
            k2: 1e4,
            k3: 3e7,
        }
    }
}

impl Robertson {
    pub fn new() -> Robertson {
        Robertson::default()
    }

    /// The usual initial condition `(1, 0, 0)`.
    pub fn init(&self) -> Array1<f64> {
        array![1., 0., 0.]
    }
}

impl OdeFunction for Robertson {
    fn ode_size(&self) -> usize {
        3
    }

    fn eval(&mut self, _t: f64, y: ArrayView1<'_, f64>, mut dy: ArrayViewMut1<'_, f64>) {
        let slow = self.k1 * y[0];
        let medium = self.k2 * y[1] * y[2];
        let fast = self.k3 * y[1] * y[1];
        dy[0] = -slow + medium;
        dy[1] = slow - medium - fast;
        dy[2] = fast;
    }
}

impl JacobianVector for Robertson {
    fn jacobian_vector(
        &mut self,
        _t: f64,
        y: ArrayView1<'_, f64>,
        _fy: ArrayView1<'_, f64>,
        v: ArrayView1<'_, f64>,
        mut jv: ArrayViewMut1<'_, f64>,
    ) {
        let d_slow = self.k1 * v[0];
        let d_medium = self.k2 * (v[1] * y[2] + y[1] * v[2]);
        let d_fast = 2. * self.k3 * y[1] * v[1];
        jv[0] = -d_slow + d_medium;
        jv[1] = d_slow - d_medium - d_fast;
        jv[2] = d_fast;
    }
}

/// One-dimensional Brusselator on `[0, 1]`.
///
/// ```text
/// u_t = a + u² v - (b + 1) u + α u_xx
/// v_t = b u - u² v + α v_xx
/// ```
///
/// with Dirichlet values `u = a`, `v = b / a` at both ends, discretized by
/// central differences on `spatial_size` interior points. The state stores
/// `(u, v)` pairs point by point. Directional derivatives use the default
/// finite differences.
#[derive(Debug, Clone, Copy)]
pub struct Brusselator {
    spatial_size: usize,
    a: f64,
    b: f64,
    alpha: f64,
}

impl Brusselator {
    /// Brusselator with `a = 1`, `b = 3`, `α = 1/50`.
    pub fn new(spatial_size: usize) -> Brusselator {
        Brusselator::with_parameters(spatial_size, 1., 3., 0.02)
    }

    pub fn with_parameters(spatial_size: usize, a: f64, b: f64, alpha: f64) -> Brusselator {
        Brusselator {
            spatial_size,
            a,
            b,
            alpha,
        }
    }

    pub fn spatial_size(&self) -> usize {
        self.spatial_size
    }

    fn spacing(&self) -> f64 {
        1. / (self.spatial_size + 1) as f64
    }

    /// Initial state `u = a + sin(2πx)`, `v = b / a`.
    pub fn init(&self) -> Array1<f64> {
        let dx = self.spacing();
        Array1::from_shape_fn(2 * self.spatial_size, |k| {
            let x = (k / 2 + 1) as f64 * dx;
            if k % 2 == 0 {
                self.a + (2. * PI * x).sin()
            } else {
                self.b / self.a
            }
        })
    }
}

impl OdeFunction for Brusselator {
    fn ode_size(&self) -> usize {
        2 * self.spatial_size
    }

    fn eval(&mut self, _t: f64, x: ArrayView1<'_, f64>, mut dx: ArrayViewMut1<'_, f64>) {
        let n = self.spatial_size;
        let c = self.alpha / (self.spacing() * self.spacing());
        let (u_bc, v_bc) = (self.a, self.b / self.a);
        for i in 0..n {
            let u = x[2 * i];
            let v = x[2 * i + 1];
            let (u_left, v_left) = if i > 0 {
                (x[2 * i - 2], x[2 * i - 1])
            } else {
                (u_bc, v_bc)
            };
            let (u_right, v_right) = if i + 1 < n {
                (x[2 * i + 2], x[2 * i + 3])
            } else {
                (u_bc, v_bc)
            };
            let uuv = u * u * v;
            dx[2 * i] = self.a + uuv - (self.b + 1.) * u + c * (u_left - 2. * u + u_right);
            dx[2 * i + 1] = self.b * u - uuv + c * (v_left - 2. * v + v_right);
        }
    }
}

impl JacobianVector for Brusselator {}

/// Constant-coefficient linear system `dx/dt = A x`.
#[derive(Debug, Clone)]
pub struct LinearOde {
    matrix: Array2<f64>,
}

impl LinearOde {
    /// # Panics
    ///
    /// Panics if `matrix` is not square.
    pub fn new(matrix: Array2<f64>) -> LinearOde {
        assert!(matrix.is_square(), "system matrix must be square");
        LinearOde { matrix }
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

impl OdeFunction for LinearOde {
    fn ode_size(&self) -> usize {
        self.matrix.nrows()
    }

    fn eval(&mut self, _t: f64, x: ArrayView1<'_, f64>, mut dx: ArrayViewMut1<'_, f64>) {
        dx.assign(&self.matrix.dot(&x));
    }
}

impl JacobianVector for LinearOde {
    fn jacobian_vector(
        &mut self,
        _t: f64,
        _x: ArrayView1<'_, f64>,
        _fx: ArrayView1<'_, f64>,
        v: ArrayView1<'_, f64>,
        mut jv: ArrayViewMut1<'_, f64>,
    ) {
        jv.assign(&self.matrix.dot(&v));
    }
}
