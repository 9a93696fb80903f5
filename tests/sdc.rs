#[macro_use]
extern crate ndarray;
extern crate ndarray_sdc;

use ndarray::prelude::*;

use ndarray_sdc::euler::ForwardEuler;
use ndarray_sdc::problems::{Brusselator, ExpSin, Robertson};
use ndarray_sdc::quadrature::QuadratureKind;
use ndarray_sdc::sdc::{ExplicitSdc, SdcConfig};
use ndarray_sdc::{FnOde, OdeFunction, StepError, Stepper};

const KINDS: [QuadratureKind; 3] = [
    QuadratureKind::ClenshawCurtis,
    QuadratureKind::GaussLobatto,
    QuadratureKind::Uniform,
];

/// Takes `steps` steps of size `dt` from `x0` at `t = 0` and returns the
/// state after every step.
fn trajectory<F, E>(stepper: &mut E, fun: &mut F, x0: Array1<f64>, dt: f64, steps: usize) -> Vec<Array1<f64>>
where
    F: OdeFunction,
    E: Stepper<F>,
{
    let n = x0.len();
    let mut x = x0;
    let mut f = Array1::zeros(n);
    fun.eval(0., x.view(), f.view_mut());
    let mut x1 = Array1::zeros(n);
    let mut f1 = Array1::zeros(n);
    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        let t = i as f64 * dt;
        stepper
            .step(fun, t, x.view(), f.view(), dt, x1.view_mut(), f1.view_mut())
            .unwrap();
        std::mem::swap(&mut x, &mut x1);
        std::mem::swap(&mut f, &mut f1);
        out.push(x.clone());
    }
    out
}

fn final_state<F, E>(stepper: &mut E, fun: &mut F, x0: Array1<f64>, dt: f64, steps: usize) -> Array1<f64>
where
    F: OdeFunction,
    E: Stepper<F>,
{
    trajectory(stepper, fun, x0, dt, steps).pop().unwrap()
}

fn exp_sin_error(config: SdcConfig, steps: usize) -> f64 {
    let mut sdc = ExplicitSdc::new(config).unwrap();
    let x = final_state(&mut sdc, &mut ExpSin::new(1), array![1.], 1. / steps as f64, steps);
    (x[0] - ExpSin::solution(1.)).abs()
}

#[test]
fn order_of_accuracy() {
    let grids = [(1, 5), (2, 3), (5, 2), (1, 4)];
    for &kind in &KINDS {
        for &(m, p) in &grids {
            for sweeps in 0..p {
                let config = SdcConfig::new(m, p, kind, sweeps);
                let coarse = exp_sin_error(config, 10);
                let fine = exp_sin_error(config, 20);
                let order = (coarse / fine).log2();
                let expected = config.design_order() as f64;
                assert!(
                    order > expected - 0.3 && order < expected + 0.5,
                    "{:?}: observed order {} (errors {:e}, {:e})",
                    config,
                    order,
                    coarse,
                    fine
                );
            }
        }
    }
}

#[test]
fn finer_grid_reduces_error_at_every_step() {
    let dt = 0.1;
    let mut fine = ExplicitSdc::new(SdcConfig::full_order(5, 2, QuadratureKind::ClenshawCurtis)).unwrap();
    let mut coarse = ExplicitSdc::new(SdcConfig::full_order(1, 2, QuadratureKind::ClenshawCurtis)).unwrap();
    let fine_path = trajectory(&mut fine, &mut ExpSin::new(1), array![1.], dt, 9);
    let coarse_path = trajectory(&mut coarse, &mut ExpSin::new(1), array![1.], dt, 9);
    for (i, (xf, xc)) in fine_path.iter().zip(&coarse_path).enumerate() {
        let exact = ExpSin::solution((i + 1) as f64 * dt);
        let fine_err = (xf[0] - exact).abs();
        let coarse_err = (xc[0] - exact).abs();
        assert!(fine_err < coarse_err, "step {}: {:e} >= {:e}", i + 1, fine_err, coarse_err);
        assert!(fine_err < 2e-4);
    }
}

#[test]
fn single_node_is_forward_euler() {
    let mut fun = FnOde::new(2, |t: f64, x: ArrayView1<f64>, mut dx: ArrayViewMut1<f64>| {
        dx[0] = -x[1] + t;
        dx[1] = x[0] * x[1];
    });
    let x0 = array![0.4, 1.2];
    let mut sdc = ExplicitSdc::new(SdcConfig::new(1, 1, QuadratureKind::GaussLobatto, 0)).unwrap();
    let with_sdc = trajectory(&mut sdc, &mut fun, x0.clone(), 0.05, 8);
    let with_euler = trajectory(&mut ForwardEuler::new(), &mut fun, x0, 0.05, 8);
    assert_eq!(with_sdc, with_euler);
}

#[test]
fn robertson_conserves_mass() {
    let mut fun = Robertson::new();
    for &dt in &[1e-5, 1e-4] {
        for sweeps in 0..5 {
            let mut sdc = ExplicitSdc::new(SdcConfig::default().with_sweeps(sweeps)).unwrap();
            let y0 = fun.init();
            for y in trajectory(&mut sdc, &mut fun, y0, dt, 20) {
                assert!((y.sum() - 1.).abs() < 1e-13, "dt {} sweeps {}: {}", dt, sweeps, y);
            }
        }
    }
}

#[test]
fn brusselator_step_refinement() {
    let mut fun = Brusselator::new(20);
    let mut sdc = ExplicitSdc::new(SdcConfig::default()).unwrap();
    let x0 = fun.init();
    let reference = final_state(&mut sdc, &mut fun, x0.clone(), 0.01, 100);
    let coarse = final_state(&mut sdc, &mut fun, x0, 0.1, 10);
    for (&r, &c) in reference.iter().zip(&coarse) {
        assert!(r > 0.5 && r < 3.5);
        assert!((r - c).abs() < 1e-5);
    }
}

#[test]
fn non_finite_rhs_is_reported() {
    let mut fun = FnOde::new(1, |t: f64, x: ArrayView1<f64>, mut dx: ArrayViewMut1<f64>| {
        dx[0] = if t > 0.05 { f64::NAN } else { x[0] };
    });
    let mut sdc = ExplicitSdc::new(SdcConfig::full_order(1, 3, QuadratureKind::Uniform)).unwrap();
    let x0 = array![1.];
    let f0 = array![1.];
    let mut x1 = Array1::zeros(1);
    let mut f1 = Array1::zeros(1);
    let err = sdc
        .advance(&mut fun, 0., x0.view(), f0.view(), 0.2, x1.view_mut(), f1.view_mut())
        .unwrap_err();
    assert_eq!(err, StepError::NonFiniteRhs { time: 0.1, node: 1 });

    let err = sdc
        .advance(&mut fun, 0., x0.view(), f0.view(), f64::INFINITY, x1.view_mut(), f1.view_mut())
        .unwrap_err();
    assert!(matches!(err, StepError::NonFiniteStep { .. }));
}
