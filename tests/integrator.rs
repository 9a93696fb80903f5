#[macro_use]
extern crate ndarray;
extern crate ndarray_sdc;

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use ndarray_sdc::euler::ForwardEuler;
use ndarray_sdc::integrator::{ImmersedStructure, TimeIntegrator};
use ndarray_sdc::newton_krylov::{NewtonKrylovConfig, NewtonKrylovSdc};
use ndarray_sdc::particles::{ElasticBoundary, ParticleStorage, SpringNetwork};
use ndarray_sdc::sdc::{ExplicitSdc, SdcConfig};
use ndarray_sdc::{OdeIntegrate, StepError};

/// Two particles two units apart joined by a spring resting at length 1.
fn dimer(stiffness: f64) -> ElasticBoundary {
    let storage = ParticleStorage::new(array![0., 0., 0., 2., 0., 0.]);
    let springs = SpringNetwork::from_pairs(&storage, &[(0, 1)], stiffness, Some(1.)).unwrap();
    ElasticBoundary::new(storage, springs, 1.)
}

fn separation(x: ArrayView1<f64>) -> f64 {
    x[3] - x[0]
}

#[test]
fn forward_euler_step() {
    let mut integrator = TimeIntegrator::new(dimer(1.), ForwardEuler::new());
    integrator.advance(0.1).unwrap();
    let boundary = integrator.structure();
    assert_abs_diff_eq!(boundary.time(), 0.1);
    let expected_x = [0.1, 0., 0., 1.9, 0., 0.];
    let expected_v = [0.8, 0., 0., -0.8, 0., 0.];
    for i in 0..6 {
        assert_abs_diff_eq!(boundary.positions()[i], expected_x[i], epsilon = 1e-15);
        assert_abs_diff_eq!(boundary.velocities()[i], expected_v[i], epsilon = 1e-15);
    }
}

#[test]
fn spring_relaxation() {
    let mut integrator = TimeIntegrator::new(dimer(1.), ExplicitSdc::new(SdcConfig::default()).unwrap());
    let energy = integrator.structure().energy();
    integrator.integrate_to(1., 0.1).unwrap();
    assert_abs_diff_eq!(integrator.time(), 1., epsilon = 1e-12);
    let x = integrator.state();
    // The separation relaxes as 1 + exp(-2 t).
    assert_abs_diff_eq!(separation(x), 1. + (-2f64).exp(), epsilon = 1e-7);
    assert_abs_diff_eq!(x[0] + x[3], 2., epsilon = 1e-12);
    assert!(integrator.structure().energy() < energy);
}

#[test]
fn stiff_spring_with_newton_krylov() {
    let stepper = NewtonKrylovSdc::new(NewtonKrylovConfig::default()).unwrap();
    let mut integrator = TimeIntegrator::new(dimer(100.), stepper);
    integrator.integrate_to(1., 0.1).unwrap();
    let x = integrator.state();
    assert_abs_diff_eq!(separation(x), 1., epsilon = 1e-6);
    assert_abs_diff_eq!(x[0] + x[3], 2., epsilon = 1e-8);
}

#[test]
fn last_step_lands_on_end_time() {
    let mut integrator = TimeIntegrator::new(dimer(1.), ForwardEuler::new());
    integrator.integrate_to(1., 0.3).unwrap();
    assert_abs_diff_eq!(integrator.time(), 1., epsilon = 1e-12);
    assert_eq!(integrator.len(), 6);
    assert!(matches!(
        integrator.integrate_to(2., 0.),
        Err(StepError::NonFiniteStep { .. })
    ));
}

/// `dx/dt = -x`, failing past `fail_after` and counting evaluations.
struct Decay {
    time: f64,
    x: Array1<f64>,
    v: Array1<f64>,
    fail_after: f64,
    evaluations: usize,
}

impl Decay {
    fn new(x: Array1<f64>) -> Decay {
        let v = -&x;
        Decay {
            time: 0.,
            x,
            v,
            fail_after: f64::INFINITY,
            evaluations: 0,
        }
    }
}

impl ImmersedStructure for Decay {
    fn time(&self) -> f64 {
        self.time
    }

    fn set_time(&mut self, t: f64) {
        self.time = t;
    }

    fn data_size(&self) -> usize {
        self.x.len()
    }

    fn positions(&self) -> ArrayView1<f64> {
        self.x.view()
    }

    fn positions_mut(&mut self) -> ArrayViewMut1<f64> {
        self.x.view_mut()
    }

    fn velocities(&self) -> ArrayView1<f64> {
        self.v.view()
    }

    fn velocities_mut(&mut self) -> ArrayViewMut1<f64> {
        self.v.view_mut()
    }

    fn compute_velocities(&mut self, t: f64, x: ArrayView1<f64>, mut v: ArrayViewMut1<f64>) {
        self.evaluations += 1;
        if t > self.fail_after {
            v.fill(f64::NAN);
        } else {
            v.assign(&(-&x));
        }
    }
}

#[test]
fn velocity_is_reused_between_steps() {
    let mut integrator = TimeIntegrator::new(Decay::new(array![1., -2.]), ForwardEuler::new());
    integrator.advance(0.5).unwrap();
    assert_eq!(integrator.structure().evaluations, 2);
    integrator.advance(0.5).unwrap();
    assert_eq!(integrator.structure().evaluations, 3);
    assert_eq!(integrator.state(), array![0.25, -0.5]);

    integrator.invalidate();
    integrator.advance(0.5).unwrap();
    assert_eq!(integrator.structure().evaluations, 5);

    integrator.structure_mut().x.fill(4.);
    integrator.advance(0.5).unwrap();
    assert_eq!(integrator.structure().evaluations, 7);
    assert_eq!(integrator.state(), array![2., 2.]);
    assert_eq!(integrator.structure().velocities(), array![-2., -2.]);
}

#[test]
fn integration_stops_when_time_cannot_advance() {
    let mut decay = Decay::new(array![1.]);
    decay.time = 1e17;
    let mut integrator = TimeIntegrator::new(decay, ForwardEuler::new());
    // 1e17 + 1 rounds back to 1e17.
    let err = integrator.integrate_to(1e17 + 64., 1.).unwrap_err();
    assert_eq!(err, StepError::StalledTime { time: 1e17, dt: 1. });
    assert_eq!(integrator.structure().evaluations, 2);

    let err = integrator.integrate_to(f64::NAN, 1.).unwrap_err();
    assert!(matches!(err, StepError::NonFiniteEndTime { .. }));
    let err = integrator.integrate_to(f64::INFINITY, 1.).unwrap_err();
    assert!(matches!(err, StepError::NonFiniteEndTime { .. }));
    assert_eq!(integrator.time(), 1e17);
}

#[test]
fn failed_step_leaves_structure_untouched() {
    let mut decay = Decay::new(array![1., 3.]);
    decay.fail_after = 0.25;
    let stepper = ExplicitSdc::new(SdcConfig::default()).unwrap();
    let mut integrator = TimeIntegrator::new(decay, stepper);
    integrator.advance(0.2).unwrap();
    let before = integrator.state().to_owned();
    let velocities = integrator.structure().velocities().to_owned();

    let err = integrator.advance(0.2).unwrap_err();
    assert!(matches!(err, StepError::NonFiniteRhs { .. }));
    assert_eq!(integrator.time(), 0.2);
    assert_eq!(integrator.state(), before);
    assert_eq!(integrator.structure().velocities(), velocities);

    let (decay, _) = integrator.into_inner();
    assert!(decay.x.iter().all(|x| x.is_finite()));
}
