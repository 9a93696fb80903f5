//! Binding of a stepper to a structure that owns its own state.
//!
//! An [`ImmersedStructure`] keeps positions, velocities and the current time;
//! its right-hand side maps positions to velocities. [`TimeIntegrator`] copies
//! the state out, runs one step of any [`Stepper`] and writes the result back.

use ndarray::prelude::*;

use crate::sdc::evaluate;
use crate::{check_len, JacobianVector, OdeFunction, OdeIntegrate, StepError, Stepper};

/// A structure whose positions evolve by `dx/dt = v(t, x)`.
pub trait ImmersedStructure {
    fn time(&self) -> f64;
    fn set_time(&mut self, t: f64);
    /// Number of scalar position entries.
    fn data_size(&self) -> usize;
    fn positions(&self) -> ArrayView1<'_, f64>;
    fn positions_mut(&mut self) -> ArrayViewMut1<'_, f64>;
    fn velocities(&self) -> ArrayView1<'_, f64>;
    fn velocities_mut(&mut self) -> ArrayViewMut1<'_, f64>;
    /// Fills `v` with the velocities of the configuration `x` at time `t`.
    ///
    /// `x` is not necessarily the stored configuration: engines call this at
    /// intermediate nodes. Implementations may use internal scratch space
    /// (forces, for instance) but must not change the stored positions,
    /// velocities or time.
    fn compute_velocities(&mut self, t: f64, x: ArrayView1<'_, f64>, v: ArrayViewMut1<'_, f64>);
}

/// Right-hand side view of a structure, as seen by the engines.
pub struct StructureRhs<'a, S>(&'a mut S);

impl<'a, S: ImmersedStructure> OdeFunction for StructureRhs<'a, S> {
    fn ode_size(&self) -> usize {
        self.0.data_size()
    }

    fn eval(&mut self, t: f64, x: ArrayView1<'_, f64>, dx: ArrayViewMut1<'_, f64>) {
        self.0.compute_velocities(t, x, dx)
    }
}

impl<'a, S: ImmersedStructure> JacobianVector for StructureRhs<'a, S> {}

/// Integrator advancing a structure with a stepper `E`.
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use ndarray_sdc::integrator::TimeIntegrator;
/// use ndarray_sdc::particles::{ElasticBoundary, ParticleStorage, SpringNetwork};
/// use ndarray_sdc::sdc::{ExplicitSdc, SdcConfig};
/// use ndarray_sdc::OdeIntegrate;
///
/// let storage = ParticleStorage::new(array![0., 0., 0., 2., 0., 0.]);
/// let springs = SpringNetwork::from_pairs(&storage, &[(0, 1)], 1., Some(1.)).unwrap();
/// let boundary = ElasticBoundary::new(storage, springs, 1.);
/// let stepper = ExplicitSdc::new(SdcConfig::default()).unwrap();
/// let mut integrator = TimeIntegrator::new(boundary, stepper);
/// integrator.integrate_to(1., 0.1).unwrap();
/// assert!((integrator.time() - 1.).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct TimeIntegrator<S, E> {
    structure: S,
    stepper: E,
    x: Array1<f64>,
    f: Array1<f64>,
    x_next: Array1<f64>,
    f_next: Array1<f64>,
    /// Whether `f` holds the velocity of the stored configuration.
    fresh: bool,
}

impl<S, E> TimeIntegrator<S, E>
where
    S: ImmersedStructure,
    E: for<'a> Stepper<StructureRhs<'a, S>>,
{
    pub fn new(structure: S, stepper: E) -> TimeIntegrator<S, E> {
        let n = structure.data_size();
        TimeIntegrator {
            structure,
            stepper,
            x: Array1::zeros(n),
            f: Array1::zeros(n),
            x_next: Array1::zeros(n),
            f_next: Array1::zeros(n),
            fresh: false,
        }
    }

    pub fn structure(&self) -> &S {
        &self.structure
    }

    /// Mutable access to the structure. Marks the cached velocity stale.
    pub fn structure_mut(&mut self) -> &mut S {
        self.fresh = false;
        &mut self.structure
    }

    pub fn stepper(&self) -> &E {
        &self.stepper
    }

    pub fn stepper_mut(&mut self) -> &mut E {
        &mut self.stepper
    }

    pub fn into_inner(self) -> (S, E) {
        (self.structure, self.stepper)
    }

    /// Forces the velocity to be re-evaluated at the start of the next step.
    pub fn invalidate(&mut self) {
        self.fresh = false;
    }

    /// Advances the structure by `dt`.
    ///
    /// On success the positions, velocities and time of the structure are
    /// replaced by the values at the end of the step. On error they are left
    /// as they were.
    pub fn advance(&mut self, dt: f64) -> Result<(), StepError> {
        let n = self.structure.data_size();
        check_len(self.structure.positions(), n)?;
        if self.x.len() != n {
            self.x = Array1::zeros(n);
            self.f = Array1::zeros(n);
            self.x_next = Array1::zeros(n);
            self.f_next = Array1::zeros(n);
            self.fresh = false;
        }

        let t0 = self.structure.time();
        self.x.assign(&self.structure.positions());
        let mut rhs = StructureRhs(&mut self.structure);
        if !self.fresh {
            evaluate(&mut rhs, t0, self.x.view(), self.f.view_mut(), 0)?;
            self.fresh = true;
        }
        self.stepper.step(
            &mut rhs,
            t0,
            self.x.view(),
            self.f.view(),
            dt,
            self.x_next.view_mut(),
            self.f_next.view_mut(),
        )?;

        std::mem::swap(&mut self.x, &mut self.x_next);
        std::mem::swap(&mut self.f, &mut self.f_next);
        self.structure.positions_mut().assign(&self.x);
        self.structure.velocities_mut().assign(&self.f);
        self.structure.set_time(t0 + dt);
        log::debug!("advanced structure to t = {}", t0 + dt);
        Ok(())
    }
}

impl<S, E> OdeIntegrate for TimeIntegrator<S, E>
where
    S: ImmersedStructure,
    E: for<'a> Stepper<StructureRhs<'a, S>>,
{
    fn len(&self) -> usize {
        self.structure.data_size()
    }

    fn time(&self) -> f64 {
        self.structure.time()
    }

    fn state(&self) -> ArrayView1<'_, f64> {
        self.structure.positions()
    }

    fn advance(&mut self, dt: f64) -> Result<(), StepError> {
        TimeIntegrator::advance(self, dt)
    }
}
