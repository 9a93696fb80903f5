//! Explicit spectral deferred correction.
//!
//! One step of size `dt` is computed on the nodes of a
//! [`SpectralQuadrature`]. A forward Euler predictor produces a first
//! trajectory through the nodes; each correction sweep then integrates the
//! error equation with forward Euler, using the quadrature of the previous
//! iterate's right-hand side in place of the exact integral. Sweep `k` raises
//! the order of accuracy by one until it reaches the order of the quadrature.
//!
//! # References
//!
//! 1. A. Dutt, L. Greengard, V. Rokhlin, "Spectral Deferred Correction
//!    Methods for Ordinary Differential Equations", BIT Numerical
//!    Mathematics, Vol. 40, No. 2, pp. 241-266, 2000.

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::sync::Arc;

use crate::euler::ForwardEuler;
use crate::quadrature::{QuadratureKind, SpectralQuadrature};
use crate::{all_finite, check_len, ConfigError, OdeFunction, StepError, Stepper};

/// Shape of the quadrature grid and number of correction sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdcConfig {
    /// Number of equal sub-intervals the step is split into.
    pub sub_intervals: usize,
    /// Nodes per sub-interval, i.e. the polynomial order of the quadrature.
    pub nodes: usize,
    /// Node distribution within a sub-interval.
    pub kind: QuadratureKind,
    /// Number of correction sweeps after the prediction.
    ///
    /// At most `nodes - 1`; that many sweeps reach the full order `nodes`.
    pub sweeps: usize,
}

impl Default for SdcConfig {
    fn default() -> Self {
        SdcConfig {
            sub_intervals: 1,
            nodes: 5,
            kind: QuadratureKind::ClenshawCurtis,
            sweeps: 4,
        }
    }
}

impl SdcConfig {
    pub fn new(sub_intervals: usize, nodes: usize, kind: QuadratureKind, sweeps: usize) -> Self {
        SdcConfig {
            sub_intervals,
            nodes,
            kind,
            sweeps,
        }
    }

    /// Configuration with `nodes - 1` sweeps.
    pub fn full_order(sub_intervals: usize, nodes: usize, kind: QuadratureKind) -> Self {
        SdcConfig::new(sub_intervals, nodes, kind, nodes.saturating_sub(1))
    }

    pub fn with_sub_intervals(mut self, sub_intervals: usize) -> Self {
        self.sub_intervals = sub_intervals;
        self
    }

    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_kind(mut self, kind: QuadratureKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_sweeps(mut self, sweeps: usize) -> Self {
        self.sweeps = sweeps;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sub_intervals == 0 {
            return Err(ConfigError::ZeroSubIntervals);
        }
        if self.nodes == 0 {
            return Err(ConfigError::ZeroNodes);
        }
        if self.sweeps > self.nodes - 1 {
            return Err(ConfigError::TooManySweeps {
                sweeps: self.sweeps,
                nodes: self.nodes,
            });
        }
        Ok(())
    }

    /// Expected global order of accuracy, `min(sweeps + 1, nodes)`.
    pub fn design_order(&self) -> usize {
        cmp::min(self.sweeps + 1, self.nodes)
    }

    /// Validates the configuration and fetches the shared quadrature table.
    pub fn quadrature(&self) -> Result<Arc<SpectralQuadrature>, ConfigError> {
        self.validate()?;
        SpectralQuadrature::cached(self.kind, self.sub_intervals, self.nodes)
    }
}

/// Node states and right-hand sides of the current and previous iterates.
///
/// Each array has shape `(num_nodes, ode_size)`. Every row past the first is
/// rewritten by the predictor before it is read, so reused buffers never leak
/// data from an earlier step.
#[derive(Debug, Clone)]
pub(crate) struct SweepBuffers {
    pub x: Array2<f64>,
    pub f: Array2<f64>,
    pub x_prev: Array2<f64>,
    pub f_prev: Array2<f64>,
    /// Scratch vector of length `ode_size`.
    pub work: Array1<f64>,
}

impl SweepBuffers {
    pub fn new() -> SweepBuffers {
        SweepBuffers {
            x: Array2::zeros((0, 0)),
            f: Array2::zeros((0, 0)),
            x_prev: Array2::zeros((0, 0)),
            f_prev: Array2::zeros((0, 0)),
            work: Array1::zeros(0),
        }
    }

    /// Resizes the buffers if needed and loads the initial node.
    pub fn start(&mut self, num_nodes: usize, x0: ArrayView1<'_, f64>, f0: ArrayView1<'_, f64>) {
        let shape = (num_nodes, x0.len());
        if self.x.dim() != shape {
            self.x = Array2::zeros(shape);
            self.f = Array2::zeros(shape);
            self.x_prev = Array2::zeros(shape);
            self.f_prev = Array2::zeros(shape);
            self.work = Array1::zeros(x0.len());
        }
        self.x.row_mut(0).assign(&x0);
        self.f.row_mut(0).assign(&f0);
    }

    /// Makes the current iterate the previous one and seeds the new iterate
    /// with the (unchanged) initial node.
    pub fn next_sweep(&mut self) {
        std::mem::swap(&mut self.x, &mut self.x_prev);
        std::mem::swap(&mut self.f, &mut self.f_prev);
        self.x.row_mut(0).assign(&self.x_prev.row(0));
        self.f.row_mut(0).assign(&self.f_prev.row(0));
    }

    /// Adds `scale` times the quadrature of the previous iterate over
    /// substep `j` to the scratch vector.
    pub fn add_quadrature(&mut self, quadrature: &SpectralQuadrature, j: usize, scale: f64) {
        let weights = quadrature.substep_weights();
        for (i, &w) in weights.row(j).iter().enumerate() {
            if w != 0. {
                self.work.scaled_add(scale * w, &self.f_prev.row(i));
            }
        }
    }

    /// Largest change of the final node between the last two iterates.
    pub fn last_correction(&self) -> f64 {
        let last = self.x.nrows() - 1;
        self.x
            .row(last)
            .iter()
            .zip(self.x_prev.row(last))
            .fold(0f64, |acc, (a, b)| acc.max((a - b).abs()))
    }
}

/// Evaluates `fun` into `f`, rejecting non-finite results.
pub(crate) fn evaluate<F: OdeFunction>(
    fun: &mut F,
    t: f64,
    x: ArrayView1<'_, f64>,
    mut f: ArrayViewMut1<'_, f64>,
    node: usize,
) -> Result<(), StepError> {
    fun.eval(t, x, f.view_mut());
    if !all_finite(f.view()) {
        return Err(StepError::NonFiniteRhs { time: t, node });
    }
    Ok(())
}

/// Validates the arguments common to every engine step.
pub(crate) fn check_step_args(
    n: usize,
    t0: f64,
    x0: ArrayView1<'_, f64>,
    f0: ArrayView1<'_, f64>,
    dt: f64,
    x1: ArrayView1<'_, f64>,
    f1: ArrayView1<'_, f64>,
) -> Result<(), StepError> {
    check_len(x0, n)?;
    check_len(f0, n)?;
    check_len(x1, n)?;
    check_len(f1, n)?;
    if !dt.is_finite() {
        return Err(StepError::NonFiniteStep { dt });
    }
    if !all_finite(f0) {
        return Err(StepError::NonFiniteRhs { time: t0, node: 0 });
    }
    Ok(())
}

/// Explicit SDC engine.
#[derive(Debug, Clone)]
pub struct ExplicitSdc {
    config: SdcConfig,
    quadrature: Arc<SpectralQuadrature>,
    buffers: SweepBuffers,
}

impl ExplicitSdc {
    /// Creates an engine, rejecting configurations that cannot deliver
    /// their design order.
    pub fn new(config: SdcConfig) -> Result<ExplicitSdc, ConfigError> {
        let quadrature = config.quadrature()?;
        Ok(ExplicitSdc {
            config,
            quadrature,
            buffers: SweepBuffers::new(),
        })
    }

    pub fn config(&self) -> &SdcConfig {
        &self.config
    }

    pub fn quadrature(&self) -> &SpectralQuadrature {
        &self.quadrature
    }

    /// Number of right-hand-side evaluations spent on one step.
    pub fn evaluations_per_step(&self) -> usize {
        self.quadrature.num_substeps() * (self.config.sweeps + 1)
    }

    /// Advances `x0` at `t0` by `dt`.
    ///
    /// `f0` must hold `F(t0, x0)`. On return `x1` holds the solution at
    /// `t0 + dt` and `f1` the right-hand side there.
    pub fn advance<F: OdeFunction>(
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
        let ExplicitSdc {
            config,
            quadrature,
            buffers,
        } = self;
        let q: &SpectralQuadrature = quadrature;
        let num_substeps = q.num_substeps();
        let nodes = q.nodes();

        buffers.start(q.num_nodes(), x0, f0);
        for j in 0..num_substeps {
            let h = dt * q.substep_width(j);
            ForwardEuler::advance(buffers.x.row(j), buffers.f.row(j), h, buffers.work.view_mut());
            buffers.x.row_mut(j + 1).assign(&buffers.work);
            let t = t0 + dt * nodes[j + 1];
            evaluate(fun, t, buffers.x.row(j + 1), buffers.f.row_mut(j + 1), j + 1)?;
        }

        for sweep in 1..=config.sweeps {
            buffers.next_sweep();
            for j in 0..num_substeps {
                let h = dt * q.substep_width(j);
                buffers.work.assign(&buffers.x.row(j));
                buffers.work.scaled_add(h, &buffers.f.row(j));
                buffers.work.scaled_add(-h, &buffers.f_prev.row(j));
                buffers.add_quadrature(q, j, dt);
                buffers.x.row_mut(j + 1).assign(&buffers.work);
                let t = t0 + dt * nodes[j + 1];
                evaluate(fun, t, buffers.x.row(j + 1), buffers.f.row_mut(j + 1), j + 1)?;
            }
            log::trace!(
                "explicit SDC sweep {} at t = {}: correction {:.3e}",
                sweep,
                t0,
                buffers.last_correction()
            );
        }

        x1.assign(&buffers.x.row(num_substeps));
        f1.assign(&buffers.f.row(num_substeps));
        log::debug!(
            "explicit SDC step t = {} -> {} ({} evaluations)",
            t0,
            t0 + dt,
            num_substeps * (config.sweeps + 1)
        );
        Ok(())
    }
}

impl<F: OdeFunction> Stepper<F> for ExplicitSdc {
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
