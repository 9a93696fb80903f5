//! Spectral quadrature tables for deferred correction sweeps.
//!
//! A step of width `dt` is split into `M` equal sub-intervals, and each
//! sub-interval carries `p` nodes of a chosen distribution. On each
//! sub-interval the right-hand side is replaced by its interpolating
//! polynomial of degree `p - 1`, which is then integrated exactly. All
//! offsets and weights are expressed in units of the step width, so the
//! tables depend only on `(kind, M, p)` and can be shared between engines.

use lazy_static::lazy_static;
use ndarray::prelude::*;
use ndarray::s;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use crate::error::ConfigError;

/// Maximum number of Newton refinements of a Gauss–Lobatto node.
const LOBATTO_MAX_ITER: usize = 100;

/// Maximum number of Newton refinements of a Gauss–Legendre point.
const LEGENDRE_MAX_ITER: usize = 100;

/// Distribution of the nodes within one sub-interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuadratureKind {
    /// Chebyshev extrema, `(1 - cos(k π / (p - 1))) / 2`.
    ClenshawCurtis,
    /// Legendre–Gauss–Lobatto points.
    GaussLobatto,
    /// Equispaced points.
    Uniform,
}

impl Default for QuadratureKind {
    fn default() -> Self {
        QuadratureKind::ClenshawCurtis
    }
}

impl QuadratureKind {
    /// Returns the `p` node offsets of one sub-interval in ascending order.
    ///
    /// For `p >= 2` the first and last offsets are exactly `0` and `1`. A
    /// single node sits at the left endpoint.
    pub fn offsets(self, p: usize) -> Array1<f64> {
        if p <= 1 {
            return Array1::zeros(p);
        }
        let n = p - 1;
        let mut x = match self {
            QuadratureKind::ClenshawCurtis => {
                Array1::from_shape_fn(p, |k| -(PI * k as f64 / n as f64).cos())
            }
            QuadratureKind::GaussLobatto => lobatto_points(n),
            QuadratureKind::Uniform => Array1::from_shape_fn(p, |k| -1. + 2. * k as f64 / n as f64),
        };
        x[0] = -1.;
        x[n] = 1.;
        x.mapv_inplace(|x| 0.5 * (x + 1.));
        x[0] = 0.;
        x[n] = 1.;
        x
    }
}

/// Evaluates the Legendre polynomials `P_n(x)` and `P_{n-1}(x)`.
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    let mut prev = 1.;
    let mut curr = x;
    for k in 2..=n {
        let k = k as f64;
        let next = ((2. * k - 1.) * x * curr - (k - 1.) * prev) / k;
        prev = curr;
        curr = next;
    }
    (curr, prev)
}

/// Computes the `n + 1` Legendre–Gauss–Lobatto points on `[-1, 1]`, ascending.
///
/// Starts from the Chebyshev extrema and refines each interior point with
/// Newton's method on `(1 - x²) P'_n(x)`.
fn lobatto_points(n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n + 1, |k| {
        let mut x = -(PI * k as f64 / n as f64).cos();
        if k == 0 || k == n {
            return x;
        }
        for _ in 0..LOBATTO_MAX_ITER {
            let (pn, pn1) = legendre_pair(n, x);
            let dx = (x * pn - pn1) / ((n + 1) as f64 * pn);
            x -= dx;
            if dx.abs() <= f64::EPSILON {
                break;
            }
        }
        x
    })
}

/// Computes the `n` Gauss–Legendre points on `[-1, 1]`, ascending, and their
/// weights.
fn gauss_legendre(n: usize) -> (Array1<f64>, Array1<f64>) {
    let derivative = |x: f64| {
        let (pn, pn1) = legendre_pair(n, x);
        (pn, n as f64 * (x * pn - pn1) / (x * x - 1.))
    };
    let mut points = Array1::zeros(n);
    let mut weights = Array1::zeros(n);
    for k in 0..n {
        let mut x = -(PI * (k as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..LEGENDRE_MAX_ITER {
            let (pn, dpn) = derivative(x);
            let dx = pn / dpn;
            x -= dx;
            if dx.abs() <= f64::EPSILON {
                break;
            }
        }
        let (_, dpn) = derivative(x);
        points[k] = x;
        weights[k] = 2. / ((1. - x * x) * dpn * dpn);
    }
    (points, weights)
}

/// Integrates the Lagrange basis polynomials of `x` over `[a, b]`.
///
/// Element `i` of the result is `∫_a^b ℓ_i(ξ) dξ`. Each `ℓ_i` is evaluated in
/// product form at Gauss–Legendre points, which integrate it exactly and
/// keep the weights accurate to rounding for large node counts.
fn lagrange_integrals(x: ArrayView1<f64>, a: f64, b: f64) -> Array1<f64> {
    let n = x.len();
    let (points, weights) = gauss_legendre(n);
    let half = 0.5 * (b - a);
    let mid = 0.5 * (a + b);
    Array1::from_shape_fn(n, |i| {
        let sum: f64 = points
            .iter()
            .zip(&weights)
            .map(|(&g, &w)| {
                let xi = mid + half * g;
                let basis: f64 = x
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != i)
                    .map(|(_, &xk)| (xi - xk) / (x[i] - xk))
                    .product();
                w * basis
            })
            .sum();
        sum * half
    })
}

/// Node locations and integration weights of one SDC step.
///
/// Adjacent sub-intervals share their common endpoint, so the grid has
/// `M (p - 1) + 1` nodes when `p >= 2`. With a single node per sub-interval
/// the interpolant is piecewise constant and the grid has `M + 1` nodes,
/// the last one being the right end of the step.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralQuadrature {
    kind: QuadratureKind,
    sub_intervals: usize,
    nodes_per_interval: usize,
    /// Node offsets in `[0, 1]`, shape `num_nodes`.
    nodes: Array1<f64>,
    /// Row `j` integrates from node `j` to node `j + 1`, shape
    /// `(num_nodes - 1, num_nodes)`.
    substep_weights: Array2<f64>,
    /// Row `j` integrates from node `0` to node `j`, shape
    /// `(num_nodes, num_nodes)`.
    integration: Array2<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: QuadratureKind,
    sub_intervals: usize,
    nodes_per_interval: usize,
}

lazy_static! {
    static ref CACHE: Mutex<HashMap<CacheKey, Arc<SpectralQuadrature>>> =
        Mutex::new(HashMap::new());
}

impl SpectralQuadrature {
    /// Builds the table for `sub_intervals` sub-intervals with
    /// `nodes_per_interval` nodes each.
    pub fn new(
        kind: QuadratureKind,
        sub_intervals: usize,
        nodes_per_interval: usize,
    ) -> Result<SpectralQuadrature, ConfigError> {
        if sub_intervals == 0 {
            return Err(ConfigError::ZeroSubIntervals);
        }
        if nodes_per_interval == 0 {
            return Err(ConfigError::ZeroNodes);
        }
        let m = sub_intervals;
        let p = nodes_per_interval;
        let width = 1. / m as f64;
        let local = kind.offsets(p);
        // Nodes owned by each sub-interval; the right endpoint of the last
        // sub-interval is appended separately.
        let stride = if p == 1 { 1 } else { p - 1 };
        let num_nodes = m * stride + 1;

        let mut nodes = Array1::zeros(num_nodes);
        for i in 0..m {
            for l in 0..stride {
                nodes[i * stride + l] = (i as f64 + local[l]) * width;
            }
        }
        nodes[num_nodes - 1] = 1.;

        let mut substep_weights = Array2::zeros((num_nodes - 1, num_nodes));
        if p == 1 {
            for j in 0..m {
                substep_weights[[j, j]] = width;
            }
        } else {
            let xi = local.mapv(|s| 2. * s - 1.);
            for i in 0..m {
                for l in 0..stride {
                    let w = lagrange_integrals(xi.view(), xi[l], xi[l + 1]);
                    let row = i * stride + l;
                    let first = i * stride;
                    substep_weights
                        .slice_mut(s![row, first..first + p])
                        .assign(&(w * (0.5 * width)));
                }
            }
        }

        let mut integration = Array2::zeros((num_nodes, num_nodes));
        for j in 0..num_nodes - 1 {
            let next = &integration.row(j) + &substep_weights.row(j);
            integration.row_mut(j + 1).assign(&next);
        }

        Ok(SpectralQuadrature {
            kind,
            sub_intervals,
            nodes_per_interval,
            nodes,
            substep_weights,
            integration,
        })
    }

    /// Returns the shared table for this configuration, building it on first
    /// use.
    pub fn cached(
        kind: QuadratureKind,
        sub_intervals: usize,
        nodes_per_interval: usize,
    ) -> Result<Arc<SpectralQuadrature>, ConfigError> {
        let key = CacheKey {
            kind,
            sub_intervals,
            nodes_per_interval,
        };
        let mut cache = CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(table) = cache.get(&key) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(SpectralQuadrature::new(
            kind,
            sub_intervals,
            nodes_per_interval,
        )?);
        cache.insert(key, Arc::clone(&table));
        Ok(table)
    }

    pub fn kind(&self) -> QuadratureKind {
        self.kind
    }

    pub fn sub_intervals(&self) -> usize {
        self.sub_intervals
    }

    pub fn nodes_per_interval(&self) -> usize {
        self.nodes_per_interval
    }

    /// Number of distinct nodes in the step, including both ends.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of substeps, i.e. `num_nodes() - 1`.
    pub fn num_substeps(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Node offsets as fractions of the step width.
    pub fn nodes(&self) -> ArrayView1<'_, f64> {
        self.nodes.view()
    }

    /// Width of substep `j` as a fraction of the step width.
    pub fn substep_width(&self, j: usize) -> f64 {
        self.nodes[j + 1] - self.nodes[j]
    }

    /// Cumulative integration matrix `S`.
    ///
    /// `dt * S.row(j).dot(f)` approximates the integral from the start of the
    /// step to node `j` given right-hand-side samples `f` at every node.
    pub fn integration(&self) -> ArrayView2<'_, f64> {
        self.integration.view()
    }

    /// Per-substep weights, equal to consecutive row differences of `S`.
    pub fn substep_weights(&self) -> ArrayView2<'_, f64> {
        self.substep_weights.view()
    }

    /// Polynomial order of the quadrature.
    ///
    /// Integrals are exact for polynomials of degree less than this on each
    /// sub-interval.
    pub fn order(&self) -> usize {
        self.nodes_per_interval
    }
}
