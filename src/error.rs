//! Error types of the quadrature table, the engines and the spring network.

use thiserror::Error;

/// Inconsistent configuration or input data.
///
/// Engines and quadrature tables report these when they are constructed,
/// spring networks when they are built from connectivity. None is raised
/// during a step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("number of sub-intervals must be at least 1")]
    ZeroSubIntervals,
    #[error("number of nodes per sub-interval must be at least 1")]
    ZeroNodes,
    /// More correction sweeps than the grid can turn into accuracy.
    #[error("{sweeps} correction sweeps requested but {nodes} nodes support at most {}", .nodes - 1)]
    TooManySweeps { sweeps: usize, nodes: usize },
    #[error("tolerance {0} must be finite and non-negative")]
    InvalidTolerance(f64),
    #[error("iteration cap must be at least 1")]
    ZeroIterations,
    /// Spring connectivity that does not describe the particle set.
    #[error("invalid spring connectivity: {0}")]
    InvalidConnectivity(String),
}

/// Failure of the matrix-free linear solve.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KrylovError {
    /// The Krylov space stopped growing before the residual could be reduced.
    #[error("Krylov solve stagnated after {iterations} iterations (residual {residual:e})")]
    Stagnation { iterations: usize, residual: f64 },
    #[error("Krylov solve produced a non-finite residual after {iterations} iterations")]
    NonFinite { iterations: usize },
}

/// Failure of a single time step.
///
/// A step that returns one of these must not be accepted: the output buffers
/// may hold partially updated data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("step size {dt} is not finite")]
    NonFiniteStep { dt: f64 },
    #[error("end time {t_end} is not finite")]
    NonFiniteEndTime { t_end: f64 },
    /// A step of size `dt` left the time unchanged, typically because `dt`
    /// is below the float spacing at `time`.
    #[error("step of size {dt} did not advance the time past {time}")]
    StalledTime { time: f64, dt: f64 },
    #[error("state has length {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    /// The right-hand side evaluated to NaN or infinity.
    #[error("right-hand side is not finite at t = {time} (node {node})")]
    NonFiniteRhs { time: f64, node: usize },
    #[error(
        "Newton iteration did not converge at t = {time} (node {node}) after {iterations} \
         iterations, residual {residual:e}"
    )]
    NewtonNonConvergence {
        time: f64,
        node: usize,
        iterations: usize,
        residual: f64,
        #[source]
        cause: Option<KrylovError>,
    },
}
