//! Particles connected by elastic springs.
//!
//! Positions, velocities and forces are flat arrays holding three entries per
//! particle. An [`ElasticBoundary`] moves its particles with velocities
//! proportional to the spring forces acting on them.

use ndarray::prelude::*;
use std::collections::HashSet;

use crate::integrator::ImmersedStructure;
use crate::ConfigError;

/// Flat per-particle data and the current time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleStorage {
    positions: Array1<f64>,
    velocities: Array1<f64>,
    forces: Array1<f64>,
    time: f64,
}

/// Cubic box containing every particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    /// Center of mass rounded to the nearest integer point.
    pub center: [f64; 3],
    /// Half-width of the box, equal along every axis.
    pub extent: f64,
}

impl ParticleStorage {
    /// Storage for the particles at `positions`, at rest at time 0.
    ///
    /// # Panics
    ///
    /// Panics if the length of `positions` is not a multiple of 3.
    pub fn new(positions: Array1<f64>) -> ParticleStorage {
        assert_eq!(positions.len() % 3, 0, "positions must hold 3 entries per particle");
        let n = positions.len();
        ParticleStorage {
            positions,
            velocities: Array1::zeros(n),
            forces: Array1::zeros(n),
            time: 0.,
        }
    }

    pub fn particles_size(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn data_size(&self) -> usize {
        self.positions.len()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, t: f64) {
        self.time = t;
    }

    pub fn positions(&self) -> ArrayView1<'_, f64> {
        self.positions.view()
    }

    pub fn positions_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.positions.view_mut()
    }

    pub fn velocities(&self) -> ArrayView1<'_, f64> {
        self.velocities.view()
    }

    pub fn velocities_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.velocities.view_mut()
    }

    pub fn forces(&self) -> ArrayView1<'_, f64> {
        self.forces.view()
    }

    pub fn forces_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.forces.view_mut()
    }

    pub fn clear_forces(&mut self) {
        self.forces.fill(0.);
    }

    pub fn clear_velocities(&mut self) {
        self.velocities.fill(0.);
    }

    pub fn clear_time(&mut self) {
        self.time = 0.;
    }

    /// Bounding box of the particles, used to size far-field evaluators.
    ///
    /// Returns `None` when there are no particles.
    pub fn domain(&self) -> Option<Domain> {
        let n = self.particles_size();
        if n == 0 {
            return None;
        }
        let points = self.positions.view().into_shape((n, 3)).ok()?;
        let mut center = [0.; 3];
        let mut extent = 0f64;
        for (k, axis) in points.axis_iter(Axis(1)).enumerate() {
            let (lo, hi) = axis
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                    (lo.min(x), hi.max(x))
                });
            center[k] = (axis.sum() / n as f64 + 0.5).floor();
            extent = extent.max(hi - center[k]).max(center[k] - lo);
        }
        Some(Domain {
            center,
            extent: extent * 1.000001,
        })
    }
}

/// A Hookean spring between two particles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring {
    /// Offset of the first endpoint in the flat data arrays.
    pub a: usize,
    /// Offset of the second endpoint in the flat data arrays.
    pub b: usize,
    pub stiffness: f64,
    pub resting_length: f64,
}

impl Spring {
    /// Adds the force of this spring in configuration `x` to `forces`.
    fn add_force(&self, x: ArrayView1<'_, f64>, mut forces: ArrayViewMut1<'_, f64>) {
        let d = [
            x[self.b] - x[self.a],
            x[self.b + 1] - x[self.a + 1],
            x[self.b + 2] - x[self.a + 2],
        ];
        let length = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        if length == 0. {
            return;
        }
        let scale = self.stiffness * (length - self.resting_length) / length;
        for k in 0..3 {
            forces[self.a + k] += scale * d[k];
            forces[self.b + k] -= scale * d[k];
        }
    }
}

fn distance(x: ArrayView1<'_, f64>, a: usize, b: usize) -> f64 {
    (0..3)
        .map(|k| (x[b + k] - x[a + k]).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Springs connecting the particles of a [`ParticleStorage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpringNetwork {
    springs: Vec<Spring>,
}

impl SpringNetwork {
    /// Builds the network from compressed sparse connectivity.
    ///
    /// Particle `p` is connected to `col_idx[i]` with stiffness `strength[i]`
    /// for every `i` in `col_ptr[p]..col_ptr[p + 1]`. A pair given in both
    /// orders yields one spring. Resting lengths are the distances in the
    /// current configuration of `storage`.
    pub fn from_csr(
        storage: &ParticleStorage,
        col_ptr: &[usize],
        col_idx: &[usize],
        strength: &[f64],
    ) -> Result<SpringNetwork, ConfigError> {
        let n = storage.particles_size();
        if col_ptr.len() != n + 1 {
            return Err(ConfigError::InvalidConnectivity(format!(
                "expected {} column pointers, found {}",
                n + 1,
                col_ptr.len()
            )));
        }
        if col_idx.len() != strength.len() {
            return Err(ConfigError::InvalidConnectivity(format!(
                "{} column indices but {} strengths",
                col_idx.len(),
                strength.len()
            )));
        }
        let mut network = SpringNetwork::default();
        let mut seen = HashSet::new();
        let x = storage.positions();
        for p in 0..n {
            let (start, end) = (col_ptr[p], col_ptr[p + 1]);
            if start > end || end > col_idx.len() {
                return Err(ConfigError::InvalidConnectivity(format!(
                    "column range {}..{} of particle {} is out of bounds",
                    start, end, p
                )));
            }
            for i in start..end {
                let q = col_idx[i];
                if q >= n {
                    return Err(ConfigError::InvalidConnectivity(format!(
                        "particle index {} out of range",
                        q
                    )));
                }
                if q == p || !seen.insert((p.min(q), p.max(q))) {
                    continue;
                }
                network.springs.push(Spring {
                    a: 3 * p,
                    b: 3 * q,
                    stiffness: strength[i],
                    resting_length: distance(x, 3 * p, 3 * q),
                });
            }
        }
        log::debug!("built {} springs for {} particles", network.len(), n);
        Ok(network)
    }

    /// Builds the network from a list of particle pairs sharing one
    /// stiffness. Without `resting_length` each spring rests at its current
    /// length.
    pub fn from_pairs(
        storage: &ParticleStorage,
        pairs: &[(usize, usize)],
        stiffness: f64,
        resting_length: Option<f64>,
    ) -> Result<SpringNetwork, ConfigError> {
        let n = storage.particles_size();
        let mut network = SpringNetwork::default();
        let mut seen = HashSet::new();
        for &(p, q) in pairs {
            if p >= n || q >= n {
                return Err(ConfigError::InvalidConnectivity(format!(
                    "pair ({}, {}) out of range",
                    p, q
                )));
            }
            if p == q || !seen.insert((p.min(q), p.max(q))) {
                continue;
            }
            let rest = resting_length.unwrap_or_else(|| distance(storage.positions(), 3 * p, 3 * q));
            network.springs.push(Spring {
                a: 3 * p,
                b: 3 * q,
                stiffness,
                resting_length: rest,
            });
        }
        Ok(network)
    }

    pub fn len(&self) -> usize {
        self.springs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.springs.is_empty()
    }

    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    pub fn springs_mut(&mut self) -> &mut [Spring] {
        &mut self.springs
    }

    /// Overwrites `forces` with the spring forces in configuration `x`.
    pub fn compute_forces(&self, x: ArrayView1<'_, f64>, mut forces: ArrayViewMut1<'_, f64>) {
        forces.fill(0.);
        for spring in &self.springs {
            spring.add_force(x, forces.view_mut());
        }
    }

    /// Elastic energy of configuration `x`.
    pub fn energy(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.springs
            .iter()
            .map(|s| 0.5 * s.stiffness * (distance(x, s.a, s.b) - s.resting_length).powi(2))
            .sum()
    }
}

/// Overdamped elastic structure: each particle moves with velocity
/// `mobility * force`.
#[derive(Debug, Clone)]
pub struct ElasticBoundary {
    storage: ParticleStorage,
    springs: SpringNetwork,
    mobility: f64,
}

impl ElasticBoundary {
    pub fn new(storage: ParticleStorage, springs: SpringNetwork, mobility: f64) -> ElasticBoundary {
        ElasticBoundary {
            storage,
            springs,
            mobility,
        }
    }

    pub fn storage(&self) -> &ParticleStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut ParticleStorage {
        &mut self.storage
    }

    pub fn springs(&self) -> &SpringNetwork {
        &self.springs
    }

    pub fn mobility(&self) -> f64 {
        self.mobility
    }

    /// Elastic energy of the stored configuration.
    pub fn energy(&self) -> f64 {
        self.springs.energy(self.storage.positions())
    }
}

impl ImmersedStructure for ElasticBoundary {
    fn time(&self) -> f64 {
        self.storage.time()
    }

    fn set_time(&mut self, t: f64) {
        self.storage.set_time(t);
    }

    fn data_size(&self) -> usize {
        self.storage.data_size()
    }

    fn positions(&self) -> ArrayView1<'_, f64> {
        self.storage.positions()
    }

    fn positions_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.storage.positions_mut()
    }

    fn velocities(&self) -> ArrayView1<'_, f64> {
        self.storage.velocities()
    }

    fn velocities_mut(&mut self) -> ArrayViewMut1<'_, f64> {
        self.storage.velocities_mut()
    }

    fn compute_velocities(&mut self, _t: f64, x: ArrayView1<'_, f64>, mut v: ArrayViewMut1<'_, f64>) {
        self.springs.compute_forces(x, self.storage.forces_mut());
        v.assign(&self.storage.forces);
        v *= self.mobility;
    }
}
