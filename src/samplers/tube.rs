//! Tube sampling: informed samples biased toward a known path.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::core::ConfigSpace;
use crate::error::Result;

use super::{InformedSampler, Sampler};

/// Attempts at a tube point before falling back to the ellipsoid.
const MAX_TUBE_ATTEMPTS: usize = 100;

/// Informed sampler restricted, with probability `local_bias`, to a tube
/// around the current path.
pub struct TubeSampler {
    informed: InformedSampler,
    space: ConfigSpace,
    waypoints: Vec<DVector<f64>>,
    cumulative: Vec<f64>,
    radius: f64,
    local_bias: f64,
    rng: StdRng,
}

impl TubeSampler {
    pub fn new(
        space: &ConfigSpace,
        focus1: &DVector<f64>,
        focus2: &DVector<f64>,
        cost: f64,
    ) -> Result<Self> {
        Ok(Self {
            informed: InformedSampler::new(space, focus1, focus2, cost)?,
            space: space.clone(),
            waypoints: Vec::new(),
            cumulative: Vec::new(),
            radius: 0.01,
            local_bias: 0.3,
            rng: StdRng::from_entropy(),
        })
    }

    /// Deterministic variant for tests and reproducible runs.
    pub fn with_seed(
        space: &ConfigSpace,
        focus1: &DVector<f64>,
        focus2: &DVector<f64>,
        cost: f64,
        seed: u64,
    ) -> Result<Self> {
        let mut sampler = Self::new(space, focus1, focus2, cost)?;
        sampler.informed = InformedSampler::with_seed(space, focus1, focus2, cost, seed)?;
        sampler.rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        Ok(sampler)
    }

    /// Set the path the tube follows.
    pub fn set_path(&mut self, waypoints: Vec<DVector<f64>>) {
        self.cumulative = Vec::with_capacity(waypoints.len());
        let mut total = 0.0;
        for (i, w) in waypoints.iter().enumerate() {
            if i > 0 {
                total += self.space.distance(&waypoints[i - 1], w);
            }
            self.cumulative.push(total);
        }
        self.waypoints = waypoints;
    }

    pub fn set_radius(&mut self, radius: f64) {
        self.radius = radius.max(0.0);
    }

    pub fn set_local_bias(&mut self, local_bias: f64) {
        self.local_bias = local_bias.clamp(0.0, 1.0);
    }

    pub fn local_bias(&self) -> f64 {
        self.local_bias
    }

    pub fn collapsed(&self) -> bool {
        self.informed.collapsed()
    }

    /// Point at a given arc length along the path.
    fn point_at(&self, s: f64) -> DVector<f64> {
        debug_assert!(self.waypoints.len() >= 2);
        for i in 1..self.waypoints.len() {
            if s <= self.cumulative[i] {
                let span = self.cumulative[i] - self.cumulative[i - 1];
                let t = if span > 0.0 {
                    (s - self.cumulative[i - 1]) / span
                } else {
                    0.0
                };
                return &self.waypoints[i - 1] + (&self.waypoints[i] - &self.waypoints[i - 1]) * t;
            }
        }
        self.waypoints[self.waypoints.len() - 1].clone()
    }

    fn tube_point(&mut self) -> Option<DVector<f64>> {
        let total = *self.cumulative.last()?;
        let d = self.space.dimension();
        for _ in 0..MAX_TUBE_ATTEMPTS {
            let s = self.rng.gen::<f64>() * total;
            let anchor = self.point_at(s);
            let direction =
                DVector::from_fn(d, |_, _| self.rng.sample::<f64, _>(StandardNormal));
            let norm = direction.norm();
            if norm <= f64::EPSILON {
                continue;
            }
            let radius: f64 = self.rng.gen::<f64>().powf(1.0 / d as f64) * self.radius;
            let q = anchor + direction * (radius / norm);
            if self.informed.in_bounds(&q) {
                return Some(q);
            }
        }
        None
    }
}

impl Sampler for TubeSampler {
    fn sample(&mut self) -> DVector<f64> {
        if self.waypoints.len() >= 2 && self.rng.gen::<f64>() < self.local_bias {
            if let Some(q) = self.tube_point() {
                return q;
            }
        }
        self.informed.sample()
    }

    fn in_bounds(&self, q: &DVector<f64>) -> bool {
        self.informed.in_bounds(q)
    }

    fn set_cost(&mut self, cost: f64) {
        self.informed.set_cost(cost);
    }

    fn specific_volume(&self) -> f64 {
        self.informed.specific_volume()
    }

    fn dimension(&self) -> usize {
        self.informed.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn make_sampler() -> TubeSampler {
        let space = ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
        let mut sampler = TubeSampler::with_seed(
            &space,
            &dvector![-1.0, 0.0],
            &dvector![1.0, 0.0],
            3.0,
            11,
        )
        .unwrap();
        sampler.set_path(vec![
            dvector![-1.0, 0.0],
            dvector![0.0, 0.5],
            dvector![1.0, 0.0],
        ]);
        sampler
    }

    #[test]
    fn test_full_bias_stays_in_tube() {
        let mut sampler = make_sampler();
        sampler.set_local_bias(1.0);
        sampler.set_radius(0.1);
        for _ in 0..500 {
            let q = sampler.sample();
            // Within radius of some path segment point (coarse check via
            // waypoint distance bound: dist to the polyline is below the
            // max of segment sampling error + radius).
            let near = sampler
                .waypoints
                .iter()
                .any(|w| (&q - w).norm() <= 1.2 + 0.1);
            assert!(near);
            // And always inside the informed region.
            assert!(sampler.in_bounds(&q));
        }
    }

    #[test]
    fn test_zero_bias_ignores_tube() {
        let mut sampler = make_sampler();
        sampler.set_local_bias(0.0);
        for _ in 0..100 {
            let q = sampler.sample();
            assert!(sampler.in_bounds(&q) || sampler.space.contains(&q));
        }
    }

    #[test]
    fn test_without_path_falls_back() {
        let space = ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
        let mut sampler =
            TubeSampler::with_seed(&space, &dvector![-1.0, 0.0], &dvector![1.0, 0.0], 3.0, 7)
                .unwrap();
        sampler.set_local_bias(1.0);
        for _ in 0..50 {
            let q = sampler.sample();
            assert!(sampler.in_bounds(&q));
        }
    }

    #[test]
    fn test_bias_clamped() {
        let mut sampler = make_sampler();
        sampler.set_local_bias(7.0);
        assert_eq!(sampler.local_bias(), 1.0);
        sampler.set_local_bias(-1.0);
        assert_eq!(sampler.local_bias(), 0.0);
    }
}
