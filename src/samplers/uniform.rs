//! Uniform sampling over the bounding box.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::ConfigSpace;

use super::{unit_ball_volume, Sampler};

/// Samples uniformly inside the joint bounds.
pub struct UniformSampler {
    space: ConfigSpace,
    rng: StdRng,
}

impl UniformSampler {
    pub fn new(space: ConfigSpace) -> Self {
        Self {
            space,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests and reproducible runs.
    pub fn with_seed(space: ConfigSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for UniformSampler {
    fn sample(&mut self) -> DVector<f64> {
        let d = self.space.dimension();
        DVector::from_fn(d, |i, _| {
            let lower = self.space.lower()[i];
            let upper = self.space.upper()[i];
            if lower == upper {
                lower
            } else {
                self.rng.gen_range(lower..upper)
            }
        })
    }

    fn in_bounds(&self, q: &DVector<f64>) -> bool {
        self.space.contains(q)
    }

    fn set_cost(&mut self, _cost: f64) {}

    fn specific_volume(&self) -> f64 {
        let d = self.space.dimension();
        let mut volume = 1.0 / unit_ball_volume(d);
        for i in 0..d {
            volume *= (self.space.upper()[i] - self.space.lower()[i]) * self.space.scale()[i];
        }
        volume.powf(1.0 / d as f64)
    }

    fn dimension(&self) -> usize {
        self.space.dimension()
    }
}
