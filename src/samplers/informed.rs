//! Informed sampling inside a prolate hyperspheroid.
//!
//! Given two foci and a path-cost bound `c`, the admissible region is
//! `{q : ‖q − x₁‖ + ‖q − x₂‖ ≤ c}` in the scaled space, intersected with
//! the bounding box. Points are drawn uniformly from the unit ball, mapped
//! through the ellipsoid axes and rotation, and rejected against the box.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::warn;

use crate::core::{ConfigSpace, EPS};
use crate::error::Result;

use super::{unit_ball_volume, Sampler};

/// Rejection retries before falling back to a uniform box sample.
const MAX_REJECTIONS: usize = 100;

/// Prolate-hyperspheroid sampler.
pub struct InformedSampler {
    space: ConfigSpace,
    // All geometry below is in scaled coordinates.
    focus1: DVector<f64>,
    focus2: DVector<f64>,
    lower: DVector<f64>,
    upper: DVector<f64>,
    center: DVector<f64>,
    center_bound: DVector<f64>,
    bound_width: DVector<f64>,
    focii_distance: f64,
    rotation: DMatrix<f64>,
    axes: DVector<f64>,
    cost: f64,
    inf_cost: bool,
    specific_volume: f64,
    rng: StdRng,
}

impl InformedSampler {
    /// Build a sampler for the segment between two configurations with an
    /// initial cost bound (usually infinite).
    pub fn new(
        space: &ConfigSpace,
        focus1: &DVector<f64>,
        focus2: &DVector<f64>,
        cost: f64,
    ) -> Result<Self> {
        space.check_dimension(focus1)?;
        space.check_dimension(focus2)?;

        let d = space.dimension();
        let focus1 = space.to_scaled(focus1);
        let focus2 = space.to_scaled(focus2);
        let lower = space.to_scaled(space.lower());
        let upper = space.to_scaled(space.upper());
        let center = 0.5 * (&focus1 + &focus2);
        let center_bound = 0.5 * (&lower + &upper);
        let bound_width = 0.5 * (&upper - &lower);
        let focii_distance = (&focus1 - &focus2).norm();
        let rotation = rotation_matrix(&focus1, &focus2);

        let mut sampler = Self {
            space: space.clone(),
            focus1,
            focus2,
            lower,
            upper,
            center,
            center_bound,
            bound_width,
            focii_distance,
            rotation,
            axes: DVector::zeros(d),
            cost: f64::INFINITY,
            inf_cost: true,
            specific_volume: 0.0,
            rng: StdRng::from_entropy(),
        };
        sampler.set_cost(cost);
        Ok(sampler)
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
        sampler.rng = StdRng::seed_from_u64(seed);
        Ok(sampler)
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn focii_distance(&self) -> f64 {
        self.focii_distance
    }

    /// Whether the ellipsoid has collapsed onto the focal segment and
    /// cannot yield improving samples.
    pub fn collapsed(&self) -> bool {
        !self.inf_cost && self.cost <= self.focii_distance + EPS
    }

    fn uniform_box(&mut self) -> DVector<f64> {
        let d = self.space.dimension();
        let offsets = DVector::from_fn(d, |i, _| {
            self.rng.gen_range(-1.0..1.0) * self.bound_width[i]
        });
        self.space.from_scaled(&(&self.center_bound + offsets))
    }

    /// Uniform point in the unit d-ball: Gaussian direction scaled by
    /// `U^{1/d}`.
    fn unit_ball_point(&mut self) -> DVector<f64> {
        let d = self.space.dimension();
        loop {
            let direction = DVector::from_fn(d, |_, _| self.rng.sample::<f64, _>(StandardNormal));
            let norm = direction.norm();
            if norm > f64::EPSILON {
                let radius: f64 = self.rng.gen::<f64>().powf(1.0 / d as f64);
                return direction * (radius / norm);
            }
        }
    }
}

impl Sampler for InformedSampler {
    fn sample(&mut self) -> DVector<f64> {
        if self.inf_cost {
            return self.uniform_box();
        }

        for _ in 0..MAX_REJECTIONS {
            let ball = self.unit_ball_point();
            let scaled = &self.rotation * ball.component_mul(&self.axes) + &self.center;

            let in_box = (0..scaled.len())
                .all(|i| scaled[i] >= self.lower[i] && scaled[i] <= self.upper[i]);
            if in_box {
                return self.space.from_scaled(&scaled);
            }
        }
        self.uniform_box()
    }

    fn in_bounds(&self, q: &DVector<f64>) -> bool {
        let scaled = self.space.to_scaled(q);
        for i in 0..scaled.len() {
            if scaled[i] < self.lower[i] || scaled[i] > self.upper[i] {
                return false;
            }
        }
        if self.inf_cost {
            return true;
        }
        (&scaled - &self.focus1).norm() + (&scaled - &self.focus2).norm() < self.cost
    }

    fn set_cost(&mut self, cost: f64) {
        self.cost = cost;
        self.inf_cost = cost.is_infinite();
        let d = self.space.dimension();

        let (min_radius, max_radius) = if self.inf_cost {
            (0.0, f64::INFINITY)
        } else if cost < self.focii_distance {
            warn!(
                cost,
                focii_distance = self.focii_distance,
                "cost below focal distance; clamping to the focal segment"
            );
            self.cost = self.focii_distance;
            (0.0, 0.5 * self.cost)
        } else {
            (
                0.5 * (cost.powi(2) - self.focii_distance.powi(2)).sqrt(),
                0.5 * cost,
            )
        };

        if !self.inf_cost {
            self.axes.fill(min_radius);
            self.axes[0] = max_radius;
        }

        self.specific_volume = if self.inf_cost {
            let mut volume = 1.0 / unit_ball_volume(d);
            for i in 0..d {
                volume *= self.upper[i] - self.lower[i];
            }
            volume
        } else {
            max_radius * min_radius.powi(d as i32 - 1)
        };
        if self.specific_volume > 0.0 {
            self.specific_volume = self.specific_volume.powf(1.0 / d as f64);
        }
    }

    fn specific_volume(&self) -> f64 {
        self.specific_volume
    }

    fn dimension(&self) -> usize {
        self.space.dimension()
    }
}

/// Rotation whose first column is the unit vector between the foci.
///
/// When that direction already coincides with a standard basis axis, the
/// identity with the matching column swapped to the front is orthonormal
/// and used as-is; otherwise the remaining columns are re-orthonormalized
/// by Gram-Schmidt.
fn rotation_matrix(x1: &DVector<f64>, x2: &DVector<f64>) -> DMatrix<f64> {
    let d = x1.len();
    let mut rot = DMatrix::<f64>::identity(d, d);
    let difference = x1 - x2;
    let norm = difference.norm();
    if norm <= f64::EPSILON {
        return rot;
    }
    let main_versor = difference / norm;

    for ic in 0..d {
        if main_versor.dot(&rot.column(ic).into_owned()).abs() > 0.999 {
            rot.swap_columns(0, ic);
            return rot;
        }
    }

    rot.set_column(0, &main_versor);
    for ic in 1..d {
        let mut col = rot.column(ic).into_owned();
        for il in 0..ic {
            let prev = rot.column(il).into_owned();
            col -= &prev * col.dot(&prev);
        }
        let norm = col.norm();
        if norm > f64::EPSILON {
            col /= norm;
        }
        rot.set_column(ic, &col);
    }
    rot
}
