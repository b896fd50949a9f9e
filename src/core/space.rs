//! Configuration space: joint bounds and per-axis scaling.
//!
//! All geometry in the planner happens in the scaled space `S·q`, where `S`
//! is the per-axis velocity-inverse scaling. The samplers convert between
//! raw and scaled coordinates on their interface boundary; everything else
//! works with raw configurations and asks this type for scaled distances.

use nalgebra::DVector;

use crate::error::{MargaError, Result};

/// A bounded vector space ℝᵈ with per-axis scaling.
#[derive(Clone, Debug)]
pub struct ConfigSpace {
    lower: DVector<f64>,
    upper: DVector<f64>,
    scale: DVector<f64>,
}

impl ConfigSpace {
    /// Create a space from joint bounds and a per-axis scale.
    ///
    /// Fails if the dimensions disagree, any scale entry is not strictly
    /// positive, or a lower bound exceeds its upper bound.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>, scale: DVector<f64>) -> Result<Self> {
        if lower.len() != upper.len() || lower.len() != scale.len() {
            return Err(MargaError::Config(format!(
                "bounds and scale must share one dimension, got {}/{}/{}",
                lower.len(),
                upper.len(),
                scale.len()
            )));
        }
        if lower.len() == 0 {
            return Err(MargaError::Config("dimension must be at least 1".to_string()));
        }
        if scale.iter().any(|s| *s <= 0.0) {
            return Err(MargaError::Config("scale entries must be positive".to_string()));
        }
        if lower.iter().zip(upper.iter()).any(|(l, u)| l > u) {
            return Err(MargaError::Config("lower bound exceeds upper bound".to_string()));
        }
        Ok(Self { lower, upper, scale })
    }

    /// Space with unit scaling.
    pub fn unscaled(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        let scale = DVector::from_element(lower.len(), 1.0);
        Self::new(lower, upper, scale)
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    pub fn scale(&self) -> &DVector<f64> {
        &self.scale
    }

    /// Map a raw configuration into the scaled space.
    pub fn to_scaled(&self, q: &DVector<f64>) -> DVector<f64> {
        q.component_mul(&self.scale)
    }

    /// Map a scaled point back to a raw configuration.
    pub fn from_scaled(&self, q: &DVector<f64>) -> DVector<f64> {
        q.component_div(&self.scale)
    }

    /// Scaled L2 distance `‖S·(a − b)‖₂`.
    pub fn distance(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.scale.len() {
            let d = (a[i] - b[i]) * self.scale[i];
            sum += d * d;
        }
        sum.sqrt()
    }

    /// Check raw bounds membership.
    pub fn contains(&self, q: &DVector<f64>) -> bool {
        q.len() == self.dimension()
            && q.iter()
                .enumerate()
                .all(|(i, v)| *v >= self.lower[i] && *v <= self.upper[i])
    }

    /// Verify a configuration has this space's dimension.
    pub fn check_dimension(&self, q: &DVector<f64>) -> Result<()> {
        if q.len() != self.dimension() {
            return Err(MargaError::Config(format!(
                "configuration has dimension {}, space has {}",
                q.len(),
                self.dimension()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn make_space() -> ConfigSpace {
        ConfigSpace::new(
            dvector![-2.0, -2.0],
            dvector![2.0, 2.0],
            dvector![1.0, 2.0],
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let r = ConfigSpace::new(dvector![0.0], dvector![1.0, 1.0], dvector![1.0]);
        assert!(r.is_err());
    }

    #[test]
    fn test_nonpositive_scale_rejected() {
        let r = ConfigSpace::new(dvector![0.0], dvector![1.0], dvector![0.0]);
        assert!(r.is_err());
    }

    #[test]
    fn test_scaled_distance() {
        let space = make_space();
        let a = dvector![0.0, 0.0];
        let b = dvector![1.0, 1.0];
        // sqrt(1^2 + 2^2)
        assert_relative_eq!(space.distance(&a, &b), 5.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_scale_round_trip() {
        let space = make_space();
        let q = dvector![0.5, -1.5];
        let back = space.from_scaled(&space.to_scaled(&q));
        assert_relative_eq!((q - back).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_contains() {
        let space = make_space();
        assert!(space.contains(&dvector![0.0, 2.0]));
        assert!(!space.contains(&dvector![0.0, 2.1]));
        assert!(!space.contains(&dvector![0.0]));
    }
}
