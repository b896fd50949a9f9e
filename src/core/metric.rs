//! Distance and cost metrics over the configuration space.

use nalgebra::DVector;

use super::ConfigSpace;

/// Cost function between two configurations.
///
/// `utopia` is the metric lower bound: `utopia(a, b) <= cost(a, b)` for all
/// pairs. Solvers use it for completion tests and pruning.
pub trait Metric: Send + Sync {
    /// Cost of traversing the straight segment from `a` to `b`.
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64;

    /// Lower bound on the cost between `a` and `b`.
    ///
    /// Defaults to the cost itself, which is exact for static metrics.
    fn utopia(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        self.cost(a, b)
    }
}

/// Scaled Euclidean metric: `cost(a, b) = ‖S·(a − b)‖₂`.
#[derive(Clone, Debug)]
pub struct PathMetric {
    scale: DVector<f64>,
}

impl PathMetric {
    pub fn new(space: &ConfigSpace) -> Self {
        Self {
            scale: space.scale().clone(),
        }
    }
}

impl Metric for PathMetric {
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.scale.len() {
            let d = (a[i] - b[i]) * self.scale[i];
            sum += d * d;
        }
        sum.sqrt()
    }
}

/// Minimum traversal time under per-axis velocity limits.
///
/// All joints move simultaneously, so the segment time is dominated by the
/// slowest axis: `cost(a, b) = max_i |a_i − b_i| / v_max_i`.
#[derive(Clone, Debug)]
pub struct TimeMetric {
    max_velocity: DVector<f64>,
}

impl TimeMetric {
    pub fn new(max_velocity: DVector<f64>) -> Self {
        Self { max_velocity }
    }
}

impl Metric for TimeMetric {
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let mut t = 0.0f64;
        for i in 0..self.max_velocity.len() {
            t = t.max((a[i] - b[i]).abs() / self.max_velocity[i]);
        }
        t
    }
}

/// Extra cost attached to reaching a goal configuration.
///
/// Variants weigh goals by criteria external to path length; the default
/// implementation is free.
pub trait GoalCost: Send + Sync {
    fn cost(&self, goal: &DVector<f64>) -> f64;
}

/// Goal cost that is identically zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroGoalCost;

impl GoalCost for ZeroGoalCost {
    fn cost(&self, _goal: &DVector<f64>) -> f64 {
        0.0
    }
}
