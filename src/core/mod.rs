//! Fundamental types: configuration space, metrics, goal costs.

mod metric;
mod space;

pub use metric::{GoalCost, Metric, PathMetric, TimeMetric, ZeroGoalCost};
pub use space::ConfigSpace;

/// Tolerance used by all strict cost comparisons: `new < old - EPS`.
pub const EPS: f64 = 1e-8;
