//! Configuration types.
//!
//! All parameters ship with working defaults and can be loaded from YAML.
//! Builder-style setters cover programmatic overrides.

use serde::{Deserialize, Serialize};

use crate::error::{MargaError, Result};

/// Parameters shared by the tree solvers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum extend step length.
    pub max_distance: f64,
    /// Use single extend steps instead of the greedy connect loop.
    pub extend: bool,
    /// Index member configurations with a k-d tree.
    pub use_kdtree: bool,
    /// Completion margin: done when `cost <= (1 + tol) * utopia`.
    pub utopia_tolerance: f64,
    /// Fixed rewire radius; `None` selects `2 * max_distance`.
    pub rewire_radius: Option<f64>,
    /// Tube sampler bias toward the current path (multigoal).
    pub local_bias: f64,
    /// Tube radius as a fraction of the path cost (multigoal).
    pub tube_radius: f64,
    /// Goal bias of the anytime improvement phase.
    pub bias: f64,
    /// Required relative cost improvement per anytime round.
    pub cost_impr: f64,
    /// Anytime bias decay per successful improvement.
    pub delta: f64,
    /// Consecutive failures tolerated by the anytime phases.
    pub failed_iter: usize,
    /// Forgetting factor of the multigoal bias adaptation.
    pub forgetting_factor: f64,
    /// Reward gain of the multigoal bias adaptation.
    pub reward: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_distance: 1.0,
            extend: false,
            use_kdtree: true,
            utopia_tolerance: 0.01,
            rewire_radius: None,
            local_bias: 0.3,
            tube_radius: 0.01,
            bias: 0.9,
            cost_impr: 0.1,
            delta: 0.05,
            failed_iter: 3,
            forgetting_factor: 0.99,
            reward: 0.1,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_distance <= 0.0 {
            return Err(MargaError::Config("max_distance must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.local_bias) {
            return Err(MargaError::Config("local_bias must lie in [0, 1]".to_string()));
        }
        if self.tube_radius <= 0.0 {
            return Err(MargaError::Config("tube_radius must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.bias) {
            return Err(MargaError::Config("bias must lie in [0, 1]".to_string()));
        }
        if !(0.0..1.0).contains(&self.cost_impr) {
            return Err(MargaError::Config("cost_impr must lie in [0, 1)".to_string()));
        }
        Ok(())
    }

    /// Completion factor `1 + max(utopia_tolerance, 0)`.
    pub fn utopia_factor(&self) -> f64 {
        1.0 + self.utopia_tolerance.max(0.0)
    }

    /// Effective rewire radius.
    pub fn effective_rewire_radius(&self) -> f64 {
        self.rewire_radius.unwrap_or(2.0 * self.max_distance)
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_extend(mut self, extend: bool) -> Self {
        self.extend = extend;
        self
    }

    pub fn with_use_kdtree(mut self, use_kdtree: bool) -> Self {
        self.use_kdtree = use_kdtree;
        self
    }

    pub fn with_utopia_tolerance(mut self, utopia_tolerance: f64) -> Self {
        self.utopia_tolerance = utopia_tolerance;
        self
    }

    pub fn with_rewire_radius(mut self, rewire_radius: f64) -> Self {
        self.rewire_radius = Some(rewire_radius);
        self
    }

    pub fn with_local_bias(mut self, local_bias: f64) -> Self {
        self.local_bias = local_bias;
        self
    }

    pub fn with_tube_radius(mut self, tube_radius: f64) -> Self {
        self.tube_radius = tube_radius;
        self
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_cost_impr(mut self, cost_impr: f64) -> Self {
        self.cost_impr = cost_impr;
        self
    }
}

/// Parameters of the path local optimizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Stalled cycles before the optimizer reports convergence.
    pub max_stall: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_stall: 10 }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_stall(mut self, max_stall: usize) -> Self {
        self.max_stall = max_stall;
        self
    }
}

/// Parameters of the two-phase planning facade: a tree phase that finds a
/// first solution, then refinement cycles until the time budget runs out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Stalled solver attempts tolerated by the tree phase.
    pub tree_stall_generation: usize,
    /// Node budget of the tree phase.
    pub number_of_nodes: usize,
    /// Solver iterations per refinement cycle.
    pub ants_number: usize,
    /// Stalled refinement cycles before giving up.
    pub ants_stall_generation: usize,
    /// Run the refinement phase at all.
    pub refinement: bool,
    /// Time budget of the tree phase, seconds.
    pub tree_max_time: f64,
    /// Total time budget, seconds.
    pub max_time: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tree_stall_generation: 3,
            number_of_nodes: 300,
            ants_number: 80,
            ants_stall_generation: 50,
            refinement: true,
            tree_max_time: 0.8,
            max_time: 1.5,
        }
    }
}

impl PlannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_refinement(mut self, refinement: bool) -> Self {
        self.refinement = refinement;
        self
    }

    pub fn with_max_time(mut self, max_time: f64) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_tree_max_time(mut self, tree_max_time: f64) -> Self {
        self.tree_max_time = tree_max_time;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.max_distance, 1.0);
        assert!(!config.extend);
        assert!(config.use_kdtree);
        assert_eq!(config.utopia_tolerance, 0.01);
        assert_eq!(config.effective_rewire_radius(), 2.0);
        assert_eq!(config.local_bias, 0.3);
        assert_eq!(config.tube_radius, 0.01);
        assert_eq!(config.bias, 0.9);
        assert_eq!(config.cost_impr, 0.1);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = SolverConfig::default().with_max_distance(0.5).with_extend(true);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = SolverConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.max_distance, 0.5);
        assert!(parsed.extend);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = SolverConfig::from_yaml("max_distance: 0.25\n").unwrap();
        assert_eq!(parsed.max_distance, 0.25);
        assert!(parsed.use_kdtree);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SolverConfig::from_yaml("max_distance: -1.0\n").is_err());
        assert!(SolverConfig::from_yaml("local_bias: 1.5\n").is_err());
        assert!(SolverConfig::from_yaml("not yaml: [").is_err());
    }

    #[test]
    fn test_utopia_factor_clamps_negative() {
        let config = SolverConfig::default().with_utopia_tolerance(-0.5);
        assert_eq!(config.utopia_factor(), 1.0);
    }

    #[test]
    fn test_planner_defaults() {
        let config = PlannerConfig::default();
        assert_eq!(config.tree_stall_generation, 3);
        assert_eq!(config.number_of_nodes, 300);
        assert_eq!(config.ants_number, 80);
        assert_eq!(config.ants_stall_generation, 50);
        assert!(config.refinement);
        assert_eq!(config.tree_max_time, 0.8);
        assert_eq!(config.max_time, 1.5);
    }
}
