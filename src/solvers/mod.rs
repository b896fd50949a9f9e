//! Tree solvers: RRT, RRT*, Anytime-RRT and the multigoal solver.
//!
//! All solvers share [`SolverState`]: the graph, the start tree, the goal,
//! the informed sampler and the cost bookkeeping. `update()` performs one
//! iteration; `solve()` drives updates under iteration and wall-clock
//! budgets, stopping at 98% of the allowed time. A [`TerminationFlag`] can
//! be flipped from any thread to request a graceful stop.

mod anytime_rrt;
mod multigoal;
mod rrt;
mod rrt_star;

pub use anytime_rrt::AnytimeRrt;
pub use multigoal::{GoalStatus, Multigoal};
pub use rrt::Rrt;
pub use rrt_star::RrtStar;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::config::SolverConfig;
use crate::core::{ConfigSpace, GoalCost, Metric, ZeroGoalCost};
use crate::error::{MargaError, PlanOutcome, Result};
use crate::graph::{Graph, NodeId, Path, PathRecord, Tree};
use crate::samplers::{InformedSampler, Sampler};

/// Cooperative stop request shared across threads.
///
/// Requesting termination is non-blocking and idempotent; solvers poll the
/// flag once per iteration and leave the graph consistent.
#[derive(Clone, Default)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Lifecycle of a solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    Unconfigured,
    Configured,
    Solved,
    Completed,
}

/// State shared by every tree solver.
///
/// Extracting the state from one solver and injecting it into another is
/// the supported way to hand a problem over (e.g. seed an anytime solver
/// with an RRT solution).
pub struct SolverState {
    pub(crate) space: ConfigSpace,
    pub(crate) config: SolverConfig,
    pub(crate) metric: Arc<dyn Metric>,
    pub(crate) checker: Arc<dyn CollisionChecker>,
    pub(crate) goal_cost_fn: Arc<dyn GoalCost>,
    pub(crate) graph: Graph,
    pub(crate) start_tree: Option<Tree>,
    pub(crate) goal_node: Option<NodeId>,
    pub(crate) sampler: Option<InformedSampler>,
    pub(crate) solution: Option<Path>,
    pub(crate) solved: bool,
    pub(crate) completed: bool,
    pub(crate) path_cost: f64,
    pub(crate) goal_cost: f64,
    pub(crate) cost: f64,
    pub(crate) best_utopia: f64,
    pub(crate) outcome: PlanOutcome,
    pub(crate) terminate: TerminationFlag,
    pub(crate) rng: StdRng,
}

impl SolverState {
    pub(crate) fn new(
        space: ConfigSpace,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
        config: SolverConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph: Graph::new(space.clone()),
            space,
            config,
            metric,
            checker,
            goal_cost_fn: Arc::new(ZeroGoalCost),
            start_tree: None,
            goal_node: None,
            sampler: None,
            solution: None,
            solved: false,
            completed: false,
            path_cost: f64::INFINITY,
            goal_cost: 0.0,
            cost: f64::INFINITY,
            best_utopia: f64::INFINITY,
            outcome: PlanOutcome::PlanningFailed,
            terminate: TerminationFlag::new(),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn solved(&self) -> bool {
        self.solved
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn path_cost(&self) -> f64 {
        self.path_cost
    }

    pub fn goal_cost(&self) -> f64 {
        self.goal_cost
    }

    pub fn best_utopia(&self) -> f64 {
        self.best_utopia
    }

    pub fn outcome(&self) -> PlanOutcome {
        self.outcome
    }

    pub fn solution(&self) -> Option<&Path> {
        self.solution.as_ref()
    }

    pub fn solution_record(&self) -> Option<PathRecord> {
        self.solution.as_ref().map(|p| p.record(&self.graph))
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn start_tree(&self) -> Option<&Tree> {
        self.start_tree.as_ref()
    }

    pub fn status(&self) -> SolverStatus {
        if self.completed {
            SolverStatus::Completed
        } else if self.solved {
            SolverStatus::Solved
        } else if self.start_tree.is_some() {
            SolverStatus::Configured
        } else {
            SolverStatus::Unconfigured
        }
    }

    /// Replace the random source, making the solver deterministic.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shared solver plumbing
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn add_start_impl(&mut self, start: &DVector<f64>) -> Result<bool> {
        self.space.check_dimension(start)?;
        if !self.checker.check(start) {
            self.outcome = PlanOutcome::StartInCollision;
            return Ok(false);
        }
        let root = self.graph.add_node(start.clone())?;
        self.start_tree = Some(Tree::new(
            &self.graph,
            root,
            self.config.max_distance,
            self.checker.clone(),
            self.metric.clone(),
            self.config.use_kdtree,
        ));
        self.goal_node = None;
        self.sampler = None;
        self.solution = None;
        self.solved = false;
        self.completed = false;
        self.path_cost = f64::INFINITY;
        self.cost = f64::INFINITY;
        self.outcome = PlanOutcome::PlanningFailed;
        Ok(true)
    }

    /// Register the goal: compute the utopia, try a direct connection,
    /// and set up the informed sampler around the start-goal pair.
    pub(crate) fn add_goal_impl(&mut self, goal: &DVector<f64>) -> Result<bool> {
        self.space.check_dimension(goal)?;
        let Some(tree) = self.start_tree.as_mut() else {
            return Err(MargaError::Config(
                "add_start must precede add_goal".to_string(),
            ));
        };
        if !self.checker.check(goal) {
            self.outcome = PlanOutcome::GoalInCollision;
            return Ok(false);
        }

        let goal_node = self.graph.add_node(goal.clone())?;
        self.goal_node = Some(goal_node);
        self.goal_cost = self.goal_cost_fn.cost(goal);

        let root_config = self.graph.config(tree.root()).clone();
        self.best_utopia = self.goal_cost + self.metric.utopia(&root_config, goal);

        let (reached, _) = tree.connect_to_node(&mut self.graph, goal_node);
        self.sampler = Some(InformedSampler::new(
            &self.space,
            &root_config,
            goal,
            f64::INFINITY,
        )?);
        if reached {
            debug!("direct solution found while adding the goal");
            self.rebuild_solution()?;
        } else {
            self.path_cost = f64::INFINITY;
            self.cost = f64::INFINITY;
        }
        Ok(true)
    }

    /// Recompute the solution path from the tree, refresh the cost
    /// bookkeeping and the sampler bound, and update completion.
    pub(crate) fn rebuild_solution(&mut self) -> Result<()> {
        let tree = self
            .start_tree
            .as_ref()
            .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
        let goal = self
            .goal_node
            .ok_or_else(|| MargaError::Invariant("no goal node".to_string()))?;

        let chain = tree.connections_to_node(&self.graph, goal);
        if chain.is_empty() {
            return Err(MargaError::Invariant(
                "goal is not connected to the start tree".to_string(),
            ));
        }
        let path = Path::new(chain, &self.graph, self.metric.clone(), self.checker.clone())?;
        self.path_cost = path.cost();
        self.cost = self.path_cost + self.goal_cost;
        self.solution = Some(path);
        self.solved = true;
        self.outcome = PlanOutcome::Success;
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.set_cost(self.path_cost);
        }
        if self.cost <= self.config.utopia_factor() * self.best_utopia {
            self.completed = true;
        }
        Ok(())
    }

    /// Attach the goal below `node` when it is in reach over a free
    /// segment. Returns whether the goal was spliced.
    pub(crate) fn try_goal_splice(&mut self, node: NodeId) -> Result<bool> {
        let Some(goal) = self.goal_node else {
            return Ok(false);
        };
        if !self.graph.node(goal).parents.is_empty() {
            return Ok(false);
        }
        let node_config = self.graph.config(node).clone();
        let goal_config = self.graph.config(goal).clone();
        if self.space.distance(&node_config, &goal_config) >= self.config.max_distance {
            return Ok(false);
        }
        if !self.checker.check_segment(&node_config, &goal_config) {
            return Ok(false);
        }

        let conn = self.graph.connect(node, goal);
        let cost = self.metric.cost(&node_config, &goal_config);
        self.graph.set_cost(conn, cost);
        self.graph.add_connection(conn)?;
        if let Some(tree) = self.start_tree.as_mut() {
            tree.add_node(&self.graph, goal);
        }
        self.rebuild_solution()?;
        Ok(true)
    }

    /// Shrinking-ball rewire radius, never below the extend distance.
    pub(crate) fn rewire_radius(&self) -> f64 {
        let Some(sampler) = self.sampler.as_ref() else {
            return self.config.effective_rewire_radius();
        };
        let d = self.space.dimension() as f64;
        let n = self
            .start_tree
            .as_ref()
            .map(|t| t.node_count() as f64)
            .unwrap_or(1.0)
            + 1.0;
        let r_rrt = 1.1 * (2.0 * (1.0 + 1.0 / d)).powf(1.0 / d) * sampler.specific_volume();
        let r = r_rrt * (n.ln() / n).powf(1.0 / d);
        r.max(self.config.max_distance)
    }

    pub(crate) fn reset_impl(&mut self) {
        self.graph = Graph::new(self.space.clone());
        self.start_tree = None;
        self.goal_node = None;
        self.sampler = None;
        self.solution = None;
        self.solved = false;
        self.completed = false;
        self.path_cost = f64::INFINITY;
        self.goal_cost = 0.0;
        self.cost = f64::INFINITY;
        self.best_utopia = f64::INFINITY;
        self.outcome = PlanOutcome::PlanningFailed;
        self.terminate.clear();
    }

    /// Install a goal-cost hook (defaults to zero cost).
    pub fn set_goal_cost_fn(&mut self, goal_cost_fn: Arc<dyn GoalCost>) {
        self.goal_cost_fn = goal_cost_fn;
    }
}

/// Common interface of the tree solvers.
pub trait Solver {
    fn state(&self) -> &SolverState;

    fn state_mut(&mut self) -> &mut SolverState;

    /// Root the start tree at a configuration. `false` when the start is
    /// in collision.
    fn add_start(&mut self, start: &DVector<f64>) -> Result<bool>;

    /// Register a goal configuration. `false` when the goal is rejected.
    fn add_goal(&mut self, goal: &DVector<f64>) -> Result<bool>;

    /// Replace the solver parameters; takes effect on later operations.
    fn configure(&mut self, config: SolverConfig) -> Result<()> {
        config.validate()?;
        self.state_mut().config = config;
        Ok(())
    }

    /// One planning iteration; `true` when the solution appeared or
    /// improved.
    fn update(&mut self) -> Result<bool>;

    /// Drive updates under iteration and time budgets.
    fn solve(&mut self, max_iter: usize, max_time: Duration) -> Result<bool>;

    /// Drop all problem state, keeping the configuration.
    fn reset(&mut self) {
        self.state_mut().reset_impl();
    }

    /// Handle used to request a graceful stop from another thread.
    fn termination_flag(&self) -> TerminationFlag {
        self.state().terminate.clone()
    }

    /// Request a graceful stop: the next `update()` reports no improvement
    /// and `solve()` returns. Non-blocking and idempotent.
    fn terminate(&self) {
        self.state().terminate.request();
    }

    fn solution(&self) -> Option<&Path> {
        self.state().solution()
    }

    fn solved(&self) -> bool {
        self.state().solved()
    }

    fn completed(&self) -> bool {
        self.state().completed()
    }

    fn cost(&self) -> f64 {
        self.state().cost()
    }

    fn outcome(&self) -> PlanOutcome {
        self.state().outcome()
    }

    fn status(&self) -> SolverStatus {
        self.state().status()
    }
}
