//! Multigoal solver: one start tree, one backward tree per goal.
//!
//! Each goal owns a status, a cost, a utopia and a tube sampler biased
//! toward its incumbent solution. Searching goals grow bidirectionally
//! until the trees meet and the goal branch is spliced into the start
//! tree; refining goals rewire the start tree inside their tube. Goals
//! whose utopia exceeds the best cost are discarded, and the start tree is
//! periodically purged of nodes no informed region can still use.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use rand::Rng;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::config::SolverConfig;
use crate::core::{ConfigSpace, GoalCost, Metric, EPS};
use crate::error::{MargaError, PlanOutcome, Result};
use crate::graph::{NodeId, Path, Tree};
use crate::samplers::{Sampler, TubeSampler};

use super::{Solver, SolverState};

/// Lifecycle of one goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoalStatus {
    /// Still looking for a first feasible connection.
    Search,
    /// Feasible; the solution is being refined.
    Refine,
    /// Reached its utopia; nothing left to do.
    Done,
    /// Can no longer beat the incumbent best, or rejected at add time.
    Discard,
}

struct GoalSlot {
    node: NodeId,
    tree: Option<Tree>,
    sampler: Option<TubeSampler>,
    status: GoalStatus,
    cost: f64,
    utopia: f64,
    solution: Option<Path>,
}

/// Multi-goal bidirectional solver.
pub struct Multigoal {
    state: SolverState,
    goals: Vec<GoalSlot>,
    local_bias: f64,
    cost_at_last_clean: f64,
    best_goal: Option<usize>,
    any_goal_in_collision: bool,
}

impl Multigoal {
    pub fn new(
        space: ConfigSpace,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
        config: SolverConfig,
    ) -> Result<Self> {
        let local_bias = config.local_bias;
        Ok(Self {
            state: SolverState::new(space, metric, checker, config)?,
            goals: Vec::new(),
            local_bias,
            cost_at_last_clean: f64::INFINITY,
            best_goal: None,
            any_goal_in_collision: false,
        })
    }

    pub fn goal_statuses(&self) -> Vec<GoalStatus> {
        self.goals.iter().map(|g| g.status).collect()
    }

    /// Index of the goal holding the incumbent best solution.
    pub fn best_goal_index(&self) -> Option<usize> {
        self.best_goal
    }

    pub fn local_bias(&self) -> f64 {
        self.local_bias
    }

    /// Promote goal `index` to the incumbent best if it improves on it,
    /// then discard goals that can no longer win and purge the tree when
    /// the improvement or the rewire count warrants it.
    fn adopt_if_best(&mut self, index: usize) -> Result<bool> {
        debug_assert_ne!(self.goals[index].status, GoalStatus::Discard);

        if self.goals[index].cost >= self.state.path_cost - EPS {
            return Ok(false);
        }
        self.state.path_cost = self.goals[index].cost;
        self.state.goal_cost = self
            .state
            .goal_cost_fn
            .cost(self.state.graph.config(self.goals[index].node));
        self.state.cost = self.state.path_cost + self.state.goal_cost;
        self.state.solution = self.goals[index].solution.clone();
        self.state.outcome = PlanOutcome::Success;
        self.best_goal = Some(index);

        let path_cost = self.state.path_cost;
        let mut discarded_any = false;
        for goal in self.goals.iter_mut() {
            match goal.status {
                GoalStatus::Discard => continue,
                _ if goal.utopia > path_cost => {
                    goal.status = GoalStatus::Discard;
                    discarded_any = true;
                    debug!(utopia = goal.utopia, best = path_cost, "goal discarded");
                }
                GoalStatus::Done => continue,
                _ => {
                    if let Some(sampler) = goal.sampler.as_mut() {
                        sampler.set_cost(path_cost);
                    }
                }
            }
        }

        let need_cleaning = self
            .state
            .start_tree
            .as_ref()
            .map(|t| t.need_cleaning())
            .unwrap_or(false);
        if discarded_any || path_cost < 0.9999 * self.cost_at_last_clean || need_cleaning {
            self.cost_at_last_clean = path_cost;
            self.clean_tree()?;
        }
        Ok(true)
    }

    /// Purge start-tree nodes that fall outside every active goal's
    /// informed region, protecting the root, the goals and every node on
    /// an incumbent solution.
    fn clean_tree(&mut self) -> Result<()> {
        let mut white_list: HashSet<NodeId> = self.goals.iter().map(|g| g.node).collect();
        for goal in &self.goals {
            if let Some(solution) = goal.solution.as_ref() {
                for conn in solution.connections() {
                    white_list.insert(self.state.graph.conn(*conn).child());
                    white_list.insert(self.state.graph.conn(*conn).parent());
                }
            }
        }
        let Some(tree) = self.state.start_tree.as_mut() else {
            return Ok(());
        };
        white_list.insert(tree.root());

        let samplers: Vec<&dyn Sampler> = self
            .goals
            .iter()
            .filter(|g| matches!(g.status, GoalStatus::Search | GoalStatus::Refine))
            .filter_map(|g| g.sampler.as_ref().map(|s| s as &dyn Sampler))
            .collect();
        if samplers.is_empty() {
            return Ok(());
        }
        tree.purge_nodes_outside_ellipsoids(&mut self.state.graph, &samplers, &white_list);
        Ok(())
    }

    /// Rebuild a goal's solution from the start tree and refresh its tube
    /// sampler. Returns the new cost.
    fn refresh_goal_solution(&mut self, index: usize) -> Result<f64> {
        let tree = self
            .state
            .start_tree
            .as_ref()
            .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
        let chain = tree.connections_to_node(&self.state.graph, self.goals[index].node);
        if chain.is_empty() {
            return Err(MargaError::Invariant(
                "goal is not connected to the start tree".to_string(),
            ));
        }
        let path = Path::new(
            chain,
            &self.state.graph,
            self.state.metric.clone(),
            self.state.checker.clone(),
        )?;
        let cost = path.cost();
        let waypoints = path.waypoints(&self.state.graph);
        let tube_radius = self.state.config.tube_radius;
        let goal = &mut self.goals[index];
        goal.cost = cost;
        if let Some(sampler) = goal.sampler.as_mut() {
            sampler.set_path(waypoints);
            sampler.set_radius(tube_radius * cost);
            sampler.set_cost(cost);
        }
        goal.solution = Some(path);
        self.state.solved = true;
        Ok(cost)
    }

    /// Per-goal sampling weight: goals far above the best cost are played
    /// rarely but never below probability 0.1.
    fn goal_probability(&self, index: usize) -> f64 {
        let best = self.state.path_cost;
        if !best.is_finite() {
            return 1.0;
        }
        let gap = self.goals[index].cost - best;
        (1.0 - 0.9 * gap / (2.0 * best)).clamp(0.1, 1.0)
    }

    fn update_search_goal(&mut self, index: usize, q: &DVector<f64>) -> Result<bool> {
        let extend = self.state.config.extend;

        let start_node = {
            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            if extend {
                tree.extend(&mut self.state.graph, q).node()
            } else {
                let (reached, last) = tree.connect(&mut self.state.graph, q);
                if reached {
                    last
                } else {
                    None
                }
            }
        };

        let met = {
            let Some(goal_tree) = self.goals[index].tree.as_mut() else {
                return Ok(false);
            };
            match start_node {
                Some(target) => {
                    let reached = if extend {
                        matches!(
                            goal_tree.extend_to_node(&mut self.state.graph, target),
                            crate::graph::ExtendOutcome::Reached(_)
                        )
                    } else {
                        goal_tree.connect_to_node(&mut self.state.graph, target).0
                    };
                    reached.then_some(target)
                }
                None => {
                    if extend {
                        goal_tree.extend(&mut self.state.graph, q);
                    } else {
                        goal_tree.connect(&mut self.state.graph, q);
                    }
                    None
                }
            }
        };

        let Some(meeting) = met else {
            return Ok(false);
        };

        // The trees met: keep only the goal branch and splice it into the
        // start tree.
        let chain = {
            let goal_tree = self
                .goals[index]
                .tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("goal tree vanished".to_string()))?;
            let chain = goal_tree.connections_to_node(&self.state.graph, meeting);
            if chain.is_empty() {
                return Err(MargaError::Invariant(
                    "meeting node detached from the goal tree".to_string(),
                ));
            }
            goal_tree.keep_only_this_branch(&mut self.state.graph, &chain);
            chain
        };
        {
            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.add_branch(&mut self.state.graph, &chain)?;
        }
        self.goals[index].tree = None;

        let cost = self.refresh_goal_solution(index)?;
        if cost <= self.goals[index].utopia + EPS {
            debug!(goal = index, cost, "goal reached its utopia");
            self.goals[index].status = GoalStatus::Done;
        } else {
            debug!(goal = index, cost, "goal found a first solution");
            self.goals[index].status = GoalStatus::Refine;
        }
        self.adopt_if_best(index)
    }

    fn update_refine_goal(&mut self, index: usize) -> Result<bool> {
        let q = match self.goals[index].sampler.as_mut() {
            Some(sampler) => sampler.sample(),
            None => return Ok(false),
        };
        let radius = self.state.config.effective_rewire_radius();

        let improved = {
            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.rewire(&mut self.state.graph, &q, radius).improved
        };
        if !improved {
            return Ok(false);
        }

        let current = {
            let tree = self
                .state
                .start_tree
                .as_ref()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.cost_to_node(&self.state.graph, self.goals[index].node)
        };
        if current >= self.goals[index].cost - EPS {
            return Ok(false);
        }

        let cost = self.refresh_goal_solution(index)?;
        if cost <= self.goals[index].utopia + EPS {
            debug!(goal = index, cost, "goal refined down to its utopia");
            self.goals[index].status = GoalStatus::Done;
            self.clean_tree()?;
        }
        self.adopt_if_best(index)
    }
}

impl Solver for Multigoal {
    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn add_start(&mut self, start: &DVector<f64>) -> Result<bool> {
        self.goals.clear();
        self.best_goal = None;
        self.cost_at_last_clean = f64::INFINITY;
        self.any_goal_in_collision = false;
        self.local_bias = self.state.config.local_bias;
        self.state.add_start_impl(start)
    }

    fn configure(&mut self, config: SolverConfig) -> Result<()> {
        config.validate()?;
        self.local_bias = config.local_bias;
        self.state.config = config;
        Ok(())
    }

    /// Register one goal. Goals in collision, and goals whose utopia is
    /// already beyond the incumbent best, enter as `Discard`.
    fn add_goal(&mut self, goal: &DVector<f64>) -> Result<bool> {
        self.state.space.check_dimension(goal)?;
        let root = {
            let Some(tree) = self.state.start_tree.as_ref() else {
                return Err(MargaError::Config(
                    "add_start must precede add_goal".to_string(),
                ));
            };
            tree.root()
        };
        let root_config = self.state.graph.config(root).clone();
        let utopia = self.state.metric.utopia(goal, &root_config);
        let goal_node = self.state.graph.add_node(goal.clone())?;

        let rejected = if !self.state.checker.check(goal) {
            self.any_goal_in_collision = true;
            if !self.state.solved {
                self.state.outcome = PlanOutcome::GoalInCollision;
            }
            debug!("goal in collision, discarded");
            true
        } else if utopia > self.state.path_cost {
            debug!(utopia, best = self.state.path_cost, "goal cannot beat the incumbent");
            true
        } else {
            false
        };
        if rejected {
            self.goals.push(GoalSlot {
                node: goal_node,
                tree: None,
                sampler: None,
                status: GoalStatus::Discard,
                cost: f64::INFINITY,
                utopia,
                solution: None,
            });
            return Ok(false);
        }

        if utopia < self.state.best_utopia {
            self.state.best_utopia = utopia;
        }

        // Direct attempt first; otherwise open a backward tree.
        let reached = {
            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.connect_to_node(&mut self.state.graph, goal_node).0
        };
        let goal_tree = if reached {
            None
        } else {
            Some(Tree::new(
                &self.state.graph,
                goal_node,
                self.state.config.max_distance,
                self.state.checker.clone(),
                self.state.metric.clone(),
                self.state.config.use_kdtree,
            ))
        };

        let mut sampler = TubeSampler::new(
            &self.state.space,
            &root_config,
            goal,
            self.state.path_cost,
        )?;
        sampler.set_local_bias(self.local_bias);
        sampler.set_radius(self.state.config.tube_radius);

        self.goals.push(GoalSlot {
            node: goal_node,
            tree: goal_tree,
            sampler: Some(sampler),
            status: if reached {
                GoalStatus::Refine
            } else {
                GoalStatus::Search
            },
            cost: f64::INFINITY,
            utopia,
            solution: None,
        });

        let index = self.goals.len() - 1;
        if reached {
            let cost = self.refresh_goal_solution(index)?;
            if cost <= self.goals[index].utopia + EPS {
                self.goals[index].status = GoalStatus::Done;
            }
            self.adopt_if_best(index)?;
        }
        Ok(true)
    }

    fn update(&mut self) -> Result<bool> {
        if self.goals.is_empty() || self.state.start_tree.is_none() {
            return Err(MargaError::Config(
                "problem not set: call add_start and add_goal first".to_string(),
            ));
        }
        if self.state.terminate.is_requested() {
            return Ok(false);
        }
        if self.state.path_cost <= self.state.config.utopia_factor() * self.state.best_utopia {
            self.state.completed = true;
            return Ok(false);
        }

        let old_cost = self.state.path_cost;
        let mut global_improvement = false;

        for index in 0..self.goals.len() {
            match self.goals[index].status {
                GoalStatus::Discard | GoalStatus::Done => continue,
                _ => {}
            }

            let prob = self.goal_probability(index);
            if self.state.rng.gen::<f64>() > prob {
                continue;
            }

            let improved = match self.goals[index].status {
                GoalStatus::Search => {
                    let q = match self.goals[index].sampler.as_mut() {
                        Some(sampler) => sampler.sample(),
                        None => continue,
                    };
                    self.update_search_goal(index, &q)?
                }
                GoalStatus::Refine => self.update_refine_goal(index)?,
                GoalStatus::Done | GoalStatus::Discard => false,
            };
            global_improvement = global_improvement || improved;
        }

        if self.state.solved && global_improvement {
            let config = &self.state.config;
            let gain = (old_cost - self.state.path_cost)
                / (old_cost - self.state.best_utopia).max(EPS);
            self.local_bias = (config.forgetting_factor * self.local_bias
                + config.reward * gain)
                .clamp(0.0, 1.0);
            let bias = self.local_bias;
            for goal in self.goals.iter_mut() {
                if let Some(sampler) = goal.sampler.as_mut() {
                    sampler.set_local_bias(bias);
                }
            }
        }
        Ok(global_improvement)
    }

    fn solve(&mut self, max_iter: usize, max_time: Duration) -> Result<bool> {
        if max_time.is_zero() {
            return Ok(false);
        }
        let tic = Instant::now();
        for _ in 0..max_iter {
            if self.state.terminate.is_requested() {
                break;
            }
            self.update()?;
            if self.state.completed {
                break;
            }
            if tic.elapsed().as_secs_f64() >= 0.98 * max_time.as_secs_f64() {
                break;
            }
        }
        if !self.state.solved {
            self.state.outcome = if self.any_goal_in_collision
                && self
                    .goals
                    .iter()
                    .all(|g| g.status == GoalStatus::Discard)
            {
                PlanOutcome::GoalInCollision
            } else {
                PlanOutcome::PlanningFailed
            };
        }
        Ok(self.state.solved)
    }
}
