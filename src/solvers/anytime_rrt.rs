//! Anytime-RRT: a fast first solution, then informed re-planning rounds.
//!
//! Phase 1 runs plain RRT until a solution exists. Phase 2 repeatedly
//! grows a fresh auxiliary tree between copies of the endpoints with a
//! biased, cost-bounded extension; whenever the auxiliary tree beats the
//! incumbent by the required margin it replaces the main tree. After the
//! rounds the original start and goal nodes are spliced back, preserving
//! every non-path child of the replaced root.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::config::SolverConfig;
use crate::core::{ConfigSpace, GoalCost, Metric};
use crate::error::{MargaError, Result};
use crate::graph::{NodeId, Tree};
use crate::samplers::{InformedSampler, Sampler};

use super::{Rrt, Solver, SolverState};

/// Two-phase anytime planner.
pub struct AnytimeRrt {
    state: SolverState,
    bias: f64,
    new_tree: Option<Tree>,
    improve_sampler: Option<InformedSampler>,
    tmp_goal: Option<NodeId>,
    cost_to_beat: f64,
}

impl AnytimeRrt {
    pub fn new(
        space: ConfigSpace,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
        config: SolverConfig,
    ) -> Result<Self> {
        let bias = config.bias;
        Ok(Self {
            state: SolverState::new(space, metric, checker, config)?,
            bias,
            new_tree: None,
            improve_sampler: None,
            tmp_goal: None,
            cost_to_beat: f64::INFINITY,
        })
    }

    pub fn into_state(self) -> SolverState {
        self.state
    }

    pub fn from_state(state: SolverState) -> Self {
        let bias = state.config.bias;
        Self {
            state,
            bias,
            new_tree: None,
            improve_sampler: None,
            tmp_goal: None,
            cost_to_beat: f64::INFINITY,
        }
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// One improvement round: grow a fresh informed tree between copies of
    /// the endpoints until it beats `(1 − cost_impr) · path_cost`.
    fn improve(
        &mut self,
        start_config: &DVector<f64>,
        goal_config: &DVector<f64>,
        max_iter: usize,
        max_time: Duration,
    ) -> Result<bool> {
        if max_time.is_zero() {
            return Ok(false);
        }
        let tic = Instant::now();

        let cost_to_beat = (1.0 - self.state.config.cost_impr) * self.state.path_cost;
        let utopia = self.state.metric.utopia(start_config, goal_config);
        if self.state.cost <= self.state.config.utopia_factor() * utopia {
            debug!("utopia reached, nothing to improve");
            self.state.completed = true;
            return Ok(false);
        }
        if cost_to_beat <= utopia {
            debug!(cost_to_beat, utopia, "cost bound below utopia, round skipped");
            return Ok(false);
        }

        let tmp_start = self.state.graph.add_node(start_config.clone())?;
        let tmp_goal = self.state.graph.add_node(goal_config.clone())?;
        self.new_tree = Some(Tree::new(
            &self.state.graph,
            tmp_start,
            self.state.config.max_distance,
            self.state.checker.clone(),
            self.state.metric.clone(),
            self.state.config.use_kdtree,
        ));
        self.tmp_goal = Some(tmp_goal);
        self.cost_to_beat = cost_to_beat;
        self.bias = (self.bias - self.state.config.delta).max(0.1);
        self.improve_sampler = Some(InformedSampler::new(
            &self.state.space,
            start_config,
            goal_config,
            self.state.path_cost,
        )?);

        for _ in 0..max_iter {
            if self.state.terminate.is_requested() {
                break;
            }
            if self.improve_update()? {
                return Ok(true);
            }
            if tic.elapsed().as_secs_f64() >= 0.98 * max_time.as_secs_f64() {
                break;
            }
        }
        Ok(false)
    }

    fn improve_update(&mut self) -> Result<bool> {
        if self.state.completed {
            return Ok(true);
        }
        let Some(sampler) = self.improve_sampler.as_mut() else {
            return Ok(false);
        };
        if sampler.collapsed() {
            return Ok(false);
        }
        let q = sampler.sample();

        let Some(tmp_goal) = self.tmp_goal else {
            return Ok(false);
        };
        let goal_config = self.state.graph.config(tmp_goal).clone();
        let Some(tree) = self.new_tree.as_mut() else {
            return Ok(false);
        };

        let outcome = tree.informed_extend(
            &mut self.state.graph,
            &mut self.state.rng,
            &q,
            &goal_config,
            self.cost_to_beat,
            self.bias,
        );
        let Some(node) = outcome.node() else {
            return Ok(false);
        };

        let node_config = self.state.graph.config(node).clone();
        if self.state.space.distance(&node_config, &goal_config) >= self.state.config.max_distance {
            return Ok(false);
        }
        let candidate_cost = tree.cost_to_node(&self.state.graph, node)
            + self.state.metric.cost(&node_config, &goal_config);
        let incumbent = self
            .state
            .solution
            .as_ref()
            .map(|p| p.cost())
            .unwrap_or(f64::INFINITY);
        if candidate_cost >= incumbent {
            return Ok(false);
        }
        if !self.state.checker.check_segment(&node_config, &goal_config) {
            return Ok(false);
        }

        // The auxiliary tree wins: close it onto its goal copy and promote
        // it to the main tree.
        let old_goal = self
            .state
            .goal_node
            .ok_or_else(|| MargaError::Invariant("improving without a goal".to_string()))?;
        if let Some(old_tree) = self.state.start_tree.as_mut() {
            old_tree.remove_node(&mut self.state.graph, old_goal);
        }

        let conn = self.state.graph.connect(node, tmp_goal);
        let cost = self.state.metric.cost(&node_config, &goal_config);
        self.state.graph.set_cost(conn, cost);
        self.state.graph.add_connection(conn)?;

        let mut new_tree = self
            .new_tree
            .take()
            .ok_or_else(|| MargaError::Invariant("auxiliary tree vanished".to_string()))?;
        new_tree.add_node(&self.state.graph, tmp_goal);
        let root_config = self.state.graph.config(new_tree.root()).clone();

        self.state.goal_node = Some(tmp_goal);
        self.state.goal_cost = self.state.goal_cost_fn.cost(&goal_config);
        self.state.best_utopia =
            self.state.goal_cost + self.state.metric.utopia(&root_config, &goal_config);
        self.state.start_tree = Some(new_tree);
        self.state.rebuild_solution()?;
        if let Some(s) = self.improve_sampler.as_mut() {
            s.set_cost(self.state.path_cost);
        }
        debug!(cost = self.state.cost, "improvement round succeeded");
        Ok(true)
    }

    /// Swap the endpoint copies introduced by the improvement rounds back
    /// for the original start and goal nodes.
    fn restore_endpoints(&mut self, orig_start: NodeId, orig_goal: NodeId) -> Result<()> {
        // Goal side: re-attach the original goal below the last path
        // parent with the same cost.
        if self.state.goal_node != Some(orig_goal) {
            let (last_parent, last_cost) = {
                let solution = self
                    .state
                    .solution
                    .as_ref()
                    .ok_or_else(|| MargaError::Invariant("no solution to restore".to_string()))?;
                let last = *solution
                    .connections()
                    .last()
                    .ok_or_else(|| MargaError::Invariant("empty solution".to_string()))?;
                (self.state.graph.conn(last).parent(), self.state.graph.conn(last).cost())
            };
            let cur_goal = self
                .state
                .goal_node
                .ok_or_else(|| MargaError::Invariant("no goal".to_string()))?;

            self.state.graph.disconnect(orig_goal);
            let conn = self.state.graph.connect(last_parent, orig_goal);
            self.state.graph.set_cost(conn, last_cost);

            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.remove_node(&mut self.state.graph, cur_goal);
            self.state.graph.add_connection(conn)?;
            tree.add_node(&self.state.graph, orig_goal);
            self.state.goal_node = Some(orig_goal);
            self.state.rebuild_solution()?;
        }

        // Start side: re-root onto the original start, keeping every
        // non-path child of the replaced root.
        let root = match self.state.start_tree.as_ref() {
            Some(t) => t.root(),
            None => return Ok(()),
        };
        if root != orig_start {
            let goal = self
                .state
                .goal_node
                .ok_or_else(|| MargaError::Invariant("no goal".to_string()))?;

            let (first_child_on_path, first_cost, other_children) = {
                let tree = self
                    .state
                    .start_tree
                    .as_ref()
                    .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
                let chain = tree.connections_to_node(&self.state.graph, goal);
                let first = *chain
                    .first()
                    .ok_or_else(|| MargaError::Invariant("goal detached from root".to_string()))?;
                let on_path = self.state.graph.conn(first).child();
                let cost = self.state.graph.conn(first).cost();
                let others: Vec<(NodeId, f64)> = self
                    .state
                    .graph
                    .node(root)
                    .tree_children()
                    .iter()
                    .map(|c| (self.state.graph.conn(*c).child(), self.state.graph.conn(*c).cost()))
                    .filter(|(child, _)| *child != on_path)
                    .collect();
                (on_path, cost, others)
            };

            self.state.graph.disconnect(orig_start);
            let tree = self
                .state
                .start_tree
                .as_mut()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            tree.change_root(&mut self.state.graph, goal)?;
            tree.remove_node(&mut self.state.graph, root);

            let into_start = self.state.graph.connect(first_child_on_path, orig_start);
            self.state.graph.set_cost(into_start, first_cost);
            self.state.graph.add_connection(into_start)?;
            for (child, cost) in other_children {
                let conn = self.state.graph.connect(orig_start, child);
                self.state.graph.set_cost(conn, cost);
                self.state.graph.add_connection(conn)?;
            }
            tree.add_node(&self.state.graph, orig_start);
            tree.change_root(&mut self.state.graph, orig_start)?;
            self.state.rebuild_solution()?;
        }
        Ok(())
    }
}

impl Solver for AnytimeRrt {
    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn add_start(&mut self, start: &DVector<f64>) -> Result<bool> {
        self.new_tree = None;
        self.improve_sampler = None;
        self.tmp_goal = None;
        self.state.add_start_impl(start)
    }

    fn add_goal(&mut self, goal: &DVector<f64>) -> Result<bool> {
        self.state.add_goal_impl(goal)
    }

    fn configure(&mut self, config: crate::config::SolverConfig) -> Result<()> {
        config.validate()?;
        self.bias = config.bias;
        self.state.config = config;
        Ok(())
    }

    /// One phase-1 iteration; the improvement rounds run inside
    /// [`AnytimeRrt::solve`].
    fn update(&mut self) -> Result<bool> {
        Rrt::update_impl(&mut self.state)
    }

    fn solve(&mut self, max_iter: usize, max_time: Duration) -> Result<bool> {
        if max_time.is_zero() {
            return Ok(false);
        }
        let tic = Instant::now();
        let budget = max_time.as_secs_f64();
        let factor = self.state.config.utopia_factor();

        if self.state.solved && self.state.cost <= factor * self.state.best_utopia {
            self.state.completed = true;
            return Ok(true);
        }

        // Phase 1: plain RRT until a first solution exists.
        let mut n_failed = 0usize;
        while !self.state.solved
            && tic.elapsed().as_secs_f64() < 0.98 * budget
            && n_failed < self.state.config.failed_iter
        {
            let remaining = Duration::from_secs_f64(
                (budget - tic.elapsed().as_secs_f64()).max(0.0),
            );
            if !Rrt::solve_impl(&mut self.state, max_iter, remaining)? {
                n_failed += 1;
            }
        }
        if !self.state.solved {
            return Ok(false);
        }
        if self.state.cost <= factor * self.state.best_utopia {
            self.state.completed = true;
            return Ok(true);
        }

        // Phase 2: informed improvement rounds between endpoint copies.
        let orig_start = self
            .state
            .start_tree
            .as_ref()
            .map(|t| t.root())
            .ok_or_else(|| MargaError::Invariant("solved without a tree".to_string()))?;
        let orig_goal = self
            .state
            .goal_node
            .ok_or_else(|| MargaError::Invariant("solved without a goal".to_string()))?;
        let start_config = self.state.graph.config(orig_start).clone();
        let goal_config = self.state.graph.config(orig_goal).clone();

        n_failed = 0;
        while !self.state.completed
            && tic.elapsed().as_secs_f64() < 0.98 * budget
            && n_failed < self.state.config.failed_iter
        {
            if self.state.terminate.is_requested() {
                break;
            }
            let remaining = Duration::from_secs_f64(
                (budget - tic.elapsed().as_secs_f64()).max(0.0),
            );
            let improved = self.improve(&start_config, &goal_config, max_iter, remaining)?;
            if improved {
                n_failed = 0;
            } else {
                n_failed += 1;
            }
            if self.state.cost <= factor * self.state.best_utopia {
                self.state.completed = true;
            }
        }

        self.restore_endpoints(orig_start, orig_goal)?;
        Ok(self.state.solved)
    }
}
