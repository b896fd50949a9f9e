//! RRT: single-query tree growth toward the first feasible path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::config::SolverConfig;
use crate::core::{ConfigSpace, Metric};
use crate::error::{MargaError, Result};
use crate::samplers::Sampler;

use super::{Solver, SolverState};

/// Rapidly-exploring random tree.
///
/// `update()` samples a configuration, grows the start tree toward it
/// (single step or greedy connect per configuration), and splices the goal
/// in as soon as a new node comes within reach over a free segment. The
/// solver is terminal on its first solution.
pub struct Rrt {
    state: SolverState,
}

impl Rrt {
    pub fn new(
        space: ConfigSpace,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
        config: SolverConfig,
    ) -> Result<Self> {
        Ok(Self {
            state: SolverState::new(space, metric, checker, config)?,
        })
    }

    /// Hand the full problem state over, e.g. to seed another solver.
    pub fn into_state(self) -> SolverState {
        self.state
    }

    /// Adopt a problem state extracted from another solver.
    pub fn from_state(state: SolverState) -> Self {
        Self { state }
    }

    pub(crate) fn update_impl(state: &mut SolverState) -> Result<bool> {
        if state.terminate.is_requested() {
            return Ok(false);
        }
        if state.solved {
            return Ok(true);
        }

        let q = match state.sampler.as_mut() {
            Some(sampler) => sampler.sample(),
            None => {
                return Err(MargaError::Config(
                    "problem not set: call add_start and add_goal first".to_string(),
                ))
            }
        };

        let extend = state.config.extend;
        let Some(tree) = state.start_tree.as_mut() else {
            return Err(MargaError::Config("no start tree".to_string()));
        };
        let node = if extend {
            tree.extend(&mut state.graph, &q).node()
        } else {
            tree.connect(&mut state.graph, &q).1
        };

        match node {
            Some(node) => state.try_goal_splice(node),
            None => Ok(false),
        }
    }

    pub(crate) fn solve_impl(
        state: &mut SolverState,
        max_iter: usize,
        max_time: Duration,
    ) -> Result<bool> {
        if max_time.is_zero() {
            return Ok(false);
        }
        let tic = Instant::now();
        for iter in 0..max_iter {
            if state.terminate.is_requested() {
                break;
            }
            if Self::update_impl(state)? {
                debug!(iter, cost = state.cost, "solved");
                return Ok(true);
            }
            if tic.elapsed().as_secs_f64() >= 0.98 * max_time.as_secs_f64() {
                break;
            }
        }
        Ok(state.solved)
    }
}

impl Solver for Rrt {
    fn state(&self) -> &SolverState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SolverState {
        &mut self.state
    }

    fn add_start(&mut self, start: &DVector<f64>) -> Result<bool> {
        self.state.add_start_impl(start)
    }

    fn add_goal(&mut self, goal: &DVector<f64>) -> Result<bool> {
        self.state.add_goal_impl(goal)
    }

    fn update(&mut self) -> Result<bool> {
        Self::update_impl(&mut self.state)
    }

    fn solve(&mut self, max_iter: usize, max_time: Duration) -> Result<bool> {
        Self::solve_impl(&mut self.state, max_iter, max_time)
    }
}
