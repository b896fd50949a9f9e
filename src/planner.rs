//! Two-phase planning facade: solve, then refine.
//!
//! Wraps the multigoal solver and the path local optimizer behind a single
//! call: a tree phase finds a first solution within its own time budget,
//! then refinement cycles alternate solver updates with local path
//! optimization until the total budget runs out or the result stalls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::collision::CollisionChecker;
use crate::config::{OptimizerConfig, PlannerConfig, SolverConfig};
use crate::core::{ConfigSpace, Metric, EPS};
use crate::error::{PlanOutcome, Result};
use crate::graph::PathRecord;
use crate::postprocess::PathLocalOptimizer;
use crate::solvers::{Multigoal, Solver, TerminationFlag};

/// Outcome of a [`MotionPlanner::plan`] call.
#[derive(Clone, Debug)]
pub struct PlanResult {
    pub outcome: PlanOutcome,
    pub path: Option<PathRecord>,
    pub cost: f64,
    pub completed: bool,
}

/// High-level planner combining search and refinement.
pub struct MotionPlanner {
    space: ConfigSpace,
    metric: Arc<dyn Metric>,
    checker: Arc<dyn CollisionChecker>,
    solver_config: SolverConfig,
    planner_config: PlannerConfig,
    optimizer_config: OptimizerConfig,
    terminate: TerminationFlag,
}

impl MotionPlanner {
    pub fn new(
        space: ConfigSpace,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
        solver_config: SolverConfig,
        planner_config: PlannerConfig,
    ) -> Result<Self> {
        solver_config.validate()?;
        Ok(Self {
            space,
            metric,
            checker,
            solver_config,
            planner_config,
            optimizer_config: OptimizerConfig::default(),
            terminate: TerminationFlag::new(),
        })
    }

    pub fn termination_flag(&self) -> TerminationFlag {
        self.terminate.clone()
    }

    /// Plan from a start configuration to the best of several goals.
    pub fn plan(&self, start: &DVector<f64>, goals: &[DVector<f64>]) -> Result<PlanResult> {
        let tic = Instant::now();
        let config = &self.planner_config;

        let mut solver = Multigoal::new(
            self.space.clone(),
            self.metric.clone(),
            self.checker.clone(),
            self.solver_config.clone(),
        )?;
        solver.state_mut().terminate = self.terminate.clone();

        if !solver.add_start(start)? {
            return Ok(PlanResult {
                outcome: PlanOutcome::StartInCollision,
                path: None,
                cost: f64::INFINITY,
                completed: false,
            });
        }
        let mut any_goal = false;
        for goal in goals {
            if solver.add_goal(goal)? {
                any_goal = true;
            }
        }
        if !any_goal {
            warn!("every goal was rejected");
            return Ok(PlanResult {
                outcome: solver.outcome(),
                path: None,
                cost: f64::INFINITY,
                completed: false,
            });
        }

        // Tree phase: a first solution within its own budget.
        let mut stall = 0usize;
        while !solver.solved()
            && stall < config.tree_stall_generation
            && tic.elapsed().as_secs_f64() < config.tree_max_time
            && !self.terminate.is_requested()
        {
            let remaining =
                Duration::from_secs_f64((config.tree_max_time - tic.elapsed().as_secs_f64()).max(0.0));
            if !solver.solve(config.number_of_nodes, remaining)? {
                stall += 1;
            }
        }
        if !solver.solved() {
            return Ok(PlanResult {
                outcome: solver.outcome(),
                path: None,
                cost: f64::INFINITY,
                completed: false,
            });
        }
        debug!(cost = solver.cost(), "tree phase solved");

        // Refinement: alternate solver updates and local optimization.
        if config.refinement {
            let mut optimizer = PathLocalOptimizer::new(self.optimizer_config.clone());
            let mut stall_cycles = 0usize;
            while tic.elapsed().as_secs_f64() < config.max_time
                && stall_cycles < config.ants_stall_generation
                && !solver.completed()
                && !self.terminate.is_requested()
            {
                let before = solver.cost();

                for _ in 0..config.ants_number {
                    solver.update()?;
                }
                self.optimize_solution(&mut solver, &mut optimizer);

                if solver.cost() >= before - EPS {
                    stall_cycles += 1;
                } else {
                    stall_cycles = 0;
                    optimizer.reset();
                }
            }
        }

        Ok(PlanResult {
            outcome: solver.outcome(),
            path: solver.state().solution_record(),
            cost: solver.cost(),
            completed: solver.completed(),
        })
    }

    /// Run one optimizer pass over the solver's incumbent solution,
    /// folding any new waypoints back into the start tree.
    fn optimize_solution(&self, solver: &mut Multigoal, optimizer: &mut PathLocalOptimizer) {
        let state = solver.state_mut();
        let Some(mut path) = state.solution.take() else {
            return;
        };
        optimizer.step(&mut path, &mut state.graph);

        // The optimizer may have replaced waypoints; keep the tree
        // membership in sync with the new chain.
        if let Some(tree) = state.start_tree.as_mut() {
            for conn in path.connections() {
                let child = state.graph.conn(*conn).child();
                tree.add_node(&state.graph, child);
            }
        }
        let cost = path.cost();
        if cost < state.path_cost {
            state.path_cost = cost;
            state.cost = cost + state.goal_cost;
        }
        state.solution = Some(path);
    }
}
