//! RRT*: asymptotically improving tree growth via local rewiring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::config::SolverConfig;
use crate::core::{ConfigSpace, Metric, EPS};
use crate::error::{MargaError, Result};
use crate::samplers::Sampler;

use super::{Solver, SolverState};

/// RRT with shrinking-ball rewiring.
///
/// Before the first solution this behaves like RRT but every extension
/// also relinks its neighborhood; afterwards each update keeps rewiring
/// toward the sampled configuration and adopts the new solution whenever
/// the cost to the goal strictly drops. The informed sampler tightens with
/// every improvement until completion.
pub struct RrtStar {
    state: SolverState,
}

impl RrtStar {
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

    pub fn into_state(self) -> SolverState {
        self.state
    }

    pub fn from_state(state: SolverState) -> Self {
        Self { state }
    }
}

impl Solver for RrtStar {
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
        let state = &mut self.state;
        if state.terminate.is_requested() {
            return Ok(false);
        }
        if state.cost <= state.config.utopia_factor() * state.best_utopia {
            state.completed = true;
            return Ok(true);
        }

        let radius = match state.config.rewire_radius {
            Some(r) => r,
            None => state.rewire_radius(),
        };
        let q = match state.sampler.as_mut() {
            Some(sampler) => sampler.sample(),
            None => {
                return Err(MargaError::Config(
                    "problem not set: call add_start and add_goal first".to_string(),
                ))
            }
        };
        let Some(tree) = state.start_tree.as_mut() else {
            return Err(MargaError::Config("no start tree".to_string()));
        };

        if !state.solved {
            let outcome = tree.rewire(&mut state.graph, &q, radius);
            if let Some(node) = outcome.new_node {
                return state.try_goal_splice(node);
            }
            Ok(false)
        } else {
            let outcome = tree.rewire(&mut state.graph, &q, radius);
            if !outcome.improved {
                return Ok(false);
            }
            let goal = state
                .goal_node
                .ok_or_else(|| MargaError::Invariant("solved without a goal".to_string()))?;
            let solution_cost = state
                .solution
                .as_ref()
                .map(|p| p.cost())
                .unwrap_or(f64::INFINITY);
            let tree = state
                .start_tree
                .as_ref()
                .ok_or_else(|| MargaError::Invariant("no start tree".to_string()))?;
            if tree.cost_to_node(&state.graph, goal) >= solution_cost - EPS {
                return Ok(false);
            }
            state.rebuild_solution()?;
            debug!(cost = state.cost, "solution improved");
            Ok(true)
        }
    }

    fn solve(&mut self, max_iter: usize, max_time: Duration) -> Result<bool> {
        if max_time.is_zero() {
            return Ok(false);
        }
        let tic = Instant::now();
        let mut any = false;
        for _ in 0..max_iter {
            if self.state.terminate.is_requested() {
                break;
            }
            if self.update()? {
                any = true;
            }
            if self.state.completed {
                break;
            }
            if tic.elapsed().as_secs_f64() >= 0.98 * max_time.as_secs_f64() {
                break;
            }
        }
        Ok(any && self.state.solved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{FreeSpace, SphereWorld};
    use crate::core::PathMetric;
    use nalgebra::dvector;

    fn make_solver(checker: Arc<dyn CollisionChecker>) -> RrtStar {
        let space = ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
        let metric = Arc::new(PathMetric::new(&space));
        let config = SolverConfig::default().with_max_distance(0.5);
        let mut solver = RrtStar::new(space, metric, checker, config).unwrap();
        solver.state_mut().seed_rng(99);
        solver
    }

    #[test]
    fn test_free_space_completes_near_utopia() {
        let mut solver = make_solver(Arc::new(FreeSpace));
        assert!(solver.add_start(&dvector![0.0, 0.0]).unwrap());
        assert!(solver.add_goal(&dvector![1.0, 1.0]).unwrap());
        solver.solve(2000, Duration::from_secs(10)).unwrap();
        assert!(solver.solved());
        let utopia = 2.0f64.sqrt();
        assert!(solver.cost() <= 1.01 * utopia + 1e-9);
    }

    #[test]
    fn test_obstacle_cost_shrinks_with_budget() {
        let world = SphereWorld::new(vec![(dvector![0.0, 0.0], 1.0)]);
        let mut solver = make_solver(Arc::new(world));
        assert!(solver.add_start(&dvector![-1.5, 0.0]).unwrap());
        assert!(solver.add_goal(&dvector![1.5, 0.0]).unwrap());
        solver.solve(300, Duration::from_secs(5)).unwrap();
        assert!(solver.solved());
        let early = solver.cost();
        solver.solve(4000, Duration::from_secs(20)).unwrap();
        let late = solver.cost();
        assert!(late <= early + EPS);
        // Never better than the geometric optimum around the disc:
        // two tangents plus the wrapped arc.
        let optimum =
            2.0 * (1.5f64.powi(2) - 1.0).sqrt() + std::f64::consts::PI - 2.0 * (1.0f64 / 1.5).acos();
        assert!(late >= optimum - 1e-6);
    }

    #[test]
    fn test_solution_connections_collision_free() {
        let world = SphereWorld::new(vec![(dvector![0.0, 0.0], 1.0)]);
        let mut solver = make_solver(Arc::new(world.clone()));
        assert!(solver.add_start(&dvector![-1.5, 0.0]).unwrap());
        assert!(solver.add_goal(&dvector![1.5, 0.0]).unwrap());
        solver.solve(3000, Duration::from_secs(10)).unwrap();
        let path = solver.solution().expect("solved");
        let points = path.waypoints(solver.state().graph());
        use crate::collision::CollisionChecker as _;
        for pair in points.windows(2) {
            assert!(world.check_segment(&pair[0], &pair[1]));
        }
    }
}
