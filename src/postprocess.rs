//! Path local optimization: warp, slip and simplify cycles.

use tracing::debug;

use crate::config::OptimizerConfig;
use crate::graph::{Graph, Path};

/// Cycles the local operators over a path until no operator reports work
/// left for `max_stall` consecutive rounds.
///
/// One step runs warp, slip-parent and slip-child; when a round yields no
/// measurable cost improvement, simplify gets a chance before the stall
/// counter advances.
pub struct PathLocalOptimizer {
    config: OptimizerConfig,
    stall_gen: usize,
    solved: bool,
}

impl PathLocalOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            stall_gen: 0,
            solved: false,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(OptimizerConfig::default())
    }

    /// Forget convergence state, e.g. before optimizing another path.
    pub fn reset(&mut self) {
        self.stall_gen = 0;
        self.solved = false;
    }

    pub fn converged(&self) -> bool {
        self.solved
    }

    /// One optimization round. Returns whether the path has converged.
    pub fn step(&mut self, path: &mut Path, graph: &mut Graph) -> bool {
        if self.solved {
            return true;
        }

        let cost_before = path.cost();

        let mut settled = !path.warp(graph);
        settled = !path.slip_parent(graph) && settled;
        settled = !path.slip_child(graph) && settled;

        if cost_before <= 1.001 * path.cost() {
            if self.stall_gen == 0 {
                if path.simplify(graph) {
                    settled = false;
                } else {
                    self.stall_gen += 1;
                }
            } else {
                self.stall_gen += 1;
            }
        } else {
            self.stall_gen = 0;
        }

        self.solved = settled || self.stall_gen >= self.config.max_stall;
        self.solved
    }

    /// Run steps until convergence or the iteration budget runs out.
    pub fn solve(&mut self, path: &mut Path, graph: &mut Graph, max_iter: usize) -> bool {
        for iter in 0..max_iter {
            if self.solved {
                debug!(iter, cost = path.cost(), "path optimization converged");
                return true;
            }
            self.step(path, graph);
        }
        self.solved
    }
}
