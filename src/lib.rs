//! # Marga: Sampling-Based Motion Planning Core
//!
//! A planning-graph kernel for articulated robots: given a start
//! configuration, one or more goals, joint bounds and a black-box
//! collision predicate, marga computes a collision-free joint-space path
//! and improves it toward shortest length under a configurable metric.
//!
//! ## Features
//!
//! - **Tree/net planning graph**: an arena of nodes and directed
//!   connections with tree semantics (unique parents) and net semantics
//!   (alternative parents), addressed by integer handles
//! - **RRT-family solvers**: RRT, RRT*, Anytime-RRT and a multigoal
//!   bidirectional solver, all over one shared graph
//! - **Informed sampling**: prolate-hyperspheroid and tube samplers focus
//!   growth where a better solution can still exist
//! - **Path post-processing**: warp, slip and simplify operators driven by
//!   a stall-aware local optimizer
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nalgebra::dvector;
//! use marga::{ConfigSpace, PathMetric, SolverConfig, SphereWorld};
//! use marga::solvers::{Rrt, Solver};
//!
//! let space = ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
//! let metric = Arc::new(PathMetric::new(&space));
//! let checker = Arc::new(SphereWorld::new(vec![(dvector![0.0, 0.0], 0.5)]));
//!
//! let mut solver = Rrt::new(space, metric, checker, SolverConfig::default()).unwrap();
//! solver.add_start(&dvector![-1.5, 0.0]).unwrap();
//! solver.add_goal(&dvector![1.5, 0.0]).unwrap();
//! if solver.solve(5000, Duration::from_secs(2)).unwrap() {
//!     let path = solver.solution().unwrap();
//!     println!("cost: {:.3}", path.cost());
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into modules:
//!
//! - [`core`]: configuration space, metrics and goal costs
//! - [`collision`]: collision checker interface and reference worlds
//! - [`graph`]: the node/connection arena, trees, subtrees, the net
//!   search and paths
//! - [`samplers`]: uniform, informed and tube samplers
//! - [`solvers`]: the RRT-family solvers and their shared state
//! - [`postprocess`]: the path local optimizer
//! - [`planner`]: the two-phase solve-then-refine facade
//! - [`config`]: parameter types with YAML loading
//!
//! ## Data Flow
//!
//! ```text
//!   ┌───────────┐   sample    ┌───────────────┐
//!   │  Sampler  │────────────►│    Solver     │
//!   │ (informed)│             │ (RRT family)  │
//!   └─────▲─────┘             └───┬───────┬───┘
//!         │ set_cost               │       │ extend / rewire
//!         │                        │       ▼
//!         │                 check  │  ┌──────────┐   membership   ┌───────┐
//!         │               segments │  │   Tree   │───────────────►│ Graph │
//!         │                        ▼  └────┬─────┘                └───▲───┘
//!         │                 ┌──────────┐   │ solution chain           │
//!         │                 │ Checker  │   ▼                          │
//!         │                 └──────────┘ ┌──────┐   warp/slip/simplify│
//!         └───────────────────────────── │ Path │────────────────────┘
//!                        cost feedback   └──────┘
//! ```
//!
//! ## Concurrency
//!
//! Solvers are single-threaded and run to completion on the calling
//! thread. The two contained uses of parallelism are the batched collision
//! checker (worker threads over an immutable scene) and the termination
//! flag, which any thread may flip to request a graceful stop.

pub mod collision;
pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod planner;
pub mod postprocess;
pub mod samplers;
pub mod solvers;

// Re-export main types at crate root
pub use collision::{CollisionChecker, FreeSpace, ParallelChecker, SphereWorld};
pub use config::{OptimizerConfig, PlannerConfig, SolverConfig};
pub use core::{ConfigSpace, GoalCost, Metric, PathMetric, TimeMetric, ZeroGoalCost};
pub use error::{MargaError, PlanOutcome, Result};
pub use graph::{ConnId, ConnKind, Graph, NodeId, Path, PathRecord, Subtree, Tree};
pub use planner::{MotionPlanner, PlanResult};
pub use postprocess::PathLocalOptimizer;
pub use samplers::{InformedSampler, Sampler, TubeSampler, UniformSampler};
pub use solvers::{AnytimeRrt, Multigoal, Rrt, RrtStar, Solver, SolverStatus, TerminationFlag};
