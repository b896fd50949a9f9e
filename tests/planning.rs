//! End-to-end planning scenarios.

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use nalgebra::{dvector, DVector};

use marga::solvers::{Multigoal, Rrt, RrtStar, Solver};
use marga::{
    CollisionChecker, ConfigSpace, FreeSpace, Graph, Metric, Path, PathLocalOptimizer, PathMetric,
    SolverConfig, SphereWorld, Tree,
};

fn square_space(half: f64) -> ConfigSpace {
    ConfigSpace::unscaled(dvector![-half, -half], dvector![half, half]).unwrap()
}

#[test]
fn straight_line_without_obstacles() {
    let space = square_space(2.0);
    let metric = Arc::new(PathMetric::new(&space));
    let config = SolverConfig::default().with_max_distance(0.5);
    let mut solver = Rrt::new(space, metric, Arc::new(FreeSpace), config).unwrap();
    solver.state_mut().seed_rng(1);

    assert!(solver.add_start(&dvector![0.0, 0.0]).unwrap());
    assert!(solver.add_goal(&dvector![1.0, 1.0]).unwrap());

    // The goal is reachable by direct extension; no update loop needed.
    assert!(solver.solved());
    assert!(solver.completed());
    assert_relative_eq!(solver.cost(), 2.0f64.sqrt(), epsilon = 1e-9);

    let path = solver.solution().unwrap();
    let waypoints = path.waypoints(solver.state().graph());
    assert!((waypoints.first().unwrap() - dvector![0.0, 0.0]).norm() < 1e-12);
    assert!((waypoints.last().unwrap() - dvector![1.0, 1.0]).norm() < 1e-12);
}

#[test]
fn disc_obstacle_rrt_star_converges() {
    let space = square_space(2.0);
    let metric = Arc::new(PathMetric::new(&space));
    let world = SphereWorld::new(vec![(dvector![0.0, 0.0], 0.5)]);
    let config = SolverConfig::default().with_max_distance(0.5);
    let mut solver = RrtStar::new(space, metric, Arc::new(world.clone()), config).unwrap();
    solver.state_mut().seed_rng(42);

    assert!(solver.add_start(&dvector![-1.0, 0.0]).unwrap());
    assert!(solver.add_goal(&dvector![1.0, 0.0]).unwrap());
    assert!(solver.solve(20_000, Duration::from_secs(2)).unwrap());

    // Geometric go-around optimum: two tangents plus the wrapped arc.
    let r: f64 = 0.5;
    let tangent = (1.0f64 - r * r).sqrt();
    let optimum = 2.0 * tangent + r * (std::f64::consts::PI - 2.0 * (r / 1.0f64).acos());
    let cost = solver.cost();
    assert!(cost >= optimum - 1e-6, "cost {cost} beat the optimum {optimum}");
    assert!(cost <= optimum * 1.25, "cost {cost} far from optimum {optimum}");

    // Every solution connection is collision-free.
    let path = solver.solution().unwrap();
    let points = path.waypoints(solver.state().graph());
    for pair in points.windows(2) {
        assert!(world.check_segment(&pair[0], &pair[1]));
    }
}

#[test]
fn multigoal_discards_colliding_goal() {
    let space = square_space(6.0);
    let metric = Arc::new(PathMetric::new(&space));
    let world = SphereWorld::new(vec![(dvector![5.0, 5.0], 1.0)]);
    let config = SolverConfig::default().with_max_distance(0.5);
    let mut solver = Multigoal::new(space, metric, Arc::new(world), config).unwrap();
    solver.state_mut().seed_rng(3);

    assert!(solver.add_start(&dvector![0.0, 0.0]).unwrap());
    assert!(solver.add_goal(&dvector![1.0, 0.0]).unwrap());
    assert!(solver.add_goal(&dvector![0.0, 1.0]).unwrap());
    // The goal inside the blocked ball is discarded on arrival.
    assert!(!solver.add_goal(&dvector![5.0, 5.0]).unwrap());
    assert_eq!(
        solver.goal_statuses().last(),
        Some(&marga::solvers::GoalStatus::Discard)
    );

    assert!(solver.solve(2000, Duration::from_secs(5)).unwrap());
    assert_relative_eq!(solver.state().path_cost(), 1.0, epsilon = 1e-6);
}

#[test]
fn warp_straightens_collinear_detour() {
    let space = square_space(2.0);
    let metric = Arc::new(PathMetric::new(&space));
    let mut graph = Graph::new(space);

    let waypoints = [dvector![0.0, 0.0], dvector![0.5, 0.4], dvector![1.0, 0.0]];
    let nodes: Vec<_> = waypoints
        .iter()
        .map(|w| graph.add_node(w.clone()).unwrap())
        .collect();
    let mut conns = Vec::new();
    for pair in nodes.windows(2) {
        let conn = graph.connect(pair[0], pair[1]);
        let cost = metric.cost(graph.config(pair[0]), graph.config(pair[1]));
        graph.set_cost(conn, cost);
        graph.add_connection(conn).unwrap();
        conns.push(conn);
    }
    let mut path = Path::new(conns, &graph, metric, Arc::new(FreeSpace)).unwrap();

    let mut optimizer = PathLocalOptimizer::with_defaults();
    optimizer.solve(&mut path, &mut graph, 100);

    // Within twice the bisection minimum length of the straight line.
    assert!(path.cost() <= 1.0 + 2.0 * 0.01, "cost {}", path.cost());
}

#[test]
fn change_root_preserves_side_branches() {
    let space = square_space(10.0);
    let metric = Arc::new(PathMetric::new(&space));
    let mut graph = Graph::new(space);

    let a = graph.add_node(dvector![0.0, 0.0]).unwrap();
    let mut tree = Tree::new(&graph, a, 1.0, Arc::new(FreeSpace), metric, false);

    let targets = [dvector![1.0, 0.0], dvector![2.0, 0.0], dvector![3.0, 0.0]];
    let mut chain = vec![a];
    for target in &targets {
        let (_, last) = tree.connect(&mut graph, target);
        chain.push(last.unwrap());
    }
    let (b, c, d) = (chain[1], chain[2], chain[3]);
    // A side subtree below b.
    let (_, side) = tree.connect(&mut graph, &dvector![1.0, 1.0]);
    let side = side.unwrap();

    tree.change_root(&mut graph, d).unwrap();

    assert_eq!(tree.root(), d);
    assert_eq!(graph.parent_of(c), Some(d));
    assert_eq!(graph.parent_of(b), Some(c));
    assert_eq!(graph.parent_of(a), Some(b));
    assert_eq!(graph.parent_of(side), Some(b));
    assert!(graph.node(d).tree_parent().is_none());
    // All costs from the new root are finite.
    for node in [a, b, c, side] {
        assert!(tree.cost_to_node(&graph, node).is_finite());
    }
}

#[test]
fn informed_sampler_degenerate_and_infinite() {
    use marga::{InformedSampler, Sampler};

    let space = square_space(2.0);
    let x1 = dvector![-1.0, 0.0];
    let x2 = dvector![1.0, 0.0];

    // Degenerate ellipsoid: every sample lies on the focal segment.
    let mut tight = InformedSampler::with_seed(&space, &x1, &x2, 2.0 + 1e-9, 5).unwrap();
    for _ in 0..1000 {
        let q = tight.sample();
        assert!(q[1].abs() < 1e-4, "off-segment sample {q:?}");
    }

    // Infinite cost: uniform over the box, empirical mean near its center.
    let mut wide = InformedSampler::with_seed(&space, &x1, &x2, f64::INFINITY, 6).unwrap();
    let mut mean: DVector<f64> = dvector![0.0, 0.0];
    let n = 10_000;
    for _ in 0..n {
        mean += wide.sample();
    }
    mean /= n as f64;
    assert!(mean[0].abs() < 0.05 && mean[1].abs() < 0.05, "mean {mean:?}");
}

#[test]
fn termination_flag_stops_solver_but_keeps_state() {
    let space = square_space(2.0);
    let metric = Arc::new(PathMetric::new(&space));
    let world = SphereWorld::new(vec![(dvector![0.0, 0.0], 0.5)]);
    let config = SolverConfig::default().with_max_distance(0.25);
    let mut solver = RrtStar::new(space, metric, Arc::new(world), config).unwrap();
    solver.state_mut().seed_rng(8);

    assert!(solver.add_start(&dvector![-1.0, 0.0]).unwrap());
    assert!(solver.add_goal(&dvector![1.0, 0.0]).unwrap());

    let flag = solver.termination_flag();
    flag.request();
    assert!(!solver.solve(1000, Duration::from_secs(1)).unwrap());

    // Terminate is graceful: the problem can continue afterwards.
    flag.clear();
    assert!(solver.solve(20_000, Duration::from_secs(2)).unwrap());
    assert!(solver.solved());
}
