//! Planning benchmarks.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::dvector;

use marga::solvers::{Rrt, RrtStar, Solver};
use marga::{
    ConfigSpace, FreeSpace, Graph, Path, PathLocalOptimizer, PathMetric, SolverConfig, SphereWorld,
};

fn bench_rrt_free_space(c: &mut Criterion) {
    c.bench_function("rrt_free_space_2d", |b| {
        b.iter(|| {
            let space =
                ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
            let metric = Arc::new(PathMetric::new(&space));
            let mut solver = Rrt::new(
                space,
                metric,
                Arc::new(FreeSpace),
                SolverConfig::default().with_max_distance(0.5),
            )
            .unwrap();
            solver.state_mut().seed_rng(1);
            solver.add_start(&dvector![-1.5, -1.5]).unwrap();
            solver.add_goal(&dvector![1.5, 1.5]).unwrap();
            solver.solve(1000, Duration::from_secs(1)).unwrap()
        });
    });
}

fn bench_rrt_star_obstacle(c: &mut Criterion) {
    c.bench_function("rrt_star_disc_2d", |b| {
        b.iter(|| {
            let space =
                ConfigSpace::unscaled(dvector![-2.0, -2.0], dvector![2.0, 2.0]).unwrap();
            let metric = Arc::new(PathMetric::new(&space));
            let checker = Arc::new(SphereWorld::new(vec![(dvector![0.0, 0.0], 0.5)]));
            let mut solver = RrtStar::new(
                space,
                metric,
                checker,
                SolverConfig::default().with_max_distance(0.5),
            )
            .unwrap();
            solver.state_mut().seed_rng(2);
            solver.add_start(&dvector![-1.0, 0.0]).unwrap();
            solver.add_goal(&dvector![1.0, 0.0]).unwrap();
            solver.solve(500, Duration::from_millis(200)).unwrap()
        });
    });
}

fn bench_path_optimization(c: &mut Criterion) {
    c.bench_function("path_local_optimizer_zigzag", |b| {
        b.iter(|| {
            let space =
                ConfigSpace::unscaled(dvector![-10.0, -10.0], dvector![10.0, 10.0]).unwrap();
            let metric = Arc::new(PathMetric::new(&space));
            let mut graph = Graph::new(space);
            let waypoints = [
                dvector![0.0, 0.0],
                dvector![0.5, 0.4],
                dvector![1.0, -0.3],
                dvector![1.5, 0.2],
                dvector![2.0, 0.0],
            ];
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
            path.cost()
        });
    });
}

criterion_group!(
    benches,
    bench_rrt_free_space,
    bench_rrt_star_obstacle,
    bench_path_optimization
);
criterion_main!(benches);
