//! Paths: ordered connection chains and their local improvement operators.
//!
//! A path references connections owned by the graph; destroying a path
//! leaves its connections alone. Three parallel flag arrays track which
//! neighborhoods are still candidates for warp and slip improvement so the
//! local optimizer can skip settled regions.

use std::sync::Arc;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::collision::CollisionChecker;
use crate::core::Metric;
use crate::error::{MargaError, Result};

use super::{ConnId, Graph, NodeId};

/// Bisection iteration bound.
const BISECTION_ITERATIONS: usize = 20;

/// An ordered, non-empty chain of connections with matching endpoints.
#[derive(Clone)]
pub struct Path {
    conns: Vec<ConnId>,
    metric: Arc<dyn Metric>,
    checker: Arc<dyn CollisionChecker>,
    cost: f64,
    min_length: f64,
    change_warp: Vec<bool>,
    change_slip_child: Vec<bool>,
    change_slip_parent: Vec<bool>,
}

/// Serializable snapshot of a path: waypoints in row-major order, total
/// and per-connection costs, and the improvement candidate flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathRecord {
    pub waypoints: Vec<Vec<f64>>,
    pub cost: f64,
    pub connection_costs: Vec<f64>,
    pub change_warp: Vec<bool>,
    pub change_slip_child: Vec<bool>,
    pub change_slip_parent: Vec<bool>,
}

impl Path {
    /// Build a path from existing connections.
    ///
    /// Fails on an empty chain or when consecutive endpoints disagree.
    pub fn new(
        conns: Vec<ConnId>,
        graph: &Graph,
        metric: Arc<dyn Metric>,
        checker: Arc<dyn CollisionChecker>,
    ) -> Result<Self> {
        if conns.is_empty() {
            return Err(MargaError::Invariant("a path cannot be empty".to_string()));
        }
        for pair in conns.windows(2) {
            if graph.conn(pair[0]).child() != graph.conn(pair[1]).parent() {
                return Err(MargaError::Invariant(
                    "path connections do not chain".to_string(),
                ));
            }
        }

        let cost = conns.iter().map(|c| graph.conn(*c).cost()).sum();
        let n = conns.len();
        let mut flags = vec![true; n];
        flags[0] = false;
        Ok(Self {
            conns,
            metric,
            checker,
            cost,
            min_length: 0.01,
            change_warp: flags.clone(),
            change_slip_child: flags.clone(),
            change_slip_parent: flags,
        })
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn connections(&self) -> &[ConnId] {
        &self.conns
    }

    pub fn start_node(&self, graph: &Graph) -> NodeId {
        graph.conn(self.conns[0]).parent()
    }

    pub fn goal_node(&self, graph: &Graph) -> NodeId {
        graph.conn(*self.conns.last().expect("path is non-empty")).child()
    }

    /// Waypoints from start to goal.
    pub fn waypoints(&self, graph: &Graph) -> Vec<DVector<f64>> {
        let mut points = Vec::with_capacity(self.conns.len() + 1);
        points.push(graph.config(self.start_node(graph)).clone());
        for conn in &self.conns {
            points.push(graph.config(graph.conn(*conn).child()).clone());
        }
        points
    }

    /// Re-sum the cached cost from the connections.
    pub fn recompute_cost(&mut self, graph: &Graph) {
        self.cost = self.conns.iter().map(|c| graph.conn(*c).cost()).sum();
    }

    /// Path node (waypoint) closest to a configuration.
    pub fn find_closer_node(&self, graph: &Graph, q: &DVector<f64>) -> NodeId {
        let mut best = self.start_node(graph);
        let mut best_dist = graph.space().distance(graph.config(best), q);
        for conn in &self.conns {
            let child = graph.conn(*conn).child();
            let dist = graph.space().distance(graph.config(child), q);
            if dist < best_dist {
                best_dist = dist;
                best = child;
            }
        }
        best
    }

    /// The sub-chain from a path node to the goal.
    pub fn connections_from_node(&self, graph: &Graph, node: NodeId) -> Vec<ConnId> {
        self.conns
            .iter()
            .skip_while(|c| graph.conn(**c).parent() != node)
            .copied()
            .collect()
    }

    /// The sub-chain from the start to a path node.
    pub fn connections_to_node(&self, graph: &Graph, node: NodeId) -> Vec<ConnId> {
        let mut out = Vec::new();
        for conn in &self.conns {
            out.push(*conn);
            if graph.conn(*conn).child() == node {
                return out;
            }
        }
        if graph.conn(self.conns[0]).parent() == node {
            return Vec::new();
        }
        out.clear();
        out
    }

    /// Re-check every connection after a scene change.
    ///
    /// Failing connections keep their place in the chain but get infinite
    /// cost (and a fresh recently-checked stamp), so solvers notice and
    /// re-plan around them. Returns whether the whole path is still free.
    pub fn check_validity(&mut self, graph: &mut Graph) -> bool {
        let mut valid = true;
        for conn in self.conns.clone() {
            if graph.check_connection(self.checker.as_ref(), conn) {
                continue;
            }
            graph.set_cost(conn, f64::INFINITY);
            valid = false;
        }
        self.recompute_cost(graph);
        valid
    }

    /// Serializable snapshot.
    pub fn record(&self, graph: &Graph) -> PathRecord {
        PathRecord {
            waypoints: self
                .waypoints(graph)
                .into_iter()
                .map(|w| w.iter().copied().collect())
                .collect(),
            cost: self.cost,
            connection_costs: self.conns.iter().map(|c| graph.conn(*c).cost()).collect(),
            change_warp: self.change_warp.clone(),
            change_slip_child: self.change_slip_child.clone(),
            change_slip_parent: self.change_slip_parent.clone(),
        }
    }

    fn set_changed(&mut self, idx: usize) {
        self.change_warp[idx] = true;
        self.change_slip_child[idx] = true;
        self.change_slip_parent[idx] = true;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local improvement
    // ─────────────────────────────────────────────────────────────────────

    /// Interval-halving search for a cheaper, collision-free replacement of
    /// the waypoint between connections `idx-1` and `idx`.
    ///
    /// Candidate waypoints are `center + t·direction` with
    /// `t ∈ [min_distance, max_distance]`; smaller `t` means a larger move
    /// away from the current vertex. A candidate is accepted when both
    /// half-segments are collision-free and the summed metric cost strictly
    /// drops; the search then continues toward smaller `t`.
    fn bisection(
        &mut self,
        graph: &mut Graph,
        idx: usize,
        center: &DVector<f64>,
        direction: &DVector<f64>,
        mut max_distance: f64,
        mut min_distance: f64,
    ) -> bool {
        debug_assert!(idx >= 1 && idx < self.conns.len());

        let parent = graph.conn(self.conns[idx - 1]).parent();
        let child = graph.conn(self.conns[idx]).child();
        let parent_config = graph.config(parent).clone();
        let child_config = graph.config(child).clone();

        let mut cost =
            graph.conn(self.conns[idx - 1]).cost() + graph.conn(self.conns[idx]).cost();
        let mut improved = false;

        let mut iter = 0;
        while iter < BISECTION_ITERATIONS && (max_distance - min_distance) > self.min_length {
            iter += 1;
            let distance = 0.5 * (max_distance + min_distance);
            let p = center + direction * distance;

            let cost_parent_p = self.metric.cost(&parent_config, &p);
            let cost_p_child = self.metric.cost(&p, &child_config);
            if cost_parent_p + cost_p_child >= cost {
                min_distance = distance;
                continue;
            }
            if !self.checker.check_segment(&parent_config, &p)
                || !self.checker.check_segment(&p, &child_config)
            {
                min_distance = distance;
                continue;
            }

            improved = true;
            max_distance = distance;
            cost = cost_parent_p + cost_p_child;

            // The old incoming connection stays attached: a tree may still
            // route other branches through the replaced waypoint.
            graph.remove_connection(self.conns[idx]);

            let node = match graph.add_node(p) {
                Ok(n) => n,
                Err(_) => break,
            };
            let into = graph.connect(parent, node);
            graph.set_cost(into, cost_parent_p);
            let out_of = graph.connect(node, child);
            graph.set_cost(out_of, cost_p_child);
            if graph.add_connection(into).is_err() || graph.add_connection(out_of).is_err() {
                break;
            }
            self.conns[idx - 1] = into;
            self.conns[idx] = out_of;
        }

        if improved {
            self.recompute_cost(graph);
        }
        improved
    }

    /// Pull each interior waypoint toward the midpoint of its flanking
    /// vertices. Returns whether any neighborhood is still marked for
    /// improvement.
    pub fn warp(&mut self, graph: &mut Graph) -> bool {
        for idx in 1..self.conns.len() {
            if self.change_warp[idx - 1] || self.change_warp[idx] {
                let center = 0.5
                    * (graph.config(graph.conn(self.conns[idx - 1]).parent())
                        + graph.config(graph.conn(self.conns[idx]).child()));
                let vertex = graph.config(graph.conn(self.conns[idx - 1]).child()).clone();
                let mut direction = vertex - &center;
                let max_distance = direction.norm();
                if max_distance <= f64::EPSILON {
                    self.change_warp[idx] = false;
                    continue;
                }
                direction /= max_distance;

                if self.bisection(graph, idx, &center, &direction, max_distance, 0.0) {
                    self.set_changed(idx);
                } else {
                    self.change_warp[idx] = false;
                }
            }
        }
        self.change_warp.iter().any(|b| *b)
    }

    /// Pull each interior waypoint toward its child-side vertex.
    pub fn slip_child(&mut self, graph: &mut Graph) -> bool {
        for idx in 1..self.conns.len() {
            if self.change_slip_child[idx - 1] || self.change_slip_child[idx] {
                let center = graph.config(graph.conn(self.conns[idx]).child()).clone();
                let vertex = graph.config(graph.conn(self.conns[idx - 1]).child()).clone();
                let mut direction = vertex - &center;
                let max_distance = direction.norm();
                if max_distance <= f64::EPSILON {
                    self.change_slip_child[idx] = false;
                    continue;
                }
                direction /= max_distance;

                if self.bisection(graph, idx, &center, &direction, max_distance, 0.0) {
                    self.set_changed(idx);
                } else {
                    self.change_slip_child[idx] = false;
                }
            }
        }
        self.change_slip_child.iter().any(|b| *b)
    }

    /// Pull each interior waypoint toward its parent-side vertex.
    pub fn slip_parent(&mut self, graph: &mut Graph) -> bool {
        for idx in 1..self.conns.len() {
            if self.change_slip_parent[idx - 1] || self.change_slip_parent[idx] {
                let center = graph.config(graph.conn(self.conns[idx - 1]).parent()).clone();
                let vertex = graph.config(graph.conn(self.conns[idx - 1]).child()).clone();
                let mut direction = vertex - &center;
                let max_distance = direction.norm();
                if max_distance <= f64::EPSILON {
                    self.change_slip_parent[idx] = false;
                    continue;
                }
                direction /= max_distance;

                if self.bisection(graph, idx, &center, &direction, max_distance, 0.0) {
                    self.set_changed(idx);
                } else {
                    self.change_slip_parent[idx] = false;
                }
            }
        }
        self.change_slip_parent.iter().any(|b| *b)
    }

    /// Merge each connection shorter than the minimum length with its
    /// predecessor when the combined straight segment is collision-free.
    pub fn simplify(&mut self, graph: &mut Graph) -> bool {
        let mut simplified = false;
        let mut ic = 1usize;
        while ic < self.conns.len() {
            let short = {
                let conn = graph.conn(self.conns[ic]);
                graph
                    .space()
                    .distance(graph.config(conn.parent()), graph.config(conn.child()))
                    <= self.min_length
            };
            if !short {
                ic += 1;
                continue;
            }

            let parent = graph.conn(self.conns[ic - 1]).parent();
            let child = graph.conn(self.conns[ic]).child();
            let parent_config = graph.config(parent).clone();
            let child_config = graph.config(child).clone();
            if self.checker.check_segment(&parent_config, &child_config) {
                simplified = true;
                let cost = self.metric.cost(&parent_config, &child_config);
                graph.remove_connection(self.conns[ic]);
                let merged = graph.connect(parent, child);
                graph.set_cost(merged, cost);
                if graph.add_connection(merged).is_err() {
                    break;
                }

                self.conns.splice(ic - 1..=ic, [merged]);
                self.change_warp.remove(ic);
                self.change_warp[ic - 1] = true;
                self.change_slip_parent.remove(ic);
                self.change_slip_parent[ic - 1] = true;
                self.change_slip_child.remove(ic);
                self.change_slip_child[ic - 1] = true;
            } else {
                ic += 1;
            }
        }
        if simplified {
            self.recompute_cost(graph);
        }
        simplified
    }

    /// Redistribute waypoints so no connection is longer than `spacing`.
    pub fn resample(&mut self, graph: &mut Graph, spacing: f64) -> bool {
        if spacing <= 0.0 {
            return false;
        }
        let mut changed = false;
        let mut idx = 0usize;
        while idx < self.conns.len() {
            let conn = self.conns[idx];
            let (parent, child) = {
                let c = graph.conn(conn);
                (c.parent(), c.child())
            };
            let parent_config = graph.config(parent).clone();
            let child_config = graph.config(child).clone();
            let length = graph.space().distance(&parent_config, &child_config);
            if length <= spacing {
                idx += 1;
                continue;
            }

            let pieces = (length / spacing).ceil() as usize;
            graph.remove_connection(conn);

            let mut previous = parent;
            let mut new_conns = Vec::with_capacity(pieces);
            let mut ok = true;
            for piece in 1..=pieces {
                let next = if piece == pieces {
                    child
                } else {
                    let t = piece as f64 / pieces as f64;
                    let q = &parent_config + (&child_config - &parent_config) * t;
                    match graph.add_node(q) {
                        Ok(n) => n,
                        Err(_) => {
                            ok = false;
                            break;
                        }
                    }
                };
                let prev_config = graph.config(previous).clone();
                let next_config = graph.config(next).clone();
                let segment = graph.connect(previous, next);
                graph.set_cost(segment, self.metric.cost(&prev_config, &next_config));
                if graph.add_connection(segment).is_err() {
                    ok = false;
                    break;
                }
                new_conns.push(segment);
                previous = next;
            }
            if !ok {
                break;
            }

            let added = new_conns.len();
            self.conns.splice(idx..=idx, new_conns);
            for arr in [
                &mut self.change_warp,
                &mut self.change_slip_child,
                &mut self.change_slip_parent,
            ] {
                arr.splice(idx..=idx, std::iter::repeat(true).take(added));
                arr[0] = false;
            }
            changed = true;
            idx += added;
        }
        if changed {
            self.recompute_cost(graph);
        }
        changed
    }
}
