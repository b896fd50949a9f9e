//! Rooted tree over the planning graph.
//!
//! A tree is a membership view over the shared [`Graph`] arena: it owns no
//! nodes, only the root reference, the member set and an optional k-d index
//! over member configurations. All growth operators (extend, connect,
//! rewire, informed extend) and the structural edits (re-rooting, branch
//! splicing, purges) live here.

use std::collections::HashSet;
use std::sync::Arc;

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::collision::CollisionChecker;
use crate::core::{Metric, EPS};
use crate::error::{MargaError, Result};
use crate::samplers::Sampler;

use super::{ConnId, Graph, KdIndex, NodeId};

/// Rewire count after which [`Tree::need_cleaning`] starts reporting true.
const REWIRES_BEFORE_CLEANING: usize = 500;

/// Result of one extension step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// A new node was added one step toward the target.
    Advanced(NodeId),
    /// The target itself was attached to the tree.
    Reached(NodeId),
    /// The step segment was in collision; the tree is unchanged.
    Blocked,
}

impl ExtendOutcome {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ExtendOutcome::Advanced(n) | ExtendOutcome::Reached(n) => Some(*n),
            ExtendOutcome::Blocked => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self, ExtendOutcome::Blocked)
    }
}

/// Result of a rewire step.
#[derive(Clone, Copy, Debug, Default)]
pub struct RewireOutcome {
    /// Node added by the initial extension, if any.
    pub new_node: Option<NodeId>,
    /// Whether the tree changed (extension or any relink).
    pub improved: bool,
}

/// A rooted tree over graph nodes with a nearest-neighbor index.
pub struct Tree {
    root: NodeId,
    members: HashSet<NodeId>,
    order: Vec<NodeId>,
    index: Option<KdIndex>,
    max_distance: f64,
    metric: Arc<dyn Metric>,
    checker: Arc<dyn CollisionChecker>,
    rewires_since_clean: usize,
}

impl Tree {
    pub fn new(
        graph: &Graph,
        root: NodeId,
        max_distance: f64,
        checker: Arc<dyn CollisionChecker>,
        metric: Arc<dyn Metric>,
        use_kdtree: bool,
    ) -> Self {
        let mut tree = Self {
            root,
            members: HashSet::new(),
            order: Vec::new(),
            index: use_kdtree.then(|| KdIndex::new(graph.dimension())),
            max_distance,
            metric,
            checker,
            rewires_since_clean: 0,
        };
        tree.insert_member(graph, root);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    pub fn metric(&self) -> &Arc<dyn Metric> {
        &self.metric
    }

    pub fn checker(&self) -> &Arc<dyn CollisionChecker> {
        &self.checker
    }

    // ─────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn insert_member(&mut self, graph: &Graph, node: NodeId) {
        if self.members.insert(node) {
            self.order.push(node);
            if let Some(index) = self.index.as_mut() {
                index.insert(graph.space().to_scaled(graph.config(node)), node);
            }
        }
    }

    /// Add an existing node to the tree membership.
    pub fn add_node(&mut self, graph: &Graph, node: NodeId) {
        self.insert_member(graph, node);
    }

    /// Drop a node from the membership and detach it from the graph. The
    /// node itself survives and may be re-added elsewhere.
    pub fn remove_node(&mut self, graph: &mut Graph, node: NodeId) {
        graph.disconnect(node);
        if self.members.remove(&node) {
            self.order.retain(|n| *n != node);
            if let Some(index) = self.index.as_mut() {
                index.remove(node);
            }
        }
    }

    pub(crate) fn forget_member(&mut self, node: NodeId) {
        if self.members.remove(&node) {
            self.order.retain(|n| *n != node);
            if let Some(index) = self.index.as_mut() {
                index.remove(node);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Member nearest to a configuration under the scaled norm.
    pub fn nearest_neighbor(&self, graph: &Graph, q: &DVector<f64>) -> Option<NodeId> {
        if let Some(index) = self.index.as_ref() {
            return index.nearest(&graph.space().to_scaled(q)).map(|(id, _)| id);
        }
        self.order
            .iter()
            .map(|n| (*n, graph.space().distance(graph.config(*n), q)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Members within `radius` of a configuration (scaled norm).
    pub fn near(&self, graph: &Graph, q: &DVector<f64>, radius: f64) -> Vec<NodeId> {
        if let Some(index) = self.index.as_ref() {
            return index
                .within_radius(&graph.space().to_scaled(q), radius)
                .into_iter()
                .map(|(id, _)| id)
                .collect();
        }
        self.order
            .iter()
            .filter(|n| graph.space().distance(graph.config(**n), q) <= radius)
            .copied()
            .collect()
    }

    /// The tree-parent connection to follow when walking toward this
    /// tree's root. A meeting node may briefly hold a parent in another
    /// tree as well; membership of the parent node disambiguates.
    fn parent_toward_root(&self, graph: &Graph, node: NodeId) -> Option<ConnId> {
        let parents = &graph.node(node).parents;
        match parents.len() {
            0 => None,
            1 => Some(parents[0]),
            _ => parents
                .iter()
                .copied()
                .find(|c| self.contains(graph.conn(*c).parent())),
        }
    }

    /// Cost from the root to a member, summed over tree connections.
    /// Infinite when the node is not connected to this tree's root.
    pub fn cost_to_node(&self, graph: &Graph, node: NodeId) -> f64 {
        let mut cost = 0.0;
        let mut current = node;
        let mut steps = 0usize;
        while current != self.root {
            let Some(conn) = self.parent_toward_root(graph, current) else {
                return f64::INFINITY;
            };
            cost += graph.conn(conn).cost();
            current = graph.conn(conn).parent();
            steps += 1;
            if steps > self.members.len() + 1 {
                return f64::INFINITY;
            }
        }
        cost
    }

    /// Tree connections from the root to a member, in root-first order.
    /// Empty for the root itself or for a node detached from this root.
    pub fn connections_to_node(&self, graph: &Graph, node: NodeId) -> Vec<ConnId> {
        let mut chain = Vec::new();
        let mut current = node;
        let mut steps = 0usize;
        while current != self.root {
            let Some(conn) = self.parent_toward_root(graph, current) else {
                return Vec::new();
            };
            chain.push(conn);
            current = graph.conn(conn).parent();
            steps += 1;
            if steps > self.members.len() + 1 {
                return Vec::new();
            }
        }
        chain.reverse();
        chain
    }

    // ─────────────────────────────────────────────────────────────────────
    // Growth
    // ─────────────────────────────────────────────────────────────────────

    /// One step from the nearest member toward a configuration.
    ///
    /// The step length is `min(max_distance, ‖q − nearest‖_s)`; the step
    /// reaches `q` itself when the target is within range.
    pub fn extend(&mut self, graph: &mut Graph, q: &DVector<f64>) -> ExtendOutcome {
        let Some(nearest) = self.nearest_neighbor(graph, q) else {
            return ExtendOutcome::Blocked;
        };
        let from = graph.config(nearest).clone();
        let distance = graph.space().distance(&from, q);
        if distance <= EPS {
            return ExtendOutcome::Reached(nearest);
        }

        let (candidate, reaches) = if distance <= self.max_distance {
            (q.clone(), true)
        } else {
            (&from + (q - &from) * (self.max_distance / distance), false)
        };

        if !self.checker.check_segment(&from, &candidate) {
            return ExtendOutcome::Blocked;
        }

        let node = match graph.add_node(candidate) {
            Ok(n) => n,
            Err(_) => return ExtendOutcome::Blocked,
        };
        self.attach(graph, nearest, node);
        if reaches {
            ExtendOutcome::Reached(node)
        } else {
            ExtendOutcome::Advanced(node)
        }
    }

    /// One step from the nearest member toward an existing node; reaching
    /// it splices the node into this tree.
    pub fn extend_to_node(&mut self, graph: &mut Graph, target: NodeId) -> ExtendOutcome {
        let target_config = graph.config(target).clone();
        let Some(nearest) = self.nearest_neighbor(graph, &target_config) else {
            return ExtendOutcome::Blocked;
        };
        if nearest == target {
            return ExtendOutcome::Reached(target);
        }
        let from = graph.config(nearest).clone();
        let distance = graph.space().distance(&from, &target_config);

        if distance <= self.max_distance {
            if !self.checker.check_segment(&from, &target_config) {
                return ExtendOutcome::Blocked;
            }
            self.attach(graph, nearest, target);
            return ExtendOutcome::Reached(target);
        }

        let candidate = &from + (&target_config - &from) * (self.max_distance / distance);
        if !self.checker.check_segment(&from, &candidate) {
            return ExtendOutcome::Blocked;
        }
        let node = match graph.add_node(candidate) {
            Ok(n) => n,
            Err(_) => return ExtendOutcome::Blocked,
        };
        self.attach(graph, nearest, node);
        ExtendOutcome::Advanced(node)
    }

    fn attach(&mut self, graph: &mut Graph, parent: NodeId, child: NodeId) {
        let cost = self.metric.cost(graph.config(parent), graph.config(child));
        let conn = graph.connect(parent, child);
        graph.set_cost(conn, cost);
        // A meeting node may briefly carry a parent in another tree as
        // well; the splice resolves it.
        let _ = graph.add_connection(conn);
        self.insert_member(graph, child);
    }

    /// Repeatedly extend toward a configuration until it is reached or an
    /// extension is blocked. Returns the last node added, if any.
    pub fn connect(&mut self, graph: &mut Graph, q: &DVector<f64>) -> (bool, Option<NodeId>) {
        let mut last = None;
        loop {
            match self.extend(graph, q) {
                ExtendOutcome::Reached(n) => return (true, Some(n)),
                ExtendOutcome::Advanced(n) => last = Some(n),
                ExtendOutcome::Blocked => return (false, last),
            }
        }
    }

    /// [`Tree::connect`] targeting an existing node.
    pub fn connect_to_node(&mut self, graph: &mut Graph, target: NodeId) -> (bool, Option<NodeId>) {
        let mut last = None;
        loop {
            match self.extend_to_node(graph, target) {
                ExtendOutcome::Reached(n) => return (true, Some(n)),
                ExtendOutcome::Advanced(n) => last = Some(n),
                ExtendOutcome::Blocked => return (false, last),
            }
        }
    }

    /// Extend toward `q`, then locally optimize: relink the new node to the
    /// cheapest collision-free parent within `radius`, and route neighbors
    /// through the new node where that lowers their cost to the root.
    pub fn rewire(&mut self, graph: &mut Graph, q: &DVector<f64>, radius: f64) -> RewireOutcome {
        let outcome = self.extend(graph, q);
        let Some(new_node) = outcome.node() else {
            return RewireOutcome::default();
        };
        self.rewire_around(graph, new_node, radius, true)
    }

    /// [`Tree::rewire`] targeting an existing node.
    pub fn rewire_to_node(&mut self, graph: &mut Graph, target: NodeId, radius: f64) -> RewireOutcome {
        let outcome = self.extend_to_node(graph, target);
        let Some(new_node) = outcome.node() else {
            return RewireOutcome::default();
        };
        self.rewire_around(graph, new_node, radius, true)
    }

    fn rewire_around(
        &mut self,
        graph: &mut Graph,
        new_node: NodeId,
        radius: f64,
        extended: bool,
    ) -> RewireOutcome {
        let q = graph.config(new_node).clone();
        let near = self.near(graph, &q, radius);
        let mut improved = extended;

        // Phase 1: cheapest parent for the new node.
        let mut best_cost = self.cost_to_node(graph, new_node);
        for candidate in &near {
            let candidate = *candidate;
            if candidate == new_node || Some(candidate) == graph.parent_of(new_node) {
                continue;
            }
            let via = self.cost_to_node(graph, candidate);
            if via.is_infinite() {
                continue;
            }
            let candidate_config = graph.config(candidate).clone();
            let segment = self.metric.cost(&candidate_config, &q);
            if via + segment >= best_cost - EPS {
                continue;
            }
            if !self.checker.check_segment(&candidate_config, &q) {
                continue;
            }
            if let Some(old) = graph.node(new_node).tree_parent() {
                graph.remove_connection(old);
            }
            let conn = graph.connect(candidate, new_node);
            graph.set_cost(conn, segment);
            let _ = graph.add_connection(conn);
            best_cost = via + segment;
            improved = true;
        }

        // Phase 2: route neighbors through the new node.
        for candidate in &near {
            let candidate = *candidate;
            if candidate == new_node
                || candidate == self.root
                || Some(candidate) == graph.parent_of(new_node)
            {
                continue;
            }
            if self.is_ancestor(graph, candidate, new_node) {
                continue;
            }
            let old_cost = self.cost_to_node(graph, candidate);
            let candidate_config = graph.config(candidate).clone();
            let segment = self.metric.cost(&q, &candidate_config);
            if best_cost + segment >= old_cost - EPS {
                continue;
            }
            if !self.checker.check_segment(&q, &candidate_config) {
                continue;
            }
            if let Some(old) = graph.node(candidate).tree_parent() {
                graph.remove_connection(old);
            }
            let conn = graph.connect(new_node, candidate);
            graph.set_cost(conn, segment);
            let _ = graph.add_connection(conn);
            self.rewires_since_clean += 1;
            improved = true;
        }

        RewireOutcome {
            new_node: Some(new_node),
            improved,
        }
    }

    fn is_ancestor(&self, graph: &Graph, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = node;
        let mut steps = 0usize;
        while let Some(conn) = self.parent_toward_root(graph, current) {
            let parent = graph.conn(conn).parent();
            if parent == ancestor {
                return true;
            }
            current = parent;
            steps += 1;
            if steps > self.members.len() + 1 {
                return false;
            }
        }
        false
    }

    /// Biased extension used by the anytime improvement phase: with
    /// probability `bias` the step targets `focus2` (the goal) instead of
    /// `q`, and any extension whose cost through the new node plus the
    /// utopia to `focus2` cannot beat `cost_to_beat` is rejected.
    pub fn informed_extend(
        &mut self,
        graph: &mut Graph,
        rng: &mut StdRng,
        q: &DVector<f64>,
        focus2: &DVector<f64>,
        cost_to_beat: f64,
        bias: f64,
    ) -> ExtendOutcome {
        let target = if rng.gen::<f64>() < bias { focus2 } else { q };

        let Some(nearest) = self.nearest_neighbor(graph, target) else {
            return ExtendOutcome::Blocked;
        };
        let from = graph.config(nearest).clone();
        let distance = graph.space().distance(&from, target);
        if distance <= EPS {
            return ExtendOutcome::Blocked;
        }
        let (candidate, reaches) = if distance <= self.max_distance {
            (target.clone(), true)
        } else {
            (&from + (target - &from) * (self.max_distance / distance), false)
        };

        let cost_through = self.cost_to_node(graph, nearest)
            + self.metric.cost(&from, &candidate)
            + self.metric.utopia(&candidate, focus2);
        if cost_through >= cost_to_beat - EPS {
            return ExtendOutcome::Blocked;
        }

        if !self.checker.check_segment(&from, &candidate) {
            return ExtendOutcome::Blocked;
        }
        let node = match graph.add_node(candidate) {
            Ok(n) => n,
            Err(_) => return ExtendOutcome::Blocked,
        };
        self.attach(graph, nearest, node);
        if reaches {
            ExtendOutcome::Reached(node)
        } else {
            ExtendOutcome::Advanced(node)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Structural edits
    // ─────────────────────────────────────────────────────────────────────

    /// Re-root the tree at a member by flipping every connection on the
    /// path from the current root.
    pub fn change_root(&mut self, graph: &mut Graph, new_root: NodeId) -> Result<()> {
        if !self.contains(new_root) {
            return Err(MargaError::Invariant(
                "new root is not a member of the tree".to_string(),
            ));
        }
        if new_root == self.root {
            return Ok(());
        }
        let chain = self.connections_to_node(graph, new_root);
        if chain.is_empty() {
            return Err(MargaError::Invariant(
                "new root is not connected to the current root".to_string(),
            ));
        }
        for conn in chain.iter().rev() {
            graph.flip_connection(*conn)?;
        }
        self.root = new_root;
        Ok(())
    }

    /// Splice a connection chain into the tree.
    ///
    /// The chain must touch the tree at one end. When only its last child
    /// is a member (a branch grown from another root, e.g. a goal tree
    /// meeting this one), the chain is flipped in place so it hangs off the
    /// meeting node; when its first parent is a member it is added as-is.
    pub fn add_branch(&mut self, graph: &mut Graph, chain: &[ConnId]) -> Result<()> {
        let Some(first) = chain.first() else {
            return Ok(());
        };
        let head = graph.conn(*first).parent();
        let tail = graph.conn(*chain.last().expect("chain is non-empty")).child();

        if self.contains(head) {
            for conn in chain {
                self.insert_member(graph, graph.conn(*conn).child());
            }
            Ok(())
        } else if self.contains(tail) {
            for conn in chain.iter().rev() {
                graph.flip_connection(*conn)?;
            }
            for conn in chain {
                self.insert_member(graph, graph.conn(*conn).child());
            }
            Ok(())
        } else {
            Err(MargaError::Invariant(
                "branch does not touch the tree".to_string(),
            ))
        }
    }

    /// Reduce the tree to the nodes on one root-anchored chain, purging
    /// every other member.
    pub fn keep_only_this_branch(&mut self, graph: &mut Graph, chain: &[ConnId]) {
        let mut keep: HashSet<NodeId> = HashSet::new();
        keep.insert(self.root);
        for conn in chain {
            keep.insert(graph.conn(*conn).parent());
            keep.insert(graph.conn(*conn).child());
        }
        let doomed: Vec<NodeId> = self
            .order
            .iter()
            .filter(|n| !keep.contains(n))
            .copied()
            .collect();
        for node in doomed {
            graph.disconnect(node);
            self.forget_member(node);
            let _ = graph.release_node(node);
        }
    }

    /// Detach and drop a single childless node.
    pub fn purge_this_node(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
        removed: &mut usize,
    ) -> Result<()> {
        if !graph.node(node).tree_children().is_empty() {
            return Err(MargaError::Invariant(
                "cannot purge a node that still has tree children".to_string(),
            ));
        }
        graph.disconnect(node);
        self.forget_member(node);
        graph.release_node(node)?;
        *removed += 1;
        Ok(())
    }

    /// Drop every member that lies outside all the supplied samplers'
    /// regions, is not white-listed, and holds no tree children. Cascades
    /// until a full pass removes nothing; returns the number removed.
    pub fn purge_nodes_outside_ellipsoids(
        &mut self,
        graph: &mut Graph,
        samplers: &[&dyn Sampler],
        white_list: &HashSet<NodeId>,
    ) -> usize {
        let mut removed = 0usize;
        loop {
            let before = removed;
            let candidates: Vec<NodeId> = self.order.clone();
            for node in candidates {
                if node == self.root || white_list.contains(&node) {
                    continue;
                }
                if !graph.node(node).tree_children().is_empty() {
                    continue;
                }
                let q = graph.config(node);
                if samplers.iter().any(|s| s.in_bounds(q)) {
                    continue;
                }
                let _ = self.purge_this_node(graph, node, &mut removed);
            }
            if removed == before {
                break;
            }
        }
        if removed > 0 {
            debug!(removed, remaining = self.node_count(), "purged nodes outside ellipsoids");
            self.rewires_since_clean = 0;
        }
        removed
    }

    /// Whether enough rewires have accumulated that a purge is worthwhile.
    pub fn need_cleaning(&self) -> bool {
        self.rewires_since_clean > REWIRES_BEFORE_CLEANING
    }

    /// Add all descendants of a member to this tree (used by subtrees).
    pub(crate) fn populate_from_node(&mut self, graph: &Graph, from: NodeId) {
        let mut stack: Vec<NodeId> = graph.children_of(from);
        while let Some(node) = stack.pop() {
            self.insert_member(graph, node);
            stack.extend(graph.children_of(node));
        }
    }
}
