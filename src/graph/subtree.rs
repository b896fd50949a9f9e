//! Subtrees: trees whose membership is a subset of a parent tree.
//!
//! A subtree shares the parent tree's graph, metric, checker and maximum
//! extend distance. Adding a node adds it to both trees; removing a node
//! removes it from both, so the subset invariant holds at all times.
//! `hide_*` operations shrink only the subtree view and leave the parent
//! tree untouched.

use std::collections::HashSet;

use nalgebra::DVector;
use tracing::warn;

use crate::collision::CollisionChecker;
use crate::core::Metric;
use crate::error::Result;

use super::{Graph, NodeId, Tree};

/// A tree backed by a parent tree.
pub struct Subtree {
    tree: Tree,
}

impl Subtree {
    /// Subtree spanning the whole branch hanging from `root`.
    pub fn from_root(graph: &Graph, parent: &Tree, root: NodeId) -> Self {
        let mut tree = Tree::new(
            graph,
            root,
            parent.max_distance(),
            parent.checker().clone(),
            parent.metric().clone(),
            false,
        );
        tree.populate_from_node(graph, root);
        Self { tree }
    }

    /// Subtree of the branch hanging from `root`, restricted to the
    /// informed ellipsoid with foci `focus1`/`focus2` and the given cost.
    ///
    /// Black-listed nodes and (when `node_check` is set) nodes whose
    /// configuration fails the collision checker cut their whole branch.
    /// When the root itself lies outside the ellipsoid the filter is
    /// dropped and the full branch is taken.
    pub fn inside_ellipsoid(
        graph: &Graph,
        parent: &Tree,
        root: NodeId,
        focus1: &DVector<f64>,
        focus2: &DVector<f64>,
        cost: f64,
        black_list: &HashSet<NodeId>,
        node_check: bool,
    ) -> Self {
        let mut tree = Tree::new(
            graph,
            root,
            parent.max_distance(),
            parent.checker().clone(),
            parent.metric().clone(),
            false,
        );

        let metric = parent.metric().clone();
        let root_config = graph.config(root);
        let root_inside =
            metric.utopia(root_config, focus1) + metric.utopia(root_config, focus2) < cost;
        if !root_inside {
            warn!("subtree root lies outside the ellipsoid; taking the full branch");
        }

        let mut stack: Vec<NodeId> = graph.children_of(root);
        while let Some(node) = stack.pop() {
            if black_list.contains(&node) {
                continue;
            }
            let q = graph.config(node);
            if root_inside && metric.utopia(q, focus1) + metric.utopia(q, focus2) >= cost {
                continue;
            }
            if node_check && !parent.checker().check(q) {
                continue;
            }
            tree.insert_member(graph, node);
            stack.extend(graph.children_of(node));
        }
        Self { tree }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.tree.contains(node)
    }

    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    /// Add a node to the subtree and to its parent tree.
    pub fn add_node(&mut self, graph: &Graph, parent: &mut Tree, node: NodeId) {
        self.tree.add_node(graph, node);
        parent.add_node(graph, node);
    }

    /// Remove a node from the subtree and from its parent tree.
    pub fn remove_node(&mut self, graph: &mut Graph, parent: &mut Tree, node: NodeId) {
        parent.forget_member(node);
        self.tree.remove_node(graph, node);
    }

    /// Purge a childless node from both trees.
    ///
    /// A node reachable from the subtree root may belong only to the
    /// parent tree when the subtree was populated inside an ellipsoid;
    /// it is then purged from the parent tree alone.
    pub fn purge_this_node(
        &mut self,
        graph: &mut Graph,
        parent: &mut Tree,
        node: NodeId,
        removed: &mut usize,
    ) -> Result<()> {
        if self.tree.contains(node) {
            parent.forget_member(node);
            self.tree.purge_this_node(graph, node, removed)
        } else {
            parent.purge_this_node(graph, node, removed)
        }
    }

    /// Drop a node and all its successors from the subtree view only.
    pub fn hide_from_subtree(&mut self, graph: &Graph, node: NodeId) {
        if !self.tree.contains(node) {
            return;
        }
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            stack.extend(graph.children_of(n));
            if n != self.tree.root() {
                self.tree.forget_member(n);
            }
        }
    }

    /// Hide every branch below a connection whose cost is infinite.
    pub fn hide_invalid_branches(&mut self, graph: &Graph, node: NodeId) {
        if !self.tree.contains(node) {
            return;
        }
        for conn in graph.node(node).tree_children().to_vec() {
            let child = graph.conn(conn).child();
            if graph.conn(conn).cost().is_infinite() {
                self.hide_from_subtree(graph, child);
            } else {
                self.hide_invalid_branches(graph, child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::FreeSpace;
    use crate::core::{ConfigSpace, PathMetric};
    use nalgebra::dvector;
    use std::sync::Arc;

    fn make_parent() -> (Graph, Tree, Vec<NodeId>) {
        let space = ConfigSpace::unscaled(dvector![-10.0, -10.0], dvector![10.0, 10.0]).unwrap();
        let metric = Arc::new(PathMetric::new(&space));
        let mut graph = Graph::new(space);
        let root = graph.add_node(dvector![0.0, 0.0]).unwrap();
        let mut tree = Tree::new(&graph, root, 1.0, Arc::new(FreeSpace), metric, false);
        let mut added = vec![root];
        for target in [
            dvector![1.0, 0.0],
            dvector![2.0, 0.0],
            dvector![1.0, 1.0],
            dvector![5.0, 5.0],
        ] {
            let (_, last) = tree.connect(&mut graph, &target);
            added.push(last.unwrap());
        }
        (graph, tree, added)
    }

    #[test]
    fn test_subtree_is_subset() {
        let (graph, parent, nodes) = make_parent();
        let sub = Subtree::from_root(&graph, &parent, nodes[1]);
        assert!(sub.node_count() <= parent.node_count());
        for node in sub.tree().nodes() {
            assert!(parent.contains(*node), "subtree node missing from parent");
        }
    }

    #[test]
    fn test_add_node_updates_both() {
        let (mut graph, mut parent, nodes) = make_parent();
        let mut sub = Subtree::from_root(&graph, &parent, nodes[1]);
        let extra = graph.add_node(dvector![3.0, 3.0]).unwrap();
        sub.add_node(&graph, &mut parent, extra);
        assert!(sub.contains(extra));
        assert!(parent.contains(extra));
    }

    #[test]
    fn test_remove_node_updates_both() {
        let (mut graph, mut parent, nodes) = make_parent();
        let leaf = *nodes.last().unwrap();
        let mut sub = Subtree::from_root(&graph, &parent, parent.root());
        sub.remove_node(&mut graph, &mut parent, leaf);
        assert!(!sub.contains(leaf));
        assert!(!parent.contains(leaf));
    }

    #[test]
    fn test_hide_keeps_parent_intact() {
        let (graph, parent, nodes) = make_parent();
        let mut sub = Subtree::from_root(&graph, &parent, parent.root());
        let before = parent.node_count();
        sub.hide_from_subtree(&graph, nodes[1]);
        assert!(!sub.contains(nodes[1]));
        assert_eq!(parent.node_count(), before);
    }

    #[test]
    fn test_ellipsoid_population_filters_far_nodes() {
        let (graph, parent, nodes) = make_parent();
        let far = *nodes.last().unwrap();
        // Ellipsoid around the first segment only; (5, 5) is far outside.
        let sub = Subtree::inside_ellipsoid(
            &graph,
            &parent,
            parent.root(),
            &dvector![0.0, 0.0],
            &dvector![2.0, 0.0],
            3.0,
            &HashSet::new(),
            false,
        );
        assert!(!sub.contains(far));
        assert!(sub.node_count() >= 1);
    }
}
