//! The planning graph: an arena of nodes and directed connections with
//! mixed tree and net semantics.
//!
//! Nodes and connections live in a [`Graph`] arena and are addressed by
//! integer handles ([`NodeId`], [`ConnId`]). Removing a connection unlinks
//! it from both endpoints and clears its `valid` flag; the slot itself is a
//! tombstone so stale handles never alias a different edge. Trees, subtrees,
//! paths and the net search are views over one shared arena.

mod connection;
mod kdtree;
mod net;
mod node;
mod path;
mod subtree;
mod tree;

pub use connection::{ConnKind, Connection, FLAG_NET, FLAG_RECENTLY_CHECKED, FLAG_VALID, RESERVED_FLAGS};
pub use kdtree::KdIndex;
pub use net::{purge_from_here, purge_successors, NetSearch, PurgeResult, SolutionMap};
pub use node::Node;
pub use path::{Path, PathRecord};
pub use subtree::Subtree;
pub use tree::{ExtendOutcome, RewireOutcome, Tree};

use nalgebra::DVector;

use crate::collision::CollisionChecker;
use crate::core::ConfigSpace;
use crate::error::{MargaError, Result};

/// Handle of a node in the graph arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Handle of a connection in the graph arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) usize);

/// Result of projecting a point onto a connection segment.
#[derive(Clone, Debug)]
pub struct Projection {
    /// Foot of the orthogonal projection, in raw coordinates.
    pub point: DVector<f64>,
    /// Scaled distance from the query point to the foot.
    pub distance: f64,
    /// Whether the foot lies within the segment `[parent, child]`.
    pub in_segment: bool,
}

/// Arena holding every node and connection of one planning problem.
pub struct Graph {
    space: ConfigSpace,
    nodes: Vec<Option<Node>>,
    conns: Vec<Connection>,
    cost_clock: u64,
}

impl Graph {
    pub fn new(space: ConfigSpace) -> Self {
        Self {
            space,
            nodes: Vec::new(),
            conns: Vec::new(),
            cost_clock: 0,
        }
    }

    pub fn space(&self) -> &ConfigSpace {
        &self.space
    }

    pub fn dimension(&self) -> usize {
        self.space.dimension()
    }

    /// Current value of the monotonic cost clock.
    pub fn now(&self) -> u64 {
        self.cost_clock
    }

    /// Advance the cost clock, e.g. after a scene change. Cached costs
    /// stamped before this tick should no longer be trusted.
    pub fn tick(&mut self) -> u64 {
        self.cost_clock += 1;
        self.cost_clock
    }

    // ─────────────────────────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a node for the given configuration.
    pub fn add_node(&mut self, config: DVector<f64>) -> Result<NodeId> {
        self.space.check_dimension(&config)?;
        self.nodes.push(Some(Node::new(config)));
        Ok(NodeId(self.nodes.len() - 1))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale node handle")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale node handle")
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).map(|n| n.is_some()).unwrap_or(false)
    }

    pub fn config(&self, id: NodeId) -> &DVector<f64> {
        self.node(id).config()
    }

    /// The tree parent node, if any.
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).tree_parent().map(|c| self.conn(c).parent)
    }

    /// Tree child nodes.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .tree_children()
            .iter()
            .map(|c| self.conn(*c).child)
            .collect()
    }

    /// Remove every connection touching the node, leaving it detached.
    pub fn disconnect(&mut self, id: NodeId) {
        let node = self.node(id);
        let touching: Vec<ConnId> = node.all_parents().chain(node.all_children()).collect();
        for conn in touching {
            self.remove_connection(conn);
        }
    }

    /// Drop a detached node from the arena. The handle becomes stale.
    pub fn release_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id);
        if node.all_parents().next().is_some() || node.all_children().next().is_some() {
            return Err(MargaError::Invariant(
                "cannot release a node that still has connections".to_string(),
            ));
        }
        self.nodes[id.0] = None;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────

    /// Create a detached tree connection from `parent` to `child`.
    pub fn connect(&mut self, parent: NodeId, child: NodeId) -> ConnId {
        self.make_connection(parent, child, ConnKind::Tree)
    }

    /// Create a detached net connection from `parent` to `child`.
    pub fn connect_net(&mut self, parent: NodeId, child: NodeId) -> ConnId {
        self.make_connection(parent, child, ConnKind::Net)
    }

    fn make_connection(&mut self, parent: NodeId, child: NodeId, kind: ConnKind) -> ConnId {
        let norm = self.space.distance(self.config(parent), self.config(child));
        self.conns.push(Connection::new(parent, child, kind, norm));
        ConnId(self.conns.len() - 1)
    }

    pub fn conn(&self, id: ConnId) -> &Connection {
        &self.conns[id.0]
    }

    pub fn conn_mut(&mut self, id: ConnId) -> &mut Connection {
        &mut self.conns[id.0]
    }

    /// Attach a detached connection to both endpoint lists.
    pub fn add_connection(&mut self, id: ConnId) -> Result<()> {
        if self.conn(id).valid {
            return Err(MargaError::Invariant(
                "connection is already attached".to_string(),
            ));
        }
        let (parent, child, kind) = {
            let c = self.conn(id);
            (c.parent, c.child, c.kind)
        };
        match kind {
            ConnKind::Tree => {
                self.node_mut(parent).children.push(id);
                self.node_mut(child).parents.push(id);
            }
            ConnKind::Net => {
                self.node_mut(parent).net_children.push(id);
                self.node_mut(child).net_parents.push(id);
            }
        }
        self.conn_mut(id).valid = true;
        Ok(())
    }

    /// Attach with the stricter role preconditions: a tree edge requires a
    /// child with no tree parent yet; a net edge requires a child that
    /// already has one.
    pub fn add_connection_as(&mut self, id: ConnId, kind: ConnKind) -> Result<()> {
        let child = self.conn(id).child;
        let tree_parents = self.node(child).tree_parent_count();
        match kind {
            ConnKind::Tree if tree_parents != 0 => {
                return Err(MargaError::Invariant(
                    "child already has a tree parent".to_string(),
                ));
            }
            ConnKind::Net if tree_parents == 0 => {
                return Err(MargaError::Invariant(
                    "net connection requires a child with a tree parent".to_string(),
                ));
            }
            _ => {}
        }
        self.conn_mut(id).kind = kind;
        self.add_connection(id)
    }

    /// Detach a connection from both endpoints. No-op when already invalid.
    pub fn remove_connection(&mut self, id: ConnId) {
        if !self.conn(id).valid {
            return;
        }
        let (parent, child, kind) = {
            let c = self.conn(id);
            (c.parent, c.child, c.kind)
        };
        match kind {
            ConnKind::Tree => {
                self.node_mut(parent).children.retain(|c| *c != id);
                self.node_mut(child).parents.retain(|c| *c != id);
            }
            ConnKind::Net => {
                self.node_mut(parent).net_children.retain(|c| *c != id);
                self.node_mut(child).net_parents.retain(|c| *c != id);
            }
        }
        self.conn_mut(id).valid = false;
    }

    /// Detach, swap parent and child, and re-attach with the same kind.
    pub fn flip_connection(&mut self, id: ConnId) -> Result<()> {
        self.remove_connection(id);
        {
            let c = self.conn_mut(id);
            std::mem::swap(&mut c.parent, &mut c.child);
        }
        self.add_connection(id)
    }

    /// Turn a net connection into a tree connection. Returns `false` when
    /// the connection is already a tree edge.
    pub fn convert_to_tree(&mut self, id: ConnId) -> Result<bool> {
        if !self.conn(id).is_net() {
            return Ok(false);
        }
        self.remove_connection(id);
        self.conn_mut(id).kind = ConnKind::Tree;
        self.add_connection(id)?;
        Ok(true)
    }

    /// Turn a tree connection into a net connection. Returns `false` when
    /// the connection is already a net edge. Fails when the child would be
    /// left without any tree parent.
    pub fn convert_to_net(&mut self, id: ConnId) -> Result<bool> {
        if self.conn(id).is_net() {
            return Ok(false);
        }
        let child = self.conn(id).child;
        if self.node(child).tree_parent_count() <= 1 {
            return Err(MargaError::Invariant(
                "converting the only tree parent to net would orphan the child".to_string(),
            ));
        }
        self.remove_connection(id);
        self.conn_mut(id).kind = ConnKind::Net;
        self.add_connection(id)?;
        Ok(true)
    }

    /// Set a connection's cost and stamp it with the cost clock. Setting
    /// the value it already holds is a no-op.
    pub fn set_cost(&mut self, id: ConnId, cost: f64) {
        if self.conn(id).cost == cost {
            return;
        }
        self.cost_clock += 1;
        let stamp = self.cost_clock;
        let c = self.conn_mut(id);
        c.cost = cost;
        c.stamp = stamp;
    }

    /// Recompute the cached norm, e.g. after the metric scaling changed.
    pub fn refresh_norm(&mut self, id: ConnId) {
        let (parent, child) = {
            let c = self.conn(id);
            (c.parent, c.child)
        };
        let norm = self.space.distance(self.config(parent), self.config(child));
        self.conn_mut(id).norm = norm;
    }

    /// Check a connection's segment and stamp it recently-checked.
    pub fn check_connection(&mut self, checker: &dyn CollisionChecker, id: ConnId) -> bool {
        let (parent, child) = {
            let c = self.conn(id);
            (c.parent, c.child)
        };
        let free = {
            let a = self.config(parent).clone();
            let b = self.config(child).clone();
            checker.check_segment(&a, &b)
        };
        self.conn_mut(id).set_recently_checked(true);
        free
    }

    // ─────────────────────────────────────────────────────────────────────
    // Geometry on connections
    // ─────────────────────────────────────────────────────────────────────

    /// Orthogonally project a point onto the scaled segment of a
    /// connection.
    pub fn project_on_connection(&self, id: ConnId, point: &DVector<f64>) -> Projection {
        let c = self.conn(id);
        let parent = self.space.to_scaled(self.config(c.parent));
        let child = self.space.to_scaled(self.config(c.child));
        let p = self.space.to_scaled(point);

        let segment = &child - &parent;
        let length = segment.norm();
        if length <= f64::EPSILON {
            let distance = (&p - &parent).norm();
            return Projection {
                point: self.space.from_scaled(&parent),
                distance,
                in_segment: distance <= f64::EPSILON,
            };
        }

        let direction = segment / length;
        let s = (&p - &parent).dot(&direction);
        let foot = &parent + direction * s;
        let distance = (&p - &foot).norm();

        Projection {
            point: self.space.from_scaled(&foot),
            distance,
            in_segment: (0.0..=length).contains(&s),
        }
    }

    /// Compare the directions of two connections: parallel when
    /// `|v₁·v₂|` equals `‖v₁‖·‖v₂‖` within `tol` (scaled space).
    pub fn are_parallel(&self, a: ConnId, b: ConnId, tol: f64) -> bool {
        let va = {
            let c = self.conn(a);
            self.space.to_scaled(self.config(c.child)) - self.space.to_scaled(self.config(c.parent))
        };
        let vb = {
            let c = self.conn(b);
            self.space.to_scaled(self.config(c.child)) - self.space.to_scaled(self.config(c.parent))
        };
        let na = va.norm();
        let nb = vb.norm();
        if na == 0.0 || nb == 0.0 {
            return false;
        }
        (va.dot(&vb).abs() - na * nb).abs() < tol
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Iterate over live node handles.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| NodeId(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn make_graph() -> Graph {
        let space = ConfigSpace::unscaled(dvector![-10.0, -10.0], dvector![10.0, 10.0]).unwrap();
        Graph::new(space)
    }

    fn make_pair(graph: &mut Graph) -> (NodeId, NodeId) {
        let a = graph.add_node(dvector![0.0, 0.0]).unwrap();
        let b = graph.add_node(dvector![1.0, 0.0]).unwrap();
        (a, b)
    }

    #[test]
    fn test_add_attaches_both_endpoints() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        assert!(!graph.conn(conn).is_valid());
        graph.add_connection(conn).unwrap();
        assert!(graph.conn(conn).is_valid());
        assert_eq!(graph.node(a).tree_children(), &[conn]);
        assert_eq!(graph.node(b).tree_parent(), Some(conn));
    }

    #[test]
    fn test_double_add_rejected() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        graph.add_connection(conn).unwrap();
        assert!(graph.add_connection(conn).is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        graph.add_connection(conn).unwrap();
        graph.remove_connection(conn);
        assert!(!graph.conn(conn).is_valid());
        assert!(graph.node(b).tree_parent().is_none());
        // Second removal is a no-op.
        graph.remove_connection(conn);
        assert!(!graph.conn(conn).is_valid());
    }

    #[test]
    fn test_add_as_tree_requires_orphan_child() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let c = graph.add_node(dvector![2.0, 0.0]).unwrap();
        let first = graph.connect(a, b);
        graph.add_connection_as(first, ConnKind::Tree).unwrap();
        let second = graph.connect(c, b);
        assert!(graph.add_connection_as(second, ConnKind::Tree).is_err());
        // But a net edge onto the same child is fine.
        assert!(graph.add_connection_as(second, ConnKind::Net).is_ok());
        assert_eq!(graph.node(b).net_parents(), &[second]);
    }

    #[test]
    fn test_add_as_net_requires_tree_parent() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        assert!(graph.add_connection_as(conn, ConnKind::Net).is_err());
    }

    #[test]
    fn test_flip_swaps_direction() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        graph.add_connection(conn).unwrap();
        graph.flip_connection(conn).unwrap();
        assert_eq!(graph.conn(conn).parent(), b);
        assert_eq!(graph.conn(conn).child(), a);
        assert_eq!(graph.node(a).tree_parent(), Some(conn));
        assert!(graph.node(b).tree_parent().is_none());
    }

    #[test]
    fn test_convert_only_tree_parent_to_net_fails() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        graph.add_connection(conn).unwrap();
        assert!(graph.convert_to_net(conn).is_err());
    }

    #[test]
    fn test_convert_net_round_trip() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let c = graph.add_node(dvector![0.0, 1.0]).unwrap();
        let tree = graph.connect(a, b);
        graph.add_connection(tree).unwrap();
        let net = graph.connect_net(c, b);
        graph.add_connection(net).unwrap();

        // Already net: idempotent.
        assert!(!graph.convert_to_net(net).unwrap());
        // Net -> tree, then retire the old tree parent (branch-purge order).
        assert!(graph.convert_to_tree(net).unwrap());
        graph.remove_connection(tree);
        assert_eq!(graph.node(b).tree_parent(), Some(net));
        assert_eq!(graph.node(b).tree_parent_count(), 1);
        assert!(graph.node(b).net_parents().is_empty());
    }

    #[test]
    fn test_set_cost_stamps_clock() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        let before = graph.now();
        graph.set_cost(conn, 2.5);
        assert_eq!(graph.conn(conn).cost(), 2.5);
        assert!(graph.conn(conn).cost_stamp() > before);
    }

    #[test]
    fn test_projection_inside_segment() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        let p = dvector![0.5, 1.0];
        let proj = graph.project_on_connection(conn, &p);
        assert!(proj.in_segment);
        assert_relative_eq!(proj.distance, 1.0, epsilon = 1e-12);
        assert_relative_eq!(proj.point[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(proj.point[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_outside_segment() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        let proj = graph.project_on_connection(conn, &dvector![2.0, 1.0]);
        assert!(!proj.in_segment);
        // distance == ‖p − foot‖ still holds
        assert_relative_eq!(proj.distance, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_detection() {
        let mut graph = make_graph();
        let a = graph.add_node(dvector![0.0, 0.0]).unwrap();
        let b = graph.add_node(dvector![1.0, 0.0]).unwrap();
        let c = graph.add_node(dvector![0.0, 1.0]).unwrap();
        let d = graph.add_node(dvector![2.0, 1.0]).unwrap();
        let e = graph.add_node(dvector![1.0, 1.0]).unwrap();
        let ab = graph.connect(a, b);
        let cd = graph.connect(c, d); // parallel, opposite scale
        let ce = graph.connect(c, e); // parallel to ab as well
        let ae = graph.connect(a, e); // diagonal
        assert!(graph.are_parallel(ab, cd, 1e-6));
        assert!(graph.are_parallel(ab, ce, 1e-6));
        assert!(!graph.are_parallel(ab, ae, 1e-6));
    }

    #[test]
    fn test_disconnect_and_release() {
        let mut graph = make_graph();
        let (a, b) = make_pair(&mut graph);
        let conn = graph.connect(a, b);
        graph.add_connection(conn).unwrap();
        assert!(graph.release_node(b).is_err());
        graph.disconnect(b);
        assert!(graph.release_node(b).is_ok());
        assert!(!graph.is_alive(b));
        assert!(graph.is_alive(a));
        assert_eq!(graph.node_count(), 1);
    }
}
