//! Graph nodes: a configuration plus its connection lists.

use nalgebra::DVector;

use super::ConnId;

/// A vertex of the planning graph.
///
/// A node keeps four connection lists: at most one incoming tree connection
/// (none only for a tree root), outgoing tree connections, and incoming and
/// outgoing net connections. The tree-parent list is a `Vec` because graph
/// surgery (branch purges, re-rooting) goes through transient states with
/// two entries before settling back to one; [`tree_parent`] reads the
/// steady-state value.
///
/// [`tree_parent`]: Node::tree_parent
#[derive(Clone, Debug)]
pub struct Node {
    config: DVector<f64>,
    heuristic: f64,
    pub(crate) parents: Vec<ConnId>,
    pub(crate) children: Vec<ConnId>,
    pub(crate) net_parents: Vec<ConnId>,
    pub(crate) net_children: Vec<ConnId>,
    flags: Vec<bool>,
}

impl Node {
    pub(crate) fn new(config: DVector<f64>) -> Self {
        Self {
            config,
            heuristic: 0.0,
            parents: Vec::new(),
            children: Vec::new(),
            net_parents: Vec::new(),
            net_children: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn config(&self) -> &DVector<f64> {
        &self.config
    }

    pub fn heuristic(&self) -> f64 {
        self.heuristic
    }

    pub fn set_heuristic(&mut self, heuristic: f64) {
        self.heuristic = heuristic;
    }

    /// The incoming tree connection, if any.
    pub fn tree_parent(&self) -> Option<ConnId> {
        debug_assert!(self.parents.len() <= 2);
        self.parents.first().copied()
    }

    pub fn tree_parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn tree_children(&self) -> &[ConnId] {
        &self.children
    }

    pub fn net_parents(&self) -> &[ConnId] {
        &self.net_parents
    }

    pub fn net_children(&self) -> &[ConnId] {
        &self.net_children
    }

    /// All incoming connections, tree first.
    pub fn all_parents(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.parents.iter().chain(self.net_parents.iter()).copied()
    }

    /// All outgoing connections, tree first.
    pub fn all_children(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.children.iter().chain(self.net_children.iter()).copied()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Read an algorithm-specific flag; unset flags read as `default`.
    pub fn flag(&self, idx: usize, default: bool) -> bool {
        self.flags.get(idx).copied().unwrap_or(default)
    }

    /// Set an algorithm-specific flag, growing the flag set as needed.
    pub fn set_flag(&mut self, idx: usize, value: bool) {
        if idx >= self.flags.len() {
            self.flags.resize(idx + 1, false);
        }
        self.flags[idx] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_new_node_is_detached() {
        let node = Node::new(dvector![1.0, 2.0]);
        assert!(node.tree_parent().is_none());
        assert!(node.is_leaf());
        assert_eq!(node.net_parents().len(), 0);
    }

    #[test]
    fn test_flags_grow_on_demand() {
        let mut node = Node::new(dvector![0.0]);
        assert!(!node.flag(5, false));
        assert!(node.flag(5, true));
        node.set_flag(5, true);
        assert!(node.flag(5, false));
        assert!(!node.flag(4, false));
    }
}
