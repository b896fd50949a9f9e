//! Directed connections between graph nodes.

use crate::error::{MargaError, Result};

use super::NodeId;

/// Reserved flag index: attached to both endpoints.
pub const FLAG_VALID: usize = 0;
/// Reserved flag index: the connection is a net (alternative-parent) edge.
pub const FLAG_NET: usize = 1;
/// Reserved flag index: segment re-checked since the last scene change.
pub const FLAG_RECENTLY_CHECKED: usize = 2;
/// First index available to algorithm-specific flags.
pub const RESERVED_FLAGS: usize = 3;

/// Edge role inside the planning graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnKind {
    /// Defines the unique parent of its child.
    Tree,
    /// An alternative parent; the child must also hold a tree parent.
    Net,
}

/// A directed edge with cached cost and length.
///
/// A connection is shared between its two endpoints: it only counts as part
/// of the graph while `valid`, and removal detaches it from both endpoint
/// lists. Detached connections are inert and may be re-attached.
///
/// The three reserved flags live in named fields; user-registered flags
/// occupy indices `>= RESERVED_FLAGS` in a growable tail, so algorithms
/// can attach markers without touching the reserved slots.
#[derive(Clone, Debug)]
pub struct Connection {
    pub(crate) parent: NodeId,
    pub(crate) child: NodeId,
    pub(crate) kind: ConnKind,
    pub(crate) valid: bool,
    pub(crate) recently_checked: bool,
    pub(crate) cost: f64,
    pub(crate) norm: f64,
    pub(crate) stamp: u64,
    user_flags: Vec<bool>,
}

impl Connection {
    pub(crate) fn new(parent: NodeId, child: NodeId, kind: ConnKind, norm: f64) -> Self {
        Self {
            parent,
            child,
            kind,
            valid: false,
            recently_checked: false,
            cost: 0.0,
            norm,
            stamp: 0,
            user_flags: Vec::new(),
        }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn child(&self) -> NodeId {
        self.child
    }

    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    pub fn is_net(&self) -> bool {
        self.kind == ConnKind::Net
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_recently_checked(&self) -> bool {
        self.recently_checked
    }

    pub fn set_recently_checked(&mut self, checked: bool) {
        self.recently_checked = checked;
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Scaled Euclidean length of the segment, cached at creation.
    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// Monotonic tick of the last cost update.
    pub fn cost_stamp(&self) -> u64 {
        self.stamp
    }

    /// Read a flag by table index. Reserved indices map to the named
    /// fields; unset user flags read as `default`.
    pub fn flag(&self, idx: usize, default: bool) -> bool {
        match idx {
            FLAG_VALID => self.valid,
            FLAG_NET => self.is_net(),
            FLAG_RECENTLY_CHECKED => self.recently_checked,
            _ => self
                .user_flags
                .get(idx - RESERVED_FLAGS)
                .copied()
                .unwrap_or(default),
        }
    }

    /// Set a user flag. Reserved indices cannot be written through the
    /// table; use the dedicated operations instead.
    pub fn set_flag(&mut self, idx: usize, value: bool) -> Result<()> {
        if idx < RESERVED_FLAGS {
            return Err(MargaError::Invariant(format!(
                "flag {idx} is reserved and cannot be overwritten"
            )));
        }
        let slot = idx - RESERVED_FLAGS;
        if slot > self.user_flags.len() {
            return Err(MargaError::Invariant(format!(
                "flag {idx} does not exist yet; register flags contiguously"
            )));
        }
        if slot == self.user_flags.len() {
            self.user_flags.push(value);
        } else {
            self.user_flags[slot] = value;
        }
        Ok(())
    }

    /// Register a new user flag, returning its table index.
    pub fn register_flag(&mut self, value: bool) -> usize {
        self.user_flags.push(value);
        RESERVED_FLAGS + self.user_flags.len() - 1
    }

    /// Number of reserved flag slots; user flags start here.
    pub fn reserved_flags() -> usize {
        RESERVED_FLAGS
    }
}
