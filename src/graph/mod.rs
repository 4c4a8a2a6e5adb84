//! Knowledge graph substrate: identifiers, edge handles, and the in-memory store.
//!
//! The store ([`store::GraphStore`]) keeps a directed multigraph in `petgraph`
//! with `DashMap` secondary indexes for name and type lookups. Train/test
//! masking flips an `active` flag on edge records instead of deleting edges,
//! so node and edge ids stay stable for the duration of a run.

pub mod store;

use serde::{Deserialize, Serialize};

/// Unique identifier for a graph node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Unique identifier for a graph edge.
///
/// Stable for the duration of a run; instance files reference edges by this id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct EdgeId(pub u64);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Unique identifier for a relation type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Direction of an edge pattern relative to its stored orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dir {
    /// Traverse the edge from its source to its target.
    Forward,
    /// Traverse the edge from its target back to its source.
    Inverse,
}

impl Dir {
    /// The opposite direction.
    pub fn flipped(self) -> Self {
        match self {
            Dir::Forward => Dir::Inverse,
            Dir::Inverse => Dir::Forward,
        }
    }

    pub fn is_inverse(self) -> bool {
        matches!(self, Dir::Inverse)
    }
}

/// A directional (subject, object) pair: an edge endpoint tuple or a
/// candidate prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub sub: NodeId,
    pub obj: NodeId,
}

impl Pair {
    pub fn new(sub: NodeId, obj: NodeId) -> Self {
        Self { sub, obj }
    }

    /// True when subject and object are the same node.
    pub fn is_self_loop(&self) -> bool {
        self.sub == self.obj
    }

    /// The pair with subject and object swapped.
    pub fn flipped(&self) -> Self {
        Self {
            sub: self.obj,
            obj: self.sub,
        }
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.sub.0, self.obj.0)
    }
}

/// A concrete edge of the target relation: the unit of train/test membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance {
    pub edge: EdgeId,
    pub rel: RelId,
    pub sub: NodeId,
    pub obj: NodeId,
}

impl Instance {
    /// The (subject, object) pair of this instance.
    pub fn to_pair(&self) -> Pair {
        Pair::new(self.sub, self.obj)
    }
}

/// A lightweight handle to a stored edge, in stored orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    pub edge: EdgeId,
    pub rel: RelId,
    pub source: NodeId,
    pub target: NodeId,
}

impl EdgeRef {
    /// The endpoint opposite to `node`.
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }

    /// Direction of this edge when stepped onto from `node`.
    pub fn dir_from(&self, node: NodeId) -> Dir {
        if self.source == node {
            Dir::Forward
        } else {
            Dir::Inverse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_self_loop_and_flip() {
        let p = Pair::new(NodeId(1), NodeId(2));
        assert!(!p.is_self_loop());
        assert_eq!(p.flipped(), Pair::new(NodeId(2), NodeId(1)));
        assert!(Pair::new(NodeId(3), NodeId(3)).is_self_loop());
    }

    #[test]
    fn edge_ref_orientation() {
        let e = EdgeRef {
            edge: EdgeId(0),
            rel: RelId(0),
            source: NodeId(1),
            target: NodeId(2),
        };
        assert_eq!(e.other(NodeId(1)), NodeId(2));
        assert_eq!(e.other(NodeId(2)), NodeId(1));
        assert_eq!(e.dir_from(NodeId(1)), Dir::Forward);
        assert_eq!(e.dir_from(NodeId(2)), Dir::Inverse);
    }

    #[test]
    fn dir_flip() {
        assert_eq!(Dir::Forward.flipped(), Dir::Inverse);
        assert!(Dir::Inverse.is_inverse());
    }
}
