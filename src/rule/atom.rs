//! Atoms: single edge-pattern terms in a rule.
//!
//! An atom pairs a relation type and direction with subject/object terms.
//! Terms are either free variables ("X"/"Y" for head endpoints, "V0..Vn" for
//! body joints) or constants bound to graph nodes. An inverse atom renders
//! with a `_`-prefixed predicate so that the atom sequence of a rule body
//! reads in traversal order.

use crate::error::GraphError;
use crate::graph::store::GraphStore;
use crate::graph::{Dir, EdgeRef, Instance, NodeId, RelId};

/// A term in an atom: a free variable or a bound constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A free variable, e.g. `X`, `Y`, `V0`.
    Var(String),
    /// A constant bound to a graph node.
    Const { id: NodeId, name: String },
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn constant(id: NodeId, name: impl Into<String>) -> Self {
        Term::Const {
            id,
            name: name.into(),
        }
    }

    /// The bound node id, if this term is a constant.
    pub fn constant_id(&self) -> Option<NodeId> {
        match self {
            Term::Const { id, .. } => Some(*id),
            Term::Var(_) => None,
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{name}"),
            Term::Const { name, .. } => write!(f, "{name}"),
        }
    }
}

/// One edge pattern: relation type, direction, and endpoint terms.
///
/// The subject is always the near endpoint in traversal order; an edge walked
/// against its stored orientation becomes an inverse atom rather than a
/// reordered one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub rel: RelId,
    pub predicate: String,
    pub dir: Dir,
    pub subject: Term,
    pub object: Term,
}

impl Atom {
    pub fn new(rel: RelId, predicate: impl Into<String>, dir: Dir, subject: Term, object: Term) -> Self {
        Self {
            rel,
            predicate: predicate.into(),
            dir,
            subject,
            object,
        }
    }

    /// The head atom of a rule mined for `instance`'s relation.
    pub fn head_of(store: &GraphStore, instance: &Instance) -> Result<Self, GraphError> {
        Ok(Self {
            rel: instance.rel,
            predicate: store.rel_name(instance.rel)?,
            dir: Dir::Forward,
            subject: Term::constant(instance.sub, store.node_name(instance.sub)?),
            object: Term::constant(instance.obj, store.node_name(instance.obj)?),
        })
    }

    /// A body atom for one sampled step: the edge `edge` entered from `near`.
    pub fn from_step(store: &GraphStore, near: NodeId, edge: &EdgeRef) -> Result<Self, GraphError> {
        let far = edge.other(near);
        Ok(Self {
            rel: edge.rel,
            predicate: store.rel_name(edge.rel)?,
            dir: edge.dir_from(near),
            subject: Term::constant(near, store.node_name(near)?),
            object: Term::constant(far, store.node_name(far)?),
        })
    }

    pub fn is_inverse(&self) -> bool {
        self.dir.is_inverse()
    }

    /// The predicate with a `_` prefix when the atom is inverse.
    pub fn prefixed_predicate(&self) -> String {
        if self.is_inverse() {
            format!("_{}", self.predicate)
        } else {
            self.predicate.clone()
        }
    }

    /// Rendering used inside a rule body: inverse atoms flip their terms back
    /// to the stored edge orientation instead of prefixing the predicate.
    pub fn in_rule_string(&self) -> String {
        if self.is_inverse() {
            format!("{}({},{})", self.predicate, self.object, self.subject)
        } else {
            format!("{}({},{})", self.predicate, self.subject, self.object)
        }
    }

    /// The bound subject node, if any.
    pub fn subject_id(&self) -> Option<NodeId> {
        self.subject.constant_id()
    }

    /// The bound object node, if any.
    pub fn object_id(&self) -> Option<NodeId> {
        self.object.constant_id()
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({},{})",
            self.prefixed_predicate(),
            self.subject,
            self.object
        )
    }
}
