//! Rule patterns: an immutable head atom plus an ordered body-atom path.
//!
//! A pattern is built once, from a concrete sampled path, by `abstracted()`:
//! the structural invariants (`closed`, `from_subject`) are computed from the
//! concrete endpoints before the terms are renamed to canonical variables.
//! Specialization never mutates a pattern; it returns a new one with the
//! chosen endpoints bound to constants.

use crate::error::RuleError;
use crate::graph::NodeId;

use super::atom::{Atom, Term};

/// An immutable rule pattern: `head <- body`.
///
/// Two patterns are equal iff their canonical text forms are equal, so
/// syntactically identical patterns reached through different groundings
/// collapse to one rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    head: Atom,
    body: Vec<Atom>,
    closed: bool,
    from_subject: bool,
}

impl Pattern {
    /// Abstract a concrete (head, body) pair into a canonical open pattern.
    ///
    /// All atoms must carry constant terms: the invariants are read off the
    /// concrete node ids, then the terms are renamed: head endpoints to
    /// `X`/`Y`, body joints to `V0..Vn`, with the head-connected endpoints
    /// rewritten to match.
    pub fn abstracted(head: Atom, body: Vec<Atom>) -> Result<Self, RuleError> {
        if body.is_empty() {
            return Err(RuleError::EmptyBody);
        }

        let last_obj = body.last().and_then(Atom::object_id);
        let closed = (head.subject_id().is_some() && head.subject_id() == last_obj)
            || (head.object_id().is_some() && head.object_id() == last_obj);
        let from_subject =
            head.subject_id().is_some() && head.subject_id() == body[0].subject_id();

        let mut head = head;
        head.subject = Term::var("X");
        head.object = Term::var("Y");

        let mut body = body;
        for (i, atom) in body.iter_mut().enumerate() {
            atom.subject = Term::var(format!("V{i}"));
            atom.object = Term::var(format!("V{}", i + 1));
        }

        let first = body.first_mut().expect("body checked non-empty");
        first.subject = Term::var(if from_subject { "X" } else { "Y" });

        if closed {
            let last = body.last_mut().expect("body checked non-empty");
            last.object = Term::var(if from_subject { "Y" } else { "X" });
        }

        Ok(Self {
            head,
            body,
            closed,
            from_subject,
        })
    }

    /// Bind the head's free endpoint to a constant. New pattern, no mutation.
    pub fn specialize_head(&self, anchor: NodeId, name: &str) -> Self {
        assert!(!self.closed, "closed patterns cannot be specialized");
        let mut result = self.clone();
        let term = Term::constant(anchor, name);
        if self.from_subject {
            result.head.object = term;
        } else {
            result.head.subject = term;
        }
        result
    }

    /// Bind the last body atom's far endpoint to a constant.
    pub fn specialize_tail(&self, tail: NodeId, name: &str) -> Self {
        assert!(!self.closed, "closed patterns cannot be specialized");
        let mut result = self.clone();
        let last = result.body.last_mut().expect("patterns have non-empty bodies");
        last.object = Term::constant(tail, name);
        result
    }

    /// Bind both the head endpoint and the tail.
    pub fn specialize_both(
        &self,
        anchor: NodeId,
        anchor_name: &str,
        tail: NodeId,
        tail_name: &str,
    ) -> Self {
        self.specialize_head(anchor, anchor_name)
            .specialize_tail(tail, tail_name)
    }

    pub fn head(&self) -> &Atom {
        &self.head
    }

    pub fn body(&self) -> &[Atom] {
        &self.body
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// True iff the body path returns to the head's non-anchored endpoint.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True iff the head's subject is the body's starting endpoint.
    pub fn from_subject(&self) -> bool {
        self.from_subject
    }

    /// The bound head anchoring, if this pattern is head- or both-anchored.
    pub fn anchor_constant(&self) -> Option<NodeId> {
        if self.from_subject {
            self.head.object_id()
        } else {
            self.head.subject_id()
        }
    }

    /// The bound tail, if this pattern is tail- or both-anchored.
    pub fn tail_constant(&self) -> Option<NodeId> {
        self.body.last().and_then(Atom::object_id)
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body: Vec<String> = self.body.iter().map(Atom::in_rule_string).collect();
        write!(f, "{} <- {}", self.head, body.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dir, RelId};

    fn concrete(rel: u64, pred: &str, dir: Dir, sub: u64, obj: u64) -> Atom {
        Atom::new(
            RelId(rel),
            pred,
            dir,
            Term::constant(NodeId(sub), format!("e{sub}")),
            Term::constant(NodeId(obj), format!("e{obj}")),
        )
    }

    fn head(sub: u64, obj: u64) -> Atom {
        concrete(0, "r", Dir::Forward, sub, obj)
    }

    #[test]
    fn closed_two_hop_is_detected() {
        // r(X,Y) <- p(X,V0), q(V0,Y)
        let p = Pattern::abstracted(
            head(1, 2),
            vec![
                concrete(1, "p", Dir::Forward, 1, 5),
                concrete(2, "q", Dir::Forward, 5, 2),
            ],
        )
        .unwrap();
        assert!(p.is_closed());
        assert!(p.from_subject());
        assert_eq!(p.to_string(), "r(X,Y) <- p(X,V1), q(V1,Y)");
    }

    #[test]
    fn open_two_hop_is_detected() {
        // Body wanders off to a node that is not a head endpoint.
        let p = Pattern::abstracted(
            head(1, 2),
            vec![
                concrete(1, "p", Dir::Forward, 1, 5),
                concrete(2, "q", Dir::Forward, 5, 6),
            ],
        )
        .unwrap();
        assert!(!p.is_closed());
        assert_eq!(p.to_string(), "r(X,Y) <- p(X,V1), q(V1,V2)");
    }

    #[test]
    fn from_object_paths_start_at_y() {
        // Path sampled from the instance's object endpoint.
        let p = Pattern::abstracted(head(1, 2), vec![concrete(1, "p", Dir::Forward, 2, 6)])
            .unwrap();
        assert!(!p.from_subject());
        assert_eq!(p.to_string(), "r(X,Y) <- p(Y,V1)");
    }

    #[test]
    fn inverse_body_atom_renders_flipped() {
        let p = Pattern::abstracted(head(1, 2), vec![concrete(1, "p", Dir::Inverse, 1, 6)])
            .unwrap();
        assert_eq!(p.to_string(), "r(X,Y) <- p(V1,X)");
    }

    #[test]
    fn inverse_single_hop_closes() {
        // r(X,Y) <- _r(X,Y): the inverse edge of the target relation.
        let p = Pattern::abstracted(head(1, 2), vec![concrete(0, "r", Dir::Inverse, 1, 2)])
            .unwrap();
        assert!(p.is_closed());
        assert_eq!(p.to_string(), "r(X,Y) <- r(Y,X)");
    }

    #[test]
    fn identical_groundings_collapse() {
        use std::collections::HashSet;
        let a = Pattern::abstracted(
            head(1, 2),
            vec![
                concrete(1, "p", Dir::Forward, 1, 5),
                concrete(2, "q", Dir::Forward, 5, 2),
            ],
        )
        .unwrap();
        // Same shape through entirely different nodes.
        let b = Pattern::abstracted(
            head(7, 8),
            vec![
                concrete(1, "p", Dir::Forward, 7, 9),
                concrete(2, "q", Dir::Forward, 9, 8),
            ],
        )
        .unwrap();
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn specialization_binds_without_mutation() {
        let open = Pattern::abstracted(
            head(1, 2),
            vec![
                concrete(1, "p", Dir::Forward, 1, 5),
                concrete(2, "q", Dir::Forward, 5, 6),
            ],
        )
        .unwrap();

        let anchored = open.specialize_head(NodeId(42), "rome");
        assert_eq!(anchored.anchor_constant(), Some(NodeId(42)));
        assert_eq!(anchored.to_string(), "r(X,rome) <- p(X,V1), q(V1,V2)");
        // The base pattern is untouched.
        assert!(open.anchor_constant().is_none());

        let tailed = open.specialize_tail(NodeId(43), "paris");
        assert_eq!(tailed.tail_constant(), Some(NodeId(43)));
        assert_eq!(tailed.to_string(), "r(X,Y) <- p(X,V1), q(V1,paris)");

        let both = open.specialize_both(NodeId(42), "rome", NodeId(43), "paris");
        assert_eq!(both.anchor_constant(), Some(NodeId(42)));
        assert_eq!(both.tail_constant(), Some(NodeId(43)));
    }

    #[test]
    #[should_panic(expected = "closed patterns cannot be specialized")]
    fn specializing_closed_pattern_panics() {
        let closed = Pattern::abstracted(
            head(1, 2),
            vec![
                concrete(1, "p", Dir::Forward, 1, 5),
                concrete(2, "q", Dir::Forward, 5, 2),
            ],
        )
        .unwrap();
        let _ = closed.specialize_head(NodeId(42), "rome");
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(Pattern::abstracted(head(1, 2), vec![]).is_err());
    }
}
