//! Rules: tagged variants over immutable patterns.
//!
//! - [`AbstractRule`]: an unanchored pattern, open or closed, holding the
//!   anchored children produced during instantiation in three buckets.
//! - [`InstantiatedRule`]: a pattern with one or both free endpoints bound
//!   to a constant, tagged by [`AnchorKind`].
//! - [`SupportRule`]: a shared handle used by the candidate map and the
//!   persisted rule files, covering both applicable shapes.
//!
//! Kind tags in persisted files: `CAR`/`OAR` for closed/open abstract rules,
//! `HAR`/`TAR`/`BAR` for head-/tail-/both-anchored instantiated rules.

pub mod atom;
pub mod pattern;
pub mod stats;

use std::sync::Arc;

pub use atom::{Atom, Term};
pub use pattern::Pattern;
pub use stats::RuleStats;

use crate::graph::NodeId;

/// Which endpoints of an open pattern an instantiated rule binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorKind {
    /// The head's free endpoint is bound.
    Head,
    /// The last body atom's far endpoint is bound.
    Tail,
    /// Both of the above.
    Both,
}

impl AnchorKind {
    pub fn tag(self) -> &'static str {
        match self {
            AnchorKind::Head => "HAR",
            AnchorKind::Tail => "TAR",
            AnchorKind::Both => "BAR",
        }
    }
}

/// An open pattern with one or both free endpoints bound to a constant.
#[derive(Debug, Clone)]
pub struct InstantiatedRule {
    pub pattern: Pattern,
    pub kind: AnchorKind,
    pub stats: RuleStats,
}

impl InstantiatedRule {
    pub fn head_anchored(base: &Pattern, anchor: NodeId, name: &str) -> Self {
        Self {
            pattern: base.specialize_head(anchor, name),
            kind: AnchorKind::Head,
            stats: RuleStats::default(),
        }
    }

    pub fn tail_anchored(base: &Pattern, tail: NodeId, name: &str) -> Self {
        Self {
            pattern: base.specialize_tail(tail, name),
            kind: AnchorKind::Tail,
            stats: RuleStats::default(),
        }
    }

    pub fn both_anchored(
        base: &Pattern,
        anchor: NodeId,
        anchor_name: &str,
        tail: NodeId,
        tail_name: &str,
    ) -> Self {
        Self {
            pattern: base.specialize_both(anchor, anchor_name, tail, tail_name),
            kind: AnchorKind::Both,
            stats: RuleStats::default(),
        }
    }

    /// The bound head anchoring, if any.
    pub fn anchor(&self) -> Option<NodeId> {
        self.pattern.anchor_constant()
    }

    /// The bound tail, if any.
    pub fn tail(&self) -> Option<NodeId> {
        self.pattern.tail_constant()
    }
}

impl std::fmt::Display for InstantiatedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}", self.kind.tag(), self.pattern)
    }
}

/// An unanchored rule pattern with its specialized children.
#[derive(Debug, Clone)]
pub struct AbstractRule {
    pub pattern: Pattern,
    pub head_rules: Vec<Arc<InstantiatedRule>>,
    pub tail_rules: Vec<Arc<InstantiatedRule>>,
    pub both_rules: Vec<Arc<InstantiatedRule>>,
    pub stats: RuleStats,
}

impl AbstractRule {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            head_rules: Vec::new(),
            tail_rules: Vec::new(),
            both_rules: Vec::new(),
            stats: RuleStats::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pattern.is_closed()
    }

    pub fn tag(&self) -> &'static str {
        if self.is_closed() { "CAR" } else { "OAR" }
    }

    /// All qualified children across the three buckets.
    pub fn children(&self) -> impl Iterator<Item = &Arc<InstantiatedRule>> {
        self.head_rules
            .iter()
            .chain(self.tail_rules.iter())
            .chain(self.both_rules.iter())
    }
}

impl std::fmt::Display for AbstractRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}", self.tag(), self.pattern)
    }
}

/// A shared handle to a rule that can support predictions: a closed abstract
/// rule or an anchored instantiated rule.
#[derive(Debug, Clone)]
pub enum SupportRule {
    Closed(Arc<AbstractRule>),
    Anchored(Arc<InstantiatedRule>),
}

impl SupportRule {
    pub fn stats(&self) -> &RuleStats {
        match self {
            SupportRule::Closed(rule) => &rule.stats,
            SupportRule::Anchored(rule) => &rule.stats,
        }
    }

    /// Standard confidence, the ranking score of this rule.
    pub fn sc(&self) -> f64 {
        self.stats().sc
    }

    pub fn pattern(&self) -> &Pattern {
        match self {
            SupportRule::Closed(rule) => &rule.pattern,
            SupportRule::Anchored(rule) => &rule.pattern,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            SupportRule::Closed(rule) => rule.tag(),
            SupportRule::Anchored(rule) => rule.kind.tag(),
        }
    }
}

impl std::fmt::Display for SupportRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{}", self.tag(), self.pattern())
    }
}

impl PartialEq for SupportRule {
    fn eq(&self, other: &Self) -> bool {
        self.tag() == other.tag() && self.pattern() == other.pattern()
    }
}

impl Eq for SupportRule {}

impl std::hash::Hash for SupportRule {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        self.pattern().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dir, RelId};

    fn open_pattern() -> Pattern {
        let head = Atom::new(
            RelId(0),
            "r",
            Dir::Forward,
            Term::constant(NodeId(1), "a"),
            Term::constant(NodeId(2), "b"),
        );
        let body = vec![Atom::new(
            RelId(1),
            "p",
            Dir::Forward,
            Term::constant(NodeId(1), "a"),
            Term::constant(NodeId(5), "c"),
        )];
        Pattern::abstracted(head, body).unwrap()
    }

    #[test]
    fn anchored_kinds_and_tags() {
        let base = open_pattern();
        let head = InstantiatedRule::head_anchored(&base, NodeId(2), "b");
        assert_eq!(head.kind, AnchorKind::Head);
        assert_eq!(head.anchor(), Some(NodeId(2)));
        assert!(head.tail().is_none());
        assert!(head.to_string().starts_with("HAR\t"));

        let tail = InstantiatedRule::tail_anchored(&base, NodeId(5), "c");
        assert_eq!(tail.tail(), Some(NodeId(5)));
        assert!(tail.to_string().starts_with("TAR\t"));

        let both = InstantiatedRule::both_anchored(&base, NodeId(2), "b", NodeId(5), "c");
        assert_eq!(both.anchor(), Some(NodeId(2)));
        assert_eq!(both.tail(), Some(NodeId(5)));
        assert!(both.to_string().starts_with("BAR\t"));
    }

    #[test]
    fn abstract_rule_tags() {
        let rule = AbstractRule::new(open_pattern());
        assert_eq!(rule.tag(), "OAR");
        assert_eq!(rule.children().count(), 0);
    }

    #[test]
    fn support_rules_compare_by_canonical_form() {
        use std::collections::HashSet;
        let base = open_pattern();
        let a = SupportRule::Anchored(Arc::new(InstantiatedRule::head_anchored(
            &base,
            NodeId(2),
            "b",
        )));
        let b = SupportRule::Anchored(Arc::new(InstantiatedRule::head_anchored(
            &base,
            NodeId(2),
            "b",
        )));
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }
}
