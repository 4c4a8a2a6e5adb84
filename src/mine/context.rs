//! Per-relation run state.
//!
//! Everything the mining stages share for one target relation lives here:
//! sampling frequencies, anchored children collected as sampling byproducts,
//! and the global counters that bound instantiation and candidate emission.
//! A fresh context is constructed for every target relation, so nothing leaks
//! across runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::graph::NodeId;
use crate::rule::{InstantiatedRule, Pattern};

/// Scratch state owned by the orchestrator for one target-relation run.
///
/// The maps are filled by the single-threaded sampling and query-construction
/// phases; the counters are shared with stage workers and incremented
/// atomically.
#[derive(Debug, Default)]
pub struct RunContext {
    /// How often each abstract pattern was produced by the sampler.
    pub rule_frequency: HashMap<Pattern, usize>,
    /// Anchored children created as sampling byproducts, per base pattern.
    pub sampled_children: HashMap<Pattern, Vec<InstantiatedRule>>,
    /// Head anchorings observed per pattern while sampling.
    pub rule_anchorings: HashMap<Pattern, HashSet<NodeId>>,
    /// Query repeat counts per entity (subject-side), for weighted metrics.
    pub sub_query_repeats: HashMap<NodeId, usize>,
    /// Query repeat counts per entity (object-side).
    pub obj_query_repeats: HashMap<NodeId, usize>,
    /// Instantiated rules created so far this run.
    ins_rules: AtomicUsize,
    /// Candidate predictions emitted so far this run.
    predictions: AtomicUsize,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sampler emission of `pattern`; returns its new frequency.
    pub fn note_sampled(&mut self, pattern: Pattern) -> usize {
        let count = self.rule_frequency.entry(pattern).or_insert(0);
        *count += 1;
        *count
    }

    /// Record an anchored child produced while sampling. Duplicate children
    /// (same kind and pattern) collapse.
    pub fn note_child(&mut self, base: Pattern, child: InstantiatedRule) {
        let children = self.sampled_children.entry(base).or_default();
        if !children
            .iter()
            .any(|c| c.kind == child.kind && c.pattern == child.pattern)
        {
            children.push(child);
        }
    }

    /// Record a head anchoring seen for `base` while sampling.
    pub fn note_anchoring(&mut self, base: Pattern, anchoring: NodeId) {
        self.rule_anchorings.entry(base).or_default().insert(anchoring);
    }

    /// Count one instantiated rule; returns the count before the tick.
    pub fn tick_ins_rules(&self) -> usize {
        self.ins_rules.fetch_add(1, Ordering::Relaxed)
    }

    pub fn ins_rules(&self) -> usize {
        self.ins_rules.load(Ordering::Relaxed)
    }

    /// Count one emitted candidate prediction; returns the count before the
    /// tick.
    pub fn tick_predictions(&self) -> usize {
        self.predictions.fetch_add(1, Ordering::Relaxed)
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::Relaxed)
    }
}
