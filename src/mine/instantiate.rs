//! Rule instantiation and scoring.
//!
//! Every open pattern is specialized into anchored children and every rule,
//! open or closed, is scored against the training pairs. Two policies:
//!
//! - `Sampled`: score only the anchored children collected as sampling
//!   byproducts.
//! - `Ranked` (default): generalize then specialize. Head anchorings come
//!   from the most frequent entities in the training pairs' free head
//!   position, tail anchorings from the most frequent terminals of the
//!   rule's own body groundings, and both-anchored candidates from
//!   (anchoring, tail) combinations that share a reachable origin.
//!
//! The pattern set is cut into at most `2^SPLIT_DEPTH` contiguous shards
//! processed on the rayon pool; the first worker error fails the stage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{SiaError, SiaResult};
use crate::graph::store::GraphStore;
use crate::graph::{NodeId, Pair};
use crate::rule::{AbstractRule, InstantiatedRule, Pattern};
use crate::settings::{InstantiationPolicy, Settings};

use super::context::RunContext;
use super::grounding::{GroundingMode, ground_body};

/// Recursive binary split depth for stage sharding: at most 8 shards.
const SPLIT_DEPTH: u32 = 3;

/// Contiguous shard length for a stage input of `total` items.
pub(crate) fn shard_len(total: usize) -> usize {
    total.div_ceil(1 << SPLIT_DEPTH).max(1)
}

/// Rank the entities occupying the anchor position of the ground-truth pairs
/// by frequency, descending, capped.
///
/// For from-subject rules the anchor position is the object side, and vice
/// versa.
pub fn rank_anchorings(ground_truth: &HashSet<Pair>, from_subject: bool, cap: usize) -> Vec<NodeId> {
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for pair in ground_truth {
        let anchoring = if from_subject { pair.obj } else { pair.sub };
        *counts.entry(anchoring).or_insert(0) += 1;
    }
    let mut ranked: Vec<(NodeId, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(cap);
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// Instantiate and score all patterns against the training pairs.
pub fn instantiate_rules(
    store: &GraphStore,
    patterns: &[Pattern],
    train_pairs: &HashSet<Pair>,
    settings: &Settings,
    ctx: &RunContext,
) -> SiaResult<Vec<AbstractRule>> {
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let sub_anchorings = rank_anchorings(train_pairs, true, settings.head_anchor_cap());
    let obj_anchorings = rank_anchorings(train_pairs, false, settings.head_anchor_cap());

    let rules: Vec<Vec<AbstractRule>> = patterns
        .par_chunks(shard_len(patterns.len()))
        .map(|shard| -> Result<Vec<AbstractRule>, SiaError> {
            shard
                .iter()
                .map(|pattern| {
                    let anchorings = if pattern.from_subject() {
                        &sub_anchorings
                    } else {
                        &obj_anchorings
                    };
                    build_rule(store, pattern, train_pairs, anchorings, settings, ctx)
                })
                .collect()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rules: Vec<AbstractRule> = rules.into_iter().flatten().collect();
    debug!(
        rules = rules.len(),
        instantiated = ctx.ins_rules(),
        "rule instantiation finished"
    );
    Ok(rules)
}

fn build_rule(
    store: &GraphStore,
    pattern: &Pattern,
    ground_truth: &HashSet<Pair>,
    anchorings: &[NodeId],
    settings: &Settings,
    ctx: &RunContext,
) -> SiaResult<AbstractRule> {
    let mut rule = AbstractRule::new(pattern.clone());
    let groundings = ground_body(store, pattern, GroundingMode::Learn, settings);

    if rule.is_closed() {
        score_closed(&mut rule, &groundings, ground_truth, settings);
        return Ok(rule);
    }

    match settings.instantiation {
        InstantiationPolicy::Sampled => {
            score_sampled_children(&mut rule, &groundings, ground_truth, settings, ctx);
        }
        InstantiationPolicy::Ranked => {
            specialize_ranked(
                &mut rule,
                store,
                &groundings,
                ground_truth,
                anchorings,
                settings,
                ctx,
            )?;
        }
    }

    score_open(&mut rule, settings);
    Ok(rule)
}

/// Closed rules score by grounding the full body directly.
fn score_closed(
    rule: &mut AbstractRule,
    groundings: &HashSet<Pair>,
    ground_truth: &HashSet<Pair>,
    settings: &Settings,
) {
    let mut support = 0usize;
    let mut total = 0usize;
    for grounding in groundings {
        let prediction = if rule.pattern.from_subject() {
            *grounding
        } else {
            grounding.flipped()
        };
        if ground_truth.contains(&prediction) {
            support += 1;
        }
        total += 1;
    }
    rule.stats.set(
        support as f64,
        total as f64,
        ground_truth.len() as f64,
        settings.conf_offset,
    );
}

/// An open rule's aggregate stats: sum over its qualified head-anchored
/// children.
fn score_open(rule: &mut AbstractRule, settings: &Settings) {
    let mut support = 0.0;
    let mut total = 0.0;
    let mut truth = 0.0;
    for child in &rule.head_rules {
        support += child.stats.support;
        total += child.stats.total_predictions;
        truth = child.stats.ground_truth;
    }
    let size = rule.head_rules.len() as f64;
    rule.stats
        .set_open(support, total, truth, size, settings.conf_offset);
}

/// Score one anchored child over the originals reachable from its anchor.
/// Returns true when the per-bucket prediction cap was hit.
fn evaluate_rule<'a>(
    mut child: InstantiatedRule,
    ground_truth: &HashSet<Pair>,
    anchor: NodeId,
    originals: impl IntoIterator<Item = &'a NodeId>,
    bucket: &mut Vec<Arc<InstantiatedRule>>,
    predictions: &mut usize,
    settings: &Settings,
) -> bool {
    let from_subject = child.pattern.from_subject();
    let mut early_stop = false;
    let mut support = 0usize;
    let mut total = 0usize;
    for &original in originals {
        let prediction = if from_subject {
            Pair::new(original, anchor)
        } else {
            Pair::new(anchor, original)
        };
        if ground_truth.contains(&prediction) {
            support += 1;
        }
        total += 1;
        *predictions += 1;
        if *predictions > settings.prediction_count_cap() {
            early_stop = true;
            break;
        }
    }
    child.stats.set(
        support as f64,
        total as f64,
        ground_truth.len() as f64,
        settings.conf_offset,
    );
    if child.stats.qualified(settings.support, settings.standard_conf) {
        bucket.push(Arc::new(child));
    }
    early_stop
}

/// Score one tail-anchored child over anchorings × originals.
fn evaluate_tail_rule<'a>(
    mut child: InstantiatedRule,
    ground_truth: &HashSet<Pair>,
    anchorings: &[NodeId],
    originals: impl IntoIterator<Item = &'a NodeId> + Copy,
    bucket: &mut Vec<Arc<InstantiatedRule>>,
    predictions: &mut usize,
    settings: &Settings,
) -> bool {
    let from_subject = child.pattern.from_subject();
    let mut early_stop = false;
    let mut support = 0usize;
    let mut total = 0usize;
    'outer: for &anchoring in anchorings {
        for &original in originals {
            let prediction = if from_subject {
                Pair::new(original, anchoring)
            } else {
                Pair::new(anchoring, original)
            };
            if ground_truth.contains(&prediction) {
                support += 1;
            }
            total += 1;
            *predictions += 1;
            if *predictions > settings.prediction_count_cap() {
                early_stop = true;
                break 'outer;
            }
        }
    }
    child.stats.set(
        support as f64,
        total as f64,
        ground_truth.len() as f64,
        settings.conf_offset,
    );
    if child.stats.qualified(settings.support, settings.standard_conf) {
        bucket.push(Arc::new(child));
    }
    early_stop
}

/// `Sampled` policy: score the anchored children collected while sampling.
fn score_sampled_children(
    rule: &mut AbstractRule,
    groundings: &HashSet<Pair>,
    ground_truth: &HashSet<Pair>,
    settings: &Settings,
    ctx: &RunContext,
) {
    let Some(children) = ctx.sampled_children.get(&rule.pattern) else {
        return;
    };
    let originals_all: HashSet<NodeId> = groundings.iter().map(|g| g.sub).collect();
    let anchorings: Vec<NodeId> = ctx
        .rule_anchorings
        .get(&rule.pattern)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();

    for child in children {
        match child.kind {
            crate::rule::AnchorKind::Head if settings.use_head_rules => {
                let mut predictions = 0usize;
                let anchor = child.anchor().expect("head-anchored children carry an anchor");
                evaluate_rule(
                    child.clone(),
                    ground_truth,
                    anchor,
                    &originals_all,
                    &mut rule.head_rules,
                    &mut predictions,
                    settings,
                );
            }
            crate::rule::AnchorKind::Tail if settings.use_tail_rules => {
                let mut predictions = 0usize;
                let tail = child.tail().expect("tail-anchored children carry a tail");
                let originals: HashSet<NodeId> = groundings
                    .iter()
                    .filter(|g| g.obj == tail)
                    .map(|g| g.sub)
                    .collect();
                evaluate_tail_rule(
                    child.clone(),
                    ground_truth,
                    &anchorings,
                    &originals,
                    &mut rule.tail_rules,
                    &mut predictions,
                    settings,
                );
            }
            crate::rule::AnchorKind::Both if settings.use_both_rules => {
                let mut predictions = 0usize;
                let anchor = child.anchor().expect("both-anchored children carry an anchor");
                let tail = child.tail().expect("both-anchored children carry a tail");
                let originals: HashSet<NodeId> = groundings
                    .iter()
                    .filter(|g| g.obj == tail)
                    .map(|g| g.sub)
                    .collect();
                evaluate_rule(
                    child.clone(),
                    ground_truth,
                    anchor,
                    &originals,
                    &mut rule.both_rules,
                    &mut predictions,
                    settings,
                );
            }
            _ => {}
        }
    }
}

/// `Ranked` policy: generalize then specialize with shared body groundings.
fn specialize_ranked(
    rule: &mut AbstractRule,
    store: &GraphStore,
    groundings: &HashSet<Pair>,
    ground_truth: &HashSet<Pair>,
    anchorings: &[NodeId],
    settings: &Settings,
    ctx: &RunContext,
) -> SiaResult<()> {
    let from_subject = rule.pattern.from_subject();
    let originals_all: HashSet<NodeId> = groundings.iter().map(|g| g.sub).collect();

    let mut tail_to_original: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
    for grounding in groundings {
        tail_to_original
            .entry(grounding.obj)
            .or_default()
            .insert(grounding.sub);
    }

    let anchoring_set: HashSet<NodeId> = anchorings.iter().copied().collect();
    let mut anchoring_to_original: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
    for pair in ground_truth {
        let (original, anchoring) = if from_subject {
            (pair.sub, pair.obj)
        } else {
            (pair.obj, pair.sub)
        };
        if anchoring_set.contains(&anchoring) {
            anchoring_to_original
                .entry(anchoring)
                .or_default()
                .insert(original);
        }
    }

    let tails = ranked_tails(groundings, settings.tail_anchor_cap());

    if settings.use_head_rules {
        let mut predictions = 0usize;
        for &anchor in anchorings {
            if ctx.ins_rules() > settings.ins_rule_count_cap() {
                break;
            }
            ctx.tick_ins_rules();
            let name = store.node_name(anchor)?;
            let child = InstantiatedRule::head_anchored(&rule.pattern, anchor, &name);
            if evaluate_rule(
                child,
                ground_truth,
                anchor,
                &originals_all,
                &mut rule.head_rules,
                &mut predictions,
                settings,
            ) {
                break;
            }
        }
    }

    if settings.use_tail_rules {
        let mut predictions = 0usize;
        for &tail in &tails {
            if ctx.ins_rules() > settings.ins_rule_count_cap() {
                break;
            }
            ctx.tick_ins_rules();
            let name = store.node_name(tail)?;
            let child = InstantiatedRule::tail_anchored(&rule.pattern, tail, &name);
            let originals = tail_to_original.get(&tail).cloned().unwrap_or_default();
            if evaluate_tail_rule(
                child,
                ground_truth,
                anchorings,
                &originals,
                &mut rule.tail_rules,
                &mut predictions,
                settings,
            ) {
                break;
            }
        }
    }

    if settings.use_both_rules {
        let mut predictions = 0usize;
        for candidate in both_candidates(&tail_to_original, &anchoring_to_original) {
            if is_trivial(&rule.pattern, &candidate) {
                continue;
            }
            if ctx.ins_rules() > settings.ins_rule_count_cap() {
                break;
            }
            ctx.tick_ins_rules();
            let anchor_name = store.node_name(candidate.sub)?;
            let tail_name = store.node_name(candidate.obj)?;
            let child = InstantiatedRule::both_anchored(
                &rule.pattern,
                candidate.sub,
                &anchor_name,
                candidate.obj,
                &tail_name,
            );
            let originals = tail_to_original
                .get(&candidate.obj)
                .cloned()
                .unwrap_or_default();
            if evaluate_rule(
                child,
                ground_truth,
                candidate.sub,
                &originals,
                &mut rule.both_rules,
                &mut predictions,
                settings,
            ) {
                break;
            }
        }
    }

    Ok(())
}

/// Body-grounding terminals ranked by frequency, descending, capped.
fn ranked_tails(groundings: &HashSet<Pair>, cap: usize) -> Vec<NodeId> {
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    for grounding in groundings {
        *counts.entry(grounding.obj).or_insert(0) += 1;
    }
    let mut ranked: Vec<(NodeId, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(cap);
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// (anchoring, tail) combinations sharing at least one reachable origin.
fn both_candidates(
    tail_to_original: &HashMap<NodeId, HashSet<NodeId>>,
    anchoring_to_original: &HashMap<NodeId, HashSet<NodeId>>,
) -> Vec<Pair> {
    let mut candidates = Vec::new();
    for (&tail, tail_originals) in tail_to_original {
        for (&anchor, anchor_originals) in anchoring_to_original {
            if tail_originals.iter().any(|o| anchor_originals.contains(o)) {
                candidates.push(Pair::new(anchor, tail));
            }
        }
    }
    candidates
}

/// The degenerate both-anchored form `R(e,Y) <- R(Y,e)`.
fn is_trivial(pattern: &Pattern, candidate: &Pair) -> bool {
    candidate.sub == candidate.obj
        && pattern.body_len() == 1
        && pattern.head().rel == pattern.body()[0].rel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Instance;

    /// Two training pairs sharing the object `b`, each with a parallel
    /// `p`-edge (closed evidence) and a `p`-edge into a shared hub `c`.
    fn training_store() -> (GraphStore, HashSet<Pair>, Vec<Instance>) {
        let store = GraphStore::new();
        let mut train = Vec::new();
        for sub in ["a1", "a2"] {
            train.push(store.insert_triple(sub, "r", "b").unwrap());
            store.insert_triple(sub, "p", "b").unwrap();
            store.insert_triple(sub, "p", "c").unwrap();
        }
        let pairs = train.iter().map(Instance::to_pair).collect();
        (store, pairs, train)
    }

    fn closed_pattern(store: &GraphStore) -> Pattern {
        let head = crate::rule::Atom::head_of(store, &store.instances_of(store.rel_id("r").unwrap())[0]).unwrap();
        let a1 = store.node_id("a1").unwrap();
        let b = store.node_id("b").unwrap();
        let body = vec![crate::rule::Atom::new(
            store.rel_id("p").unwrap(),
            "p",
            crate::graph::Dir::Forward,
            crate::rule::Term::constant(a1, "a1"),
            crate::rule::Term::constant(b, "b"),
        )];
        // Head must match the body's concrete endpoints for closure.
        let head = crate::rule::Atom::new(
            head.rel,
            head.predicate.clone(),
            crate::graph::Dir::Forward,
            crate::rule::Term::constant(a1, "a1"),
            crate::rule::Term::constant(b, "b"),
        );
        Pattern::abstracted(head, body).unwrap()
    }

    fn open_pattern(store: &GraphStore) -> Pattern {
        let a1 = store.node_id("a1").unwrap();
        let b = store.node_id("b").unwrap();
        let c = store.node_id("c").unwrap();
        let head = crate::rule::Atom::new(
            store.rel_id("r").unwrap(),
            "r",
            crate::graph::Dir::Forward,
            crate::rule::Term::constant(a1, "a1"),
            crate::rule::Term::constant(b, "b"),
        );
        let body = vec![crate::rule::Atom::new(
            store.rel_id("p").unwrap(),
            "p",
            crate::graph::Dir::Forward,
            crate::rule::Term::constant(a1, "a1"),
            crate::rule::Term::constant(c, "c"),
        )];
        Pattern::abstracted(head, body).unwrap()
    }

    fn settings() -> Settings {
        Settings {
            conf_offset: 0.0,
            learn_groundings: 0,
            ..Default::default()
        }
    }

    #[test]
    fn anchorings_rank_by_frequency() {
        let mut gt = HashSet::new();
        gt.insert(Pair::new(NodeId(1), NodeId(10)));
        gt.insert(Pair::new(NodeId(2), NodeId(10)));
        gt.insert(Pair::new(NodeId(3), NodeId(11)));

        let ranked = rank_anchorings(&gt, true, 10);
        assert_eq!(ranked[0], NodeId(10));
        assert_eq!(ranked.len(), 2);

        let capped = rank_anchorings(&gt, true, 1);
        assert_eq!(capped, vec![NodeId(10)]);

        // From-object rules anchor on the subject side.
        let subs = rank_anchorings(&gt, false, 10);
        assert_eq!(subs.len(), 3);
    }

    #[test]
    fn closed_rule_scores_by_direct_grounding() {
        let (store, train_pairs, _) = training_store();
        let pattern = closed_pattern(&store);
        let ctx = RunContext::new();
        let rules =
            instantiate_rules(&store, &[pattern], &train_pairs, &settings(), &ctx).unwrap();

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert!(rule.is_closed());
        // All four p-edges ground the body; the two into b are correct.
        assert_eq!(rule.stats.support, 2.0);
        assert_eq!(rule.stats.total_predictions, 4.0);
        assert!((rule.stats.sc - 0.5).abs() < 1e-12);
        assert!((rule.stats.hc - 1.0).abs() < 1e-12);
        // Closed rules never instantiate.
        assert_eq!(rule.children().count(), 0);
    }

    #[test]
    fn ranked_policy_builds_head_and_both_children() {
        let (store, train_pairs, _) = training_store();
        let pattern = open_pattern(&store);
        let ctx = RunContext::new();
        let rules =
            instantiate_rules(&store, &[pattern], &train_pairs, &settings(), &ctx).unwrap();

        let rule = &rules[0];
        // Head anchored at b (the only anchoring in the training pairs): the
        // grounding origins are {a1, a2} and both implied pairs are training
        // edges.
        assert!(!rule.head_rules.is_empty());
        let head = &rule.head_rules[0];
        assert_eq!(head.anchor(), Some(store.node_id("b").unwrap()));
        assert_eq!(head.stats.support, 2.0);
        assert_eq!(head.stats.total_predictions, 2.0);

        // Tail rules are off by default.
        assert!(rule.tail_rules.is_empty());
        assert!(!rule.both_rules.is_empty());

        // Open aggregate = sum over head-anchored children.
        assert_eq!(rule.stats.support, head.stats.support);
        assert_eq!(rule.stats.head_anchored_size, 1.0);
        assert!(ctx.ins_rules() > 0);
    }

    #[test]
    fn unqualified_children_are_dropped() {
        let (store, train_pairs, _) = training_store();
        let pattern = open_pattern(&store);
        let ctx = RunContext::new();
        let strict = Settings {
            standard_conf: 0.99,
            conf_offset: 5.0,
            ..settings()
        };
        let rules = instantiate_rules(&store, &[pattern], &train_pairs, &strict, &ctx).unwrap();
        let rule = &rules[0];
        // sc = 2/(2+5) < 0.99: nothing qualifies.
        assert!(rule.head_rules.is_empty());
        assert!(rule.both_rules.is_empty());
        assert_eq!(rule.stats.support, 0.0);
    }

    #[test]
    fn instantiation_cap_is_a_soft_stop() {
        let (store, train_pairs, _) = training_store();
        let pattern = open_pattern(&store);
        let ctx = RunContext::new();
        let capped = Settings {
            ins_rule_cap: 1,
            ..settings()
        };
        let rules = instantiate_rules(&store, &[pattern], &train_pairs, &capped, &ctx).unwrap();
        // Not an error; some buckets just stay small.
        assert_eq!(rules.len(), 1);
        assert!(ctx.ins_rules() <= 3);
    }

    #[test]
    fn prediction_cap_truncates_scoring() {
        let (store, train_pairs, _) = training_store();
        let pattern = open_pattern(&store);
        let ctx = RunContext::new();
        let capped = Settings {
            prediction_cap: 1,
            ..settings()
        };
        let rules = instantiate_rules(&store, &[pattern], &train_pairs, &capped, &ctx).unwrap();
        let rule = &rules[0];
        for child in rule.children() {
            assert!(child.stats.total_predictions <= 2.0);
        }
    }

    #[test]
    fn trivial_both_candidates_are_skipped() {
        // r(X,Y) <- r(Y,e) with anchor == tail is degenerate.
        let store = GraphStore::new();
        let ab = store.insert_triple("a", "r", "b").unwrap();
        store.insert_triple("b", "r", "a").unwrap();
        let pattern = Pattern::abstracted(
            crate::rule::Atom::head_of(&store, &ab).unwrap(),
            vec![crate::rule::Atom::new(
                store.rel_id("r").unwrap(),
                "r",
                crate::graph::Dir::Forward,
                crate::rule::Term::constant(store.node_id("a").unwrap(), "a"),
                crate::rule::Term::constant(store.node_id("c").unwrap_or(NodeId(99)), "c"),
            )],
        );
        // The pattern above is open (c is not a head endpoint).
        let pattern = pattern.unwrap();
        assert!(is_trivial(&pattern, &Pair::new(NodeId(5), NodeId(5))));
        assert!(!is_trivial(&pattern, &Pair::new(NodeId(5), NodeId(6))));
    }
}
