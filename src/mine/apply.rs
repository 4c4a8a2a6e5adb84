//! Rule application: candidate generation over the live graph.
//!
//! Each refined abstract rule grounds its body once (train edges masked) and
//! emits candidate pairs mapped to the rules that support them. Closed rules
//! map groundings directly; open rules fan out through their qualified
//! children in confidence order, capped per bucket, with a global suggestion
//! cap bounding total emission so only the top-budget rules get to speak.
//! Candidates that are self-loops or known training edges are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::error::{SiaError, SiaResult};
use crate::graph::store::GraphStore;
use crate::graph::{NodeId, Pair};
use crate::rule::{AbstractRule, InstantiatedRule, SupportRule};
use crate::settings::Settings;

use super::context::RunContext;
use super::grounding::{GroundingMode, ground_body};
use super::instantiate::shard_len;

/// Candidate predictions mapped to their supporting rules.
pub type CandidateMap = HashMap<Pair, HashSet<SupportRule>>;

/// Apply all refined rules, merging per-shard candidate maps.
pub fn apply_rules(
    store: &GraphStore,
    rules: &[Arc<AbstractRule>],
    train_pairs: &HashSet<Pair>,
    test_pairs: &HashSet<Pair>,
    settings: &Settings,
    ctx: &RunContext,
) -> SiaResult<CandidateMap> {
    if rules.is_empty() {
        return Ok(CandidateMap::new());
    }

    let shard_maps: Vec<CandidateMap> = rules
        .par_chunks(shard_len(rules.len()))
        .map(|shard| -> Result<CandidateMap, SiaError> {
            let mut map = CandidateMap::new();
            for rule in shard {
                apply_rule(store, rule, train_pairs, test_pairs, settings, ctx, &mut map);
            }
            Ok(map)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut candidates = CandidateMap::new();
    for map in shard_maps {
        for (pair, rules) in map {
            candidates.entry(pair).or_default().extend(rules);
        }
    }
    debug!(
        candidates = candidates.len(),
        emitted = ctx.predictions(),
        "rule application finished"
    );
    Ok(candidates)
}

fn apply_rule(
    store: &GraphStore,
    rule: &Arc<AbstractRule>,
    train_pairs: &HashSet<Pair>,
    test_pairs: &HashSet<Pair>,
    settings: &Settings,
    ctx: &RunContext,
    map: &mut CandidateMap,
) {
    let groundings = ground_body(store, &rule.pattern, GroundingMode::Apply, settings);
    let from_subject = rule.pattern.from_subject();

    if rule.is_closed() {
        for grounding in &groundings {
            let candidate = if from_subject {
                *grounding
            } else {
                grounding.flipped()
            };
            if admissible(train_pairs, &candidate) {
                map.entry(candidate)
                    .or_default()
                    .insert(SupportRule::Closed(Arc::clone(rule)));
            }
        }
        return;
    }

    // Entities filling the anchor position of the open test queries.
    let test_anchorings: HashSet<NodeId> = test_pairs
        .iter()
        .map(|pair| if from_subject { pair.obj } else { pair.sub })
        .collect();

    let origins: HashSet<NodeId> = groundings.iter().map(|g| g.sub).collect();
    let mut tail_to_original: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
    for grounding in &groundings {
        tail_to_original
            .entry(grounding.obj)
            .or_default()
            .insert(grounding.sub);
    }

    let cap = settings.suggestion_count_cap();

    for child in top_by_confidence(&rule.head_rules, settings.top_ins_rules_cap()) {
        if ctx.predictions() > cap {
            break;
        }
        let Some(anchor) = child.anchor() else { continue };
        'emit: for &origin in &origins {
            let candidate = oriented(from_subject, origin, anchor);
            if admissible(train_pairs, &candidate) {
                map.entry(candidate)
                    .or_default()
                    .insert(SupportRule::Anchored(Arc::clone(&child)));
                ctx.tick_predictions();
                if ctx.predictions() > cap {
                    break 'emit;
                }
            }
        }
    }

    for child in top_by_confidence(&rule.tail_rules, settings.top_ins_rules_cap()) {
        if ctx.predictions() > cap {
            break;
        }
        let Some(tail) = child.tail() else { continue };
        let Some(tail_origins) = tail_to_original.get(&tail) else {
            continue;
        };
        'emit: for &anchor in &test_anchorings {
            for &origin in tail_origins {
                let candidate = oriented(from_subject, origin, anchor);
                if admissible(train_pairs, &candidate) {
                    map.entry(candidate)
                        .or_default()
                        .insert(SupportRule::Anchored(Arc::clone(&child)));
                    ctx.tick_predictions();
                    if ctx.predictions() > cap {
                        break 'emit;
                    }
                }
            }
        }
    }

    for child in top_by_confidence(&rule.both_rules, settings.top_ins_rules_cap()) {
        if ctx.predictions() > cap {
            break;
        }
        let (Some(anchor), Some(tail)) = (child.anchor(), child.tail()) else {
            continue;
        };
        let Some(tail_origins) = tail_to_original.get(&tail) else {
            continue;
        };
        'emit: for &origin in tail_origins {
            let candidate = oriented(from_subject, origin, anchor);
            if admissible(train_pairs, &candidate) {
                map.entry(candidate)
                    .or_default()
                    .insert(SupportRule::Anchored(Arc::clone(&child)));
                ctx.tick_predictions();
                if ctx.predictions() > cap {
                    break 'emit;
                }
            }
        }
    }
}

fn oriented(from_subject: bool, origin: NodeId, anchor: NodeId) -> Pair {
    if from_subject {
        Pair::new(origin, anchor)
    } else {
        Pair::new(anchor, origin)
    }
}

/// Candidates must not be self-loops or known training edges.
fn admissible(train_pairs: &HashSet<Pair>, candidate: &Pair) -> bool {
    !candidate.is_self_loop() && !train_pairs.contains(candidate)
}

/// Bucket ranked by standard confidence, descending, capped.
fn top_by_confidence(bucket: &[Arc<InstantiatedRule>], cap: usize) -> Vec<Arc<InstantiatedRule>> {
    let mut ranked = bucket.to_vec();
    ranked.sort_by(|a, b| b.stats.sc.total_cmp(&a.stats.sc));
    ranked.truncate(cap);
    ranked
}
