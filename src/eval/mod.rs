//! Evaluation: query construction, parallel ranking, metric aggregation.
//!
//! Test pairs become subject- and object-side queries; candidates are
//! bucketed under the query entities they share an endpoint with. Each
//! query's candidates are ranked (see [`rank`]) and scored (see [`metrics`]),
//! and the per-entity rows are pooled across workers into one
//! (repeat-weighted) mean per metric.

pub mod metrics;
pub mod rank;

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::info;

use crate::graph::{NodeId, Pair};
use crate::mine::apply::CandidateMap;
use crate::mine::context::RunContext;
use crate::settings::{Protocol, Settings};

use rank::Candidate;

/// Candidate buckets keyed by query entity, per side.
#[derive(Debug, Default)]
pub struct Queries {
    pub sub: HashMap<NodeId, HashSet<Pair>>,
    pub obj: HashMap<NodeId, HashSet<Pair>>,
}

/// Ranked candidate lists per query entity, per side.
#[derive(Debug, Default)]
pub struct RankedQueries {
    pub sub: HashMap<NodeId, Vec<Candidate>>,
    pub obj: HashMap<NodeId, Vec<Candidate>>,
}

/// Aggregate retrieval metrics for one target relation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub hits1: f64,
    pub hits3: f64,
    pub hits10: f64,
    pub hits100: f64,
    pub mrr: f64,
}

/// Build per-entity queries from the test pairs and bucket the candidates.
///
/// Every protocol buckets both sides; under `TransE` the per-entity query
/// repeat counts are recorded in the run context for metric weighting.
pub fn build_queries(
    protocol: Protocol,
    test_pairs: &HashSet<Pair>,
    candidates: &CandidateMap,
    ctx: &mut RunContext,
) -> Queries {
    let mut subs: HashSet<NodeId> = HashSet::new();
    let mut objs: HashSet<NodeId> = HashSet::new();
    for pair in test_pairs {
        subs.insert(pair.sub);
        objs.insert(pair.obj);
        if protocol == Protocol::TransE {
            *ctx.sub_query_repeats.entry(pair.sub).or_insert(0) += 1;
            *ctx.obj_query_repeats.entry(pair.obj).or_insert(0) += 1;
        }
    }

    let mut queries = Queries::default();
    for pair in candidates.keys() {
        if subs.contains(&pair.sub) {
            queries.sub.entry(pair.sub).or_default().insert(*pair);
        }
        if objs.contains(&pair.obj) {
            queries.obj.entry(pair.obj).or_default().insert(*pair);
        }
    }
    queries
}

/// One query entity's metric contributions.
struct Row {
    hits1: f64,
    hits3: f64,
    hits10: f64,
    hits100: f64,
    mrr: f64,
    repeat: usize,
}

/// Rank every query in parallel and aggregate metrics over the pooled
/// per-entity rows.
pub fn evaluate(
    queries: &Queries,
    candidates: &CandidateMap,
    test_pairs: &HashSet<Pair>,
    settings: &Settings,
    ctx: &RunContext,
) -> (RankedQueries, Metrics) {
    let mut ranked = RankedQueries::default();
    let mut rows: Vec<Row> = Vec::new();

    for side in [Side::Sub, Side::Obj] {
        let buckets = match side {
            Side::Sub => &queries.sub,
            Side::Obj => &queries.obj,
        };
        if buckets.is_empty() {
            continue;
        }
        let entities: Vec<NodeId> = buckets.keys().copied().collect();
        let chunk = entities.len().div_ceil(settings.threads).max(1);

        let results: Vec<(NodeId, Vec<Candidate>, Row)> = entities
            .par_chunks(chunk)
            .flat_map_iter(|chunk| {
                chunk.iter().map(|&entity| {
                    let total_positives = test_pairs
                        .iter()
                        .filter(|pair| side.of(pair) == entity)
                        .count();
                    let ranked_list = rank_one(
                        &buckets[&entity],
                        candidates,
                        settings.max_recursion_depth,
                    );
                    let pairs: Vec<Pair> = ranked_list.iter().map(|c| c.pair).collect();
                    let repeat = repeat_weight(settings.eval_protocol, ctx, side, entity);
                    let row = Row {
                        hits1: metrics::hit_at(test_pairs, &pairs, 1, total_positives),
                        hits3: metrics::hit_at(test_pairs, &pairs, 3, total_positives),
                        hits10: metrics::hit_at(test_pairs, &pairs, 10, total_positives),
                        hits100: metrics::hit_at(test_pairs, &pairs, 100, total_positives),
                        mrr: metrics::mrr(test_pairs, &pairs),
                        repeat,
                    };
                    (entity, ranked_list, row)
                })
            })
            .collect();

        for (entity, list, row) in results {
            match side {
                Side::Sub => ranked.sub.insert(entity, list),
                Side::Obj => ranked.obj.insert(entity, list),
            };
            rows.push(row);
        }
    }

    let aggregate = Metrics {
        hits1: metrics::weighted_mean(&rows.iter().map(|r| (r.hits1, r.repeat)).collect::<Vec<_>>()),
        hits3: metrics::weighted_mean(&rows.iter().map(|r| (r.hits3, r.repeat)).collect::<Vec<_>>()),
        hits10: metrics::weighted_mean(
            &rows.iter().map(|r| (r.hits10, r.repeat)).collect::<Vec<_>>(),
        ),
        hits100: metrics::weighted_mean(
            &rows.iter().map(|r| (r.hits100, r.repeat)).collect::<Vec<_>>(),
        ),
        mrr: metrics::weighted_mean(&rows.iter().map(|r| (r.mrr, r.repeat)).collect::<Vec<_>>()),
    };

    info!(
        queries = rows.len(),
        hits1 = aggregate.hits1,
        hits10 = aggregate.hits10,
        mrr = aggregate.mrr,
        "evaluation finished"
    );
    (ranked, aggregate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sub,
    Obj,
}

impl Side {
    fn of(self, pair: &Pair) -> NodeId {
        match self {
            Side::Sub => pair.sub,
            Side::Obj => pair.obj,
        }
    }
}

fn rank_one(bucket: &HashSet<Pair>, candidates: &CandidateMap, max_depth: usize) -> Vec<Candidate> {
    rank::rank_candidates(bucket, candidates, max_depth)
}

fn repeat_weight(protocol: Protocol, ctx: &RunContext, side: Side, entity: NodeId) -> usize {
    if protocol != Protocol::TransE {
        return 1;
    }
    let repeats = match side {
        Side::Sub => &ctx.sub_query_repeats,
        Side::Obj => &ctx.obj_query_repeats,
    };
    repeats.get(&entity).copied().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{AbstractRule, Atom, Pattern, SupportRule, Term};
    use std::sync::Arc;

    fn pair(sub: u64, obj: u64) -> Pair {
        Pair::new(NodeId(sub), NodeId(obj))
    }

    fn support_rule(sc_support: f64, total: f64) -> SupportRule {
        let head = Atom::new(
            crate::graph::RelId(0),
            "r",
            crate::graph::Dir::Forward,
            Term::constant(NodeId(1), "a"),
            Term::constant(NodeId(2), "b"),
        );
        let body = vec![Atom::new(
            crate::graph::RelId(1),
            "p",
            crate::graph::Dir::Forward,
            Term::constant(NodeId(1), "a"),
            Term::constant(NodeId(2), "b"),
        )];
        let mut rule = AbstractRule::new(Pattern::abstracted(head, body).unwrap());
        rule.stats.set(sc_support, total, total, 0.0);
        SupportRule::Closed(Arc::new(rule))
    }

    #[test]
    fn transe_records_query_repeats() {
        let test: HashSet<Pair> = [pair(1, 10), pair(1, 11), pair(2, 10)].into_iter().collect();
        let mut ctx = RunContext::new();
        build_queries(Protocol::TransE, &test, &CandidateMap::new(), &mut ctx);
        assert_eq!(ctx.sub_query_repeats[&NodeId(1)], 2);
        assert_eq!(ctx.sub_query_repeats[&NodeId(2)], 1);
        assert_eq!(ctx.obj_query_repeats[&NodeId(10)], 2);
    }

    #[test]
    fn other_protocols_do_not_weight() {
        let test: HashSet<Pair> = [pair(1, 10), pair(1, 11)].into_iter().collect();
        let mut ctx = RunContext::new();
        build_queries(Protocol::Gpfl, &test, &CandidateMap::new(), &mut ctx);
        assert!(ctx.sub_query_repeats.is_empty());
    }

    #[test]
    fn buckets_are_restricted_to_query_entities() {
        let test: HashSet<Pair> = [pair(1, 10)].into_iter().collect();
        let mut map = CandidateMap::new();
        map.entry(pair(1, 20)).or_default().insert(support_rule(1.0, 1.0));
        map.entry(pair(9, 10)).or_default().insert(support_rule(1.0, 1.0));
        map.entry(pair(7, 8)).or_default().insert(support_rule(1.0, 1.0));

        let mut ctx = RunContext::new();
        let queries = build_queries(Protocol::Gpfl, &test, &map, &mut ctx);
        assert_eq!(queries.sub.len(), 1);
        assert!(queries.sub[&NodeId(1)].contains(&pair(1, 20)));
        assert_eq!(queries.obj.len(), 1);
        assert!(queries.obj[&NodeId(10)].contains(&pair(9, 10)));
    }

    #[test]
    fn evaluation_scores_the_correct_candidate_on_top() {
        // Query entity 1: the true completion (1, 10) is supported by a
        // strong rule, the wrong one (1, 20) by a weak rule.
        let test: HashSet<Pair> = [pair(1, 10)].into_iter().collect();
        let mut map = CandidateMap::new();
        map.entry(pair(1, 10)).or_default().insert(support_rule(4.0, 4.0));
        map.entry(pair(1, 20)).or_default().insert(support_rule(1.0, 4.0));

        let mut ctx = RunContext::new();
        let settings = Settings {
            threads: 2,
            ..Default::default()
        };
        let queries = build_queries(settings.eval_protocol, &test, &map, &mut ctx);
        let (ranked, aggregate) = evaluate(&queries, &map, &test, &settings, &ctx);

        let sub_list = &ranked.sub[&NodeId(1)];
        assert_eq!(sub_list[0].pair, pair(1, 10));
        assert!((aggregate.hits1 - 1.0).abs() < 1e-12);
        assert!((aggregate.mrr - 1.0).abs() < 1e-12);
        // The object-side query for 10 sees only (1, 10).
        assert!(ranked.obj[&NodeId(10)].len() == 1);
    }

    #[test]
    fn repeat_weights_shift_the_mean() {
        // Entity 1 is queried twice on the subject side, entity 2 once.
        let test: HashSet<Pair> =
            [pair(1, 10), pair(1, 11), pair(2, 30)].into_iter().collect();
        let mut map = CandidateMap::new();
        map.entry(pair(1, 10)).or_default().insert(support_rule(4.0, 4.0));
        map.entry(pair(1, 11)).or_default().insert(support_rule(4.0, 4.0));
        map.entry(pair(2, 99)).or_default().insert(support_rule(4.0, 4.0));

        let mut ctx = RunContext::new();
        let settings = Settings::default();
        let queries = build_queries(Protocol::TransE, &test, &map, &mut ctx);
        let (_, aggregate) = evaluate(&queries, &map, &test, &settings, &ctx);
        // Rows: subject side (1.0 at weight 2, 0.0 at weight 1), object side
        // (1.0, 1.0 at weight 1 each): (2 + 0 + 1 + 1) / 5.
        assert!((aggregate.hits1 - 0.8).abs() < 1e-12);
    }
}
