//! Candidate ranking with lexicographic tie-breaking over score vectors.
//!
//! Each candidate carries the confidences of its supporting rules, sorted
//! descending. Candidates order by their best score; groups tied at one
//! position re-sort by the next, recursively, until no ties remain or the
//! refinement depth cap is hit; past the cap the current order stands.
//! A candidate whose vector is exhausted at the distinguishing position
//! orders after one that still has scores there, and two exhausted vectors
//! never count as tied.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::graph::Pair;
use crate::mine::apply::CandidateMap;

/// A candidate pair with its transient ranking scores, discarded after the
/// ranking pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pair: Pair,
    /// Supporting-rule confidences, descending.
    pub scores: Vec<f64>,
}

impl Candidate {
    /// Best supporting confidence, if any rule supports this candidate.
    pub fn top_score(&self) -> Option<f64> {
        self.scores.first().copied()
    }
}

/// Rank one query's candidates by their supporting rules' confidences.
pub fn rank_candidates(
    candidates: &HashSet<Pair>,
    map: &CandidateMap,
    max_depth: usize,
) -> Vec<Candidate> {
    let collected: Vec<Candidate> = candidates
        .iter()
        .map(|pair| {
            let mut scores: Vec<f64> = map
                .get(pair)
                .map(|rules| rules.iter().map(|r| r.sc()).collect())
                .unwrap_or_default();
            scores.sort_by(|a, b| b.total_cmp(a));
            Candidate { pair: *pair, scores }
        })
        .collect();
    sort_ties(collected, 0, max_depth)
}

fn score_at(candidate: &Candidate, level: usize) -> Option<f64> {
    candidate.scores.get(level).copied()
}

fn compare_at(a: &Candidate, b: &Candidate, level: usize) -> Ordering {
    match (score_at(a, level), score_at(b, level)) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        // An exhausted vector orders after a longer one.
        _ => b.scores.len().cmp(&a.scores.len()),
    }
}

/// Sort at `level`, then recursively refine groups tied there.
pub(crate) fn sort_ties(
    mut candidates: Vec<Candidate>,
    level: usize,
    max_depth: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| compare_at(a, b, level));
    if level > max_depth {
        // Stop refining; whatever order the sort produced stands.
        return candidates;
    }

    let mut result = Vec::with_capacity(candidates.len());
    let mut group: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let tied = group.last().is_some_and(|prev| {
            match (score_at(prev, level), score_at(&candidate, level)) {
                (Some(p), Some(q)) => p == q,
                _ => false,
            }
        });
        if tied {
            group.push(candidate);
            continue;
        }
        flush_group(&mut result, group, level, max_depth);
        group = vec![candidate];
    }
    flush_group(&mut result, group, level, max_depth);
    result
}

fn flush_group(result: &mut Vec<Candidate>, group: Vec<Candidate>, level: usize, max_depth: usize) {
    if group.len() > 1 {
        result.extend(sort_ties(group, level + 1, max_depth));
    } else {
        result.extend(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    fn candidate(obj: u64, scores: &[f64]) -> Candidate {
        Candidate {
            pair: Pair::new(NodeId(1), NodeId(obj)),
            scores: scores.to_vec(),
        }
    }

    fn objs(ranked: &[Candidate]) -> Vec<u64> {
        ranked.iter().map(|c| c.pair.obj.0).collect()
    }

    #[test]
    fn ties_refine_at_deeper_positions() {
        let ranked = sort_ties(
            vec![
                candidate(10, &[0.9, 0.5]),
                candidate(11, &[0.9, 0.7]),
                candidate(12, &[0.3]),
            ],
            0,
            1000,
        );
        assert_eq!(objs(&ranked), vec![11, 10, 12]);
    }

    #[test]
    fn exhausted_vectors_order_after_longer_ones() {
        let ranked = sort_ties(
            vec![candidate(10, &[0.9]), candidate(11, &[0.9, 0.1])],
            0,
            1000,
        );
        // Tied at position 0; at position 1 the shorter vector loses.
        assert_eq!(objs(&ranked), vec![11, 10]);
    }

    #[test]
    fn depth_cap_keeps_current_order() {
        let ranked = sort_ties(
            vec![candidate(10, &[0.9, 0.5]), candidate(11, &[0.9, 0.7])],
            0,
            0,
        );
        // Refinement stops at level 1 with the level-1 sort applied; deeper
        // ties would stay as-is.
        assert_eq!(ranked.len(), 2);
        assert_eq!(objs(&ranked), vec![11, 10]);

        // With a tie stretching past the cap, position 2 is never consulted
        // and the stable sort keeps the incoming order.
        let ranked = sort_ties(
            vec![
                candidate(10, &[0.9, 0.7, 0.1]),
                candidate(11, &[0.9, 0.7, 0.9]),
            ],
            0,
            0,
        );
        assert_eq!(objs(&ranked), vec![10, 11]);
    }

    #[test]
    fn unsupported_candidates_sink() {
        let ranked = sort_ties(
            vec![candidate(10, &[]), candidate(11, &[0.2])],
            0,
            1000,
        );
        assert_eq!(objs(&ranked), vec![11, 10]);
    }

    #[test]
    fn rank_candidates_reads_supporting_confidences() {
        use crate::mine::apply::CandidateMap;
        use crate::rule::{AbstractRule, Atom, Pattern, SupportRule, Term};
        use std::sync::Arc;

        // One closed rule with sc set, supporting exactly one pair.
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
        rule.stats.set(3.0, 4.0, 4.0, 0.0);

        let supported = Pair::new(NodeId(1), NodeId(2));
        let unsupported = Pair::new(NodeId(1), NodeId(3));
        let mut map = CandidateMap::new();
        map.entry(supported)
            .or_default()
            .insert(SupportRule::Closed(Arc::new(rule)));

        let query: HashSet<Pair> = [supported, unsupported].into_iter().collect();
        let ranked = rank_candidates(&query, &map, 1000);
        assert_eq!(ranked[0].pair, supported);
        assert_eq!(ranked[0].top_score(), Some(0.75));
        assert!(ranked[1].top_score().is_none());
    }
}
