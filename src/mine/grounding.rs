//! Bounded body grounding: path-pattern subgraph matching.
//!
//! Grounding enumerates concrete paths that instantiate a rule body: it seeds
//! from every active edge matching the first atom's (type, direction) and
//! extends depth-first, following only edges that match the next atom, never
//! revisiting a node within one path. Results are a capped sample:
//! the grounding-count cap and the attempt cap both stop the search early,
//! and neither is an error.

use std::collections::HashSet;

use crate::graph::store::GraphStore;
use crate::graph::{NodeId, Pair};
use crate::rule::Pattern;
use crate::settings::Settings;

/// Which grounding budget applies: scoring rules or suggesting facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingMode {
    Learn,
    Apply,
}

/// Enumerate groundings of `pattern`'s body as (origin, terminal) pairs.
///
/// The origin is the near endpoint of the first body atom, the terminal the
/// far endpoint of the last. Tail- and both-anchored patterns only accept
/// groundings ending at their bound tail. The result set is deduplicated.
pub fn ground_body(
    store: &GraphStore,
    pattern: &Pattern,
    mode: GroundingMode,
    settings: &Settings,
) -> HashSet<Pair> {
    let count_cap = match mode {
        GroundingMode::Learn => settings.learn_groundings_cap(),
        GroundingMode::Apply => settings.apply_groundings_cap(),
    };
    let attempt_cap = settings.grounding_attempts_cap();
    let tail = pattern.tail_constant();
    let body = pattern.body();
    let body_len = body.len();

    let mut groundings: HashSet<Pair> = HashSet::new();
    let mut attempts: usize = 0;
    // Partial paths as node sequences; one atom consumed per extra node.
    let mut stack: Vec<Vec<NodeId>> = Vec::new();

    let first = &body[0];
    for seed in store.edges_of_type(first.rel) {
        attempts += 1;
        let origin = match first.dir {
            crate::graph::Dir::Forward => seed.source,
            crate::graph::Dir::Inverse => seed.target,
        };
        stack.push(vec![origin, seed.other(origin)]);

        while let Some(path) = stack.pop() {
            let depth = path.len() - 1;
            let last = *path.last().expect("paths are non-empty");

            if depth >= body_len {
                if let Some(t) = tail {
                    if t != last {
                        continue;
                    }
                }
                groundings.insert(Pair::new(path[0], last));
                if groundings.len() >= count_cap || attempts >= attempt_cap {
                    return groundings;
                }
                continue;
            }

            let atom = &body[depth];
            for edge in store.neighbors(last, atom.rel, atom.dir) {
                attempts += 1;
                let next = edge.other(last);
                if !path.contains(&next) {
                    let mut extended = path.clone();
                    extended.push(next);
                    stack.push(extended);
                }
            }
        }
    }

    groundings
}
