//! Path sampling: random-walk discovery of abstract rule patterns.
//!
//! For a known instance of the target relation, the sampler walks outward
//! from both endpoints in breadth-first order, expanding at each node to a
//! bounded random subset of incident edges (the "walker width"). Every
//! admitted path abstracts into one rule pattern: the path edges become body
//! atoms and the instance becomes the head.
//!
//! Admission rules, in order: the stored inverse of the instance edge is
//! admitted as a one-hop closed path and pruned; any other one-hop path over
//! the target relation that closes is rejected (it is the instance itself or
//! a parallel duplicate); a path closing back to the instance's opposite
//! endpoint is admitted and pruned when walked from the path's own start,
//! rejected otherwise; paths returning to their own start are rejected; and
//! everything else is admitted up to the depth bound.

use std::collections::{HashSet, VecDeque};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{MineError, SiaResult};
use crate::graph::store::GraphStore;
use crate::graph::{EdgeRef, Instance, NodeId};
use crate::rule::{Atom, InstantiatedRule, Pattern};
use crate::settings::{SamplerStrategy, Settings};

use super::context::RunContext;

/// A sampled walk: `nodes.len() == steps.len() + 1`.
#[derive(Debug, Clone)]
pub struct SampledPath {
    pub nodes: Vec<NodeId>,
    pub steps: Vec<EdgeRef>,
}

impl SampledPath {
    fn seed(start: NodeId) -> Self {
        Self {
            nodes: vec![start],
            steps: vec![],
        }
    }

    fn extended(&self, edge: EdgeRef) -> Self {
        let last = *self.nodes.last().expect("paths are non-empty");
        let mut nodes = self.nodes.clone();
        nodes.push(edge.other(last));
        let mut steps = self.steps.clone();
        steps.push(edge);
        Self { nodes, steps }
    }

    pub fn start(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn end(&self) -> NodeId {
        *self.nodes.last().expect("paths are non-empty")
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Pick at most `width` distinct incident edges of `node`, uniformly.
fn random_edges<R: Rng>(store: &GraphStore, node: NodeId, width: usize, rng: &mut R) -> Vec<EdgeRef> {
    let edges = store.incident_edges(node);
    if edges.len() <= width {
        return edges;
    }
    rand::seq::index::sample(rng, edges.len(), width)
        .into_iter()
        .map(|i| edges[i])
        .collect()
}

/// Sample admissible paths around one instance, breadth-first, from both
/// endpoints.
pub fn sample_instance_paths<R: Rng>(
    store: &GraphStore,
    instance: &Instance,
    depth: usize,
    width: usize,
    rng: &mut R,
) -> Vec<SampledPath> {
    let mut admitted = Vec::new();
    let mut queue: VecDeque<SampledPath> = VecDeque::new();
    queue.push_back(SampledPath::seed(instance.sub));
    if instance.obj != instance.sub {
        queue.push_back(SampledPath::seed(instance.obj));
    }

    while let Some(path) = queue.pop_front() {
        let frontier = path.end();
        for edge in random_edges(store, frontier, width, rng) {
            let next = edge.other(frontier);
            if path.nodes.contains(&next) {
                continue;
            }
            let candidate = path.extended(edge);
            let len = candidate.len();
            let has_target = edge.rel == instance.rel;
            let from_source = candidate.start() == instance.sub;
            let opposite = if from_source { instance.obj } else { instance.sub };
            let closed = candidate.end() == opposite;

            // The stored inverse of the instance edge: a closed one-hop rule.
            if len == 1
                && has_target
                && edge.source == instance.obj
                && edge.target == instance.sub
            {
                admitted.push(candidate);
                continue;
            }
            // The instance edge itself, or a parallel duplicate.
            if len == 1 && has_target && closed {
                continue;
            }
            if closed {
                if from_source {
                    admitted.push(candidate);
                }
                continue;
            }
            if candidate.end() == candidate.start() {
                continue;
            }
            if len <= depth {
                admitted.push(candidate.clone());
            }
            if len < depth {
                queue.push_back(candidate);
            }
        }
    }

    admitted
}

/// Abstract a sampled path into a rule pattern for `instance`'s relation.
pub fn abstract_pattern(
    store: &GraphStore,
    instance: &Instance,
    path: &SampledPath,
) -> Result<Pattern, MineError> {
    let head = Atom::head_of(store, instance)?;
    let mut body = Vec::with_capacity(path.len());
    for (i, step) in path.steps.iter().enumerate() {
        body.push(Atom::from_step(store, path.nodes[i], step)?);
    }
    Ok(Pattern::abstracted(head, body)?)
}

/// Anchored children implied by the sampled instance/path, gated by the
/// rule-type toggles.
fn sampled_children(
    store: &GraphStore,
    pattern: &Pattern,
    instance: &Instance,
    path: &SampledPath,
    settings: &Settings,
) -> Result<Vec<InstantiatedRule>, MineError> {
    let anchor = if pattern.from_subject() {
        instance.obj
    } else {
        instance.sub
    };
    let anchor_name = store.node_name(anchor)?;
    let tail = path.end();
    let tail_name = store.node_name(tail)?;

    let mut children = Vec::new();
    if settings.use_head_rules {
        children.push(InstantiatedRule::head_anchored(pattern, anchor, &anchor_name));
    }
    if settings.use_tail_rules {
        children.push(InstantiatedRule::tail_anchored(pattern, tail, &tail_name));
    }
    if settings.use_both_rules {
        children.push(InstantiatedRule::both_anchored(
            pattern,
            anchor,
            &anchor_name,
            tail,
            &tail_name,
        ));
    }
    Ok(children)
}

/// Outcome of a sampling pass.
#[derive(Debug)]
pub struct SampleOutcome {
    /// Deduplicated abstract patterns, in no particular order.
    pub patterns: Vec<Pattern>,
    /// Paths admitted across the whole pass.
    pub paths_sampled: usize,
}

/// Walker widths used by the narrow and wide samplers.
const NARROW_WALKERS: usize = 2;
const WIDE_WALKERS: usize = 50;

/// Consecutive path-less sampling rounds tolerated before giving up on
/// saturation; keeps degenerate graphs from spinning the batch loop forever.
const MAX_EMPTY_ROUNDS: usize = 64;

/// Run the configured sampling strategy over the training instances.
///
/// Fills the context's frequency table and, for the progressive strategy,
/// the sampled-children and anchoring tables consumed by the `Sampled`
/// instantiation policy.
pub fn sample_rules<R: Rng>(
    store: &GraphStore,
    relation: &str,
    train: &[Instance],
    settings: &Settings,
    ctx: &mut RunContext,
    rng: &mut R,
) -> SiaResult<SampleOutcome> {
    if train.is_empty() {
        return Err(MineError::NoInstances {
            relation: relation.to_string(),
        }
        .into());
    }

    let outcome = match settings.sampler {
        SamplerStrategy::Rough => {
            // The first fine_sample_size instances are reserved for the fine
            // sampler.
            let to = train.len().min(settings.rough_sample_size);
            let from = train.len().min(settings.fine_sample_size).min(to);
            one_pass(store, &train[from..to], NARROW_WALKERS, settings, ctx, rng)?
        }
        SamplerStrategy::Fine => {
            let to = train.len().min(settings.fine_sample_size);
            one_pass(store, &train[..to], WIDE_WALKERS, settings, ctx, rng)?
        }
        SamplerStrategy::Regular => saturating(store, train, false, settings, ctx, rng)?,
        SamplerStrategy::RegularAll => saturating(store, train, true, settings, ctx, rng)?,
        SamplerStrategy::Progressive => progressive(store, train, settings, ctx, rng)?,
    };

    debug!(
        patterns = outcome.patterns.len(),
        paths = outcome.paths_sampled,
        "path sampling finished"
    );
    Ok(outcome)
}

/// Rough/fine sampling: one pass over a fixed instance sample.
fn one_pass<R: Rng>(
    store: &GraphStore,
    instances: &[Instance],
    width: usize,
    settings: &Settings,
    ctx: &mut RunContext,
    rng: &mut R,
) -> SiaResult<SampleOutcome> {
    let mut patterns: HashSet<Pattern> = HashSet::new();
    let mut paths_sampled = 0;
    for instance in instances {
        for path in sample_instance_paths(store, instance, settings.depth, width, rng) {
            paths_sampled += 1;
            let pattern = abstract_pattern(store, instance, &path)?;
            ctx.note_sampled(pattern.clone());
            patterns.insert(pattern);
        }
    }
    Ok(SampleOutcome {
        patterns: patterns.into_iter().collect(),
        paths_sampled,
    })
}

/// Regular sampling: batched saturation over random instances.
fn saturating<R: Rng>(
    store: &GraphStore,
    train: &[Instance],
    count_children: bool,
    settings: &Settings,
    ctx: &mut RunContext,
    rng: &mut R,
) -> SiaResult<SampleOutcome> {
    let mut previous: HashSet<String> = HashSet::new();
    let mut current: HashSet<String> = HashSet::new();
    let mut saturation = 0.0f64;
    let mut paths_sampled = 0usize;
    let mut empty_rounds = 0usize;

    while saturation < settings.saturation {
        let instance = &train[rng.gen_range(0..train.len())];
        let paths = sample_instance_paths(store, instance, settings.depth, WIDE_WALKERS, rng);
        if paths.is_empty() {
            empty_rounds += 1;
            if empty_rounds > MAX_EMPTY_ROUNDS {
                warn!("no paths sampled in {MAX_EMPTY_ROUNDS} consecutive rounds, stopping");
                break;
            }
            continue;
        }
        empty_rounds = 0;

        for path in paths {
            paths_sampled += 1;
            if paths_sampled % settings.batch_size == 0 {
                saturation = batch_overlap(&previous, &current);
                previous.extend(current.drain());
            }
            let pattern = abstract_pattern(store, instance, &path)?;
            current.insert(pattern.to_string());
            if count_children && !pattern.is_closed() {
                for child in sampled_children(store, &pattern, instance, &path, settings)? {
                    current.insert(child.to_string());
                }
            }
            ctx.note_sampled(pattern);
        }
    }

    Ok(SampleOutcome {
        patterns: ctx.rule_frequency.keys().cloned().collect(),
        paths_sampled,
    })
}

/// Progressive sampling: saturate shallow rules first, then deepen.
fn progressive<R: Rng>(
    store: &GraphStore,
    train: &[Instance],
    settings: &Settings,
    ctx: &mut RunContext,
    rng: &mut R,
) -> SiaResult<SampleOutcome> {
    let mut patterns: HashSet<Pattern> = HashSet::new();
    let mut previous: HashSet<String> = HashSet::new();
    let mut current: HashSet<String> = HashSet::new();
    let mut paths_sampled = 0usize;
    let mut empty_rounds = 0usize;
    let mut depth = 1usize;

    while depth <= settings.depth {
        let instance = &train[rng.gen_range(0..train.len())];
        let paths = sample_instance_paths(store, instance, depth, NARROW_WALKERS, rng);
        if paths.is_empty() {
            empty_rounds += 1;
            if empty_rounds > MAX_EMPTY_ROUNDS {
                warn!("no paths sampled in {MAX_EMPTY_ROUNDS} consecutive rounds, stopping");
                break;
            }
            continue;
        }
        empty_rounds = 0;

        for path in paths {
            paths_sampled += 1;
            if paths_sampled % settings.batch_size == 0 {
                if !previous.is_empty() && batch_overlap(&previous, &current) >= settings.saturation
                {
                    depth += 1;
                }
                previous.extend(current.drain());
            }

            let pattern = abstract_pattern(store, instance, &path)?;
            let anchoring = if pattern.from_subject() {
                instance.obj
            } else {
                instance.sub
            };
            ctx.note_anchoring(pattern.clone(), anchoring);
            current.insert(pattern.to_string());
            if !pattern.is_closed() {
                for child in sampled_children(store, &pattern, instance, &path, settings)? {
                    current.insert(child.to_string());
                    ctx.note_child(pattern.clone(), child);
                }
            }
            patterns.insert(pattern.clone());
            ctx.note_sampled(pattern);
        }
    }

    Ok(SampleOutcome {
        patterns: patterns.into_iter().collect(),
        paths_sampled,
    })
}

/// Share of the current batch already seen in earlier batches. An empty
/// current batch counts as fully saturated.
fn batch_overlap(previous: &HashSet<String>, current: &HashSet<String>) -> f64 {
    if current.is_empty() {
        return 1.0;
    }
    let overlap = current.iter().filter(|r| previous.contains(*r)).count();
    overlap as f64 / current.len() as f64
}

/// Keep the closed patterns plus the top open patterns by sampling frequency
/// (or a uniform random subset when configured).
pub fn select_patterns<R: Rng>(
    patterns: Vec<Pattern>,
    settings: &Settings,
    ctx: &RunContext,
    rng: &mut R,
) -> Vec<Pattern> {
    let cap = settings.top_abs_rules_cap();
    let (closed, mut open): (Vec<Pattern>, Vec<Pattern>) =
        patterns.into_iter().partition(|p| p.is_closed());
    if open.len() > cap {
        if settings.random_abstract_sample {
            open = rand::seq::index::sample(rng, open.len(), cap)
                .into_iter()
                .map(|i| open[i].clone())
                .collect();
        } else {
            open.sort_by_key(|p| std::cmp::Reverse(ctx.rule_frequency.get(p).copied().unwrap_or(0)));
            open.truncate(cap);
        }
    }
    let mut result = closed;
    result.extend(open);
    result
}
