//! Engine facade: drives the full mining pipeline per target relation.
//!
//! For each target the engine reads (or creates) the train/test split, masks
//! the test edges while rules are sampled, instantiated, and scored, swaps
//! the masking to the train edges while rules are applied, and finally ranks
//! the candidates against the restored graph. Metrics are aggregated across
//! all learned relations. A failure inside one relation (a worker error or
//! an unreadable file) aborts that relation only and is reported; the batch
//! carries on.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{error, info, warn};

use crate::error::{ConfigError, SiaResult};
use crate::eval::{self, Metrics};
use crate::files;
use crate::graph::store::GraphStore;
use crate::graph::{EdgeId, Pair, RelId};
use crate::mine::context::RunContext;
use crate::mine::{apply, instantiate, sample};
use crate::rule::{AbstractRule, SupportRule};
use crate::settings::Settings;

/// Per-relation outcome.
#[derive(Debug, Clone)]
pub struct RelationReport {
    pub relation: String,
    pub instances: usize,
    pub abstract_rules: usize,
    pub refined_rules: usize,
    pub instantiated_rules: usize,
    pub candidates: usize,
    pub metrics: Metrics,
}

/// Aggregate outcome of a multi-relation run.
#[derive(Debug, Default)]
pub struct GlobalReport {
    pub learned: usize,
    pub skipped: usize,
    pub failed: usize,
    pub metrics: Metrics,
    pub learning_time: Duration,
    pub application_time: Duration,
    pub evaluation_time: Duration,
    pub relations: Vec<RelationReport>,
}

impl std::fmt::Display for GlobalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sia run report")?;
        writeln!(f, "  learned targets:  {}", self.learned)?;
        writeln!(f, "  skipped targets:  {}", self.skipped)?;
        writeln!(f, "  failed targets:   {}", self.failed)?;
        writeln!(f, "  hits@1:           {:.4}", self.metrics.hits1)?;
        writeln!(f, "  hits@3:           {:.4}", self.metrics.hits3)?;
        writeln!(f, "  hits@10:          {:.4}", self.metrics.hits10)?;
        writeln!(f, "  hits@100:         {:.4}", self.metrics.hits100)?;
        writeln!(f, "  MRR:              {:.4}", self.metrics.mrr)?;
        writeln!(f, "  rule learning:    {:.2?}", self.learning_time)?;
        writeln!(f, "  rule application: {:.2?}", self.application_time)?;
        writeln!(f, "  evaluation:       {:.2?}", self.evaluation_time)?;
        Ok(())
    }
}

/// The rule mining engine.
///
/// Owns the graph store, the validated settings, and the worker pool shared
/// by the parallel stages.
pub struct Engine {
    settings: Settings,
    store: GraphStore,
    pool: rayon::ThreadPool,
}

impl Engine {
    /// Load the graph named by the settings and build an engine.
    pub fn new(settings: Settings) -> SiaResult<Self> {
        settings.validate()?;
        let store = files::load_graph(&settings.graph_path())?;
        Self::with_store(settings, store)
    }

    /// Build an engine over an existing graph store.
    pub fn with_store(settings: Settings, store: GraphStore) -> SiaResult<Self> {
        settings.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "threads",
                message: format!("failed to build worker pool: {e}"),
            })?;
        let types = store.relation_types().len();
        info!(
            nodes = store.node_count(),
            edges = store.edge_count(),
            relation_types = types,
            threads = settings.threads,
            "engine initialized"
        );
        Ok(Self {
            settings,
            store,
            pool,
        })
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve the target relations: the configured list, or every type in
    /// the graph, optionally random-subsampled.
    fn targets(&self, rng: &mut StdRng) -> Vec<(RelId, String)> {
        if !self.settings.target_relations.is_empty() {
            return self
                .settings
                .target_relations
                .iter()
                .filter_map(|name| match self.store.rel_id(name) {
                    Some(rel) => Some((rel, name.clone())),
                    None => {
                        warn!(relation = %name, "target relation not present in graph, skipping");
                        None
                    }
                })
                .collect();
        }
        let mut targets: Vec<(RelId, String)> = self
            .store
            .relation_types()
            .into_iter()
            .filter_map(|rel| self.store.rel_name(rel).ok().map(|name| (rel, name)))
            .collect();
        targets.sort_by(|a, b| a.1.cmp(&b.1));
        targets.shuffle(rng);
        let cap = self.settings.randomly_selected_relations;
        if cap != 0 && cap < targets.len() {
            targets.truncate(cap);
        }
        targets
    }

    /// Create train/test splits for every target without mining.
    pub fn split(&self) -> SiaResult<()> {
        let mut rng = StdRng::from_entropy();
        let results = self.settings.results_dir();
        for (rel, name) in self.targets(&mut rng) {
            let dir = results.join(sanitize(&name));
            std::fs::create_dir_all(&dir).map_err(|e| crate::error::FileError::Io {
                path: dir.clone(),
                source: e,
            })?;
            self.create_split(rel, &dir, &mut rng)?;
        }
        Ok(())
    }

    /// Mine, apply, and evaluate rules for every target relation.
    ///
    /// With `resplit`, train/test files are re-created from the configured
    /// ratio; otherwise existing files are reused (and created when absent).
    pub fn run(&self, resplit: bool) -> SiaResult<GlobalReport> {
        let mut rng = StdRng::from_entropy();
        let results = self.settings.results_dir();
        std::fs::create_dir_all(&results).map_err(|e| crate::error::FileError::Io {
            path: results.clone(),
            source: e,
        })?;

        let targets = self.targets(&mut rng);
        let mut report = GlobalReport::default();
        let total = targets.len();

        for (index, (rel, name)) in targets.into_iter().enumerate() {
            info!(target = %name, "({}/{}) start learning", index + 1, total);
            let dir = results.join(sanitize(&name));
            let outcome = self.prepare_and_run(rel, &name, &dir, resplit, &mut rng, &mut report);
            match outcome {
                Ok(Some(relation)) => {
                    report.learned += 1;
                    report.relations.push(relation);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    // One bad relation does not abort the batch.
                    error!(target = %name, error = %e, "target relation failed");
                    report.failed += 1;
                }
            }
        }

        let n = report.relations.len() as f64;
        if n > 0.0 {
            report.metrics = Metrics {
                hits1: report.relations.iter().map(|r| r.metrics.hits1).sum::<f64>() / n,
                hits3: report.relations.iter().map(|r| r.metrics.hits3).sum::<f64>() / n,
                hits10: report.relations.iter().map(|r| r.metrics.hits10).sum::<f64>() / n,
                hits100: report.relations.iter().map(|r| r.metrics.hits100).sum::<f64>() / n,
                mrr: report.relations.iter().map(|r| r.metrics.mrr).sum::<f64>() / n,
            };
        }
        info!(
            learned = report.learned,
            skipped = report.skipped,
            failed = report.failed,
            mrr = report.metrics.mrr,
            "run finished"
        );
        Ok(report)
    }

    fn prepare_and_run(
        &self,
        rel: RelId,
        name: &str,
        dir: &Path,
        resplit: bool,
        rng: &mut StdRng,
        report: &mut GlobalReport,
    ) -> SiaResult<Option<RelationReport>> {
        std::fs::create_dir_all(dir).map_err(|e| crate::error::FileError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let train_file = dir.join("train.txt");
        let test_file = dir.join("test.txt");
        if resplit || !train_file.exists() || !test_file.exists() {
            self.create_split(rel, dir, rng)?;
        }
        self.run_target(name, dir, rng, report)
    }

    /// Shuffle the relation's instances and persist the ratio split.
    fn create_split(&self, rel: RelId, dir: &Path, rng: &mut StdRng) -> SiaResult<()> {
        let mut instances = self.store.instances_of(rel);
        instances.shuffle(rng);
        let train_size = (instances.len() as f64 * self.settings.split_ratio) as usize;
        files::write_instances(&self.store, &dir.join("train.txt"), &instances[..train_size])?;
        files::write_instances(&self.store, &dir.join("test.txt"), &instances[train_size..])?;
        info!(
            train = train_size,
            test = instances.len() - train_size,
            dir = %dir.display(),
            "created train/test split"
        );
        Ok(())
    }

    fn run_target(
        &self,
        name: &str,
        dir: &Path,
        rng: &mut StdRng,
        report: &mut GlobalReport,
    ) -> SiaResult<Option<RelationReport>> {
        let mut train = files::read_instances(&self.store, &dir.join("train.txt"))?;
        let mut test = files::read_instances(&self.store, &dir.join("test.txt"))?;
        train.shuffle(rng);
        test.shuffle(rng);

        let instances = train.len() + test.len();
        if instances < self.settings.min_instances {
            info!(
                target = %name,
                instances,
                min = self.settings.min_instances,
                "skipped: insufficient instances"
            );
            return Ok(None);
        }

        let mut ctx = RunContext::new();
        let train_pairs: HashSet<Pair> = train.iter().map(|i| i.to_pair()).collect();
        let test_pairs: HashSet<Pair> = test.iter().map(|i| i.to_pair()).collect();
        let train_edges: Vec<EdgeId> = train.iter().map(|i| i.edge).collect();
        let test_edges: Vec<EdgeId> = test.iter().map(|i| i.edge).collect();

        // Learning: the test edges must be invisible.
        let learn_timer = Instant::now();
        let rules = self.with_masked(&test_edges, |ctx, rng| {
            let outcome = sample::sample_rules(&self.store, name, &train, &self.settings, ctx, rng)?;
            info!(target = %name, patterns = outcome.patterns.len(), paths = outcome.paths_sampled, "sampling finished");
            let selected = sample::select_patterns(outcome.patterns, &self.settings, ctx, rng);
            self.pool.install(|| {
                instantiate::instantiate_rules(&self.store, &selected, &train_pairs, &self.settings, ctx)
            })
        }, &mut ctx, rng)?;
        report.learning_time += learn_timer.elapsed();

        let abstract_count = rules.len();
        let instantiated: Vec<SupportRule> = rules
            .iter()
            .flat_map(|r| r.children().cloned().map(SupportRule::Anchored))
            .collect();
        let refined: Vec<Arc<AbstractRule>> = rules
            .into_iter()
            .filter(|r| {
                r.stats
                    .refined(self.settings.support, self.settings.standard_conf)
            })
            .map(Arc::new)
            .collect();
        info!(
            target = %name,
            refined = refined.len(),
            instantiated = instantiated.len(),
            "rules refined"
        );

        let mut persisted: Vec<SupportRule> = refined
            .iter()
            .filter(|r| r.is_closed())
            .map(|r| SupportRule::Closed(Arc::clone(r)))
            .collect();
        persisted.extend(instantiated.iter().cloned());
        files::write_rules(&dir.join("rules.txt"), &persisted)?;

        // Application: the train edges must be invisible, the test edges back.
        let apply_timer = Instant::now();
        let candidates = self.with_masked(&train_edges, |ctx, _rng| {
            self.pool.install(|| {
                apply::apply_rules(
                    &self.store,
                    &refined,
                    &train_pairs,
                    &test_pairs,
                    &self.settings,
                    ctx,
                )
            })
        }, &mut ctx, rng)?;
        report.application_time += apply_timer.elapsed();

        // Evaluation over the fully restored graph.
        let eval_timer = Instant::now();
        let queries = eval::build_queries(
            self.settings.eval_protocol,
            &test_pairs,
            &candidates,
            &mut ctx,
        );
        let (ranked, metrics) = self
            .pool
            .install(|| eval::evaluate(&queries, &candidates, &test_pairs, &self.settings, &ctx));
        report.evaluation_time += eval_timer.elapsed();

        files::write_predictions(
            &self.store,
            &dir.join("predictions.txt"),
            name,
            &ranked,
            self.settings.top_k,
        )?;
        files::write_verifications(
            &self.store,
            &dir.join("verifications.txt"),
            name,
            &ranked,
            &candidates,
            self.settings.verify_prediction_size,
            self.settings.verify_rule_size,
        )?;

        Ok(Some(RelationReport {
            relation: name.to_string(),
            instances,
            abstract_rules: abstract_count,
            refined_rules: refined.len(),
            instantiated_rules: instantiated.len(),
            candidates: candidates.len(),
            metrics,
        }))
    }

    /// Run `f` inside a masking window, restoring the edges afterwards even
    /// when the stage fails.
    fn with_masked<T>(
        &self,
        edges: &[EdgeId],
        f: impl FnOnce(&mut RunContext, &mut StdRng) -> SiaResult<T>,
        ctx: &mut RunContext,
        rng: &mut StdRng,
    ) -> SiaResult<T> {
        self.store.mask_edges(edges)?;
        let result = f(ctx, rng);
        let restored = self.store.unmask_edges(edges);
        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("threads", &self.settings.threads)
            .finish()
    }
}

/// Relation names may carry characters unfit for directories.
fn sanitize(name: &str) -> String {
    name.replace(['/', ':', '\\'], "_")
}
