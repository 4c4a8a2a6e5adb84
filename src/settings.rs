//! Run configuration: thresholds, caps, strategy selection.
//!
//! Settings are loaded from a JSON file with serde defaults for everything
//! but the data locations. Malformed or out-of-range values are fatal at
//! startup. By convention a zero on any cap means "unbounded"; use the
//! `*_cap()` accessors rather than the raw fields when enforcing limits.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SiaResult};

/// Evaluation protocol: how test pairs become ranking queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Subject and object queries from every test pair, metric contributions
    /// weighted by per-entity query repeats.
    TransE,
    /// Subject and object queries, unweighted.
    Minerva,
    /// Distinct subject and object queries, unweighted.
    #[serde(rename = "GPFL")]
    Gpfl,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::TransE => write!(f, "TransE"),
            Protocol::Minerva => write!(f, "Minerva"),
            Protocol::Gpfl => write!(f, "GPFL"),
        }
    }
}

/// Path sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplerStrategy {
    /// Batched saturation sampling over random instances.
    Regular,
    /// As `Regular`, but anchored sampling byproducts count toward
    /// saturation too.
    RegularAll,
    /// Saturation at depth 1 first, then progressively deeper.
    Progressive,
    /// One pass over a fixed instance sample with a narrow walker.
    Rough,
    /// One pass over a small instance sample with a wide walker.
    Fine,
}

/// How instantiated rules are generated during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstantiationPolicy {
    /// Evaluate only the anchored children collected as sampling byproducts.
    Sampled,
    /// Generalize then specialize: anchor at the top-ranked entities from
    /// the training set and the top-ranked tails from body groundings.
    Ranked,
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Working directory: the graph file lives here and per-relation result
    /// directories are created under `<home>/results/`.
    pub home: PathBuf,
    /// Graph triples file, relative to `home`.
    pub graph_file: PathBuf,

    /// Target relations to mine. Empty means every type in the graph.
    #[serde(default)]
    pub target_relations: Vec<String>,
    /// When non-zero and targets are discovered from the graph, mine only
    /// this many randomly chosen types.
    #[serde(default)]
    pub randomly_selected_relations: usize,
    /// Fraction of instances that go to the training split.
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f64,
    /// Relations with fewer instances than this are skipped.
    #[serde(default = "default_min_instances")]
    pub min_instances: usize,

    /// Maximum body length of mined rules.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Paths sampled between saturation checks.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Batch overlap ratio at which sampling stops.
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    #[serde(default = "default_sampler")]
    pub sampler: SamplerStrategy,
    /// Instance sample for the rough sampler.
    #[serde(default = "default_rough_sample_size")]
    pub rough_sample_size: usize,
    /// Instance sample for the fine sampler.
    #[serde(default = "default_fine_sample_size")]
    pub fine_sample_size: usize,
    /// Keep only this many open patterns, ranked by sampling frequency.
    /// Closed patterns always survive. Zero keeps all.
    #[serde(default = "default_top_abs_rules")]
    pub top_abs_rules: usize,
    /// Select the retained open patterns uniformly at random instead of by
    /// sampling frequency.
    #[serde(default)]
    pub random_abstract_sample: bool,

    #[serde(default = "default_policy")]
    pub instantiation: InstantiationPolicy,
    /// Support threshold for qualification and refinement.
    #[serde(default = "default_support")]
    pub support: f64,
    /// Standard-confidence threshold for qualification and refinement.
    #[serde(default = "default_standard_conf")]
    pub standard_conf: f64,
    /// Laplace smoothing added to the confidence denominator.
    #[serde(default = "default_conf_offset")]
    pub conf_offset: f64,
    /// Head anchorings considered per open rule. Zero = unbounded.
    #[serde(default = "default_head_cap")]
    pub head_cap: usize,
    /// Tail anchorings considered per open rule. Zero = unbounded.
    #[serde(default = "default_tail_cap")]
    pub tail_cap: usize,
    /// Global cap on instantiated rules per relation run. Zero = unbounded.
    #[serde(default = "default_ins_rule_cap")]
    pub ins_rule_cap: usize,
    /// Per-bucket cap on predictions made while scoring one open rule.
    /// Zero = unbounded.
    #[serde(default = "default_prediction_cap")]
    pub prediction_cap: usize,

    /// Grounding-count cap while scoring rules. Zero = unbounded.
    #[serde(default = "default_learn_groundings")]
    pub learn_groundings: usize,
    /// Grounding-count cap while applying rules. Zero = unbounded.
    #[serde(default = "default_apply_groundings")]
    pub apply_groundings: usize,
    /// Edges examined (success or failure) before a grounding search stops.
    /// Zero = unbounded.
    #[serde(default = "default_grounding_attempts")]
    pub grounding_attempts: usize,

    /// Top-ranked instantiated rules applied per bucket. Zero = all.
    #[serde(default = "default_top_ins_rules")]
    pub top_ins_rules: usize,
    /// Global cap on emitted candidate predictions. Zero = unbounded.
    #[serde(default = "default_suggestion_cap")]
    pub suggestion_cap: usize,

    #[serde(default = "default_protocol")]
    pub eval_protocol: Protocol,
    /// Ranked predictions written per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Tie-break refinement depth; deeper ties keep their current order.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Supporting rules written per verified prediction.
    #[serde(default = "default_verify_rule_size")]
    pub verify_rule_size: usize,
    /// Predictions retained per query in the verification file.
    #[serde(default = "default_verify_prediction_size")]
    pub verify_prediction_size: usize,

    /// Worker threads for the parallel stages.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Generate head-anchored rules.
    #[serde(default = "default_true")]
    pub use_head_rules: bool,
    /// Generate tail-anchored rules.
    #[serde(default)]
    pub use_tail_rules: bool,
    /// Generate both-anchored rules.
    #[serde(default = "default_true")]
    pub use_both_rules: bool,
}

fn default_split_ratio() -> f64 { 0.7 }
fn default_min_instances() -> usize { 50 }
fn default_depth() -> usize { 3 }
fn default_batch_size() -> usize { 20_000 }
fn default_saturation() -> f64 { 0.99 }
fn default_sampler() -> SamplerStrategy { SamplerStrategy::Regular }
fn default_rough_sample_size() -> usize { 1000 }
fn default_fine_sample_size() -> usize { 200 }
fn default_top_abs_rules() -> usize { 500 }
fn default_policy() -> InstantiationPolicy { InstantiationPolicy::Ranked }
fn default_support() -> f64 { 1.0 }
fn default_standard_conf() -> f64 { 0.0001 }
fn default_conf_offset() -> f64 { 5.0 }
fn default_head_cap() -> usize { 2000 }
fn default_tail_cap() -> usize { 2000 }
fn default_ins_rule_cap() -> usize { 15_000_000 }
fn default_prediction_cap() -> usize { 10_000_000 }
fn default_learn_groundings() -> usize { 5000 }
fn default_apply_groundings() -> usize { 1000 }
fn default_grounding_attempts() -> usize { 10_000_000 }
fn default_top_ins_rules() -> usize { 200 }
fn default_suggestion_cap() -> usize { 15_000_000 }
fn default_protocol() -> Protocol { Protocol::TransE }
fn default_top_k() -> usize { 10 }
fn default_max_recursion_depth() -> usize { 1000 }
fn default_verify_rule_size() -> usize { 10 }
fn default_verify_prediction_size() -> usize { 20 }
fn default_threads() -> usize { 6 }
fn default_true() -> bool { true }

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: PathBuf::from("."),
            graph_file: PathBuf::from("graph.txt"),
            target_relations: Vec::new(),
            randomly_selected_relations: 0,
            split_ratio: default_split_ratio(),
            min_instances: default_min_instances(),
            depth: default_depth(),
            batch_size: default_batch_size(),
            saturation: default_saturation(),
            sampler: default_sampler(),
            rough_sample_size: default_rough_sample_size(),
            fine_sample_size: default_fine_sample_size(),
            top_abs_rules: default_top_abs_rules(),
            random_abstract_sample: false,
            instantiation: default_policy(),
            support: default_support(),
            standard_conf: default_standard_conf(),
            conf_offset: default_conf_offset(),
            head_cap: default_head_cap(),
            tail_cap: default_tail_cap(),
            ins_rule_cap: default_ins_rule_cap(),
            prediction_cap: default_prediction_cap(),
            learn_groundings: default_learn_groundings(),
            apply_groundings: default_apply_groundings(),
            grounding_attempts: default_grounding_attempts(),
            top_ins_rules: default_top_ins_rules(),
            suggestion_cap: default_suggestion_cap(),
            eval_protocol: default_protocol(),
            top_k: default_top_k(),
            max_recursion_depth: default_max_recursion_depth(),
            verify_rule_size: default_verify_rule_size(),
            verify_prediction_size: default_verify_prediction_size(),
            threads: default_threads(),
            use_head_rules: true,
            use_tail_rules: false,
            use_both_rules: true,
        }
    }
}

/// Zero means unbounded.
fn cap(value: usize) -> usize {
    if value == 0 { usize::MAX } else { value }
}

impl Settings {
    /// Load settings from a JSON file and validate them.
    pub fn load(path: &Path) -> SiaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate ranges; called at startup, errors are fatal.
    pub fn validate(&self) -> SiaResult<()> {
        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            return Err(ConfigError::Invalid {
                field: "split_ratio",
                message: format!("must be in (0, 1), got {}", self.split_ratio),
            }
            .into());
        }
        if !(self.saturation > 0.0 && self.saturation <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "saturation",
                message: format!("must be in (0, 1], got {}", self.saturation),
            }
            .into());
        }
        if self.depth == 0 {
            return Err(ConfigError::Invalid {
                field: "depth",
                message: "rules need a body of at least one atom".into(),
            }
            .into());
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                message: "saturation checks need a positive batch size".into(),
            }
            .into());
        }
        if self.threads == 0 {
            return Err(ConfigError::Invalid {
                field: "threads",
                message: "at least one worker thread is required".into(),
            }
            .into());
        }
        if self.standard_conf < 0.0 || self.conf_offset < 0.0 {
            return Err(ConfigError::Invalid {
                field: "standard_conf",
                message: "confidence threshold and offset must be non-negative".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Path to the graph triples file.
    pub fn graph_path(&self) -> PathBuf {
        self.home.join(&self.graph_file)
    }

    /// Per-relation results directory.
    pub fn results_dir(&self) -> PathBuf {
        self.home.join("results")
    }

    pub fn learn_groundings_cap(&self) -> usize {
        cap(self.learn_groundings)
    }

    pub fn apply_groundings_cap(&self) -> usize {
        cap(self.apply_groundings)
    }

    pub fn grounding_attempts_cap(&self) -> usize {
        cap(self.grounding_attempts)
    }

    pub fn head_anchor_cap(&self) -> usize {
        cap(self.head_cap)
    }

    pub fn tail_anchor_cap(&self) -> usize {
        cap(self.tail_cap)
    }

    pub fn ins_rule_count_cap(&self) -> usize {
        cap(self.ins_rule_cap)
    }

    pub fn prediction_count_cap(&self) -> usize {
        cap(self.prediction_cap)
    }

    pub fn top_ins_rules_cap(&self) -> usize {
        cap(self.top_ins_rules)
    }

    pub fn top_abs_rules_cap(&self) -> usize {
        cap(self.top_abs_rules)
    }

    pub fn suggestion_count_cap(&self) -> usize {
        cap(self.suggestion_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.eval_protocol, Protocol::TransE);
        assert_eq!(settings.sampler, SamplerStrategy::Regular);
        assert!(settings.use_head_rules);
        assert!(!settings.use_tail_rules);
    }

    #[test]
    fn zero_caps_mean_unbounded() {
        let settings = Settings {
            learn_groundings: 0,
            top_ins_rules: 0,
            suggestion_cap: 0,
            ..Default::default()
        };
        assert_eq!(settings.learn_groundings_cap(), usize::MAX);
        assert_eq!(settings.top_ins_rules_cap(), usize::MAX);
        assert_eq!(settings.suggestion_count_cap(), usize::MAX);
        assert_eq!(settings.apply_groundings_cap(), 1000);
    }

    #[test]
    fn bad_split_ratio_is_fatal() {
        let settings = Settings {
            split_ratio: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn parse_from_json() {
        let json = r#"{
            "home": "/tmp/wn18",
            "graph_file": "graph.txt",
            "depth": 2,
            "eval_protocol": "GPFL",
            "sampler": "progressive",
            "instantiation": "sampled",
            "target_relations": ["hypernym"]
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.depth, 2);
        assert_eq!(settings.eval_protocol, Protocol::Gpfl);
        assert_eq!(settings.sampler, SamplerStrategy::Progressive);
        assert_eq!(settings.instantiation, InstantiationPolicy::Sampled);
        assert_eq!(settings.target_relations, vec!["hypernym".to_string()]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let json = r#"{"home": "/tmp", "graph_file": "g.txt", "split_ration": 0.8}"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }
}
