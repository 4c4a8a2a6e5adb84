//! # sia
//!
//! A rule mining and link-prediction engine for knowledge graphs. For a
//! target relation, sia samples paths around known edges into abstract rule
//! patterns, specializes them into anchored rules, scores every rule against
//! held-out training pairs, applies the qualified rules to suggest missing
//! edges, and ranks the suggestions per query with hit@k/MRR reporting.
//!
//! ## Architecture
//!
//! - **Graph substrate** (`graph`): petgraph + DashMap dual-indexed store
//!   with train/test edge masking
//! - **Rules** (`rule`): immutable patterns with tagged abstract/anchored
//!   variants and per-rule statistics
//! - **Mining** (`mine`): path sampling, bounded grounding, parallel
//!   instantiation and application
//! - **Evaluation** (`eval`): protocol queries, tie-broken ranking, hit@k
//!   and MRR
//! - **Orchestration** (`engine`): per-relation sequencing, masking windows,
//!   metric aggregation
//!
//! ## Library usage
//!
//! ```no_run
//! use sia::engine::Engine;
//! use sia::settings::Settings;
//!
//! let settings = Settings {
//!     home: "/data/wn18".into(),
//!     graph_file: "graph.txt".into(),
//!     target_relations: vec!["hypernym".into()],
//!     ..Default::default()
//! };
//! let engine = Engine::new(settings).unwrap();
//! let report = engine.run(true).unwrap();
//! println!("{report}");
//! ```

pub mod engine;
pub mod error;
pub mod eval;
pub mod files;
pub mod graph;
pub mod mine;
pub mod rule;
pub mod settings;
