//! Rich diagnostic error types for the sia engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the sia engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum SiaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Mine(#[from] MineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    File(#[from] FileError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    #[diagnostic(
        code(sia::config::read),
        help("Check that the path exists and is readable.")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {message}", path.display())]
    #[diagnostic(
        code(sia::config::parse),
        help("The configuration must be a JSON object. See the README for the recognized keys.")
    )]
    Parse { path: PathBuf, message: String },

    #[error("invalid setting `{field}`: {message}")]
    #[diagnostic(
        code(sia::config::invalid),
        help("Fix the offending value in the configuration file and re-run.")
    )]
    Invalid { field: &'static str, message: String },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node not found: {id}")]
    #[diagnostic(
        code(sia::graph::node_not_found),
        help(
            "The node id has no entry in the graph store. Node ids are only \
             stable within a single run; check that the id comes from this run's graph."
        )
    )]
    NodeNotFound { id: u64 },

    #[error("edge not found: {id}")]
    #[diagnostic(
        code(sia::graph::edge_not_found),
        help(
            "The edge id has no entry in the graph store. Instance files reference \
             edges by id; re-create the train/test split if the graph was rebuilt."
        )
    )]
    EdgeNotFound { id: u64 },

    #[error("unknown relation type: {name}")]
    #[diagnostic(
        code(sia::graph::unknown_relation),
        help("No edge with this relation type exists in the graph.")
    )]
    UnknownRelation { name: String },
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("cannot build a rule pattern from an empty path")]
    #[diagnostic(
        code(sia::rule::empty_body),
        help("A rule body needs at least one atom; sampled paths of length 0 are not rules.")
    )]
    EmptyBody,
}

// ---------------------------------------------------------------------------
// Mining errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MineError {
    #[error("no training instances for relation `{relation}`")]
    #[diagnostic(
        code(sia::mine::no_instances),
        help(
            "The path sampler needs at least one training instance to walk from. \
             Check the train file for this relation."
        )
    )]
    NoInstances { relation: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),
}

// ---------------------------------------------------------------------------
// Evaluation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// File errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FileError {
    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(
        code(sia::file::io),
        help(
            "A filesystem operation failed. Check that the results directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed line {line} in {}: {message}", path.display())]
    #[diagnostic(
        code(sia::file::parse),
        help(
            "Instance files are tab-separated: <edgeId>\\t<subject>\\t<relation>\\t<object>. \
             Re-create the train/test split if the file was edited by hand."
        )
    )]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Convenience alias for functions returning sia results.
pub type SiaResult<T> = std::result::Result<T, SiaError>;
