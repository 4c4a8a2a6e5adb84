//! Line-oriented, tab-separated file formats.
//!
//! Per target relation: `train.txt`/`test.txt` (instances by edge id),
//! `rules.txt` (kind-tagged rules, descending confidence),
//! `predictions.txt` (top-k ranked facts per query), and
//! `verifications.txt` (supporting rules per retained prediction). The graph
//! itself loads from a flat triples file. I/O failures abort the current
//! target relation only.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{FileError, SiaResult};
use crate::eval::RankedQueries;
use crate::graph::store::GraphStore;
use crate::graph::{EdgeId, Instance, Pair};
use crate::mine::apply::CandidateMap;
use crate::rule::SupportRule;

fn io_error(path: &Path, source: std::io::Error) -> FileError {
    FileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Load a graph from a triples file: `<subject>\t<relation>\t<object>`.
pub fn load_graph(path: &Path) -> SiaResult<GraphStore> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let store = GraphStore::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            return Err(FileError::Parse {
                path: path.to_path_buf(),
                line: number + 1,
                message: format!("expected 3 tab-separated fields, got {}", fields.len()),
            }
            .into());
        }
        store
            .insert_triple(fields[0], fields[1], fields[2])
            .map_err(FileError::from)?;
    }
    Ok(store)
}

/// Read instances from a train/test file, resolving edges by id.
pub fn read_instances(store: &GraphStore, path: &Path) -> SiaResult<Vec<Instance>> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut instances = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let id_field = line.split('\t').next().unwrap_or_default();
        let raw: u64 = id_field.parse().map_err(|_| FileError::Parse {
            path: path.to_path_buf(),
            line: number + 1,
            message: format!("invalid edge id `{id_field}`"),
        })?;
        instances.push(store.instance(EdgeId(raw)).map_err(FileError::from)?);
    }
    Ok(instances)
}

/// Write instances as `<edgeId>\t<subject>\t<relation>\t<object>`.
pub fn write_instances(store: &GraphStore, path: &Path, instances: &[Instance]) -> SiaResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    for instance in instances {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            instance.edge.0,
            store.node_name(instance.sub).map_err(FileError::from)?,
            store.rel_name(instance.rel).map_err(FileError::from)?,
            store.node_name(instance.obj).map_err(FileError::from)?,
        )
        .map_err(|e| io_error(path, e))?;
    }
    writer.flush().map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Write rules sorted by standard confidence, descending:
/// `<kindTag>\t<head> <- <body>\t<sc>\t<totalPredictions>\t<support>`.
pub fn write_rules(path: &Path, rules: &[SupportRule]) -> SiaResult<()> {
    let mut ranked = rules.to_vec();
    ranked.sort_by(|a, b| b.sc().total_cmp(&a.sc()));

    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    for rule in &ranked {
        let stats = rule.stats();
        writeln!(
            writer,
            "{rule}\t{}\t{}\t{}",
            stats.sc, stats.total_predictions, stats.support
        )
        .map_err(|e| io_error(path, e))?;
    }
    writer.flush().map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Write ranked predictions grouped by query, up to `top_k` per query.
pub fn write_predictions(
    store: &GraphStore,
    path: &Path,
    relation: &str,
    ranked: &RankedQueries,
    top_k: usize,
) -> SiaResult<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);

    for (side, queries) in [(Side::Sub, &ranked.sub), (Side::Obj, &ranked.obj)] {
        for (entity, list) in queries {
            let name = store.node_name(*entity).map_err(FileError::from)?;
            match side {
                Side::Sub => writeln!(writer, "Query: {relation}({name}, ?)"),
                Side::Obj => writeln!(writer, "Query: {relation}(?, {name})"),
            }
            .map_err(|e| io_error(path, e))?;

            for candidate in list.iter().take(top_k) {
                writeln!(
                    writer,
                    "({}, {relation}, {})\t{}",
                    store.node_name(candidate.pair.sub).map_err(FileError::from)?,
                    store.node_name(candidate.pair.obj).map_err(FileError::from)?,
                    candidate.top_score().unwrap_or(0.0),
                )
                .map_err(|e| io_error(path, e))?;
            }
            writeln!(writer).map_err(|e| io_error(path, e))?;
        }
    }
    writer.flush().map_err(|e| io_error(path, e))?;
    Ok(())
}

#[derive(Clone, Copy)]
enum Side {
    Sub,
    Obj,
}

/// Write supporting rules for the retained predictions: per prediction, a
/// header triple followed by up to `rule_size` rules with confidence,
/// descending.
pub fn write_verifications(
    store: &GraphStore,
    path: &Path,
    relation: &str,
    ranked: &RankedQueries,
    candidates: &CandidateMap,
    prediction_size: usize,
    rule_size: usize,
) -> SiaResult<()> {
    let mut retained: std::collections::HashSet<Pair> = std::collections::HashSet::new();
    for queries in [&ranked.sub, &ranked.obj] {
        for list in queries.values() {
            retained.extend(list.iter().take(prediction_size).map(|c| c.pair));
        }
    }

    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut writer = BufWriter::new(file);
    for prediction in &retained {
        writeln!(
            writer,
            "({}, {relation}, {})",
            store.node_name(prediction.sub).map_err(FileError::from)?,
            store.node_name(prediction.obj).map_err(FileError::from)?,
        )
        .map_err(|e| io_error(path, e))?;

        let mut rules: Vec<SupportRule> = candidates
            .get(prediction)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        rules.sort_by(|a, b| b.sc().total_cmp(&a.sc()));
        for rule in rules.iter().take(rule_size) {
            writeln!(writer, "{rule}\t{:.3}", rule.sc()).map_err(|e| io_error(path, e))?;
        }
        writeln!(writer).map_err(|e| io_error(path, e))?;
    }
    writer.flush().map_err(|e| io_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::rank::Candidate;
    use crate::graph::NodeId;
    use crate::rule::{AbstractRule, Atom, Pattern, Term};
    use std::sync::Arc;

    fn sample_store() -> (GraphStore, Vec<Instance>) {
        let store = GraphStore::new();
        let mut instances = Vec::new();
        instances.push(store.insert_triple("alice", "knows", "bob").unwrap());
        instances.push(store.insert_triple("bob", "knows", "carol").unwrap());
        (store, instances)
    }

    #[test]
    fn graph_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.txt");
        std::fs::write(&path, "alice\tknows\tbob\nbob\tknows\tcarol\n").unwrap();
        let store = load_graph(&path).unwrap();
        assert_eq!(store.node_count(), 3);
        assert_eq!(store.edge_count(), 2);
        assert!(store.rel_id("knows").is_some());
    }

    #[test]
    fn malformed_graph_line_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.txt");
        std::fs::write(&path, "alice\tknows\n").unwrap();
        let err = load_graph(&path).unwrap_err();
        assert!(format!("{err}").contains("line 1"));
    }

    #[test]
    fn instance_round_trip() {
        let (store, instances) = sample_store();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("train.txt");

        write_instances(&store, &path, &instances).unwrap();
        let read = read_instances(&store, &path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].edge, instances[0].edge);
        assert_eq!(read[1].obj, instances[1].obj);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("alice\tknows\tbob"));
    }

    #[test]
    fn rules_are_written_by_descending_confidence() {
        let make_rule = |support: f64, total: f64| {
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
            rule.stats.set(support, total, total, 0.0);
            SupportRule::Closed(Arc::new(rule))
        };

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.txt");
        write_rules(&path, &[make_rule(1.0, 4.0), make_rule(3.0, 4.0)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("CAR\tr(X,Y) <- p(X,Y)\t0.75"));
        assert!(lines[1].contains("\t0.25\t"));
    }

    #[test]
    fn predictions_group_by_query_and_cap_at_top_k() {
        let (store, instances) = sample_store();
        let alice = instances[0].sub;
        let bob = instances[0].obj;
        let carol = instances[1].obj;

        let mut ranked = RankedQueries::default();
        ranked.sub.insert(
            alice,
            vec![
                Candidate {
                    pair: Pair::new(alice, bob),
                    scores: vec![0.9],
                },
                Candidate {
                    pair: Pair::new(alice, carol),
                    scores: vec![0.4],
                },
            ],
        );

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("predictions.txt");
        write_predictions(&store, &path, "knows", &ranked, 1).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Query: knows(alice, ?)"));
        assert!(text.contains("(alice, knows, bob)\t0.9"));
        // top_k = 1 drops the second candidate.
        assert!(!text.contains("carol"));
    }

    #[test]
    fn verifications_list_supporting_rules() {
        let (store, instances) = sample_store();
        let alice = instances[0].sub;
        let bob = instances[0].obj;
        let pair = Pair::new(alice, bob);

        let head = Atom::new(
            store.rel_id("knows").unwrap(),
            "knows",
            crate::graph::Dir::Forward,
            Term::constant(alice, "alice"),
            Term::constant(bob, "bob"),
        );
        let body = vec![Atom::new(
            store.rel_id("knows").unwrap(),
            "knows",
            crate::graph::Dir::Inverse,
            Term::constant(alice, "alice"),
            Term::constant(bob, "bob"),
        )];
        let mut rule = AbstractRule::new(Pattern::abstracted(head, body).unwrap());
        rule.stats.set(2.0, 4.0, 4.0, 0.0);
        let rule = SupportRule::Closed(Arc::new(rule));

        let mut candidates = CandidateMap::new();
        candidates.entry(pair).or_default().insert(rule);

        let mut ranked = RankedQueries::default();
        ranked.sub.insert(
            alice,
            vec![Candidate {
                pair,
                scores: vec![0.5],
            }],
        );

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("verifications.txt");
        write_verifications(&store, &path, "knows", &ranked, &candidates, 20, 10).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("(alice, knows, bob)"));
        assert!(text.contains("CAR\tknows(X,Y) <- knows(Y,X)\t0.500"));
    }

    #[test]
    fn unreadable_instance_file_is_an_error() {
        let (store, _) = sample_store();
        let err = read_instances(&store, Path::new("/nonexistent/train.txt")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SiaError::File(FileError::Io { .. })
        ));
    }
}
