//! Retrieval metrics over ranked candidate lists.

use std::collections::HashSet;

use crate::graph::Pair;

/// hit@N for one ranked query.
///
/// The divisor is N when there are more positives than slots, otherwise the
/// number of positives; a query with no positives or no hits scores 0.
pub fn hit_at(test: &HashSet<Pair>, ranked: &[Pair], n: usize, total_positives: usize) -> f64 {
    let n = n.min(ranked.len());
    if n == 0 {
        return 0.0;
    }
    let count = ranked[..n].iter().filter(|p| test.contains(p)).count();
    if total_positives > n {
        return count as f64 / n as f64;
    }
    if total_positives == 0 || count == 0 {
        return 0.0;
    }
    count as f64 / total_positives as f64
}

/// Mean reciprocal rank contribution of one ranked query: 1/rank of the
/// first correct prediction, 0 if none appears.
pub fn mrr(test: &HashSet<Pair>, ranked: &[Pair]) -> f64 {
    ranked
        .iter()
        .position(|p| test.contains(p))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

/// Arithmetic mean; empty input means 0.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Weighted arithmetic mean; zero total weight means 0.
pub fn weighted_mean(values: &[(f64, usize)]) -> f64 {
    let total: usize = values.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return 0.0;
    }
    values.iter().map(|(v, w)| v * *w as f64).sum::<f64>() / total as f64
}
