//! Per-rule scoring statistics.

/// Frequency statistics for one rule, recomputed on each scoring pass.
///
/// `sc` is the Laplace-smoothed standard confidence
/// `support / (total_predictions + offset)`; the offset makes rules with few
/// total predictions but high precision less competitive. `hc` is head
/// coverage, the recall estimate `support / ground_truth`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleStats {
    /// Correct predictions among the rule's groundings.
    pub support: f64,
    /// All predictions produced while scoring (capped, hence "biased").
    pub total_predictions: f64,
    /// Size of the ground-truth pair set the rule was scored against.
    pub ground_truth: f64,
    /// Laplace-smoothed standard confidence.
    pub sc: f64,
    /// Head coverage.
    pub hc: f64,
    /// For open rules: number of qualified head-anchored children.
    pub head_anchored_size: f64,
    /// For open rules: support averaged over the head-anchored children.
    pub local_avg_support: f64,
}

impl RuleStats {
    /// Set the raw counts and recompute the derived scores.
    pub fn set(&mut self, support: f64, total_predictions: f64, ground_truth: f64, offset: f64) {
        self.support = support;
        self.total_predictions = total_predictions;
        self.ground_truth = ground_truth;
        self.sc = support / (total_predictions + offset);
        self.hc = if ground_truth > 0.0 {
            support / ground_truth
        } else {
            0.0
        };
    }

    /// Set aggregate counts for an open rule from its head-anchored children.
    pub fn set_open(
        &mut self,
        support: f64,
        total_predictions: f64,
        ground_truth: f64,
        head_anchored_size: f64,
        offset: f64,
    ) {
        self.set(support, total_predictions, ground_truth, offset);
        self.head_anchored_size = head_anchored_size;
        self.local_avg_support = if head_anchored_size > 0.0 {
            support / head_anchored_size
        } else {
            0.0
        };
    }

    /// Qualification threshold used when retaining instantiated rules.
    pub fn qualified(&self, min_support: f64, min_sc: f64) -> bool {
        self.support >= min_support && self.sc >= min_sc
    }

    /// Strict refinement threshold used when selecting abstract rules for
    /// application.
    pub fn refined(&self, min_support: f64, min_sc: f64) -> bool {
        self.support > min_support && self.sc > min_sc
    }
}
