//! Per-leaf security margins.
//!
//! A [`MarginEstimator`] learns, for one (leaf, feature) pair, how far a
//! query may sit from the leaf's threshold bounds before it counts as
//! boundary probing. A [`LeafGuard`] aggregates the estimators of one leaf
//! and tracks how many of the leaf's queries fell inside some margin.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::density::{linspace, BandwidthSearch};
use crate::feature::{Feature, Query};
use crate::paths::PathConstraint;
use crate::tree::LeafId;

/// Density refinement only runs with strictly more samples than this.
pub const DENSITY_MIN_SAMPLES: usize = 5;
/// Grid resolution for the cumulative-density curve.
pub const DENSITY_GRID_POINTS: usize = 1000;

/// Learned margin widths around one feature's threshold bounds for one
/// leaf. Built once at setup, immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct MarginEstimator {
    pub feature: String,
    pub threshold_left: f64,
    pub threshold_right: f64,
    pub margin_left: f64,
    pub margin_right: f64,
}

impl MarginEstimator {
    /// Learn margins from the leaf-local training-sample values of one
    /// feature.
    ///
    /// The heuristic bound moves each margin edge to the nearest training
    /// sample; with more than [`DENSITY_MIN_SAMPLES`] samples a KDE
    /// refinement replaces it with the point where the cumulative training
    /// mass reaches `false_probability` (resp. one minus it). When the
    /// cumulative curve never reaches the tail mass, the margin collapses
    /// toward zero on that side: the local distribution is too flat to
    /// place a boundary confidently, so the detector stays conservative
    /// there.
    pub fn learn(
        feature: &Feature,
        constraint: &PathConstraint,
        samples: &[f64],
        margin_rate: f64,
        false_probability: f64,
        search: &dyn BandwidthSearch,
    ) -> Self {
        let (threshold_left, threshold_right) = constraint.resolve(feature);
        let max_margin = margin_rate * (threshold_right - threshold_left).abs();

        let (mut margin_left, mut margin_right) = match sample_extent(samples) {
            Some((lo, hi)) => (
                (threshold_left - lo).abs().min(max_margin),
                (threshold_right - hi).abs().min(max_margin),
            ),
            // No training rows landed here: nothing to learn from, keep
            // zero-width margins so legitimate traffic is never flagged.
            None => (0.0, 0.0),
        };

        if samples.len() > DENSITY_MIN_SAMPLES {
            if let Some(model) = search.fit_best_bandwidth(samples) {
                let grid = linspace(threshold_left, threshold_right, DENSITY_GRID_POINTS);
                let cumulative = model.cumulative_over(&grid);

                let first_position = grid
                    .iter()
                    .zip(&cumulative)
                    .find(|(_, &c)| c >= false_probability)
                    .map(|(&x, _)| x)
                    .unwrap_or(threshold_left);
                let last_position = grid
                    .iter()
                    .zip(&cumulative)
                    .find(|(_, &c)| c >= 1.0 - false_probability)
                    .map(|(&x, _)| x)
                    .unwrap_or(threshold_right);

                margin_left = (threshold_left - first_position).abs().min(max_margin);
                margin_right = (threshold_right - last_position).abs().min(max_margin);
            }
        }

        Self {
            feature: feature.name.clone(),
            threshold_left,
            threshold_right,
            margin_left: margin_left.clamp(0.0, max_margin.max(0.0)),
            margin_right: margin_right.clamp(0.0, max_margin.max(0.0)),
        }
    }

    /// Strict comparisons: a zero-width margin never flags a query sitting
    /// exactly on the threshold.
    pub fn in_margin(&self, value: f64) -> bool {
        value < self.threshold_left + self.margin_left
            || value > self.threshold_right - self.margin_right
    }
}

fn sample_extent(samples: &[f64]) -> Option<(f64, f64)> {
    let first = *samples.first()?;
    Some(samples.iter().fold((first, first), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    }))
}

/// All margin estimators of one leaf, plus the leaf's query counters.
#[derive(Debug, Clone)]
pub struct LeafGuard {
    leaf_id: LeafId,
    estimators: HashMap<String, MarginEstimator>,
    counted_total: u64,
    counted_unique: u64,
    min_leaf_queries: u64,
}

impl LeafGuard {
    pub fn new(
        leaf_id: LeafId,
        estimators: HashMap<String, MarginEstimator>,
        min_leaf_queries: u64,
    ) -> Self {
        debug!(
            leaf_id,
            estimators = estimators.len(),
            "leaf guard initialized"
        );
        Self {
            leaf_id,
            estimators,
            counted_total: 0,
            counted_unique: 0,
            min_leaf_queries,
        }
    }

    pub fn leaf_id(&self) -> LeafId {
        self.leaf_id
    }

    pub fn estimator(&self, feature: &str) -> Option<&MarginEstimator> {
        self.estimators.get(feature)
    }

    /// Margin membership without side effects. A query is flagged when any
    /// single constrained feature is inside its margin: an attacker only
    /// needs to walk one dimension at a time to find a split.
    pub fn is_flagged(&self, query: &Query) -> bool {
        query.iter().any(|(feature, &value)| {
            self.estimators
                .get(feature)
                .is_some_and(|e| e.in_margin(value))
        })
    }

    /// Record a query routed to this leaf. Returns whether it was flagged.
    pub fn record(&mut self, query: &Query) -> bool {
        let flagged = self.is_flagged(query);
        self.counted_total += 1;
        if flagged {
            // One query counts once even if it is inside the margin in
            // several dimensions.
            self.counted_unique += 1;
        }
        flagged
    }

    pub fn counted_total(&self) -> u64 {
        self.counted_total
    }

    pub fn counted_unique(&self) -> u64 {
        self.counted_unique
    }

    /// Fraction of this leaf's queries that were in-margin. Zero until the
    /// leaf has seen more than `min_leaf_queries` queries; small-sample
    /// ratios are statistically unreliable and would destabilize the
    /// aggregate score.
    pub fn ratio(&self) -> f64 {
        if self.counted_total > self.min_leaf_queries {
            self.counted_unique as f64 / self.counted_total as f64
        } else {
            0.0
        }
    }
}
