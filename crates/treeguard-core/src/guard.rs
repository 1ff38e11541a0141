//! Top-level boundary-margin detector.
//!
//! A [`BoundaryGuard`] owns one [`LeafGuard`] per leaf of a trained tree
//! snapshot, mediates every inbound query, periodically recomputes the
//! aggregate in-margin ratio and latches detection once the ratio crosses
//! the configured threshold. One guard corresponds to exactly one
//! monitored session; all mutable state is scoped to it and it is not
//! meant for concurrent callers.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{GuardConfig, Reaction};
use crate::density::CvBandwidthSearch;
use crate::error::{GuardError, Result};
use crate::export::RatioSink;
use crate::feature::Query;
use crate::margin::{LeafGuard, MarginEstimator};
use crate::paths;
use crate::tree::{LeafId, TreeOracle};

/// What the guard hands back for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardResponse {
    /// The true leaf the query reached.
    Leaf(LeafId),
    /// A decoy leaf substituted at the response boundary.
    Decoy(LeafId),
    /// Service refused; the caller must stop querying.
    Blocked,
}

impl GuardResponse {
    pub fn leaf_id(&self) -> Option<LeafId> {
        match self {
            GuardResponse::Leaf(id) | GuardResponse::Decoy(id) => Some(*id),
            GuardResponse::Blocked => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardResponse::Blocked)
    }
}

/// End-of-session statistics for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSummary {
    pub global_query_count: u64,
    pub leaf_count: usize,
    pub last_ratio: f64,
    pub mean_leaf_ratio: f64,
    pub leaf_ratio_variance: f64,
    pub detected: bool,
}

/// The behavioral surface every extraction countermeasure implements.
/// Only the boundary-margin variant lives in this crate; other detectors
/// (e.g. distribution-based) are expected to implement the same trait.
pub trait Countermeasure {
    /// Mediate one query: classify, record, periodically re-evaluate,
    /// react.
    fn handle_query(&mut self, query: &Query) -> Result<GuardResponse>;

    /// Margin membership for an already-classified query, without
    /// mutating detector state. Useful for measuring false positives on
    /// benign traffic.
    fn is_query_flagged(&self, query: &Query, leaf: LeafId) -> bool;

    /// Whether the detection latch has fired.
    fn detected(&self) -> bool;

    /// The most recent aggregate ratio, forcing a final evaluation so a
    /// trailing partial interval is covered.
    fn last_ratio(&mut self) -> f64;

    /// Write the ratio history and a final summary to a sink.
    fn export_summary(&mut self, sink: &mut dyn RatioSink) -> Result<()>;
}

/// Boundary-margin countermeasure over one trained classifier snapshot.
#[derive(Debug)]
pub struct BoundaryGuard<T: TreeOracle> {
    tree: T,
    config: GuardConfig,
    reaction: Reaction,
    leaf_guards: HashMap<LeafId, LeafGuard>,
    global_query_count: u64,
    last_eval_count: u64,
    ratio_history: Vec<(u64, f64)>,
    detected: bool,
    rng: StdRng,
}

impl<T: TreeOracle> BoundaryGuard<T> {
    /// Build the guard: extract each leaf's path constraints from the
    /// oracle and learn the per-(leaf, feature) margins from the
    /// leaf-routed training samples. Fails fast on an unrecognized
    /// reaction; the oracle's paths were already validated when the
    /// snapshot was built.
    pub fn new(tree: T, config: GuardConfig) -> Result<Self> {
        let reaction = config.reaction()?;
        let search = CvBandwidthSearch::default();

        let mut leaf_guards = HashMap::new();
        let mut estimator_count = 0usize;
        for &leaf in tree.leaf_ids() {
            let constraints = paths::reduce_constraints(tree.leaf_path_splits(leaf));
            let mut estimators = HashMap::new();
            for (name, constraint) in &constraints {
                let feature = tree
                    .features()
                    .iter()
                    .find(|f| &f.name == name)
                    .ok_or_else(|| {
                        GuardError::MalformedTree(format!(
                            "path of leaf {leaf} references unknown feature '{name}'"
                        ))
                    })?;
                let samples = tree.leaf_training_values(leaf, name);
                estimators.insert(
                    name.clone(),
                    MarginEstimator::learn(
                        feature,
                        constraint,
                        &samples,
                        config.margin_rate,
                        config.false_probability,
                        &search,
                    ),
                );
            }
            estimator_count += estimators.len();
            leaf_guards.insert(leaf, LeafGuard::new(leaf, estimators, config.min_leaf_queries));
        }

        info!(
            leaves = leaf_guards.len(),
            estimators = estimator_count,
            reaction = config.reaction.as_str(),
            "boundary guard initialized"
        );

        Ok(Self {
            tree,
            reaction,
            leaf_guards,
            global_query_count: 0,
            last_eval_count: 0,
            ratio_history: Vec::new(),
            detected: false,
            rng: StdRng::from_entropy(),
            config,
        })
    }

    /// Deterministic decoy draws, for tests and reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn global_query_count(&self) -> u64 {
        self.global_query_count
    }

    pub fn ratio_history(&self) -> &[(u64, f64)] {
        &self.ratio_history
    }

    pub fn leaf_guard(&self, leaf: LeafId) -> Option<&LeafGuard> {
        self.leaf_guards.get(&leaf)
    }

    /// Convenience wrapper over [`Countermeasure::handle_query`] that
    /// fails with [`GuardError::BlockedAccess`] instead of returning the
    /// `Blocked` variant, and silently serves decoys.
    pub fn predict(&mut self, query: &Query) -> Result<LeafId> {
        match self.handle_query(query)? {
            GuardResponse::Leaf(id) | GuardResponse::Decoy(id) => Ok(id),
            GuardResponse::Blocked => Err(GuardError::BlockedAccess),
        }
    }

    /// Recompute the aggregate in-margin ratio and append it to the
    /// history. Idempotent: a no-op unless queries arrived since the last
    /// evaluation, so the history's query counts stay strictly increasing.
    pub fn recompute_ratio(&mut self) {
        if self.global_query_count == self.last_eval_count {
            return;
        }
        self.last_eval_count = self.global_query_count;

        let ratio = self.aggregate_ratio();
        self.ratio_history.push((self.global_query_count, ratio));
        debug!(
            queries = self.global_query_count,
            ratio, "aggregate margin ratio evaluated"
        );

        if !self.detected && self.reaction != Reaction::None {
            if let Some(threshold) = self.config.blocking_threshold {
                if ratio > threshold {
                    // Latch: never cleared for the rest of the session.
                    self.detected = true;
                    warn!(
                        ratio,
                        threshold,
                        queries = self.global_query_count,
                        "boundary-probe ratio exceeded threshold, latching detection"
                    );
                }
            }
        }
    }

    /// Mean of the per-leaf ratios, over all leaves or only the leaves
    /// that received queries, per configuration.
    fn aggregate_ratio(&self) -> f64 {
        let mut sum = 0.0;
        let mut involved = 0usize;
        for guard in self.leaf_guards.values() {
            sum += guard.ratio();
            if !self.config.count_only_active_leaves || guard.counted_total() > 0 {
                involved += 1;
            }
        }
        if involved > 0 {
            sum / involved as f64
        } else {
            0.0
        }
    }

    fn react(&mut self, true_leaf: LeafId) -> GuardResponse {
        if !self.detected {
            return GuardResponse::Leaf(true_leaf);
        }
        match self.reaction {
            Reaction::Block => GuardResponse::Blocked,
            Reaction::RandomLeaf => {
                // The substitution happens only here, at the response
                // boundary; counters were updated for the true leaf.
                let ids = self.tree.leaf_ids();
                GuardResponse::Decoy(ids[self.rng.gen_range(0..ids.len())])
            }
            Reaction::None => GuardResponse::Leaf(true_leaf),
        }
    }

    /// Per-leaf ratio statistics for reporting.
    pub fn summary(&self) -> GuardSummary {
        let ratios: Vec<f64> = self.leaf_guards.values().map(LeafGuard::ratio).collect();
        let n = ratios.len().max(1) as f64;
        let mean = ratios.iter().sum::<f64>() / n;
        let variance = ratios.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        GuardSummary {
            global_query_count: self.global_query_count,
            leaf_count: self.leaf_guards.len(),
            last_ratio: self.ratio_history.last().map_or(0.0, |&(_, r)| r),
            mean_leaf_ratio: mean,
            leaf_ratio_variance: variance,
            detected: self.detected,
        }
    }
}

impl<T: TreeOracle> Countermeasure for BoundaryGuard<T> {
    fn handle_query(&mut self, query: &Query) -> Result<GuardResponse> {
        // Classify first: a malformed query fails here, before any state
        // is touched.
        let leaf_id = self.tree.predict(query)?;

        if let Some(guard) = self.leaf_guards.get_mut(&leaf_id) {
            guard.record(query);
        }
        self.global_query_count += 1;

        if self.config.check_interval > 0
            && self.global_query_count % self.config.check_interval == 0
        {
            self.recompute_ratio();
        }

        Ok(self.react(leaf_id))
    }

    fn is_query_flagged(&self, query: &Query, leaf: LeafId) -> bool {
        self.leaf_guards
            .get(&leaf)
            .is_some_and(|g| g.is_flagged(query))
    }

    fn detected(&self) -> bool {
        self.detected
    }

    fn last_ratio(&mut self) -> f64 {
        self.recompute_ratio();
        self.ratio_history.last().map_or(0.0, |&(_, r)| r)
    }

    fn export_summary(&mut self, sink: &mut dyn RatioSink) -> Result<()> {
        // Cover a trailing partial interval before exporting.
        self.recompute_ratio();
        for &(count, ratio) in &self.ratio_history {
            sink.append_ratio(count, ratio)?;
        }
        sink.finish(&self.summary())
    }
}
