//! Decision-tree classifier snapshot and the oracle contract the guard
//! consumes.
//!
//! Training is out of scope: a [`DecisionTree`] is constructed from the
//! flattened split arrays of an already-trained tree (scikit-learn array
//! layout: `children_left`/`children_right`/`feature`/`threshold` with
//! `-1`/`-2` sentinels for leaves) plus the training matrix, which is
//! routed to leaves once at construction. The snapshot is immutable for
//! the lifetime of any guard built over it.

use std::collections::HashMap;

use crate::error::{GuardError, Result};
use crate::feature::{Feature, Query};
use crate::paths::{self, PathSplit};

/// Identifier of a terminal tree node. Leaf ids are node indices.
pub type LeafId = usize;

/// Sentinel child index marking a leaf node.
pub const CHILD_LEAF_SENTINEL: i64 = -1;
/// Sentinel feature index marking a leaf node.
pub const FEATURE_LEAF_SENTINEL: i64 = -2;

/// The capability a served classifier must expose to the guard.
///
/// Everything here must stay immutable for the guard's lifetime: the leaf
/// set, the per-leaf paths and the leaf-routed training rows are read once
/// at setup and the prediction function is consulted on every query.
pub trait TreeOracle {
    /// Global feature domains, in model column order.
    fn features(&self) -> &[Feature];

    /// All leaf identifiers of the trained tree.
    fn leaf_ids(&self) -> &[LeafId];

    /// Route a query to a leaf. Fails with [`GuardError::MalformedQuery`]
    /// if the query is missing a feature.
    fn predict(&self, query: &Query) -> Result<LeafId>;

    /// The ordered root-to-leaf split triples for one leaf.
    fn leaf_path_splits(&self, leaf: LeafId) -> &[PathSplit];

    /// Training-sample values of one feature among the rows routed to the
    /// given leaf. Empty if no training rows landed there.
    fn leaf_training_values(&self, leaf: LeafId, feature: &str) -> Vec<f64>;
}

/// Flattened split arrays of a trained tree, scikit-learn layout.
///
/// Node 0 is the root. `children_left[i] == -1` marks node `i` as a leaf;
/// internal nodes route `value <= threshold` to the left child.
#[derive(Debug, Clone)]
pub struct SplitArrays {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
}

impl SplitArrays {
    pub fn node_count(&self) -> usize {
        self.children_left.len()
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] == CHILD_LEAF_SENTINEL
    }

    fn validate(&self, feature_count: usize) -> Result<()> {
        let n = self.node_count();
        if n == 0 {
            return Err(GuardError::MalformedTree("tree has no nodes".into()));
        }
        if self.children_right.len() != n || self.feature.len() != n || self.threshold.len() != n {
            return Err(GuardError::MalformedTree(format!(
                "inconsistent array lengths: left={} right={} feature={} threshold={}",
                n,
                self.children_right.len(),
                self.feature.len(),
                self.threshold.len()
            )));
        }
        for node in 0..n {
            let (l, r) = (self.children_left[node], self.children_right[node]);
            if (l == CHILD_LEAF_SENTINEL) != (r == CHILD_LEAF_SENTINEL) {
                return Err(GuardError::MalformedTree(format!(
                    "node {node} has exactly one child"
                )));
            }
            if l == CHILD_LEAF_SENTINEL {
                continue;
            }
            for child in [l, r] {
                if child < 0 || child as usize >= n {
                    return Err(GuardError::MalformedTree(format!(
                        "node {node} references child {child} out of range"
                    )));
                }
            }
            let f = self.feature[node];
            if f < 0 || f as usize >= feature_count {
                return Err(GuardError::MalformedTree(format!(
                    "node {node} splits on unknown feature index {f}"
                )));
            }
        }
        Ok(())
    }
}

/// An immutable trained-tree snapshot implementing [`TreeOracle`].
#[derive(Debug, Clone)]
pub struct DecisionTree {
    features: Vec<Feature>,
    splits: SplitArrays,
    leaf_ids: Vec<LeafId>,
    leaf_paths: HashMap<LeafId, Vec<PathSplit>>,
    leaf_rows: HashMap<LeafId, Vec<Vec<f64>>>,
}

impl DecisionTree {
    /// Build a snapshot from trained split arrays and route the training
    /// matrix to leaves. Fails with [`GuardError::MalformedTree`] when the
    /// arrays are inconsistent or a leaf cannot reach the root.
    pub fn new(
        features: Vec<Feature>,
        splits: SplitArrays,
        training_rows: &[Vec<f64>],
    ) -> Result<Self> {
        splits.validate(features.len())?;

        let leaf_ids: Vec<LeafId> = (0..splits.node_count())
            .filter(|&node| splits.is_leaf(node))
            .collect();

        let leaf_paths = paths::extract_leaf_paths(&splits, &features, &leaf_ids)?;

        let mut leaf_rows: HashMap<LeafId, Vec<Vec<f64>>> = HashMap::new();
        for (i, row) in training_rows.iter().enumerate() {
            if row.len() != features.len() {
                return Err(GuardError::MalformedTree(format!(
                    "training row {i} has {} values, expected {}",
                    row.len(),
                    features.len()
                )));
            }
            let leaf = traverse(&splits, row);
            leaf_rows.entry(leaf).or_default().push(row.clone());
        }

        Ok(Self {
            features,
            splits,
            leaf_ids,
            leaf_paths,
            leaf_rows,
        })
    }

    /// Number of training rows routed to a leaf.
    pub fn leaf_sample_count(&self, leaf: LeafId) -> usize {
        self.leaf_rows.get(&leaf).map_or(0, Vec::len)
    }
}

/// Standard decision-path traversal: follow `value <= threshold` left,
/// otherwise right, until a leaf.
fn traverse(splits: &SplitArrays, values: &[f64]) -> LeafId {
    let mut node = 0usize;
    while !splits.is_leaf(node) {
        let feature_idx = splits.feature[node] as usize;
        node = if values[feature_idx] <= splits.threshold[node] {
            splits.children_left[node] as usize
        } else {
            splits.children_right[node] as usize
        };
    }
    node
}

impl TreeOracle for DecisionTree {
    fn features(&self) -> &[Feature] {
        &self.features
    }

    fn leaf_ids(&self) -> &[LeafId] {
        &self.leaf_ids
    }

    fn predict(&self, query: &Query) -> Result<LeafId> {
        let mut values = Vec::with_capacity(self.features.len());
        for f in &self.features {
            let v = query
                .get(&f.name)
                .ok_or_else(|| GuardError::MalformedQuery(f.name.clone()))?;
            values.push(*v);
        }
        Ok(traverse(&self.splits, &values))
    }

    fn leaf_path_splits(&self, leaf: LeafId) -> &[PathSplit] {
        self.leaf_paths.get(&leaf).map_or(&[], Vec::as_slice)
    }

    fn leaf_training_values(&self, leaf: LeafId, feature: &str) -> Vec<f64> {
        let Some(idx) = self.features.iter().position(|f| f.name == feature) else {
            return Vec::new();
        };
        self.leaf_rows
            .get(&leaf)
            .map(|rows| rows.iter().map(|r| r[idx]).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, f64)]) -> Query {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// One split on `x` at 5.0: node 0 -> leaves 1 (x <= 5) and 2 (x > 5).
    fn stump() -> DecisionTree {
        DecisionTree::new(
            vec![Feature::new("x", 0, 0.0, 10.0)],
            SplitArrays {
                children_left: vec![1, CHILD_LEAF_SENTINEL, CHILD_LEAF_SENTINEL],
                children_right: vec![2, CHILD_LEAF_SENTINEL, CHILD_LEAF_SENTINEL],
                feature: vec![0, FEATURE_LEAF_SENTINEL, FEATURE_LEAF_SENTINEL],
                threshold: vec![5.0, -2.0, -2.0],
            },
            &[vec![1.0], vec![3.0], vec![7.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_routes_by_threshold() {
        let tree = stump();
        assert_eq!(tree.predict(&query(&[("x", 2.0)])).unwrap(), 1);
        assert_eq!(tree.predict(&query(&[("x", 5.0)])).unwrap(), 1); // <= goes left
        assert_eq!(tree.predict(&query(&[("x", 8.0)])).unwrap(), 2);
    }

    #[test]
    fn test_predict_missing_feature_is_malformed_query() {
        let tree = stump();
        let err = tree.predict(&query(&[("y", 1.0)])).unwrap_err();
        assert!(matches!(err, GuardError::MalformedQuery(f) if f == "x"));
    }

    #[test]
    fn test_training_rows_routed_to_leaves() {
        let tree = stump();
        assert_eq!(tree.leaf_sample_count(1), 2);
        assert_eq!(tree.leaf_sample_count(2), 1);
        assert_eq!(tree.leaf_training_values(1, "x"), vec![1.0, 3.0]);
        assert_eq!(tree.leaf_training_values(2, "x"), vec![7.0]);
        assert!(tree.leaf_training_values(1, "nope").is_empty());
    }

    #[test]
    fn test_single_node_tree_is_one_leaf() {
        let tree = DecisionTree::new(
            vec![Feature::new("x", 0, 0.0, 1.0)],
            SplitArrays {
                children_left: vec![-1],
                children_right: vec![-1],
                feature: vec![-2],
                threshold: vec![-2.0],
            },
            &[],
        )
        .unwrap();
        assert_eq!(tree.leaf_ids(), &[0]);
        assert!(tree.leaf_path_splits(0).is_empty());
    }

    #[test]
    fn test_inconsistent_arrays_rejected() {
        let err = DecisionTree::new(
            vec![Feature::new("x", 0, 0.0, 1.0)],
            SplitArrays {
                children_left: vec![1, -1],
                children_right: vec![1, -1, -1],
                feature: vec![0, -2],
                threshold: vec![0.5, -2.0],
            },
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::MalformedTree(_)));
    }

    #[test]
    fn test_child_out_of_range_rejected() {
        let err = DecisionTree::new(
            vec![Feature::new("x", 0, 0.0, 1.0)],
            SplitArrays {
                children_left: vec![1, -1],
                children_right: vec![9, -1],
                feature: vec![0, -2],
                threshold: vec![0.5, -2.0],
            },
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::MalformedTree(_)));
    }

    #[test]
    fn test_bad_training_row_arity_rejected() {
        let err = DecisionTree::new(
            vec![Feature::new("x", 0, 0.0, 10.0)],
            SplitArrays {
                children_left: vec![-1],
                children_right: vec![-1],
                feature: vec![-2],
                threshold: vec![-2.0],
            },
            &[vec![1.0, 2.0]],
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::MalformedTree(_)));
    }
}
