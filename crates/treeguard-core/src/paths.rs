//! Decision-path extraction.
//!
//! Walks each leaf back to the root over parent links and records the
//! ancestor splits, then collapses them into the tightest per-feature
//! threshold bounds consistent with reaching that leaf. The walk is
//! iterative with an explicit accumulator, so tree depth never couples to
//! stack depth.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::feature::Feature;
use crate::tree::{LeafId, SplitArrays};

/// Which side of a split the path took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDirection {
    /// Left branch: `value <= threshold` (the threshold is an upper bound).
    LessEq,
    /// Right branch: `value > threshold` (the threshold is a lower bound).
    GreaterEq,
}

/// One ancestor split on a root-to-leaf path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSplit {
    pub feature: String,
    pub threshold: f64,
    pub direction: SplitDirection,
}

/// Tightest threshold bounds one leaf's path imposes on one feature.
///
/// `threshold_right` is the minimum over all `<=` splits (tightest upper
/// bound), `threshold_left` the maximum over all `>=` splits. `None` means
/// the path never bounds the feature on that side; callers substitute the
/// feature's global range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PathConstraint {
    pub threshold_left: Option<f64>,
    pub threshold_right: Option<f64>,
}

impl PathConstraint {
    fn tighten(&mut self, threshold: f64, direction: SplitDirection) {
        match direction {
            SplitDirection::LessEq => {
                self.threshold_right = Some(match self.threshold_right {
                    Some(t) => t.min(threshold),
                    None => threshold,
                });
            }
            SplitDirection::GreaterEq => {
                self.threshold_left = Some(match self.threshold_left {
                    Some(t) => t.max(threshold),
                    None => threshold,
                });
            }
        }
    }

    /// Resolve the bounds against a feature's global domain.
    pub fn resolve(&self, feature: &Feature) -> (f64, f64) {
        (
            self.threshold_left.unwrap_or(feature.min),
            self.threshold_right.unwrap_or(feature.max),
        )
    }
}

/// Extract the ordered root-to-leaf split list for every leaf.
///
/// Fails with [`GuardError::MalformedTree`] if a leaf cannot reach the
/// root, either because its parent chain is broken or because the chain
/// loops.
pub fn extract_leaf_paths(
    splits: &SplitArrays,
    features: &[Feature],
    leaf_ids: &[LeafId],
) -> Result<HashMap<LeafId, Vec<PathSplit>>> {
    let n = splits.node_count();

    // parent_of[child] = (parent node, branch taken to reach child).
    let mut parent_of: Vec<Option<(usize, SplitDirection)>> = vec![None; n];
    for node in 0..n {
        if splits.is_leaf(node) {
            continue;
        }
        let left = splits.children_left[node] as usize;
        let right = splits.children_right[node] as usize;
        parent_of[left] = Some((node, SplitDirection::LessEq));
        parent_of[right] = Some((node, SplitDirection::GreaterEq));
    }

    let mut paths = HashMap::with_capacity(leaf_ids.len());
    for &leaf in leaf_ids {
        let mut acc = Vec::new();
        let mut node = leaf;
        while node != 0 {
            let Some((parent, direction)) = parent_of[node] else {
                return Err(GuardError::MalformedTree(format!(
                    "leaf {leaf} cannot reach the root: node {node} has no parent"
                )));
            };
            acc.push(PathSplit {
                feature: features[splits.feature[parent] as usize].name.clone(),
                threshold: splits.threshold[parent],
                direction,
            });
            node = parent;
            if acc.len() > n {
                return Err(GuardError::MalformedTree(format!(
                    "leaf {leaf} cannot reach the root: parent chain loops"
                )));
            }
        }
        acc.reverse();
        paths.insert(leaf, acc);
    }

    debug!(leaves = leaf_ids.len(), "extracted decision paths");
    Ok(paths)
}

/// Collapse a leaf's ordered split list into one constraint per feature.
/// Features untouched on the path are absent from the map.
pub fn reduce_constraints(splits: &[PathSplit]) -> HashMap<String, PathConstraint> {
    let mut constraints: HashMap<String, PathConstraint> = HashMap::new();
    for split in splits {
        constraints
            .entry(split.feature.clone())
            .or_default()
            .tighten(split.threshold, split.direction);
    }
    constraints
}
