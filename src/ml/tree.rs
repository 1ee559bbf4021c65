//! CART regression tree shared by the boosting and forest candidates.
//!
//! Splits minimise the summed squared error of the two children. Each split
//! may consider a random subset of features (`max_features`), which is how the
//! forest decorrelates its trees.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
}

impl RegressionTree {
    /// Fit on the rows selected by `indices` (duplicates allowed, as in a bootstrap sample).
    pub fn fit<R: Rng + ?Sized>(
        features: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        if indices.is_empty() {
            return Self {
                root: TreeNode::Leaf { value: 0.0 },
            };
        }
        let mut rows = indices.to_vec();
        let root = build(features, targets, &mut rows, 0, params, rng);
        Self { root }
    }

    pub fn predict_one(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }

    pub fn leaf_count(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => walk(left) + walk(right),
            }
        }
        walk(&self.root)
    }
}

fn sse(sum: f64, sum_sq: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / n as f64).max(0.0)
}

struct SplitCandidate {
    sse: f64,
    feature: usize,
    threshold: f64,
}

fn build<R: Rng + ?Sized>(
    features: &[Vec<f64>],
    targets: &[f64],
    rows: &mut Vec<usize>,
    depth: usize,
    params: &TreeParams,
    rng: &mut R,
) -> TreeNode {
    let n = rows.len();
    let (sum, sum_sq) = rows.iter().fold((0.0, 0.0), |(s, sq), &i| {
        let y = targets[i];
        (s + y, sq + y * y)
    });
    let mean = sum / n as f64;
    let parent_sse = sse(sum, sum_sq, n);
    let min_leaf = params.min_samples_leaf.max(1);

    if depth >= params.max_depth || n < 2 * min_leaf || parent_sse <= MIN_GAIN {
        return TreeNode::Leaf { value: mean };
    }

    let n_features = features[rows[0]].len();
    let candidates: Vec<usize> = match params.max_features {
        Some(k) if k > 0 && k < n_features => {
            rand::seq::index::sample(rng, n_features, k).into_vec()
        }
        _ => (0..n_features).collect(),
    };

    let mut best: Option<SplitCandidate> = None;
    let mut order = rows.clone();
    for &feature in &candidates {
        order.sort_by(|&a, &b| {
            features[a][feature]
                .partial_cmp(&features[b][feature])
                .unwrap_or(Ordering::Equal)
        });

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..n - 1 {
            let y = targets[order[i]];
            left_sum += y;
            left_sq += y * y;

            let left_n = i + 1;
            let right_n = n - left_n;
            if left_n < min_leaf {
                continue;
            }
            if right_n < min_leaf {
                break;
            }

            let here = features[order[i]][feature];
            let next = features[order[i + 1]][feature];
            if next <= here {
                continue;
            }

            let total = sse(left_sum, left_sq, left_n)
                + sse(sum - left_sum, sum_sq - left_sq, right_n);
            if best.as_ref().map_or(true, |b| total < b.sse) {
                best = Some(SplitCandidate {
                    sse: total,
                    feature,
                    threshold: here + (next - here) / 2.0,
                });
            }
        }
    }

    let Some(split) = best.filter(|b| parent_sse - b.sse > MIN_GAIN) else {
        return TreeNode::Leaf { value: mean };
    };

    let (mut left, mut right): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .partition(|&&i| features[i][split.feature] <= split.threshold);
    rows.clear();
    rows.shrink_to_fit();

    TreeNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(build(features, targets, &mut left, depth + 1, params, rng)),
        right: Box::new(build(features, targets, &mut right, depth + 1, params, rng)),
    }
}
