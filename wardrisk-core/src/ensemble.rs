//! Gradient-boosted decision trees for binary classification
//!
//! Second-order boosting on the logistic loss with depth-limited regression
//! trees. Split search is exact and greedy; features are scanned in parallel.
//!
//! Global invariants enforced:
//! - Deterministic fit for a given input and seed
//! - Child node indices are always greater than their parent's (no cycles)

use crate::error::{EngineError, EngineResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Hyperparameters of the booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingParams {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    /// Minimum gain for a split to be kept
    pub min_split_gain: f64,
    /// Row sampling rate per tree, in (0,1]
    pub subsample: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_trees: 150,
            learning_rate: 0.05,
            max_depth: 4,
            min_child_weight: 1.0,
            lambda: 1.0,
            min_split_gain: 0.0,
            subsample: 0.8,
            seed: 42,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.n_trees == 0 {
            return Err("n_trees must be at least 1".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".into());
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 || self.min_split_gain < 0.0 {
            return Err("lambda, min_child_weight and min_split_gain must be >= 0".into());
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            ));
        }
        Ok(())
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One node of a regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// `value < threshold` goes left
    Split {
        feature: usize,
        threshold: f64,
        gain: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Regression tree stored as a flat node list, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                }) => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if x < *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    /// Structural check for trees read from an artifact
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} but the schema has {}",
                            i, feature, n_features
                        ));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {} has a NaN threshold", i));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", i, child));
                        }
                    }
                }
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {} is not finite", i));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Additive tree model producing a raw log-odds score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if !self.base_score.is_finite() || !self.learning_rate.is_finite() {
            return Err("base score and learning rate must be finite".into());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features)
                .map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Total split gain per feature, normalised to sum to 1
    pub fn feature_importance(&self, n_features: usize) -> Vec<f64> {
        let mut gains = vec![0.0; n_features];
        for tree in &self.trees {
            for node in &tree.nodes {
                if let Node::Split { feature, gain, .. } = node {
                    if let Some(slot) = gains.get_mut(*feature) {
                        *slot += gain.max(0.0);
                    }
                }
            }
        }
        let total: f64 = gains.iter().sum();
        if total > 0.0 {
            gains.iter_mut().for_each(|g| *g /= total);
        }
        gains
    }

    /// Fit on weighted rows; `weights` scale both gradient and hessian
    pub fn fit(
        rows: &[Vec<f64>],
        labels: &[bool],
        weights: &[f64],
        params: &BoostingParams,
    ) -> EngineResult<TreeEnsemble> {
        params
            .validate()
            .map_err(EngineError::InsufficientTrainingData)?;
        if rows.is_empty() {
            return Err(EngineError::InsufficientTrainingData(
                "no training rows".into(),
            ));
        }
        if rows.len() != labels.len() || rows.len() != weights.len() {
            return Err(EngineError::InsufficientTrainingData(format!(
                "{} rows, {} labels, {} weights",
                rows.len(),
                labels.len(),
                weights.len()
            )));
        }

        let n_features = rows[0].len();
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(EngineError::InsufficientTrainingData(
                "rows have differing lengths".into(),
            ));
        }

        let (w_pos, w_neg) = labels
            .iter()
            .zip(weights)
            .fold((0.0, 0.0), |(p, n), (&y, &w)| {
                if y {
                    (p + w, n)
                } else {
                    (p, n + w)
                }
            });
        if w_pos <= 0.0 || w_neg <= 0.0 {
            return Err(EngineError::InsufficientTrainingData(
                "training rows must contain both classes".into(),
            ));
        }

        let base_score = (w_pos / w_neg).ln();
        let mut raw = vec![base_score; rows.len()];
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let mut grad = Vec::with_capacity(rows.len());
            let mut hess = Vec::with_capacity(rows.len());
            for ((score, &y), &w) in raw.iter().zip(labels).zip(weights) {
                let p = sigmoid(*score);
                let target = if y { 1.0 } else { 0.0 };
                grad.push(w * (p - target));
                hess.push(w * (p * (1.0 - p)).max(1e-12));
            }

            let mut sample: Vec<usize> = if params.subsample < 1.0 {
                (0..rows.len())
                    .filter(|_| rng.gen_bool(params.subsample))
                    .collect()
            } else {
                (0..rows.len()).collect()
            };
            if sample.is_empty() {
                sample = (0..rows.len()).collect();
            }

            let mut builder = TreeBuilder {
                rows,
                grad: &grad,
                hess: &hess,
                params,
                n_features,
                nodes: Vec::new(),
            };
            builder.grow(sample, 0);
            let tree = Tree {
                nodes: builder.nodes,
            };

            for (score, row) in raw.iter_mut().zip(rows) {
                *score += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(TreeEnsemble {
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostingParams,
    n_features: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    /// Grow a subtree over `indices`, returning its node index
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let g: f64 = indices.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = indices.iter().map(|&i| self.hess[i]).sum();

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth
            || indices.len() < 2
            || h < 2.0 * self.params.min_child_weight
        {
            return idx;
        }

        let split = match self.best_split(&indices, g, h) {
            Some(s) if s.gain > self.params.min_split_gain => s,
            _ => return idx,
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.rows[i][split.feature] < split.threshold);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            gain: split.gain,
            left,
            right,
        };
        idx
    }

    fn best_split(&self, indices: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        let candidates: Vec<Option<SplitCandidate>> = (0..self.n_features)
            .into_par_iter()
            .map(|feature| self.best_split_for_feature(feature, indices, g, h, parent))
            .collect();

        // Sequential reduction keeps ties on the lowest feature index
        candidates
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, c| match best {
                Some(b) if b.gain >= c.gain => Some(b),
                _ => Some(c),
            })
    }

    fn best_split_for_feature(
        &self,
        feature: usize,
        indices: &[usize],
        g: f64,
        h: f64,
        parent: f64,
    ) -> Option<SplitCandidate> {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            self.rows[a][feature]
                .partial_cmp(&self.rows[b][feature])
                .unwrap_or(Ordering::Equal)
        });

        let mcw = self.params.min_child_weight;
        let mut g_left = 0.0;
        let mut h_left = 0.0;
        let mut best: Option<SplitCandidate> = None;

        for pair in order.windows(2) {
            let (i, next) = (pair[0], pair[1]);
            g_left += self.grad[i];
            h_left += self.hess[i];

            let x = self.rows[i][feature];
            let x_next = self.rows[next][feature];
            if x_next.partial_cmp(&x) != Some(Ordering::Greater) {
                continue;
            }
            let h_right = h - h_left;
            if h_left < mcw || h_right < mcw {
                continue;
            }

            let gain = self.score(g_left, h_left) + self.score(g - g_left, h_right) - parent;
            if best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: x + (x_next - x) / 2.0,
                    gain,
                });
            }
        }
        best
    }
}
