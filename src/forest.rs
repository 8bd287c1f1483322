//! Bagged CART regression trees.
//!
//! Trees split on mean squared error, predict the mean target of a leaf, and
//! are grown on bootstrap samples drawn from a seeded RNG so that training the
//! same data twice yields the same forest.

use linfa::prelude::*;
use linfa::DatasetBase;
use log::debug;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{AnalyzerError, Result};

const MIN_IMPURITY: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestSettings {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 5,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum RegressionNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<RegressionNode>,
        right: Box<RegressionNode>,
    },
}

impl RegressionNode {
    fn depth(&self) -> usize {
        match self {
            RegressionNode::Leaf { .. } => 0,
            RegressionNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: RegressionNode,
    /// Total squared-error reduction per feature, normalized to sum to 1 (all zero for a stump).
    importances: Vec<f64>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                RegressionNode::Leaf { value } => return *value,
                RegressionNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    max_depth: usize,
    min_samples_split: usize,
    importances: Vec<f64>,
}

/// Sum of squared deviations from the mean over `indices`.
fn squared_error(sum: f64, sum_sq: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (sum_sq - sum * sum / n as f64).max(0.0)
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, indices: Vec<usize>) -> RegressionTree {
        let root = self.grow(indices, 0);
        let total: f64 = self.importances.iter().sum();
        if total > 0.0 {
            for importance in &mut self.importances {
                *importance /= total;
            }
        }
        RegressionTree {
            root,
            importances: self.importances,
        }
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> RegressionNode {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| self.y[i]).sum();
        let sum_sq: f64 = indices.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let value = if n > 0 { sum / n as f64 } else { 0.0 };
        let node_error = squared_error(sum, sum_sq, n);

        if n < self.min_samples_split
            || depth >= self.max_depth
            || node_error / (n.max(1) as f64) < MIN_IMPURITY
        {
            return RegressionNode::Leaf { value };
        }

        let Some(split) = self.best_split(&indices, node_error) else {
            return RegressionNode::Leaf { value };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
        if left.is_empty() || right.is_empty() {
            return RegressionNode::Leaf { value };
        }

        self.importances[split.feature] += split.gain;

        RegressionNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(left, depth + 1)),
            right: Box::new(self.grow(right, depth + 1)),
        }
    }

    /// Exhaustive sweep over every feature and every boundary between distinct sorted values.
    fn best_split(&self, indices: &[usize], node_error: f64) -> Option<SplitCandidate> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature in 0..self.x.ncols() {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let y = self.y[order[k - 1]];
                left_sum += y;
                left_sq += y * y;

                let lo = self.x[[order[k - 1], feature]];
                let hi = self.x[[order[k], feature]];
                if lo >= hi {
                    continue;
                }

                let children = squared_error(left_sum, left_sq, k)
                    + squared_error(total_sum - left_sum, total_sq - left_sq, n - k);
                let gain = node_error - children;
                if gain <= MIN_IMPURITY || best.as_ref().is_some_and(|b| gain <= b.gain) {
                    continue;
                }

                let mut threshold = (lo + hi) / 2.0;
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    gain,
                });
            }
        }

        best
    }
}

/// Random forest regressor fitted through [`ForestSettings`].
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForestRegressor {
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// One prediction per tree for a single input row.
    pub fn tree_predictions(&self, row: ArrayView1<f64>) -> Vec<f64> {
        self.trees.iter().map(|tree| tree.predict_row(row)).collect()
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let predictions = self.tree_predictions(row);
        mean(&predictions)
    }

    /// Mean decrease in squared error per feature, averaged over trees and normalized to sum to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (total, importance) in totals.iter_mut().zip(tree.feature_importances()) {
                *total += importance;
            }
        }

        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for total in &mut totals {
                *total /= sum;
            }
        }
        totals
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn bootstrap_sample(n_samples: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::from(0..n_samples);
    (0..n_samples).map(|_| dist.sample(&mut rng)).collect()
}

impl Fit<Array2<f64>, Array1<f64>, AnalyzerError> for ForestSettings {
    type Object = RandomForestRegressor;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array1<f64>>) -> Result<Self::Object> {
        let x = dataset.records.view();
        let y = dataset.targets.view();
        let n_samples = x.nrows();

        if n_samples == 0 {
            return Err(AnalyzerError::MalformedInput(
                "cannot fit a forest on zero samples".to_string(),
            ));
        }
        if n_samples != y.len() {
            return Err(AnalyzerError::MalformedInput(format!(
                "{} feature rows but {} targets",
                n_samples,
                y.len()
            )));
        }
        if self.n_trees == 0 {
            return Err(AnalyzerError::MalformedInput(
                "forest needs at least one tree".to_string(),
            ));
        }

        let trees: Vec<RegressionTree> = (0..self.n_trees)
            .map(|i| {
                let builder = TreeBuilder {
                    x,
                    y,
                    max_depth: self.max_depth,
                    min_samples_split: self.min_samples_split.max(2),
                    importances: vec![0.0; x.ncols()],
                };
                builder.build(bootstrap_sample(n_samples, self.seed.wrapping_add(i as u64)))
            })
            .collect();

        debug!(
            "Fitted {} trees on {} samples (max depth reached: {})",
            trees.len(),
            n_samples,
            trees.iter().map(RegressionTree::depth).max().unwrap_or(0)
        );

        Ok(RandomForestRegressor {
            trees,
            n_features: x.ncols(),
        })
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for RandomForestRegressor {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        for (row, target) in x.rows().into_iter().zip(y.iter_mut()) {
            *target = self.predict_row(row);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}
