//! Gradient boosted trees fitted to three quantiles of the loss.
//!
//! The median model is the predictive mean; half the spread between the
//! 16th and 84th percentile models is the predictive standard deviation.

use rand::rngs::StdRng;

use super::surrogate::{Prediction, Surrogate};
use super::trees::{RegressionTree, SplitRule, TreeConfig};

pub const QUANTILES: [f64; 3] = [0.16, 0.5, 0.84];
pub const ESTIMATORS: usize = 100;
pub const LEARNING_RATE: f64 = 0.1;
pub const MAX_DEPTH: usize = 3;

#[derive(Debug, Clone)]
struct QuantileModel {
    initial: f64,
    trees: Vec<RegressionTree>,
}

impl QuantileModel {
    fn fit(xs: &[Vec<f64>], ys: &[f64], alpha: f64, rng: &mut StdRng) -> Self {
        let config = TreeConfig {
            split: SplitRule::Best,
            min_samples_leaf: 1,
            max_depth: Some(MAX_DEPTH),
        };
        let initial = quantile(ys.to_vec(), alpha);
        let mut fitted = vec![initial; ys.len()];
        let mut trees = Vec::with_capacity(ESTIMATORS);

        for _ in 0..ESTIMATORS {
            let gradient: Vec<f64> = ys
                .iter()
                .zip(&fitted)
                .map(|(y, f)| if y > f { alpha } else { alpha - 1.0 })
                .collect();
            let mut tree = RegressionTree::fit(xs, &gradient, (0..ys.len()).collect(), config, rng);

            // Leaf values become the residual quantile of their members.
            for leaf in tree.leaves_mut() {
                let residuals: Vec<f64> = leaf.members.iter().map(|&i| ys[i] - fitted[i]).collect();
                leaf.value = quantile(residuals, alpha);
                for &i in &leaf.members {
                    fitted[i] += LEARNING_RATE * leaf.value;
                }
            }
            trees.push(tree);
        }

        Self { initial, trees }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        self.initial
            + LEARNING_RATE * self.trees.iter().map(|tree| tree.leaf_for(x).value).sum::<f64>()
    }
}

#[derive(Debug, Clone)]
pub struct QuantileBoosting {
    low: QuantileModel,
    median: QuantileModel,
    high: QuantileModel,
}

impl QuantileBoosting {
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], rng: &mut StdRng) -> Self {
        let [low, median, high] = QUANTILES;
        Self {
            low: QuantileModel::fit(xs, ys, low, rng),
            median: QuantileModel::fit(xs, ys, median, rng),
            high: QuantileModel::fit(xs, ys, high, rng),
        }
    }
}

impl Surrogate for QuantileBoosting {
    fn predict(&self, x: &[f64]) -> Prediction {
        let low = self.low.predict(x);
        let high = self.high.predict(x);
        Prediction {
            mean: self.median.predict(x),
            std: (high - low).abs() / 2.0,
        }
    }
}

/// Linearly interpolated quantile. Returns 0 for an empty slice.
fn quantile(mut values: Vec<f64>, alpha: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let position = alpha * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    values[lower] * (1.0 - weight) + values[upper] * weight
}
