//! Regression trees and the forest surrogates built from them.

use rand::rngs::StdRng;
use rand::Rng;

use super::surrogate::{Prediction, Surrogate};

pub const FOREST_SIZE: usize = 100;
pub const FOREST_MIN_SAMPLES_LEAF: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRule {
    /// Exhaustive search over all thresholds between distinct values.
    Best,
    /// One uniformly drawn threshold per feature.
    Random,
}

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub split: SplitRule,
    pub min_samples_leaf: usize,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(usize),
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub value: f64,
    pub variance: f64,
    /// Training sample indices that landed in this leaf.
    pub members: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
}

impl RegressionTree {
    /// Grow a tree on the rows of `xs` listed in `samples` (duplicates allowed).
    pub fn fit(
        xs: &[Vec<f64>],
        ys: &[f64],
        samples: Vec<usize>,
        config: TreeConfig,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            leaves: Vec::new(),
        };
        tree.grow(xs, ys, samples, 0, config, rng);
        tree
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    pub fn leaves_mut(&mut self) -> &mut [Leaf] {
        &mut self.leaves
    }

    pub fn leaf_for(&self, x: &[f64]) -> &Leaf {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf(leaf) => return &self.leaves[*leaf],
            }
        }
    }

    fn grow(
        &mut self,
        xs: &[Vec<f64>],
        ys: &[f64],
        samples: Vec<usize>,
        depth: usize,
        config: TreeConfig,
        rng: &mut StdRng,
    ) -> usize {
        let node_index = self.nodes.len();
        self.nodes.push(Node::Leaf(usize::MAX));

        let depth_exhausted = config.max_depth.is_some_and(|max| depth >= max);
        let split = if depth_exhausted || samples.len() < 2 * config.min_samples_leaf {
            None
        } else {
            find_split(xs, ys, &samples, config, rng)
        };

        match split {
            Some((feature, threshold)) => {
                let (left_samples, right_samples): (Vec<usize>, Vec<usize>) =
                    samples.iter().partition(|&&i| xs[i][feature] <= threshold);
                let left = self.grow(xs, ys, left_samples, depth + 1, config, rng);
                let right = self.grow(xs, ys, right_samples, depth + 1, config, rng);
                self.nodes[node_index] = Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                };
            }
            None => {
                let (value, variance) = mean_and_variance(ys, &samples);
                self.nodes[node_index] = Node::Leaf(self.leaves.len());
                self.leaves.push(Leaf {
                    value,
                    variance,
                    members: samples,
                });
            }
        }
        node_index
    }
}

fn mean_and_variance(ys: &[f64], samples: &[usize]) -> (f64, f64) {
    let n = samples.len().max(1) as f64;
    let mean = samples.iter().map(|&i| ys[i]).sum::<f64>() / n;
    let variance = samples.iter().map(|&i| (ys[i] - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Sum of squared errors from running sums.
fn sse(sum: f64, sum_sq: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum_sq - sum * sum / count as f64
    }
}

fn find_split(
    xs: &[Vec<f64>],
    ys: &[f64],
    samples: &[usize],
    config: TreeConfig,
    rng: &mut StdRng,
) -> Option<(usize, f64)> {
    let dims = xs[samples[0]].len();
    let total_sum: f64 = samples.iter().map(|&i| ys[i]).sum();
    let total_sq: f64 = samples.iter().map(|&i| ys[i] * ys[i]).sum();
    let parent = sse(total_sum, total_sq, samples.len());
    if parent <= f64::EPSILON {
        return None;
    }

    let mut best: Option<(f64, usize, f64)> = None;
    for feature in 0..dims {
        let candidate = match config.split {
            SplitRule::Best => best_threshold(xs, ys, samples, feature, config.min_samples_leaf),
            SplitRule::Random => random_threshold(xs, ys, samples, feature, config.min_samples_leaf, rng),
        };
        if let Some((threshold, cost)) = candidate {
            if best.as_ref().map_or(true, |(best_cost, ..)| cost < *best_cost) {
                best = Some((cost, feature, threshold));
            }
        }
    }

    best.filter(|(cost, ..)| *cost < parent)
        .map(|(_, feature, threshold)| (feature, threshold))
}

fn best_threshold(
    xs: &[Vec<f64>],
    ys: &[f64],
    samples: &[usize],
    feature: usize,
    min_leaf: usize,
) -> Option<(f64, f64)> {
    let mut ordered: Vec<usize> = samples.to_vec();
    ordered.sort_by(|&a, &b| xs[a][feature].total_cmp(&xs[b][feature]));

    let total_sum: f64 = ordered.iter().map(|&i| ys[i]).sum();
    let total_sq: f64 = ordered.iter().map(|&i| ys[i] * ys[i]).sum();
    let n = ordered.len();

    let mut left_sum = 0.0;
    let mut left_sq = 0.0;
    let mut best: Option<(f64, f64)> = None;
    for split in 1..n {
        let moved = ordered[split - 1];
        left_sum += ys[moved];
        left_sq += ys[moved] * ys[moved];

        let lower = xs[ordered[split - 1]][feature];
        let upper = xs[ordered[split]][feature];
        if split < min_leaf || n - split < min_leaf || upper <= lower {
            continue;
        }
        let cost = sse(left_sum, left_sq, split)
            + sse(total_sum - left_sum, total_sq - left_sq, n - split);
        if best.map_or(true, |(_, best_cost)| cost < best_cost) {
            best = Some(((lower + upper) / 2.0, cost));
        }
    }
    best
}

fn random_threshold(
    xs: &[Vec<f64>],
    ys: &[f64],
    samples: &[usize],
    feature: usize,
    min_leaf: usize,
    rng: &mut StdRng,
) -> Option<(f64, f64)> {
    let (low, high) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
        (lo.min(xs[i][feature]), hi.max(xs[i][feature]))
    });
    if high <= low {
        return None;
    }
    let threshold = rng.gen_range(low..high);

    let (mut left_sum, mut left_sq, mut left_n) = (0.0, 0.0, 0usize);
    let (mut right_sum, mut right_sq, mut right_n) = (0.0, 0.0, 0usize);
    for &i in samples {
        if xs[i][feature] <= threshold {
            left_sum += ys[i];
            left_sq += ys[i] * ys[i];
            left_n += 1;
        } else {
            right_sum += ys[i];
            right_sq += ys[i] * ys[i];
            right_n += 1;
        }
    }
    if left_n < min_leaf || right_n < min_leaf {
        return None;
    }
    Some((threshold, sse(left_sum, left_sq, left_n) + sse(right_sum, right_sq, right_n)))
}

/// Bagged ensemble of regression trees.
///
/// The predictive standard deviation follows the law of total variance over
/// the trees' leaves: `E[var + mean^2] - E[mean]^2`.
#[derive(Debug, Clone)]
pub struct Forest {
    trees: Vec<RegressionTree>,
}

impl Forest {
    pub fn fit(
        xs: &[Vec<f64>],
        ys: &[f64],
        split: SplitRule,
        bootstrap: bool,
        rng: &mut StdRng,
    ) -> Self {
        let config = TreeConfig {
            split,
            min_samples_leaf: FOREST_MIN_SAMPLES_LEAF,
            max_depth: None,
        };
        let n = ys.len();
        let trees = (0..FOREST_SIZE)
            .map(|_| {
                let samples = if bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(xs, ys, samples, config, rng)
            })
            .collect();
        Self { trees }
    }
}

impl Surrogate for Forest {
    fn predict(&self, x: &[f64]) -> Prediction {
        let count = self.trees.len().max(1) as f64;
        let (mean_sum, second_moment) = self.trees.iter().fold((0.0, 0.0), |(m, s), tree| {
            let leaf = tree.leaf_for(x);
            (m + leaf.value, s + leaf.variance + leaf.value * leaf.value)
        });
        let mean = mean_sum / count;
        let variance = (second_moment / count - mean * mean).max(0.0);
        Prediction {
            mean,
            std: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let xs: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 19.0, 0.5]).collect();
        let ys = xs.iter().map(|x| if x[0] < 0.5 { 1.0 } else { 5.0 }).collect();
        (xs, ys)
    }

    #[test]
    fn best_split_finds_the_step() {
        let (xs, ys) = step_data();
        let mut rng = StdRng::seed_from_u64(1);
        let config = TreeConfig {
            split: SplitRule::Best,
            min_samples_leaf: 1,
            max_depth: Some(1),
        };
        let tree = RegressionTree::fit(&xs, &ys, (0..20).collect(), config, &mut rng);
        assert_eq!(tree.leaves().len(), 2);
        assert_eq!(tree.leaf_for(&[0.1, 0.5]).value, 1.0);
        assert_eq!(tree.leaf_for(&[0.9, 0.5]).value, 5.0);
    }

    #[test]
    fn leaves_respect_minimum_size() {
        let (xs, ys) = step_data();
        let mut rng = StdRng::seed_from_u64(2);
        let config = TreeConfig {
            split: SplitRule::Random,
            min_samples_leaf: 3,
            max_depth: None,
        };
        let tree = RegressionTree::fit(&xs, &ys, (0..20).collect(), config, &mut rng);
        assert!(tree.leaves().iter().all(|leaf| leaf.members.len() >= 3));
        let total: usize = tree.leaves().iter().map(|leaf| leaf.members.len()).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn forests_separate_low_and_high_regions() {
        let (xs, ys) = step_data();
        for (split, bootstrap) in [(SplitRule::Best, true), (SplitRule::Random, false)] {
            let mut rng = StdRng::seed_from_u64(3);
            let forest = Forest::fit(&xs, &ys, split, bootstrap, &mut rng);
            let low = forest.predict(&[0.05, 0.5]);
            let high = forest.predict(&[0.95, 0.5]);
            assert!(low.mean < high.mean);
            assert!(low.std.is_finite() && low.std >= 0.0);
        }
    }
}
