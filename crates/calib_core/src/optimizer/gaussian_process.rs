//! Gaussian process regression with an anisotropic Matérn 5/2 kernel.
//!
//! Targets are standardized before fitting. Hyperparameters (one length scale
//! per dimension and the noise level) are chosen from a fixed grid by log
//! marginal likelihood; the signal amplitude is fixed to 1 on the
//! standardized scale.

use super::surrogate::{Prediction, Surrogate};

const LENGTH_SCALES: [f64; 6] = [0.05, 0.1, 0.2, 0.4, 0.8, 1.6];
const NOISE_LEVELS: [f64; 3] = [1e-5, 1e-2, 1e-1];
const AMPLITUDE: f64 = 1.0;
const JITTER: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct GaussianProcess {
    xs: Vec<Vec<f64>>,
    length_scales: Vec<f64>,
    /// Lower-triangular Cholesky factor of `K + noise * I`.
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    pub fn fit(xs: &[Vec<f64>], ys: &[f64]) -> Self {
        let n = ys.len();
        let y_mean = ys.iter().sum::<f64>() / n.max(1) as f64;
        let variance = ys.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n.max(1) as f64;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let targets: Vec<f64> = ys.iter().map(|y| (y - y_mean) / y_std).collect();

        let dims = xs.first().map_or(0, Vec::len);
        let mut best: Option<(f64, Vec<f64>, Vec<Vec<f64>>, Vec<f64>)> = None;
        for length_scales in length_scale_grid(dims) {
            for noise in NOISE_LEVELS {
                let gram = gram_matrix(xs, &length_scales, noise);
                let Some(chol) = cholesky(&gram) else {
                    continue;
                };
                let alpha = cho_solve(&chol, &targets);
                let log_likelihood = log_marginal_likelihood(&chol, &alpha, &targets);
                if best
                    .as_ref()
                    .map_or(true, |(score, ..)| log_likelihood > *score)
                {
                    best = Some((log_likelihood, length_scales.clone(), chol, alpha));
                }
            }
        }

        match best {
            Some((_, length_scales, chol, alpha)) => Self {
                xs: xs.to_vec(),
                length_scales,
                chol,
                alpha,
                y_mean,
                y_std,
            },
            // Only reachable without data; predict the prior.
            None => Self {
                xs: Vec::new(),
                length_scales: vec![1.0; dims],
                chol: Vec::new(),
                alpha: Vec::new(),
                y_mean,
                y_std,
            },
        }
    }
}

impl Surrogate for GaussianProcess {
    fn predict(&self, x: &[f64]) -> Prediction {
        let k_star: Vec<f64> = self
            .xs
            .iter()
            .map(|xi| matern52(xi, x, &self.length_scales))
            .collect();
        let mean: f64 = k_star.iter().zip(&self.alpha).map(|(k, a)| k * a).sum();
        let v = forward_substitute(&self.chol, &k_star);
        let variance = (AMPLITUDE - v.iter().map(|vi| vi * vi).sum::<f64>()).max(0.0);

        Prediction {
            mean: mean * self.y_std + self.y_mean,
            std: variance.sqrt() * self.y_std,
        }
    }
}

fn length_scale_grid(dims: usize) -> Vec<Vec<f64>> {
    let mut grid: Vec<Vec<f64>> = vec![Vec::with_capacity(dims)];
    for _ in 0..dims {
        grid = grid
            .into_iter()
            .flat_map(|prefix| {
                LENGTH_SCALES.iter().map(move |scale| {
                    let mut scales = prefix.clone();
                    scales.push(*scale);
                    scales
                })
            })
            .collect();
    }
    grid
}

fn matern52(a: &[f64], b: &[f64], length_scales: &[f64]) -> f64 {
    let r = a
        .iter()
        .zip(b)
        .zip(length_scales)
        .map(|((ai, bi), l)| ((ai - bi) / l).powi(2))
        .sum::<f64>()
        .sqrt();
    let s = 5f64.sqrt() * r;
    AMPLITUDE * (1.0 + s + s * s / 3.0) * (-s).exp()
}

fn gram_matrix(xs: &[Vec<f64>], length_scales: &[f64], noise: f64) -> Vec<Vec<f64>> {
    let n = xs.len();
    let mut gram = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let k = matern52(&xs[i], &xs[j], length_scales);
            gram[i][j] = k;
            gram[j][i] = k;
        }
        gram[i][i] += noise + JITTER;
    }
    gram
}

/// Returns `None` when the matrix is not positive definite.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let dot: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let diag = matrix[i][i] - dot;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                lower[i][j] = diag.sqrt();
            } else {
                lower[i][j] = (matrix[i][j] - dot) / lower[j][j];
            }
        }
    }
    Some(lower)
}

/// Solve `L x = b`.
fn forward_substitute(lower: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = lower.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let dot: f64 = (0..i).map(|k| lower[i][k] * x[k]).sum();
        x[i] = (b[i] - dot) / lower[i][i];
    }
    x
}

/// Solve `L^T x = b`.
fn backward_substitute(lower: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = lower.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let dot: f64 = (i + 1..n).map(|k| lower[k][i] * x[k]).sum();
        x[i] = (b[i] - dot) / lower[i][i];
    }
    x
}

fn cho_solve(lower: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    backward_substitute(lower, &forward_substitute(lower, b))
}

fn log_marginal_likelihood(lower: &[Vec<f64>], alpha: &[f64], targets: &[f64]) -> f64 {
    let fit: f64 = targets.iter().zip(alpha).map(|(y, a)| y * a).sum();
    let log_det: f64 = (0..lower.len()).map(|i| lower[i][i].ln()).sum();
    -0.5 * fit - log_det - 0.5 * lower.len() as f64 * (2.0 * std::f64::consts::PI).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic_samples() -> (Vec<Vec<f64>>, Vec<f64>) {
        let xs: Vec<Vec<f64>> = (0..=10).map(|i| vec![i as f64 / 10.0]).collect();
        let ys = xs.iter().map(|x| (x[0] - 0.3).powi(2)).collect();
        (xs, ys)
    }

    #[test]
    fn cholesky_reconstructs_matrix() {
        let matrix = vec![
            vec![4.0, 2.0, 0.4],
            vec![2.0, 5.0, 1.0],
            vec![0.4, 1.0, 3.0],
        ];
        let lower = cholesky(&matrix).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let value: f64 = (0..3).map(|k| lower[i][k] * lower[j][k]).sum();
                assert!((value - matrix[i][j]).abs() < 1e-12);
            }
        }
        assert!(cholesky(&[vec![-1.0]]).is_none());
    }

    #[test]
    fn interpolates_training_points() {
        let (xs, ys) = quadratic_samples();
        let gp = GaussianProcess::fit(&xs, &ys);
        for (x, y) in xs.iter().zip(&ys) {
            let prediction = gp.predict(x);
            assert!((prediction.mean - y).abs() < 0.05, "{x:?}: {prediction:?} vs {y}");
        }
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let xs = vec![vec![0.0], vec![0.1], vec![0.2]];
        let ys = vec![1.0, 0.5, 0.8];
        let gp = GaussianProcess::fit(&xs, &ys);
        let near = gp.predict(&[0.1]).std;
        let far = gp.predict(&[0.9]).std;
        assert!(far > near);
    }

    #[test]
    fn constant_targets_do_not_break_fitting() {
        let xs = vec![vec![0.0, 0.0], vec![0.5, 0.5], vec![1.0, 1.0]];
        let ys = vec![2.0, 2.0, 2.0];
        let prediction = GaussianProcess::fit(&xs, &ys).predict(&[0.25, 0.75]);
        assert!(prediction.mean.is_finite());
        assert!(prediction.std.is_finite());
    }
}
