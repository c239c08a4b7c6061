//! Sequential model-based optimization over a small integer grid.
//!
//! The optimizer proposes points with [`SurrogateOptimizer::ask`] and learns
//! their loss through [`SurrogateOptimizer::tell`]. The first
//! `n_initial_points` proposals are uniform random; afterwards a surrogate
//! model is refitted to every observation and the acquisition rule is
//! minimized over the grid (exhaustively when the grid has at most
//! `n_points` cells, otherwise over `n_points` random cells). Cells are scored
//! in shuffled order, so equal acquisition values go to a random cell rather
//! than the first one of the grid.

mod acquisition;
mod boosting;
mod gaussian_process;
mod space;
mod surrogate;
mod trees;

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use acquisition::{AcquisitionParams, HEDGE_PORTFOLIO};

pub use acquisition::AcquisitionKind;
pub use space::{IntegerDimension, SearchSpace};
pub use surrogate::{Prediction, Surrogate, SurrogateKind};

const RANDOM_UNSEEN_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    #[serde(alias = "base_estimator")]
    pub surrogate: SurrogateKind,
    #[serde(alias = "acq_func")]
    pub acquisition: AcquisitionKind,
    pub n_initial_points: usize,
    /// Cells scored per model-guided proposal on large grids.
    pub n_points: usize,
    pub xi: f64,
    pub kappa: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            surrogate: SurrogateKind::GaussianProcess,
            acquisition: AcquisitionKind::LowerConfidenceBound,
            n_initial_points: 5,
            n_points: 10_000,
            xi: 0.01,
            kappa: 1.96,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.n_initial_points == 0 {
            return Err(CalibrationError::InvalidConfig(
                "n_initial_points must be at least 1; the surrogate needs data to fit".to_string(),
            ));
        }
        if self.n_points == 0 {
            return Err(CalibrationError::InvalidConfig(
                "n_points must be at least 1".to_string(),
            ));
        }
        if !self.xi.is_finite() || self.xi < 0.0 {
            return Err(CalibrationError::InvalidConfig(format!(
                "xi must be a non-negative number, got {}",
                self.xi
            )));
        }
        if !self.kappa.is_finite() || self.kappa < 0.0 {
            return Err(CalibrationError::InvalidConfig(format!(
                "kappa must be a non-negative number, got {}",
                self.kappa
            )));
        }
        Ok(())
    }
}

/// One evaluated point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: Vec<i64>,
    pub loss: f64,
}

pub struct SurrogateOptimizer {
    space: SearchSpace,
    config: OptimizerConfig,
    rng: StdRng,
    observations: Vec<Observation>,
    evaluated: HashSet<Vec<i64>>,
    hedge_gains: [f64; 3],
    /// Per-portfolio-member picks of the previous hedged proposal.
    hedge_picks: Option<[Vec<f64>; 3]>,
}

impl SurrogateOptimizer {
    pub fn new(space: SearchSpace, config: OptimizerConfig, seed: u64) -> Self {
        Self {
            space,
            config,
            rng: StdRng::seed_from_u64(seed),
            observations: Vec::new(),
            evaluated: HashSet::new(),
            hedge_gains: [0.0; 3],
            hedge_picks: None,
        }
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Propose the next point to evaluate.
    pub fn ask(&mut self) -> Vec<i64> {
        if self.observations.len() < self.config.n_initial_points.max(1) {
            return self.random_unseen();
        }

        let mut candidates = self.candidate_points();
        if candidates.is_empty() {
            // Every cell has been evaluated already.
            return self.space.sample(&mut self.rng);
        }
        candidates.shuffle(&mut self.rng);

        let xs: Vec<Vec<f64>> = self
            .observations
            .iter()
            .map(|o| self.space.normalize(&o.point))
            .collect();
        let ys: Vec<f64> = self.observations.iter().map(|o| o.loss).collect();
        let model = self.config.surrogate.fit(&xs, &ys, &mut self.rng);

        let params = AcquisitionParams {
            xi: self.config.xi,
            kappa: self.config.kappa,
            best_observed: ys.iter().copied().fold(f64::INFINITY, f64::min),
        };
        let normalized: Vec<Vec<f64>> = candidates.iter().map(|c| self.space.normalize(c)).collect();
        let predictions: Vec<Prediction> = normalized.iter().map(|x| model.predict(x)).collect();

        let chosen = match self.config.acquisition {
            AcquisitionKind::Hedge => {
                self.update_hedge_gains(model.as_ref());
                let picks = HEDGE_PORTFOLIO.map(|kind| argmin(kind, &predictions, params));
                let member = self.draw_portfolio_member();
                self.hedge_picks = Some(picks.map(|index| normalized[index].clone()));
                picks[member]
            }
            kind => argmin(kind, &predictions, params),
        };
        candidates[chosen].clone()
    }

    /// Record the loss of an evaluated point.
    pub fn tell(&mut self, point: Vec<i64>, loss: f64) {
        debug_assert!(self.space.contains(&point), "point outside the search space");
        self.evaluated.insert(point.clone());
        self.observations.push(Observation { point, loss });
    }

    /// Lowest-loss observation; the earliest one on ties.
    pub fn best(&self) -> Option<&Observation> {
        self.observations.iter().fold(None, |best: Option<&Observation>, o| match best {
            Some(b) if b.loss <= o.loss => Some(b),
            _ => Some(o),
        })
    }

    fn random_unseen(&mut self) -> Vec<i64> {
        if self.space.cardinality() <= self.config.n_points as u64 {
            let unseen: Vec<Vec<i64>> = self
                .space
                .enumerate()
                .into_iter()
                .filter(|p| !self.evaluated.contains(p))
                .collect();
            if !unseen.is_empty() {
                let index = self.rng.gen_range(0..unseen.len());
                return unseen[index].clone();
            }
            return self.space.sample(&mut self.rng);
        }

        let mut point = self.space.sample(&mut self.rng);
        for _ in 0..RANDOM_UNSEEN_ATTEMPTS {
            if !self.evaluated.contains(&point) {
                break;
            }
            point = self.space.sample(&mut self.rng);
        }
        point
    }

    fn candidate_points(&mut self) -> Vec<Vec<i64>> {
        let points = if self.space.cardinality() <= self.config.n_points as u64 {
            self.space.enumerate()
        } else {
            (0..self.config.n_points)
                .map(|_| self.space.sample(&mut self.rng))
                .collect()
        };
        points
            .into_iter()
            .filter(|p| !self.evaluated.contains(p))
            .collect()
    }

    /// Penalize each portfolio member by the new model's prediction at its previous pick.
    fn update_hedge_gains(&mut self, model: &dyn Surrogate) {
        if let Some(picks) = self.hedge_picks.take() {
            for (gain, pick) in self.hedge_gains.iter_mut().zip(picks.iter()) {
                *gain -= model.predict(pick).mean;
            }
        }
    }

    fn draw_portfolio_member(&mut self) -> usize {
        let max_gain = self.hedge_gains.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights = self.hedge_gains.map(|g| (g - max_gain).exp());
        let total: f64 = weights.iter().sum();
        let mut draw = self.rng.gen::<f64>() * total;
        for (index, weight) in weights.iter().enumerate() {
            if draw < *weight {
                return index;
            }
            draw -= weight;
        }
        weights.len() - 1
    }
}

/// Index of the first minimum of the acquisition over `predictions`.
///
/// Callers shuffle the candidates beforehand; the first minimum is then a
/// random one among ties.
fn argmin(kind: AcquisitionKind, predictions: &[Prediction], params: AcquisitionParams) -> usize {
    let mut best_index = 0;
    let mut best_value = f64::INFINITY;
    for (index, prediction) in predictions.iter().enumerate() {
        let value = acquisition::evaluate(kind, *prediction, params);
        if value < best_value {
            best_index = index;
            best_value = value;
        }
    }
    best_index
}
