use std::str::FromStr;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

use super::boosting::QuantileBoosting;
use super::gaussian_process::GaussianProcess;
use super::trees::{Forest, SplitRule};

/// Predictive distribution at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub std: f64,
}

/// Regression model of the loss over the normalized search space.
pub trait Surrogate {
    fn predict(&self, x: &[f64]) -> Prediction;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurrogateKind {
    #[serde(rename = "GP")]
    GaussianProcess,
    #[serde(rename = "RF")]
    RandomForest,
    #[serde(rename = "ET")]
    ExtraTrees,
    #[serde(rename = "GBRT")]
    GradientBoosting,
}

impl SurrogateKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "GP" => Some(Self::GaussianProcess),
            "RF" => Some(Self::RandomForest),
            "ET" => Some(Self::ExtraTrees),
            "GBRT" => Some(Self::GradientBoosting),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GaussianProcess => "GP",
            Self::RandomForest => "RF",
            Self::ExtraTrees => "ET",
            Self::GradientBoosting => "GBRT",
        }
    }

    /// Fit a fresh model of this family to `(xs, ys)`.
    pub(crate) fn fit(self, xs: &[Vec<f64>], ys: &[f64], rng: &mut StdRng) -> Box<dyn Surrogate> {
        match self {
            Self::GaussianProcess => Box::new(GaussianProcess::fit(xs, ys)),
            Self::RandomForest => Box::new(Forest::fit(xs, ys, SplitRule::Best, true, rng)),
            Self::ExtraTrees => Box::new(Forest::fit(xs, ys, SplitRule::Random, false, rng)),
            Self::GradientBoosting => Box::new(QuantileBoosting::fit(xs, ys, rng)),
        }
    }
}

impl FromStr for SurrogateKind {
    type Err = CalibrationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
            .ok_or_else(|| CalibrationError::InvalidConfig(format!("unknown base estimator {name}")))
    }
}
