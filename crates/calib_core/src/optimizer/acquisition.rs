//! Acquisition rules. Every rule is expressed as a value to minimize.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::surrogate::Prediction;
use crate::error::CalibrationError;

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionKind {
    /// Lower confidence bound.
    #[serde(rename = "LCB")]
    LowerConfidenceBound,
    /// Expected improvement.
    #[serde(rename = "EI")]
    ExpectedImprovement,
    /// Probability of improvement.
    #[serde(rename = "PI")]
    ProbabilityOfImprovement,
    /// Softmax portfolio over LCB, EI and PI driven by past model predictions.
    #[serde(rename = "gp_hedge")]
    Hedge,
}

impl AcquisitionKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "LCB" => Some(Self::LowerConfidenceBound),
            "EI" => Some(Self::ExpectedImprovement),
            "PI" => Some(Self::ProbabilityOfImprovement),
            "gp_hedge" => Some(Self::Hedge),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LowerConfidenceBound => "LCB",
            Self::ExpectedImprovement => "EI",
            Self::ProbabilityOfImprovement => "PI",
            Self::Hedge => "gp_hedge",
        }
    }
}

impl FromStr for AcquisitionKind {
    type Err = CalibrationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name).ok_or_else(|| match name {
            "MES" | "PVRS" | "EIps" | "PIps" => CalibrationError::InvalidConfig(format!(
                "acquisition function {name} needs per-evaluation timings and is not supported"
            )),
            _ => CalibrationError::InvalidConfig(format!("unknown acquisition function {name}")),
        })
    }
}

/// Rules that take part in the hedge portfolio, in portfolio order.
pub(crate) const HEDGE_PORTFOLIO: [AcquisitionKind; 3] = [
    AcquisitionKind::ExpectedImprovement,
    AcquisitionKind::LowerConfidenceBound,
    AcquisitionKind::ProbabilityOfImprovement,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AcquisitionParams {
    pub xi: f64,
    pub kappa: f64,
    pub best_observed: f64,
}

/// Acquisition value of a single (non-hedge) rule.
pub(crate) fn evaluate(kind: AcquisitionKind, prediction: Prediction, params: AcquisitionParams) -> f64 {
    match kind {
        AcquisitionKind::LowerConfidenceBound => prediction.mean - params.kappa * prediction.std,
        AcquisitionKind::ExpectedImprovement => -expected_improvement(prediction, params),
        AcquisitionKind::ProbabilityOfImprovement => -probability_of_improvement(prediction, params),
        AcquisitionKind::Hedge => {
            debug_assert!(false, "hedge is resolved to a portfolio member before evaluation");
            prediction.mean - params.kappa * prediction.std
        }
    }
}

fn expected_improvement(prediction: Prediction, params: AcquisitionParams) -> f64 {
    let improvement = params.best_observed - params.xi - prediction.mean;
    if prediction.std <= 0.0 {
        return improvement.max(0.0);
    }
    let z = improvement / prediction.std;
    improvement * normal_cdf(z) + prediction.std * normal_pdf(z)
}

fn probability_of_improvement(prediction: Prediction, params: AcquisitionParams) -> f64 {
    let improvement = params.best_observed - params.xi - prediction.mean;
    if prediction.std <= 0.0 {
        return if improvement > 0.0 { 1.0 } else { 0.0 };
    }
    normal_cdf(improvement / prediction.std)
}

pub(crate) fn normal_pdf(z: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * z * z).exp()
}

pub(crate) fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

/// Abramowitz & Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AcquisitionParams {
        AcquisitionParams {
            xi: 0.01,
            kappa: 1.96,
            best_observed: 1.0,
        }
    }

    #[test]
    fn normal_cdf_matches_known_values() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.0) - 0.158_655).abs() < 1e-5);
    }

    #[test]
    fn lcb_rewards_uncertainty() {
        let certain = Prediction { mean: 2.0, std: 0.1 };
        let uncertain = Prediction { mean: 2.0, std: 1.0 };
        let kind = AcquisitionKind::LowerConfidenceBound;
        assert!(evaluate(kind, uncertain, params()) < evaluate(kind, certain, params()));
    }

    #[test]
    fn improvement_rules_prefer_lower_means() {
        for kind in [
            AcquisitionKind::ExpectedImprovement,
            AcquisitionKind::ProbabilityOfImprovement,
        ] {
            let good = Prediction { mean: 0.2, std: 0.5 };
            let bad = Prediction { mean: 3.0, std: 0.5 };
            assert!(evaluate(kind, good, params()) < evaluate(kind, bad, params()));
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in [
            AcquisitionKind::LowerConfidenceBound,
            AcquisitionKind::ExpectedImprovement,
            AcquisitionKind::ProbabilityOfImprovement,
            AcquisitionKind::Hedge,
        ] {
            assert_eq!(AcquisitionKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(AcquisitionKind::parse("MES"), None);
        assert!("EIps".parse::<AcquisitionKind>().is_err());
        assert!("EI".parse::<AcquisitionKind>().is_ok());
    }
}
