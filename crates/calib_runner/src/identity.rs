//! Checkpoint namespace of a run.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::CalibrationConfig;

const FINGERPRINT_LEN: usize = 8;

/// Parameters that make two runs interchangeable.
#[derive(Debug, Serialize)]
struct RunIdentity<'a> {
    detector: &'a str,
    date: &'a str,
    vehicle_cap: i64,
    iterations: usize,
    seed: u64,
    optimizer: &'a calib_core::OptimizerConfig,
}

/// Hex SHA-256 over the run parameters.
pub fn run_fingerprint(config: &CalibrationConfig) -> String {
    let identity = RunIdentity {
        detector: &config.detector,
        date: &config.date,
        vehicle_cap: config.vehicle_cap,
        iterations: config.calibration.iterations,
        seed: config.calibration.seed,
        optimizer: &config.calibration.optimizer,
    };
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(&identity).unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// `<postfix>_<short fingerprint>`; names every state file of the run.
pub fn run_id(config: &CalibrationConfig) -> String {
    let fingerprint = run_fingerprint(config);
    format!("{}_{}", config.postfix(), &fingerprint[..FINGERPRINT_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_parameters_share_a_namespace() {
        let a = CalibrationConfig::default();
        let b = CalibrationConfig {
            log_level: "debug".into(),
            ..CalibrationConfig::default()
        };
        assert_eq!(run_id(&a), run_id(&b));
        assert!(run_id(&a).starts_with("e2w_in_2020-01-02_"));
        assert_eq!(run_fingerprint(&a).len(), 64);
    }

    #[test]
    fn cap_and_detector_change_the_namespace() {
        let base = CalibrationConfig::default();
        let capped = CalibrationConfig {
            vehicle_cap: 10,
            ..CalibrationConfig::default()
        };
        let other = CalibrationConfig {
            detector: "w2e_in".into(),
            ..CalibrationConfig::default()
        };
        assert_ne!(run_fingerprint(&base), run_fingerprint(&capped));
        assert_ne!(run_fingerprint(&base), run_fingerprint(&other));
    }
}
