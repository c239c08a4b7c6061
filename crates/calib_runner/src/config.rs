//! Run configuration: JSON file plus command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use calib_core::CalibrationSettings;
use serde::{Deserialize, Serialize};

use crate::catalog::DetectorCatalog;
use crate::error::RunnerError;

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPaths {
    /// Directory holding `data_<date>.csv`.
    pub measurements_dir: PathBuf,
    /// Simulator configuration, detector files, trips and state files.
    pub intermediate_dir: PathBuf,
    /// Calibration tables.
    pub output_dir: PathBuf,
    pub net_file: PathBuf,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self {
            measurements_dir: PathBuf::from("data/daily_splitted_data"),
            intermediate_dir: PathBuf::from("data/calibration_intermediate_data"),
            output_dir: PathBuf::from("data/calibration_data"),
            net_file: PathBuf::from("data/map/Hornsgatan.net.xml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub binary: PathBuf,
    pub port: u16,
    pub connect_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("sumo"),
            port: 8813,
            connect_attempts: 60,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub detector: String,
    pub date: String,
    /// Vehicles to calibrate; `0` means every measured vehicle.
    #[serde(alias = "init_number")]
    pub vehicle_cap: i64,
    #[serde(flatten)]
    pub calibration: CalibrationSettings,
    pub paths: RunPaths,
    pub simulator: SimulatorSettings,
    pub log_level: String,
    /// Replaces the built-in detector catalog when present.
    pub detectors: Option<DetectorCatalog>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            detector: "e2w_in".to_string(),
            date: "2020-01-02".to_string(),
            vehicle_cap: 0,
            calibration: CalibrationSettings::default(),
            paths: RunPaths::default(),
            simulator: SimulatorSettings::default(),
            log_level: "info".to_string(),
            detectors: None,
        }
    }
}

impl CalibrationConfig {
    pub fn load(path: &Path) -> Result<Self, RunnerError> {
        let raw = fs::read_to_string(path).map_err(|source| RunnerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| RunnerError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn catalog(&self) -> DetectorCatalog {
        self.detectors.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.date.trim().is_empty() {
            return Err(RunnerError::InvalidConfig("date must not be empty".into()));
        }
        if self.vehicle_cap < 0 {
            return Err(RunnerError::InvalidConfig(format!(
                "vehicle cap must not be negative, got {}",
                self.vehicle_cap
            )));
        }
        if self.simulator.port == 0 {
            return Err(RunnerError::InvalidConfig("simulator port must be set".into()));
        }
        self.catalog().get(&self.detector)?;
        self.calibration.validate()?;
        Ok(())
    }

    /// File-name suffix shared by every artefact of the run.
    pub fn postfix(&self) -> String {
        postfix(&self.detector, &self.date, self.vehicle_cap)
    }
}

/// `<detector>_<date>`, or `<detector>_<date>_<cap>` for capped runs.
pub fn postfix(detector: &str, date: &str, vehicle_cap: i64) -> String {
    if vehicle_cap < 1 {
        format!("{detector}_{date}")
    } else {
        format!("{detector}_{date}_{vehicle_cap}")
    }
}

#[cfg(test)]
mod tests {
    use calib_core::{AcquisitionKind, NoCrossingPolicy, SurrogateKind};

    use super::*;

    #[test]
    fn empty_file_yields_the_defaults() {
        let config = CalibrationConfig::from_json("{}").unwrap();
        assert_eq!(config, CalibrationConfig::default());
        assert_eq!(config.calibration.iterations, 50);
        assert_eq!(config.calibration.optimizer.n_initial_points, 5);
        assert_eq!(config.postfix(), "e2w_in_2020-01-02");
    }

    #[test]
    fn reads_legacy_parameter_names() {
        let config = CalibrationConfig::from_json(
            r#"{
                "detector": "w2e_out",
                "date": "2020-01-03",
                "init_number": 25,
                "iterations": 30,
                "optimizer": {"base_estimator": "ET", "acq_func": "gp_hedge", "n_initial_points": 8},
                "no_crossing": {"policy": "penalize", "loss": 1000.0}
            }"#,
        )
        .unwrap();
        assert_eq!(config.vehicle_cap, 25);
        assert_eq!(config.calibration.iterations, 30);
        assert_eq!(config.calibration.optimizer.surrogate, SurrogateKind::ExtraTrees);
        assert_eq!(config.calibration.optimizer.acquisition, AcquisitionKind::Hedge);
        assert_eq!(
            config.calibration.no_crossing,
            NoCrossingPolicy::Penalize { loss: 1000.0 }
        );
        assert_eq!(config.postfix(), "w2e_out_2020-01-03_25");
        config.validate().unwrap();
    }

    #[test]
    fn unsupported_acquisition_is_rejected_when_parsing() {
        let err = CalibrationConfig::from_json(r#"{"optimizer": {"acq_func": "EIps"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn validation_catches_unknown_detectors() {
        let config = CalibrationConfig {
            detector: "n2s".into(),
            ..CalibrationConfig::default()
        };
        assert!(matches!(config.validate(), Err(RunnerError::UnknownDetector(_))));
    }

    #[test]
    fn validation_catches_bad_settings() {
        let mut config = CalibrationConfig::default();
        config.calibration.iterations = 0;
        assert!(matches!(
            config.validate(),
            Err(RunnerError::Calibration(calib_core::CalibrationError::InvalidConfig(_)))
        ));
    }
}
