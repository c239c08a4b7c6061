//! Command-line driver around the calibration core: configuration, detector
//! catalog, measurement import, simulator files, CSV and Parquet outputs.

pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod identity;
pub mod logging;
pub mod measurements;
pub mod pipeline;
pub mod recorder;

pub use catalog::DetectorCatalog;
pub use config::{postfix, CalibrationConfig, RunPaths, SimulatorSettings};
pub use error::RunnerError;
pub use pipeline::{calibrate_with, prepare, run, PreparedRun, RunReport};
pub use recorder::CsvRecorder;
