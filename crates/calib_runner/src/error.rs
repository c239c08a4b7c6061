use std::io;
use std::path::PathBuf;

use calib_core::CalibrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration file {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown detector '{0}'")]
    UnknownDetector(String),
    #[error("malformed measurement row {row} in {path}: {message}")]
    Measurement {
        path: PathBuf,
        row: usize,
        message: String,
    },
    #[error("no measurements for detector {detector} in {path}")]
    NoMeasurements { detector: String, path: PathBuf },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

impl From<RunnerError> for CalibrationError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Calibration(err) => err,
            RunnerError::InvalidConfig(message) => CalibrationError::InvalidConfig(message),
            other => CalibrationError::Recorder(other.to_string()),
        }
    }
}
