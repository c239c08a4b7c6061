//! CSV sinks flushed after every committed vehicle.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use calib_core::record::{RECORD_COLUMNS, TRACE_COLUMNS};
use calib_core::{CalibrationError, CalibrationRecord, RecordSink, TraceRow};
use csv::{Writer, WriterBuilder};

use crate::error::RunnerError;

/// `calibrated_data_<postfix>.csv`
pub fn records_path(dir: &Path, postfix: &str) -> PathBuf {
    dir.join(format!("calibrated_data_{postfix}.csv"))
}

/// `fcd_data_<postfix>.csv`
pub fn trace_path(dir: &Path, postfix: &str) -> PathBuf {
    dir.join(format!("fcd_data_{postfix}.csv"))
}

pub struct CsvRecorder {
    records: Writer<File>,
    trace: Option<Writer<File>>,
    records_path: PathBuf,
    written: usize,
}

impl CsvRecorder {
    /// Create (truncating) the record table and, with `with_trace`, the trajectory table.
    pub fn create(dir: &Path, postfix: &str, with_trace: bool) -> Result<Self, RunnerError> {
        fs::create_dir_all(dir)?;
        let records_path = records_path(dir, postfix);
        let records = open_table(&records_path, &RECORD_COLUMNS)?;
        let trace = if with_trace {
            Some(open_table(&trace_path(dir, postfix), &TRACE_COLUMNS)?)
        } else {
            None
        };
        Ok(Self {
            records,
            trace,
            records_path,
            written: 0,
        })
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

fn open_table(path: &Path, columns: &[&str]) -> Result<Writer<File>, RunnerError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    writer.write_record(columns)?;
    writer.flush()?;
    Ok(writer)
}

fn recorder_error(err: impl std::fmt::Display) -> CalibrationError {
    CalibrationError::Recorder(err.to_string())
}

impl RecordSink for CsvRecorder {
    fn record(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        self.records.serialize(record).map_err(recorder_error)?;
        self.records.flush().map_err(recorder_error)?;
        self.written += 1;
        Ok(())
    }

    fn record_trace(&mut self, rows: &[TraceRow]) -> Result<(), CalibrationError> {
        let Some(trace) = self.trace.as_mut() else {
            return Ok(());
        };
        for row in rows {
            trace.serialize(row).map_err(recorder_error)?;
        }
        trace.flush().map_err(recorder_error)
    }
}
