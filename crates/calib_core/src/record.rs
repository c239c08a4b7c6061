//! Append-only calibration outputs.

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Column order of the calibration table.
pub const RECORD_COLUMNS: [&str; 10] = [
    "veh_id",
    "time_detector_sim",
    "speed_detector_sim",
    "speed_factor",
    "time_detector_real",
    "depart",
    "departSpeed",
    "speed_detector_real",
    "delta_time",
    "delta_speed",
];

/// Column order of the trajectory table.
pub const TRACE_COLUMNS: [&str; 11] = [
    "time",
    "id",
    "speedFactor",
    "x",
    "y",
    "angle",
    "speed",
    "acceleration",
    "laneOffset",
    "laneId",
    "noise",
];

/// Final outcome for one vehicle. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub veh_id: String,
    pub time_detector_sim: f64,
    pub speed_detector_sim: f64,
    pub speed_factor: f64,
    pub time_detector_real: i64,
    pub depart: i64,
    #[serde(rename = "departSpeed")]
    pub depart_speed: f64,
    pub speed_detector_real: f64,
    pub delta_time: f64,
    pub delta_speed: f64,
}

impl CalibrationRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        veh_id: impl Into<String>,
        time_detector_sim: f64,
        speed_detector_sim: f64,
        speed_factor: f64,
        time_detector_real: i64,
        depart: i64,
        depart_speed: f64,
        speed_detector_real: f64,
    ) -> Self {
        Self {
            veh_id: veh_id.into(),
            time_detector_sim,
            speed_detector_sim,
            speed_factor,
            time_detector_real,
            depart,
            depart_speed,
            speed_detector_real,
            delta_time: time_detector_sim - time_detector_real as f64,
            delta_speed: speed_detector_sim - speed_detector_real,
        }
    }
}

/// One vehicle's kinematic state at one simulation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    pub time: i64,
    pub id: String,
    #[serde(rename = "speedFactor")]
    pub speed_factor: f64,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub acceleration: f64,
    #[serde(rename = "laneOffset")]
    pub lane_offset: f64,
    #[serde(rename = "laneId")]
    pub lane_id: String,
    pub noise: f64,
}

/// Durable destination for calibration results.
///
/// Implementations must persist each record before returning so that an
/// aborted run keeps everything recorded up to the failure.
pub trait RecordSink {
    fn record(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError>;

    /// Trajectory rows of the winning trial. Ignored unless the sink keeps traces.
    fn record_trace(&mut self, _rows: &[TraceRow]) -> Result<(), CalibrationError> {
        Ok(())
    }
}

/// In-memory sink.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub records: Vec<CalibrationRecord>,
    pub trace: Vec<TraceRow>,
}

impl RecordSink for MemorySink {
    fn record(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn record_trace(&mut self, rows: &[TraceRow]) -> Result<(), CalibrationError> {
        self.trace.extend_from_slice(rows);
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn record(&mut self, record: &CalibrationRecord) -> Result<(), CalibrationError> {
        (**self).record(record)
    }

    fn record_trace(&mut self, rows: &[TraceRow]) -> Result<(), CalibrationError> {
        (**self).record_trace(rows)
    }
}
