//! Daily detector measurements and the trips derived from them.

use std::fs::File;
use std::path::{Path, PathBuf};

use calib_core::{DetectionEvent, DetectorRoute};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RunnerError;

const KMH_PER_MS: f64 = 3.6;

#[derive(Debug, Deserialize)]
struct MeasurementRow {
    detector_id: String,
    time_detector_real: f64,
    /// km/h
    speed_detector_real: f64,
}

/// `<dir>/data_<date>.csv`
pub fn measurement_file(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("data_{date}.csv"))
}

/// Load one detector's crossings in time order.
///
/// Rows of other detectors are skipped. Ids are `<row>_<detector>` where
/// `row` counts the kept rows in file order, speeds are converted to m/s, and
/// a positive `vehicle_cap` keeps only the earliest crossings.
pub fn load_detections(
    path: &Path,
    detector_id: &str,
    vehicle_cap: i64,
) -> Result<Vec<DetectionEvent>, RunnerError> {
    let file = File::open(path).map_err(|source| RunnerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);

    let mut events = Vec::new();
    for (line, row) in reader.deserialize::<MeasurementRow>().enumerate() {
        let row = row.map_err(|err| RunnerError::Measurement {
            path: path.to_path_buf(),
            row: line + 1,
            message: err.to_string(),
        })?;
        if row.detector_id != detector_id {
            continue;
        }
        if !row.time_detector_real.is_finite() || !row.speed_detector_real.is_finite() {
            return Err(RunnerError::Measurement {
                path: path.to_path_buf(),
                row: line + 1,
                message: "time and speed must be finite".into(),
            });
        }
        let id = format!("{}_{detector_id}", events.len());
        events.push(DetectionEvent::new(
            id,
            row.detector_id,
            row.time_detector_real.round() as i64,
            row.speed_detector_real / KMH_PER_MS,
        ));
    }

    if events.is_empty() {
        return Err(RunnerError::NoMeasurements {
            detector: detector_id.to_string(),
            path: path.to_path_buf(),
        });
    }

    events.sort_by_key(|event| event.time_detector_real);
    if vehicle_cap > 0 {
        events.truncate(vehicle_cap as usize);
    }
    info!(
        detector = detector_id,
        vehicles = events.len(),
        file = %path.display(),
        "loaded measurements"
    );
    Ok(events)
}

/// One row of `trips_<postfix>.csv`: the measured vehicle and its nominal trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRow<'a> {
    pub id: &'a str,
    pub detector_id: &'a str,
    pub time_detector_real: i64,
    pub speed_detector_real: f64,
    pub depart: i64,
    pub from: &'a str,
    pub to: &'a str,
    #[serde(rename = "departLane")]
    pub depart_lane: u32,
    #[serde(rename = "departSpeed")]
    pub depart_speed: f64,
}

/// Write the nominal trips (departure = crossing minus travel time) for inspection.
pub fn write_trips(
    path: &Path,
    events: &[DetectionEvent],
    route: &DetectorRoute,
) -> Result<(), RunnerError> {
    let mut writer = csv::Writer::from_path(path)?;
    for event in events {
        writer.serialize(TripRow {
            id: &event.id,
            detector_id: &event.detector_id,
            time_detector_real: event.time_detector_real,
            speed_detector_real: event.speed_detector_real,
            depart: event.time_detector_real - route.travel_time_offset,
            from: &route.from_edge,
            to: &route.to_edge,
            depart_lane: route.lane_index,
            depart_speed: 0.0,
        })?;
    }
    writer.flush()?;
    Ok(())
}
