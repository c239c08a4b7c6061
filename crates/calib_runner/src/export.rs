use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use calib_core::CalibrationRecord;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::error::RunnerError;

/// `calibrated_data_<postfix>.parquet`
pub fn parquet_path(dir: &Path, postfix: &str) -> PathBuf {
    dir.join(format!("calibrated_data_{postfix}.parquet"))
}

/// Write every committed record as one Parquet row group.
pub fn export_records_to_parquet(
    records: &[CalibrationRecord],
    path: &Path,
) -> Result<(), RunnerError> {
    let batch = build_record_batch(records)?;
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn build_record_batch(records: &[CalibrationRecord]) -> Result<RecordBatch, RunnerError> {
    let schema = Arc::new(record_schema());
    Ok(RecordBatch::try_new(schema, build_arrays(records))?)
}

fn record_schema() -> Schema {
    Schema::new(vec![
        Field::new("veh_id", DataType::Utf8, false),
        Field::new("time_detector_sim", DataType::Float64, false),
        Field::new("speed_detector_sim", DataType::Float64, false),
        Field::new("speed_factor", DataType::Float64, false),
        Field::new("time_detector_real", DataType::Int64, false),
        Field::new("depart", DataType::Int64, false),
        Field::new("departSpeed", DataType::Float64, false),
        Field::new("speed_detector_real", DataType::Float64, false),
        Field::new("delta_time", DataType::Float64, false),
        Field::new("delta_speed", DataType::Float64, false),
    ])
}

fn floats(records: &[CalibrationRecord], f: impl Fn(&CalibrationRecord) -> f64) -> ArrayRef {
    Arc::new(Float64Array::from(records.iter().map(f).collect::<Vec<_>>()))
}

fn ints(records: &[CalibrationRecord], f: impl Fn(&CalibrationRecord) -> i64) -> ArrayRef {
    Arc::new(Int64Array::from(records.iter().map(f).collect::<Vec<_>>()))
}

fn build_arrays(records: &[CalibrationRecord]) -> Vec<ArrayRef> {
    vec![
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.veh_id.as_str())
                .collect::<Vec<_>>(),
        )),
        floats(records, |r| r.time_detector_sim),
        floats(records, |r| r.speed_detector_sim),
        floats(records, |r| r.speed_factor),
        ints(records, |r| r.time_detector_real),
        ints(records, |r| r.depart),
        floats(records, |r| r.depart_speed),
        floats(records, |r| r.speed_detector_real),
        floats(records, |r| r.delta_time),
        floats(records, |r| r.delta_speed),
    ]
}
