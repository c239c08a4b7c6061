//! End-to-end flow for one detector and date.

use std::path::PathBuf;
use std::time::Duration;

use calib_core::{
    prepare_simulation, Calibrator, Checkpoint, DetectionEvent, DetectorRoute,
    SimulationController, TrialRunner, TripSequencer,
};
use calib_traci::{write_simulation_files, LaunchOptions, SimulationFiles, TraciController};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::error::RunnerError;
use crate::export::{export_records_to_parquet, parquet_path};
use crate::identity::run_id;
use crate::measurements::{load_detections, measurement_file, write_trips};
use crate::recorder::CsvRecorder;

/// Everything written before the simulator is started.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub postfix: String,
    pub run_id: String,
    pub route: DetectorRoute,
    pub events: Vec<DetectionEvent>,
    pub files: SimulationFiles,
    pub trips_path: PathBuf,
    /// Simulation time the simulator is started at.
    pub begin_time: i64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub vehicles: usize,
    pub records_path: PathBuf,
    pub parquet_path: PathBuf,
    pub final_checkpoint: Checkpoint,
}

/// Load measurements and write the simulator inputs and the trips table.
pub fn prepare(config: &CalibrationConfig) -> Result<PreparedRun, RunnerError> {
    config.validate()?;
    let route = config.catalog().get(&config.detector)?.clone();
    let postfix = config.postfix();

    let source = measurement_file(&config.paths.measurements_dir, &config.date);
    let events = load_detections(&source, &config.detector, config.vehicle_cap)?;
    let sequencer = TripSequencer::new(events.clone(), route.clone(), config.vehicle_cap);
    let begin_time = sequencer.begin_time().ok_or_else(|| RunnerError::NoMeasurements {
        detector: config.detector.clone(),
        path: source.clone(),
    })?;
    let first_depart = events
        .iter()
        .map(|e| e.time_detector_real - route.travel_time_offset)
        .min()
        .unwrap_or(begin_time);

    let dir = &config.paths.intermediate_dir;
    let files = write_simulation_files(
        dir,
        &postfix,
        &route.detector_id,
        &route.lane,
        &config.paths.net_file,
        first_depart,
        config.calibration.seed,
    )?;
    let trips_path = dir.join(format!("trips_{postfix}.csv"));
    write_trips(&trips_path, &events, &route)?;

    info!(
        %postfix,
        vehicles = events.len(),
        begin_time,
        config = %files.config.display(),
        "prepared simulator inputs"
    );
    Ok(PreparedRun {
        postfix,
        run_id: run_id(config),
        route,
        events,
        files,
        trips_path,
        begin_time,
    })
}

fn progress_bar(total: usize, show: bool) -> ProgressBar {
    if !show || total == 0 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Calibrate a prepared run against `sim`, then export the committed records.
pub fn calibrate_with<C>(
    config: &CalibrationConfig,
    prepared: &PreparedRun,
    sim: &mut C,
    show_progress: bool,
) -> Result<RunReport, RunnerError>
where
    C: SimulationController + ?Sized,
{
    let settings = config.calibration.clone();
    let sequencer = TripSequencer::new(
        prepared.events.clone(),
        prepared.route.clone(),
        config.vehicle_cap,
    );
    let vehicles = sequencer.remaining();
    let mut recorder = CsvRecorder::create(
        &config.paths.output_dir,
        &prepared.postfix,
        settings.capture_trace,
    )?;

    let start = prepare_simulation(
        &mut *sim,
        &prepared.files.config,
        prepared.begin_time as f64,
        &prepared.route,
        &prepared.run_id,
    )?;

    let bar = progress_bar(vehicles, show_progress);
    let runner = TrialRunner::new(&prepared.route.detector_id, &prepared.run_id);
    let result = Calibrator::new(&mut *sim, runner, settings).and_then(|mut calibrator| {
        calibrator.run_with_hook(sequencer, start, &mut recorder, |vehicle| {
            bar.set_message(vehicle.record.veh_id.clone());
            bar.inc(1);
        })
    });
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            bar.abandon_with_message("aborted");
            warn!(
                committed = recorder.written(),
                records = %recorder.records_path().display(),
                "run aborted, committed records kept"
            );
            return Err(err.into());
        }
    };
    bar.finish_with_message("Completed");

    if let Err(err) = sim.close() {
        warn!(%err, "simulator did not shut down cleanly");
    }

    let parquet = parquet_path(&config.paths.output_dir, &prepared.postfix);
    export_records_to_parquet(&summary.records, &parquet)?;
    info!(
        vehicles = summary.records.len(),
        records = %recorder.records_path().display(),
        parquet = %parquet.display(),
        state = %summary.final_checkpoint.location,
        "run complete"
    );

    Ok(RunReport {
        vehicles: summary.records.len(),
        records_path: recorder.records_path().to_path_buf(),
        parquet_path: parquet,
        final_checkpoint: summary.final_checkpoint,
    })
}

/// Controller that launches the configured simulator binary.
pub fn traci_controller(config: &CalibrationConfig) -> TraciController {
    let launch = LaunchOptions {
        program: config.simulator.binary.clone(),
        port: config.simulator.port,
        seed: config.calibration.seed,
        extra_args: Vec::new(),
    };
    TraciController::new(launch, &config.paths.intermediate_dir).with_connect_retries(
        config.simulator.connect_attempts,
        Duration::from_millis(config.simulator.retry_delay_ms),
    )
}

/// Prepare, launch the simulator, calibrate and export.
pub fn run(config: &CalibrationConfig, show_progress: bool) -> Result<RunReport, RunnerError> {
    let prepared = prepare(config)?;
    let mut controller = traci_controller(config);
    calibrate_with(config, &prepared, &mut controller, show_progress)
}
