use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use calib_core::{AcquisitionKind, SurrogateKind};
use calib_runner::logging::init_tracing;
use calib_runner::{pipeline, CalibrationConfig};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "calib",
    about = "Per-vehicle trajectory calibration against detector measurements"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write simulator inputs, launch the simulator, calibrate and export
    Calibrate {
        #[command(flatten)]
        overrides: Overrides,
        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },
    /// Only write the simulator configuration, detector file and trips table
    Prepare {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args)]
struct Overrides {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, env = "CALIB_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    detector: Option<String>,
    #[arg(long)]
    date: Option<String>,
    /// Trials per vehicle
    #[arg(long)]
    iterations: Option<usize>,
    /// Surrogate family: GP, RF, ET or GBRT
    #[arg(long)]
    base_estimator: Option<String>,
    /// Acquisition rule: LCB, EI, PI or gp_hedge
    #[arg(long)]
    acq_func: Option<String>,
    #[arg(long)]
    n_initial_points: Option<usize>,
    /// Calibrate only the first N vehicles (0 = all)
    #[arg(long)]
    vehicle_cap: Option<i64>,
    /// Stream trajectories of the winning trials
    #[arg(long)]
    trace: bool,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    sumo_binary: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    log_level: Option<String>,
}

impl Overrides {
    fn resolve(self) -> anyhow::Result<CalibrationConfig> {
        let mut config = match &self.config {
            Some(path) => CalibrationConfig::load(path)?,
            None => CalibrationConfig::default(),
        };
        if let Some(detector) = self.detector {
            config.detector = detector;
        }
        if let Some(date) = self.date {
            config.date = date;
        }
        if let Some(iterations) = self.iterations {
            config.calibration.iterations = iterations;
        }
        if let Some(name) = self.base_estimator {
            config.calibration.optimizer.surrogate = name.parse::<SurrogateKind>()?;
        }
        if let Some(name) = self.acq_func {
            config.calibration.optimizer.acquisition = name.parse::<AcquisitionKind>()?;
        }
        if let Some(n) = self.n_initial_points {
            config.calibration.optimizer.n_initial_points = n;
        }
        if let Some(cap) = self.vehicle_cap {
            config.vehicle_cap = cap;
        }
        if self.trace {
            config.calibration.capture_trace = true;
        }
        if let Some(seed) = self.seed {
            config.calibration.seed = seed;
        }
        if let Some(binary) = self.sumo_binary {
            config.simulator.binary = binary;
        }
        if let Some(port) = self.port {
            config.simulator.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Calibrate { overrides, quiet } => {
            let config = overrides.resolve()?;
            init_tracing(&config.log_level);
            let show_progress = !quiet && std::io::stderr().is_terminal();
            let report = pipeline::run(&config, show_progress).with_context(|| {
                format!("calibration of {} failed", config.postfix())
            })?;
            tracing::info!(
                vehicles = report.vehicles,
                records = %report.records_path.display(),
                "done"
            );
        }
        Commands::Prepare { overrides } => {
            let config = overrides.resolve()?;
            init_tracing(&config.log_level);
            let prepared = pipeline::prepare(&config)
                .with_context(|| format!("preparing {} failed", config.postfix()))?;
            tracing::info!(
                config = %prepared.files.config.display(),
                trips = %prepared.trips_path.display(),
                "simulator inputs written"
            );
        }
    }
    Ok(())
}
