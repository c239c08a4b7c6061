use thiserror::Error;

use crate::controller::SimulatorError;

/// Errors that abort a calibration run.
///
/// Nothing here is retried: the run for the current detector/date stops and
/// every record already handed to the sink stays where it is.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Checkpoint restore (or the transport underneath it) failed; the
    /// simulator state can no longer be trusted.
    #[error("fatal simulator error while calibrating vehicle {vehicle_id}: {source}")]
    SimulatorFatal {
        vehicle_id: String,
        #[source]
        source: SimulatorError,
    },
    /// Vehicle injection or parameter assignment was rejected.
    #[error("simulator rejected a command for vehicle {vehicle_id}: {source}")]
    SimulatorCommand {
        vehicle_id: String,
        #[source]
        source: SimulatorError,
    },
    #[error("failed to prepare the simulator: {0}")]
    Setup(#[source] SimulatorError),
    #[error(
        "vehicle {vehicle_id} never reached detector {detector_id} \
         (depart {depart}, speed factor {speed_factor})"
    )]
    NoCrossing {
        vehicle_id: String,
        detector_id: String,
        depart: i64,
        speed_factor: f64,
    },
    #[error("no checkpoint was captured for vehicle {vehicle_id} at iteration {iteration}")]
    MissingCheckpoint { vehicle_id: String, iteration: usize },
    #[error("trip {pending} must be committed before the next trip is requested")]
    Sequencing { pending: String },
    #[error("failed to record calibration output: {0}")]
    Recorder(String),
    #[error("invalid calibration configuration: {0}")]
    InvalidConfig(String),
}

impl CalibrationError {
    /// Attach the vehicle being calibrated to a controller failure.
    pub fn from_simulator(vehicle_id: &str, source: SimulatorError) -> Self {
        let vehicle_id = vehicle_id.to_string();
        match source {
            SimulatorError::Command(_) => Self::SimulatorCommand { vehicle_id, source },
            _ => Self::SimulatorFatal { vehicle_id, source },
        }
    }

    /// True for errors raised by the simulator rather than by the calibration itself.
    pub fn is_simulator_error(&self) -> bool {
        matches!(
            self,
            Self::SimulatorFatal { .. } | Self::SimulatorCommand { .. } | Self::Setup(_)
        )
    }
}
