//! Per-vehicle trajectory calibration against detector measurements.
//!
//! Each measured vehicle is replayed inside a stepped traffic simulator. A
//! surrogate-guided search over (departure time, speed factor) runs a fixed
//! number of trials from a shared checkpoint, keeps the candidate whose
//! simulated detector crossing best matches the measurement, and commits that
//! candidate as the starting state for the next vehicle.
//!
//! # Architecture
//!
//! - [`controller`]: contract the simulator must satisfy ([`SimulationController`])
//! - [`trial`]: one candidate evaluation ([`TrialRunner`])
//! - [`optimizer`]: surrogate model + acquisition search ([`SurrogateOptimizer`])
//! - [`sequencer`]: time-ordered vehicles and their search bounds ([`TripSequencer`])
//! - [`calibration`]: the per-vehicle loop and the run driver ([`Calibrator`])
//! - [`record`]: append-only outputs ([`RecordSink`])
//!
//! Everything runs on one thread against one exclusively borrowed controller.

pub mod bounds;
pub mod calibration;
pub mod controller;
pub mod detection;
pub mod error;
pub mod loss;
pub mod optimizer;
pub mod record;
pub mod sequencer;
pub mod trial;
pub mod trip;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use bounds::{Candidate, SearchBounds, TripParameters};
pub use calibration::{
    calibrate_vehicle, prepare_simulation, CalibrationSettings, CalibrationSummary, Calibrator,
    Evaluation, NoCrossingPolicy, VehicleCalibration,
};
pub use controller::{
    Checkpoint, CheckpointKey, CheckpointSlot, DepartSpeed, DetectorReading, SimulationController,
    SimulatorError, VehicleInsertion, VehicleKinematics,
};
pub use detection::{DetectionEvent, DetectorRoute};
pub use error::CalibrationError;
pub use loss::{calibration_loss, LossMode};
pub use optimizer::{
    AcquisitionKind, Observation, OptimizerConfig, SearchSpace, SurrogateKind, SurrogateOptimizer,
};
pub use record::{CalibrationRecord, MemorySink, RecordSink, TraceRow};
pub use sequencer::{PendingTrip, TripSequencer};
pub use trial::{Crossing, TrialOutcome, TrialRunner};
pub use trip::Trip;
