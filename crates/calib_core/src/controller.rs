//! Contract over the external simulator's control protocol.
//!
//! A controller owns one simulator process and its checkpoint namespace.
//! Every call mutates shared external state, so all methods take `&mut self`
//! and the controller is passed explicitly to whoever needs it.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Checkpoint restore failed; simulator state is presumed corrupted.
    #[error("simulator state restore failed: {0}")]
    Fatal(String),
    /// Vehicle injection or parameter assignment was rejected.
    #[error("simulator rejected command: {0}")]
    Command(String),
    #[error("simulator connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected simulator response: {0}")]
    Protocol(String),
}

/// Which snapshot of a run a checkpoint holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointSlot {
    /// State every trial of the current vehicle starts from.
    Committed,
    /// State captured by trial `i` one second after its departure.
    Iteration(usize),
}

/// Explicit checkpoint identity: run namespace plus slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub run_id: String,
    pub slot: CheckpointSlot,
}

impl CheckpointKey {
    pub fn committed(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            slot: CheckpointSlot::Committed,
        }
    }

    pub fn iteration(run_id: impl Into<String>, iteration: usize) -> Self {
        Self {
            run_id: run_id.into(),
            slot: CheckpointSlot::Iteration(iteration),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            CheckpointSlot::Committed => write!(f, "{}", self.run_id),
            CheckpointSlot::Iteration(i) => write!(f, "{}_{}", self.run_id, i),
        }
    }
}

/// Handle to a saved simulator state.
///
/// `location` is controller specific (a state file path, an in-memory key)
/// and opaque to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: CheckpointKey,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepartSpeed {
    /// Highest speed the simulator allows at insertion.
    Max,
    Value(f64),
}

impl fmt::Display for DepartSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Value(speed) => write!(f, "{speed}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleInsertion {
    pub id: String,
    pub route_id: String,
    pub depart: f64,
    pub lane: u32,
    /// Metres from the start of the departure lane.
    pub depart_pos: f64,
    pub depart_speed: DepartSpeed,
}

/// Detector entry for the vehicle most recently seen on the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorReading {
    pub entry_time: f64,
    pub mean_speed: f64,
}

/// Per-step vehicle state used for trajectory traces.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleKinematics {
    pub speed_factor: f64,
    /// Longitude in degrees.
    pub x: f64,
    /// Latitude in degrees.
    pub y: f64,
    pub angle: f64,
    pub speed: f64,
    pub acceleration: f64,
    pub lane_offset: f64,
    pub lane_id: String,
    pub noise: f64,
}

pub trait SimulationController {
    /// Launch (or attach to) the simulator at `begin_time` using the given configuration file.
    fn start(&mut self, config: &Path, begin_time: f64) -> Result<(), SimulatorError>;

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> Result<(), SimulatorError>;

    fn save_state(&mut self, key: &CheckpointKey) -> Result<Checkpoint, SimulatorError>;

    /// Restore a saved checkpoint.
    ///
    /// A failed restore returns [`SimulatorError::Fatal`] and leaves the
    /// controller closed.
    fn load_state(&mut self, checkpoint: &Checkpoint) -> Result<(), SimulatorError>;

    /// Drop a checkpoint that is no longer needed.
    fn discard_state(&mut self, _checkpoint: &Checkpoint) -> Result<(), SimulatorError> {
        Ok(())
    }

    fn add_vehicle(&mut self, vehicle: &VehicleInsertion) -> Result<(), SimulatorError>;

    /// Remove `id` if it is currently in the network. Returns whether it was.
    fn remove_vehicle_if_present(&mut self, id: &str) -> Result<bool, SimulatorError>;

    fn set_speed(&mut self, id: &str, speed: f64) -> Result<(), SimulatorError>;

    fn set_speed_factor(&mut self, id: &str, factor: f64) -> Result<(), SimulatorError>;

    fn set_lane_change_mode(&mut self, id: &str, mode: i32) -> Result<(), SimulatorError>;

    fn step(&mut self) -> Result<(), SimulatorError>;

    fn current_time(&mut self) -> Result<f64, SimulatorError>;

    /// Vehicles still running plus vehicles waiting to be inserted.
    fn min_expected_vehicle_count(&mut self) -> Result<i32, SimulatorError>;

    fn detector_last_step_vehicle_ids(
        &mut self,
        detector_id: &str,
    ) -> Result<Vec<String>, SimulatorError>;

    fn detector_vehicle_data(&mut self, detector_id: &str)
        -> Result<DetectorReading, SimulatorError>;

    /// Vehicles currently in the network.
    fn vehicle_ids(&mut self) -> Result<Vec<String>, SimulatorError>;

    fn vehicle_kinematics(&mut self, id: &str) -> Result<VehicleKinematics, SimulatorError>;

    fn close(&mut self) -> Result<(), SimulatorError>;
}
