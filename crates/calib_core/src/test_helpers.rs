//! Deterministic in-memory simulator and fixtures for tests and benches.
//!
//! [`StubSimulator`] implements [`SimulationController`] with a closed-form
//! crossing model: a vehicle inserted at `depart` and driving at `speed`
//! enters the detector at `depart + distance / speed` and leaves the network
//! two seconds later. Vehicles without a crossing leave after
//! [`STALLED_VEHICLE_LIFETIME`] seconds.

use std::collections::HashMap;
use std::path::Path;

use crate::controller::{
    Checkpoint, CheckpointKey, DetectorReading, SimulationController, SimulatorError,
    VehicleInsertion, VehicleKinematics,
};
use crate::detection::{DetectionEvent, DetectorRoute};

pub const DEFAULT_DETECTOR_DISTANCE: f64 = 250.0;
pub const STALLED_VEHICLE_LIFETIME: f64 = 60.0;
/// Geo position of the stub network's origin.
pub const STUB_ORIGIN: (f64, f64) = (18.05, 59.31);
/// Degrees of longitude per metre driven on the stub network.
pub const STUB_DEGREES_PER_METRE: f64 = 1.0e-5;
const EXIT_DELAY: f64 = 2.0;

/// Maps `(depart, speed)` to `(entry_time, mean_speed)`, or `None` if the vehicle never arrives.
pub type CrossingModel = Box<dyn Fn(f64, f64) -> Option<(f64, f64)>>;

/// Route fixture for the westbound-to-eastbound outgoing detector.
pub fn sample_route() -> DetectorRoute {
    DetectorRoute {
        detector_id: "w2e_out".into(),
        lane: "151884974#0_0".into(),
        lane_index: 0,
        from_edge: "151884975#0".into(),
        to_edge: "151884974#0".into(),
        route_edges: vec!["151884975#0".into(), "151884974#0".into()],
        travel_time_offset: 51,
        max_speed: 13.89,
    }
}

/// Measurements spaced `spacing` seconds apart starting at `first_time`.
pub fn sample_events(count: usize, first_time: i64, spacing: i64) -> Vec<DetectionEvent> {
    (0..count)
        .map(|i| {
            DetectionEvent::new(
                format!("{i}_w2e_out"),
                "w2e_out",
                first_time + spacing * i as i64,
                9.0 + (i % 4) as f64,
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
struct StubVehicle {
    id: String,
    depart: f64,
    lane: u32,
    speed_factor: f64,
    speed: f64,
    entered: bool,
}

#[derive(Debug, Clone, Default)]
struct StubState {
    time: f64,
    /// Insertion order.
    vehicles: Vec<StubVehicle>,
    routes: HashMap<String, Vec<String>>,
    last_step: Vec<(String, DetectorReading)>,
}

pub struct StubSimulator {
    detector_id: String,
    crossing: CrossingModel,
    state: StubState,
    checkpoints: HashMap<String, StubState>,
    closed: bool,
    load_budget: Option<usize>,
    reject_insertions: bool,
    pub loads: usize,
    pub saves: usize,
    pub discards: usize,
    pub steps: usize,
    pub closes: usize,
}

impl StubSimulator {
    pub fn new(detector_id: &str) -> Self {
        Self::with_crossing(detector_id, linear_crossing(DEFAULT_DETECTOR_DISTANCE))
    }

    pub fn with_crossing(detector_id: &str, crossing: CrossingModel) -> Self {
        Self {
            detector_id: detector_id.to_string(),
            crossing,
            state: StubState::default(),
            checkpoints: HashMap::new(),
            closed: false,
            load_budget: None,
            reject_insertions: false,
            loads: 0,
            saves: 0,
            discards: 0,
            steps: 0,
            closes: 0,
        }
    }

    /// Let `successful` more restores succeed, then fail every later one.
    pub fn fail_loads_after(&mut self, successful: usize) {
        self.load_budget = Some(successful);
    }

    pub fn reject_insertions(&mut self, reject: bool) {
        self.reject_insertions = reject;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stored_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// Simulation time captured in a stored checkpoint.
    pub fn checkpoint_time(&self, checkpoint: &Checkpoint) -> Option<f64> {
        self.checkpoints
            .get(&checkpoint.location)
            .map(|state| state.time)
    }

    /// Vehicle ids held by a stored checkpoint, in insertion order.
    pub fn checkpoint_vehicles(&self, checkpoint: &Checkpoint) -> Option<Vec<String>> {
        self.checkpoints
            .get(&checkpoint.location)
            .map(|state| state.vehicles.iter().map(|v| v.id.clone()).collect())
    }

    /// Entry time the crossing model predicts for a vehicle.
    pub fn expected_entry(&self, depart: f64, speed: f64) -> Option<f64> {
        (self.crossing)(depart, speed).map(|(entry, _)| entry)
    }

    fn ensure_open(&self) -> Result<(), SimulatorError> {
        if self.closed {
            Err(SimulatorError::Protocol("connection closed".into()))
        } else {
            Ok(())
        }
    }

    fn vehicle_mut(&mut self, id: &str) -> Result<&mut StubVehicle, SimulatorError> {
        self.state
            .vehicles
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| SimulatorError::Command(format!("vehicle '{id}' is not known")))
    }

    fn departure_time(&self, vehicle: &StubVehicle) -> f64 {
        match (self.crossing)(vehicle.depart, vehicle.speed) {
            Some((entry, _)) => entry + EXIT_DELAY,
            None => vehicle.depart + STALLED_VEHICLE_LIFETIME,
        }
    }

    fn active(&self, vehicle: &StubVehicle) -> bool {
        vehicle.depart <= self.state.time && self.state.time < self.departure_time(vehicle)
    }
}

/// Crossing after driving `distance` metres at constant speed.
pub fn linear_crossing(distance: f64) -> CrossingModel {
    Box::new(move |depart, speed| {
        if speed > 0.0 {
            Some((depart + distance / speed, speed))
        } else {
            None
        }
    })
}

impl SimulationController for StubSimulator {
    fn start(&mut self, _config: &Path, begin_time: f64) -> Result<(), SimulatorError> {
        self.state = StubState {
            time: begin_time,
            ..StubState::default()
        };
        self.closed = false;
        Ok(())
    }

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        self.state.routes.insert(route_id.to_string(), edges.to_vec());
        Ok(())
    }

    fn save_state(&mut self, key: &CheckpointKey) -> Result<Checkpoint, SimulatorError> {
        self.ensure_open()?;
        let location = key.to_string();
        self.checkpoints.insert(location.clone(), self.state.clone());
        self.saves += 1;
        Ok(Checkpoint {
            key: key.clone(),
            location,
        })
    }

    fn load_state(&mut self, checkpoint: &Checkpoint) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        if let Some(budget) = self.load_budget {
            if budget == 0 {
                self.closed = true;
                return Err(SimulatorError::Fatal(format!(
                    "could not read state '{}'",
                    checkpoint.location
                )));
            }
            self.load_budget = Some(budget - 1);
        }
        let Some(state) = self.checkpoints.get(&checkpoint.location) else {
            self.closed = true;
            return Err(SimulatorError::Fatal(format!("no state '{}'", checkpoint.location)));
        };
        self.state = state.clone();
        self.loads += 1;
        Ok(())
    }

    fn discard_state(&mut self, checkpoint: &Checkpoint) -> Result<(), SimulatorError> {
        if self.checkpoints.remove(&checkpoint.location).is_some() {
            self.discards += 1;
        }
        Ok(())
    }

    fn add_vehicle(&mut self, vehicle: &VehicleInsertion) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        if self.reject_insertions {
            return Err(SimulatorError::Command(format!(
                "vehicle '{}' rejected",
                vehicle.id
            )));
        }
        if !self.state.routes.contains_key(&vehicle.route_id) {
            return Err(SimulatorError::Command(format!(
                "route '{}' is not known",
                vehicle.route_id
            )));
        }
        if self.state.vehicles.iter().any(|v| v.id == vehicle.id) {
            return Err(SimulatorError::Command(format!(
                "vehicle '{}' already exists",
                vehicle.id
            )));
        }
        self.state.vehicles.push(StubVehicle {
            id: vehicle.id.clone(),
            depart: vehicle.depart,
            lane: vehicle.lane,
            speed_factor: 1.0,
            speed: 0.0,
            entered: false,
        });
        Ok(())
    }

    fn remove_vehicle_if_present(&mut self, id: &str) -> Result<bool, SimulatorError> {
        self.ensure_open()?;
        let before = self.state.vehicles.len();
        self.state.vehicles.retain(|v| v.id != id);
        Ok(self.state.vehicles.len() != before)
    }

    fn set_speed(&mut self, id: &str, speed: f64) -> Result<(), SimulatorError> {
        self.vehicle_mut(id)?.speed = speed;
        Ok(())
    }

    fn set_speed_factor(&mut self, id: &str, factor: f64) -> Result<(), SimulatorError> {
        self.vehicle_mut(id)?.speed_factor = factor;
        Ok(())
    }

    fn set_lane_change_mode(&mut self, id: &str, _mode: i32) -> Result<(), SimulatorError> {
        self.vehicle_mut(id).map(|_| ())
    }

    fn step(&mut self) -> Result<(), SimulatorError> {
        self.ensure_open()?;
        self.state.time += 1.0;
        self.steps += 1;
        let now = self.state.time;

        let mut entries = Vec::new();
        for (index, vehicle) in self.state.vehicles.iter().enumerate() {
            if vehicle.entered {
                continue;
            }
            if let Some((entry, speed)) = (self.crossing)(vehicle.depart, vehicle.speed) {
                if entry <= now {
                    entries.push((index, entry, speed));
                }
            }
        }

        // Newest vehicle first.
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        let mut last_step = Vec::with_capacity(entries.len());
        for (index, entry_time, mean_speed) in entries {
            let vehicle = &mut self.state.vehicles[index];
            vehicle.entered = true;
            last_step.push((
                vehicle.id.clone(),
                DetectorReading {
                    entry_time,
                    mean_speed,
                },
            ));
        }
        self.state.last_step = last_step;
        Ok(())
    }

    fn current_time(&mut self) -> Result<f64, SimulatorError> {
        self.ensure_open()?;
        Ok(self.state.time)
    }

    fn min_expected_vehicle_count(&mut self) -> Result<i32, SimulatorError> {
        self.ensure_open()?;
        let now = self.state.time;
        let remaining = self
            .state
            .vehicles
            .iter()
            .filter(|v| now < self.departure_time(v))
            .count();
        Ok(remaining as i32)
    }

    fn detector_last_step_vehicle_ids(
        &mut self,
        detector_id: &str,
    ) -> Result<Vec<String>, SimulatorError> {
        self.ensure_open()?;
        if detector_id != self.detector_id {
            return Ok(Vec::new());
        }
        Ok(self.state.last_step.iter().map(|(id, _)| id.clone()).collect())
    }

    fn detector_vehicle_data(
        &mut self,
        detector_id: &str,
    ) -> Result<DetectorReading, SimulatorError> {
        self.ensure_open()?;
        if detector_id != self.detector_id {
            return Err(SimulatorError::Command(format!("unknown detector '{detector_id}'")));
        }
        self.state
            .last_step
            .first()
            .map(|(_, reading)| *reading)
            .ok_or_else(|| SimulatorError::Protocol("detector saw no vehicle".into()))
    }

    fn vehicle_ids(&mut self) -> Result<Vec<String>, SimulatorError> {
        self.ensure_open()?;
        Ok(self
            .state
            .vehicles
            .iter()
            .filter(|v| self.active(v))
            .map(|v| v.id.clone())
            .collect())
    }

    fn vehicle_kinematics(&mut self, id: &str) -> Result<VehicleKinematics, SimulatorError> {
        self.ensure_open()?;
        let now = self.state.time;
        let vehicle = self
            .state
            .vehicles
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| SimulatorError::Command(format!("vehicle '{id}' is not known")))?;
        let driven = vehicle.speed * (now - vehicle.depart);
        Ok(VehicleKinematics {
            speed_factor: vehicle.speed_factor,
            x: STUB_ORIGIN.0 + driven * STUB_DEGREES_PER_METRE,
            y: STUB_ORIGIN.1,
            angle: 90.0,
            speed: vehicle.speed,
            acceleration: 0.0,
            lane_offset: driven,
            lane_id: format!("stub_{}", vehicle.lane),
            noise: 60.0,
        })
    }

    fn close(&mut self) -> Result<(), SimulatorError> {
        self.closed = true;
        self.closes += 1;
        Ok(())
    }
}
