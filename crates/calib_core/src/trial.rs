//! One candidate evaluation inside the simulator.

use tracing::{debug, error};

use crate::controller::{
    Checkpoint, CheckpointKey, DepartSpeed, SimulationController, SimulatorError, VehicleInsertion,
};
use crate::error::CalibrationError;
use crate::record::TraceRow;
use crate::trip::Trip;

/// Lane change mode that forbids every lane change.
pub const LANE_CHANGE_DISABLED: i32 = 0;
/// Trial vehicles enter at the very start of their departure lane.
pub const DEPART_POSITION: f64 = 0.0;

/// Simulated detector crossing of the trial vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub time: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialOutcome {
    /// `None` when the network drained before the vehicle reached the detector.
    pub crossing: Option<Crossing>,
    /// State saved one second after departure, if the trial got that far.
    pub checkpoint: Option<Checkpoint>,
    pub trace: Vec<TraceRow>,
}

/// Runs trials of single vehicles against one detector.
#[derive(Debug, Clone)]
pub struct TrialRunner {
    detector_id: String,
    run_id: String,
    capture_trace: bool,
}

impl TrialRunner {
    pub fn new(detector_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            detector_id: detector_id.into(),
            run_id: run_id.into(),
            capture_trace: false,
        }
    }

    /// Record every vehicle's kinematics up to the trial's checkpoint time.
    pub fn with_trace(mut self, capture_trace: bool) -> Self {
        self.capture_trace = capture_trace;
        self
    }

    pub fn detector_id(&self) -> &str {
        &self.detector_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn captures_trace(&self) -> bool {
        self.capture_trace
    }

    /// Evaluate `trip` starting from `start`.
    ///
    /// The simulator is restored to `start`, any stale copy of the vehicle is
    /// removed, and the vehicle is inserted with the trip's depart time and
    /// speed factor. The simulator then steps until the detector reports the
    /// vehicle first in its last-step list or no vehicles remain. A checkpoint
    /// keyed by `iteration` is saved at `depart + 1`.
    ///
    /// # Errors
    ///
    /// A failed restore returns [`CalibrationError::SimulatorFatal`]; the
    /// controller has already closed itself. A rejected insertion closes the
    /// controller and returns [`CalibrationError::SimulatorCommand`].
    pub fn run<C>(
        &self,
        sim: &mut C,
        trip: &Trip,
        start: &Checkpoint,
        iteration: usize,
    ) -> Result<TrialOutcome, CalibrationError>
    where
        C: SimulationController + ?Sized,
    {
        if let Err(source) = sim.load_state(start) {
            error!(vehicle = %trip.id, checkpoint = %start.key, %source, "failed to restore checkpoint");
            return Err(CalibrationError::SimulatorFatal {
                vehicle_id: trip.id.clone(),
                source,
            });
        }

        let wrap = |source: SimulatorError| CalibrationError::from_simulator(&trip.id, source);

        sim.remove_vehicle_if_present(&trip.id).map_err(wrap)?;
        if let Err(source) = self.insert(sim, trip) {
            error!(vehicle = %trip.id, depart = trip.depart, %source, "failed to insert vehicle");
            let _ = sim.close();
            return Err(wrap(source));
        }
        sim.set_speed_factor(&trip.id, trip.speed_factor).map_err(wrap)?;
        sim.set_speed(&trip.id, trip.depart_speed).map_err(wrap)?;

        let checkpoint_time = trip.checkpoint_time() as f64;
        let mut checkpoint = None;
        let mut trace = Vec::new();

        while sim.min_expected_vehicle_count().map_err(wrap)? > 0 {
            sim.step().map_err(wrap)?;
            let now = sim.current_time().map_err(wrap)?;

            if same_step(now, checkpoint_time) {
                let key = CheckpointKey::iteration(self.run_id.clone(), iteration);
                checkpoint = Some(sim.save_state(&key).map_err(wrap)?);
            }

            if self.capture_trace && now <= checkpoint_time {
                self.capture(sim, now, &mut trace).map_err(wrap)?;
            }

            let on_detector = sim
                .detector_last_step_vehicle_ids(&self.detector_id)
                .map_err(wrap)?;
            if on_detector.first().map(String::as_str) == Some(trip.id.as_str()) {
                let reading = sim.detector_vehicle_data(&self.detector_id).map_err(wrap)?;
                let crossing = Crossing {
                    time: round2(reading.entry_time - 1.0),
                    speed: reading.mean_speed,
                };
                debug!(
                    vehicle = %trip.id,
                    iteration,
                    crossing_time = crossing.time,
                    crossing_speed = crossing.speed,
                    "vehicle reached detector"
                );
                return Ok(TrialOutcome {
                    crossing: Some(crossing),
                    checkpoint,
                    trace,
                });
            }
        }

        debug!(vehicle = %trip.id, iteration, "network drained before detector crossing");
        Ok(TrialOutcome {
            crossing: None,
            checkpoint,
            trace,
        })
    }

    fn insert<C>(&self, sim: &mut C, trip: &Trip) -> Result<(), SimulatorError>
    where
        C: SimulationController + ?Sized,
    {
        sim.add_vehicle(&VehicleInsertion {
            id: trip.id.clone(),
            route_id: trip.route_id.clone(),
            depart: trip.depart as f64,
            lane: trip.depart_lane,
            depart_pos: DEPART_POSITION,
            depart_speed: DepartSpeed::Max,
        })?;
        sim.set_lane_change_mode(&trip.id, LANE_CHANGE_DISABLED)
    }

    fn capture<C>(&self, sim: &mut C, now: f64, trace: &mut Vec<TraceRow>) -> Result<(), SimulatorError>
    where
        C: SimulationController + ?Sized,
    {
        for id in sim.vehicle_ids()? {
            let kinematics = sim.vehicle_kinematics(&id)?;
            trace.push(TraceRow {
                time: now as i64 - 1,
                id,
                speed_factor: kinematics.speed_factor,
                x: round6(kinematics.x),
                y: round6(kinematics.y),
                angle: round2(kinematics.angle),
                speed: round2(kinematics.speed),
                acceleration: round2(kinematics.acceleration),
                lane_offset: round2(kinematics.lane_offset),
                lane_id: kinematics.lane_id,
                noise: round2(kinematics.noise),
            });
        }
        Ok(())
    }
}

fn same_step(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Geo coordinates keep micro-degree precision.
fn round6(value: f64) -> f64 {
    (value * 1.0e6).round() / 1.0e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::TripParameters;
    use crate::controller::CheckpointSlot;
    use crate::test_helpers::{sample_route, StubSimulator, STUB_DEGREES_PER_METRE, STUB_ORIGIN};
    use crate::detection::DetectionEvent;

    fn setup() -> (StubSimulator, Checkpoint, Trip) {
        let route = sample_route();
        let mut sim = StubSimulator::new(&route.detector_id);
        sim.start(std::path::Path::new("stub.sumocfg"), 900.0).unwrap();
        sim.add_route(&route.route_id(), &route.route_edges).unwrap();
        let start = sim.save_state(&CheckpointKey::committed("run")).unwrap();

        let event = DetectionEvent::new("0_w2e_out", &route.detector_id, 1000, 12.0);
        let trip = Trip::from_event(&event, &route).with_parameters(TripParameters {
            depart: 950,
            speed_factor: 1.0,
        });
        (sim, start, trip)
    }

    #[test]
    fn reports_crossing_one_second_before_entry() {
        let (mut sim, start, trip) = setup();
        let runner = TrialRunner::new("w2e_out", "run");
        let outcome = runner.run(&mut sim, &trip, &start, 3).unwrap();

        let expected = sim.expected_entry(trip.depart as f64, trip.depart_speed).unwrap();
        let crossing = outcome.crossing.unwrap();
        assert!((crossing.time - round2(expected - 1.0)).abs() < 1e-9);
        assert!((crossing.speed - trip.depart_speed).abs() < 1e-9);

        let checkpoint = outcome.checkpoint.unwrap();
        assert_eq!(checkpoint.key.slot, CheckpointSlot::Iteration(3));
        assert_eq!(sim.checkpoint_time(&checkpoint), Some(951.0));
    }

    #[test]
    fn trace_stops_at_checkpoint_time() {
        let (mut sim, start, trip) = setup();
        let runner = TrialRunner::new("w2e_out", "run").with_trace(true);
        let outcome = runner.run(&mut sim, &trip, &start, 0).unwrap();

        assert!(!outcome.trace.is_empty());
        assert!(outcome.trace.iter().all(|row| row.time <= 950));
        assert!(outcome.trace.iter().any(|row| row.id == trip.id));
    }

    #[test]
    fn trace_positions_keep_micro_degrees() {
        let (mut sim, start, trip) = setup();
        let runner = TrialRunner::new("w2e_out", "run").with_trace(true);
        let outcome = runner.run(&mut sim, &trip, &start, 0).unwrap();

        // One second after departure the vehicle has driven `depart_speed` metres.
        let row = outcome
            .trace
            .iter()
            .find(|row| row.id == trip.id && row.time == trip.depart)
            .unwrap();
        let lon = STUB_ORIGIN.0 + trip.depart_speed * STUB_DEGREES_PER_METRE;
        assert!((row.x - round6(lon)).abs() < 1e-12);
        assert!((row.x - round2(lon)).abs() > 1e-5);
        assert_eq!(row.y, STUB_ORIGIN.1);
    }

    #[test]
    fn stopped_vehicle_never_crosses() {
        let (mut sim, start, trip) = setup();
        let stalled = Trip {
            depart_speed: 0.0,
            ..trip
        };
        let outcome = TrialRunner::new("w2e_out", "run")
            .run(&mut sim, &stalled, &start, 0)
            .unwrap();
        assert!(outcome.crossing.is_none());
    }

    #[test]
    fn failed_restore_closes_the_simulator() {
        let (mut sim, start, trip) = setup();
        sim.fail_loads_after(0);
        let err = TrialRunner::new("w2e_out", "run")
            .run(&mut sim, &trip, &start, 0)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::SimulatorFatal { .. }));
        assert!(sim.is_closed());
        // The controller closed itself; the runner does not close it again.
        assert_eq!(sim.closes, 0);
    }

    #[test]
    fn rejected_insertion_is_a_command_error() {
        let (mut sim, start, trip) = setup();
        sim.reject_insertions(true);
        let err = TrialRunner::new("w2e_out", "run")
            .run(&mut sim, &trip, &start, 0)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::SimulatorCommand { .. }));
        assert!(sim.is_closed());
        assert_eq!(sim.closes, 1);
    }
}
