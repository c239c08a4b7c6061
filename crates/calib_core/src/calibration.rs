//! Per-vehicle search loop and the run driver that chains vehicles together.
//!
//! For every vehicle the optimizer gets a fixed budget of trials, all started
//! from the same committed checkpoint. The best trial's checkpoint is then
//! restored and re-saved as the committed state the next vehicle starts from.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bounds::{Candidate, TripParameters};
use crate::controller::{Checkpoint, CheckpointKey, SimulationController};
use crate::detection::DetectorRoute;
use crate::error::CalibrationError;
use crate::loss::{calibration_loss, LossMode};
use crate::optimizer::{OptimizerConfig, SurrogateOptimizer};
use crate::record::{CalibrationRecord, RecordSink, TraceRow};
use crate::sequencer::{PendingTrip, TripSequencer};
use crate::trial::{round2, Crossing, TrialRunner};

/// What to do when a trial vehicle never reaches the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum NoCrossingPolicy {
    /// Stop the run with [`CalibrationError::NoCrossing`].
    #[default]
    Abort,
    /// Score the trial with a fixed loss and keep searching.
    Penalize { loss: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Trials per vehicle.
    pub iterations: usize,
    pub optimizer: OptimizerConfig,
    pub loss_mode: LossMode,
    pub no_crossing: NoCrossingPolicy,
    pub capture_trace: bool,
    /// Discard per-iteration checkpoints once a vehicle is committed.
    pub prune_checkpoints: bool,
    /// Base seed; vehicle `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            iterations: 50,
            optimizer: OptimizerConfig::default(),
            loss_mode: LossMode::default(),
            no_crossing: NoCrossingPolicy::default(),
            capture_trace: false,
            prune_checkpoints: true,
            seed: 13,
        }
    }
}

impl CalibrationSettings {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.iterations == 0 {
            return Err(CalibrationError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        if let NoCrossingPolicy::Penalize { loss } = self.no_crossing {
            if !loss.is_finite() {
                return Err(CalibrationError::InvalidConfig(format!(
                    "no-crossing penalty must be finite, got {loss}"
                )));
            }
        }
        self.optimizer.validate()
    }
}

/// One trial of the search.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub iteration: usize,
    pub params: TripParameters,
    pub crossing: Option<Crossing>,
    pub loss: f64,
}

/// Committed result for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleCalibration {
    pub record: CalibrationRecord,
    pub best_iteration: usize,
    pub evaluations: Vec<Evaluation>,
    /// Trajectory rows of the winning trial; empty unless traces are captured.
    pub trace: Vec<TraceRow>,
    pub checkpoint: Checkpoint,
}

/// Lowest-loss trial that reached the detector; earliest wins ties.
struct BestTrial {
    iteration: usize,
    loss: f64,
    crossing: Crossing,
    trace: Vec<TraceRow>,
}

/// Search the best `(depart, speed_factor)` for one vehicle and commit it.
///
/// # Arguments
///
/// * `sim` - Controller currently holding `committed`
/// * `pending` - Vehicle to calibrate, with its bounds
/// * `committed` - State every trial starts from
/// * `runner` - Trial runner for the vehicle's detector and run namespace
/// * `settings` - Budget, optimizer and loss settings
///
/// # Returns
///
/// The committed record, every evaluation, and the new committed checkpoint.
pub fn calibrate_vehicle<C>(
    sim: &mut C,
    pending: &PendingTrip,
    committed: &Checkpoint,
    runner: &TrialRunner,
    settings: &CalibrationSettings,
) -> Result<VehicleCalibration, CalibrationError>
where
    C: SimulationController + ?Sized,
{
    let bounds = &pending.bounds;
    let template = &pending.template;
    let seed = settings.seed.wrapping_add(pending.index as u64);
    let mut optimizer =
        SurrogateOptimizer::new(bounds.search_space(), settings.optimizer.clone(), seed);

    info!(
        vehicle = %template.id,
        depart_min = bounds.depart_min,
        depart_max = bounds.depart_max,
        time_detector_real = template.time_detector_real,
        "calibrating vehicle"
    );

    let mut evaluations = Vec::with_capacity(settings.iterations);
    let mut checkpoints = Vec::with_capacity(settings.iterations);
    let mut best: Option<BestTrial> = None;

    for iteration in 0..settings.iterations {
        let point = optimizer.ask();
        let candidate = Candidate::from_point(&point).ok_or_else(|| {
            CalibrationError::InvalidConfig(format!("optimizer proposed a {}-d point", point.len()))
        })?;
        let params = bounds.decode(candidate);
        let trip = template.with_parameters(params);
        let outcome = runner.run(sim, &trip, committed, iteration)?;

        let loss = match outcome.crossing {
            Some(crossing) => calibration_loss(
                bounds,
                params,
                crossing.time - template.time_detector_real as f64,
                crossing.speed - template.speed_detector_real,
                settings.loss_mode,
            ),
            None => match settings.no_crossing {
                NoCrossingPolicy::Abort => {
                    error!(
                        vehicle = %trip.id,
                        depart = params.depart,
                        speed_factor = params.speed_factor,
                        "vehicle never reached the detector"
                    );
                    return Err(no_crossing(runner, &trip.id, params));
                }
                NoCrossingPolicy::Penalize { loss } => {
                    warn!(
                        vehicle = %trip.id,
                        depart = params.depart,
                        speed_factor = params.speed_factor,
                        penalty = loss,
                        "vehicle never reached the detector, penalizing trial"
                    );
                    loss
                }
            },
        };
        debug!(
            vehicle = %trip.id,
            iteration,
            depart = params.depart,
            speed_factor = params.speed_factor,
            loss,
            "trial finished"
        );
        optimizer.tell(point, loss);

        if let Some(crossing) = outcome.crossing {
            if best.as_ref().map_or(true, |b| loss < b.loss) {
                best = Some(BestTrial {
                    iteration,
                    loss,
                    crossing,
                    trace: outcome.trace,
                });
            }
        }
        checkpoints.push(outcome.checkpoint);
        evaluations.push(Evaluation {
            iteration,
            params,
            crossing: outcome.crossing,
            loss,
        });
    }

    let Some(BestTrial {
        iteration: best_iteration,
        loss: best_loss,
        crossing,
        trace,
    }) = best
    else {
        // Every trial was penalized.
        let params = TripParameters {
            depart: bounds.depart_min,
            speed_factor: template.speed_factor,
        };
        error!(vehicle = %template.id, "no trial reached the detector");
        return Err(no_crossing(runner, &template.id, params));
    };
    let winner = &evaluations[best_iteration];
    let best_checkpoint = checkpoints[best_iteration]
        .clone()
        .ok_or_else(|| CalibrationError::MissingCheckpoint {
            vehicle_id: template.id.clone(),
            iteration: best_iteration,
        })?;

    if let Err(source) = sim.load_state(&best_checkpoint) {
        error!(vehicle = %template.id, checkpoint = %best_checkpoint.key, %source, "failed to restore best trial");
        return Err(CalibrationError::SimulatorFatal {
            vehicle_id: template.id.clone(),
            source,
        });
    }
    let checkpoint = sim
        .save_state(&CheckpointKey::committed(runner.run_id()))
        .map_err(|source| CalibrationError::from_simulator(&template.id, source))?;

    if settings.prune_checkpoints {
        for stale in checkpoints.iter().flatten() {
            if let Err(err) = sim.discard_state(stale) {
                warn!(checkpoint = %stale.key, %err, "failed to discard trial checkpoint");
            }
        }
    }

    let speed_factor = round2(winner.params.speed_factor);
    let record = CalibrationRecord::new(
        template.id.clone(),
        crossing.time,
        crossing.speed,
        speed_factor,
        template.time_detector_real,
        winner.params.depart,
        template.max_speed * speed_factor,
        template.speed_detector_real,
    );
    info!(
        vehicle = %record.veh_id,
        best_iteration,
        loss = best_loss,
        depart = record.depart,
        speed_factor = record.speed_factor,
        delta_time = record.delta_time,
        delta_speed = record.delta_speed,
        "vehicle committed"
    );

    Ok(VehicleCalibration {
        record,
        best_iteration,
        evaluations,
        trace,
        checkpoint,
    })
}

fn no_crossing(runner: &TrialRunner, vehicle_id: &str, params: TripParameters) -> CalibrationError {
    CalibrationError::NoCrossing {
        vehicle_id: vehicle_id.to_string(),
        detector_id: runner.detector_id().to_string(),
        depart: params.depart,
        speed_factor: params.speed_factor,
    }
}

/// Start the simulator, register the detector route and save the first committed state.
pub fn prepare_simulation<C>(
    sim: &mut C,
    config: &Path,
    begin_time: f64,
    route: &DetectorRoute,
    run_id: &str,
) -> Result<Checkpoint, CalibrationError>
where
    C: SimulationController + ?Sized,
{
    info!(config = %config.display(), begin_time, run_id, "starting simulator");
    sim.start(config, begin_time).map_err(CalibrationError::Setup)?;
    sim.add_route(&route.route_id(), &route.route_edges)
        .map_err(CalibrationError::Setup)?;
    sim.save_state(&CheckpointKey::committed(run_id))
        .map_err(CalibrationError::Setup)
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSummary {
    pub records: Vec<CalibrationRecord>,
    /// Committed state after the last vehicle, for downstream replay.
    pub final_checkpoint: Checkpoint,
}

/// Drives a whole detector/date run against one exclusively borrowed controller.
pub struct Calibrator<'a, C: SimulationController + ?Sized> {
    sim: &'a mut C,
    runner: TrialRunner,
    settings: CalibrationSettings,
}

impl<'a, C: SimulationController + ?Sized> Calibrator<'a, C> {
    pub fn new(
        sim: &'a mut C,
        runner: TrialRunner,
        settings: CalibrationSettings,
    ) -> Result<Self, CalibrationError> {
        settings.validate()?;
        let runner = runner.with_trace(settings.capture_trace);
        Ok(Self {
            sim,
            runner,
            settings,
        })
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    pub fn run<S>(
        &mut self,
        sequencer: TripSequencer,
        start: Checkpoint,
        sink: &mut S,
    ) -> Result<CalibrationSummary, CalibrationError>
    where
        S: RecordSink + ?Sized,
    {
        self.run_with_hook(sequencer, start, sink, |_| {})
    }

    /// Calibrate every vehicle in order, persisting each record as soon as it
    /// is committed. `hook` sees every committed vehicle after its record was
    /// written.
    ///
    /// On error the run stops; records already handed to `sink` are kept.
    pub fn run_with_hook<S, F>(
        &mut self,
        mut sequencer: TripSequencer,
        start: Checkpoint,
        sink: &mut S,
        mut hook: F,
    ) -> Result<CalibrationSummary, CalibrationError>
    where
        S: RecordSink + ?Sized,
        F: FnMut(&VehicleCalibration),
    {
        let mut committed = start;
        let mut records = Vec::with_capacity(sequencer.remaining());

        while let Some(pending) = sequencer.next_trip()? {
            let vehicle = calibrate_vehicle(
                &mut *self.sim,
                &pending,
                &committed,
                &self.runner,
                &self.settings,
            )
            .map_err(|err| {
                error!(vehicle = %pending.event.id, %err, "calibration aborted");
                err
            })?;

            sink.record(&vehicle.record)?;
            if self.runner.captures_trace() {
                sink.record_trace(&vehicle.trace)?;
            }
            sequencer.commit(&vehicle.record)?;
            hook(&vehicle);

            committed = vehicle.checkpoint;
            records.push(vehicle.record);
        }

        info!(vehicles = records.len(), "calibration finished");
        Ok(CalibrationSummary {
            records,
            final_checkpoint: committed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemorySink;
    use crate::test_helpers::{sample_events, sample_route, StubSimulator};

    fn settings(iterations: usize) -> CalibrationSettings {
        CalibrationSettings {
            iterations,
            optimizer: OptimizerConfig {
                n_initial_points: 3,
                ..OptimizerConfig::default()
            },
            ..CalibrationSettings::default()
        }
    }

    fn prepared(sequencer: &TripSequencer) -> (StubSimulator, Checkpoint) {
        let route = sample_route();
        let mut sim = StubSimulator::new(&route.detector_id);
        let begin = sequencer.begin_time().unwrap() as f64;
        let start =
            prepare_simulation(&mut sim, Path::new("stub.sumocfg"), begin, &route, "run").unwrap();
        (sim, start)
    }

    #[test]
    fn rejects_empty_budget() {
        assert!(settings(0).validate().is_err());
        let infinite = CalibrationSettings {
            no_crossing: NoCrossingPolicy::Penalize { loss: f64::NAN },
            ..settings(3)
        };
        assert!(infinite.validate().is_err());
    }

    #[test]
    fn winner_is_first_minimum_and_record_matches_it() {
        let mut sequencer = TripSequencer::new(sample_events(1, 1000, 60), sample_route(), 0);
        let (mut sim, start) = prepared(&sequencer);
        let pending = sequencer.next_trip().unwrap().unwrap();
        let runner = TrialRunner::new("w2e_out", "run");

        let vehicle = calibrate_vehicle(&mut sim, &pending, &start, &runner, &settings(8)).unwrap();

        assert_eq!(vehicle.evaluations.len(), 8);
        let min = vehicle
            .evaluations
            .iter()
            .map(|e| e.loss)
            .fold(f64::INFINITY, f64::min);
        let first_min = vehicle.evaluations.iter().position(|e| e.loss == min).unwrap();
        assert_eq!(vehicle.best_iteration, first_min);

        let winner = &vehicle.evaluations[first_min];
        assert_eq!(vehicle.record.depart, winner.params.depart);
        assert_eq!(vehicle.record.speed_factor, round2(winner.params.speed_factor));
        assert_eq!(vehicle.record.time_detector_sim, winner.crossing.unwrap().time);
        assert!(
            (vehicle.record.depart_speed - 13.89 * vehicle.record.speed_factor).abs() < 1e-9
        );
    }

    #[test]
    fn committed_state_is_the_winning_trial() {
        let mut sequencer = TripSequencer::new(sample_events(1, 1000, 60), sample_route(), 0);
        let (mut sim, start) = prepared(&sequencer);
        let pending = sequencer.next_trip().unwrap().unwrap();
        let runner = TrialRunner::new("w2e_out", "run");

        let vehicle = calibrate_vehicle(&mut sim, &pending, &start, &runner, &settings(5)).unwrap();

        assert_eq!(vehicle.checkpoint.key, CheckpointKey::committed("run"));
        assert_eq!(
            sim.checkpoint_time(&vehicle.checkpoint),
            Some(vehicle.record.depart as f64 + 1.0)
        );
        assert_eq!(
            sim.checkpoint_vehicles(&vehicle.checkpoint),
            Some(vec![vehicle.record.veh_id.clone()])
        );
        // Only the committed state survives pruning.
        assert_eq!(sim.stored_checkpoints(), 1);
    }

    #[test]
    fn keeps_trial_checkpoints_without_pruning() {
        let mut sequencer = TripSequencer::new(sample_events(1, 1000, 60), sample_route(), 0);
        let (mut sim, start) = prepared(&sequencer);
        let pending = sequencer.next_trip().unwrap().unwrap();
        let runner = TrialRunner::new("w2e_out", "run");
        let keep = CalibrationSettings {
            prune_checkpoints: false,
            ..settings(4)
        };

        calibrate_vehicle(&mut sim, &pending, &start, &runner, &keep).unwrap();
        assert_eq!(sim.stored_checkpoints(), 5);
    }

    #[test]
    fn stalled_vehicle_aborts_by_default() {
        let mut sequencer = TripSequencer::new(sample_events(1, 1000, 60), sample_route(), 0);
        let route = sample_route();
        let mut sim = StubSimulator::with_crossing("w2e_out", Box::new(|_, _| None));
        let begin = sequencer.begin_time().unwrap() as f64;
        let start =
            prepare_simulation(&mut sim, Path::new("stub.sumocfg"), begin, &route, "run").unwrap();
        let pending = sequencer.next_trip().unwrap().unwrap();
        let runner = TrialRunner::new("w2e_out", "run");

        let err = calibrate_vehicle(&mut sim, &pending, &start, &runner, &settings(3)).unwrap_err();
        assert!(matches!(err, CalibrationError::NoCrossing { .. }));

        let penalized = CalibrationSettings {
            no_crossing: NoCrossingPolicy::Penalize { loss: 1e6 },
            ..settings(3)
        };
        let err = calibrate_vehicle(&mut sim, &pending, &start, &runner, &penalized).unwrap_err();
        assert!(matches!(err, CalibrationError::NoCrossing { .. }));
    }

    #[test]
    fn run_streams_every_record() {
        let sequencer = TripSequencer::new(sample_events(3, 1000, 40), sample_route(), 0);
        let (mut sim, start) = prepared(&sequencer);
        let mut sink = MemorySink::default();
        let mut seen = 0;

        let summary = Calibrator::new(&mut sim, TrialRunner::new("w2e_out", "run"), settings(4))
            .unwrap()
            .run_with_hook(sequencer, start, &mut sink, |_| seen += 1)
            .unwrap();

        assert_eq!(seen, 3);
        assert_eq!(summary.records, sink.records);
        assert!(sink.trace.is_empty());
        assert_eq!(summary.final_checkpoint.key, CheckpointKey::committed("run"));
    }
}
