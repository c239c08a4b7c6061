#![allow(dead_code)]

use std::path::Path;

use calib_core::test_helpers::{sample_events, sample_route, StubSimulator};
use calib_core::{
    prepare_simulation, CalibrationError, CalibrationSettings, CalibrationSummary, Calibrator,
    DetectionEvent, MemorySink, OptimizerConfig, TrialRunner, TripSequencer, VehicleCalibration,
};

pub const RUN_ID: &str = "w2e_out_2020-01-02";

/// Reproducible calibration run against the stub simulator.
pub struct TestRun {
    pub events: Vec<DetectionEvent>,
    pub cap: i64,
    pub settings: CalibrationSettings,
    pub load_budget: Option<usize>,
}

pub struct TestRunOutcome {
    pub result: Result<CalibrationSummary, CalibrationError>,
    pub sink: MemorySink,
    pub vehicles: Vec<VehicleCalibration>,
    pub sim: StubSimulator,
}

impl TestRun {
    pub fn new(vehicles: usize) -> Self {
        Self {
            events: sample_events(vehicles, 1000, 45),
            cap: 0,
            settings: CalibrationSettings {
                iterations: 6,
                optimizer: OptimizerConfig {
                    n_initial_points: 3,
                    ..OptimizerConfig::default()
                },
                ..CalibrationSettings::default()
            },
            load_budget: None,
        }
    }

    pub fn with_settings(mut self, settings: CalibrationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cap(mut self, cap: i64) -> Self {
        self.cap = cap;
        self
    }

    pub fn failing_after_loads(mut self, successful: usize) -> Self {
        self.load_budget = Some(successful);
        self
    }

    pub fn run(self) -> TestRunOutcome {
        self.run_on(StubSimulator::new("w2e_out"))
    }

    pub fn run_on(self, mut sim: StubSimulator) -> TestRunOutcome {
        let route = sample_route();
        let sequencer = TripSequencer::new(self.events, route.clone(), self.cap);
        let begin = sequencer.begin_time().unwrap_or(0) as f64;
        let start = prepare_simulation(&mut sim, Path::new("stub.sumocfg"), begin, &route, RUN_ID)
            .expect("stub setup");
        if let Some(budget) = self.load_budget {
            sim.fail_loads_after(budget);
        }

        let mut sink = MemorySink::default();
        let mut vehicles = Vec::new();
        let result = Calibrator::new(&mut sim, TrialRunner::new("w2e_out", RUN_ID), self.settings)
            .and_then(|mut calibrator| {
                calibrator.run_with_hook(sequencer, start, &mut sink, |vehicle| {
                    vehicles.push(vehicle.clone())
                })
            });

        TestRunOutcome {
            result,
            sink,
            vehicles,
            sim,
        }
    }
}
