#![allow(dead_code)]

use std::fs;
use std::path::Path;

use calib_core::OptimizerConfig;
use calib_runner::{CalibrationConfig, RunPaths};
use tempfile::TempDir;

/// Temporary data tree with one day of measurements.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub config: CalibrationConfig,
}

impl TestWorkspace {
    /// `vehicles` crossings of `w2e_out` 45 s apart, interleaved with `e2w_in` noise.
    pub fn new(vehicles: usize) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        let paths = RunPaths {
            measurements_dir: root.join("daily"),
            intermediate_dir: root.join("intermediate"),
            output_dir: root.join("out"),
            net_file: root.join("map/Hornsgatan.net.xml"),
        };
        fs::create_dir_all(&paths.measurements_dir).unwrap();

        let mut body = String::from("detector_id,time_detector_real,speed_detector_real\n");
        for i in 0..vehicles {
            let time = 1000 + 45 * i;
            let kmh = 36.0 + 3.6 * (i % 4) as f64;
            body.push_str(&format!("w2e_out,{time},{kmh}\n"));
            body.push_str(&format!("e2w_in,{},{kmh}\n", time + 7));
        }
        fs::write(paths.measurements_dir.join("data_2020-01-02.csv"), body).unwrap();

        let mut config = CalibrationConfig {
            detector: "w2e_out".into(),
            date: "2020-01-02".into(),
            paths,
            ..CalibrationConfig::default()
        };
        config.calibration.iterations = 6;
        config.calibration.optimizer = OptimizerConfig {
            n_initial_points: 3,
            ..OptimizerConfig::default()
        };
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
