//! TraCI client for driving a SUMO process from the calibration loop.
//!
//! - [`protocol`]: byte-level codec
//! - [`connection`]: blocking request/response session
//! - [`launcher`]: simulator process lifetime
//! - [`controller`]: [`calib_core::SimulationController`] implementation
//! - [`files`]: configuration and detector files the simulator loads

pub mod connection;
pub mod controller;
pub mod error;
pub mod files;
pub mod launcher;
pub mod protocol;

pub use connection::Connection;
pub use controller::TraciController;
pub use error::TraciError;
pub use files::{write_simulation_files, SimulationFiles};
pub use launcher::{LaunchOptions, SimulatorProcess};
