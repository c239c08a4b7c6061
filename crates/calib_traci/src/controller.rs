//! [`SimulationController`] over a live TraCI session.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calib_core::{
    Checkpoint, CheckpointKey, DetectorReading, SimulationController, SimulatorError,
    VehicleInsertion, VehicleKinematics,
};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::launcher::{LaunchOptions, SimulatorProcess};
use crate::protocol::{command, var, Writer, REMOVE_VAPORIZED};

const DEFAULT_VEHICLE_TYPE: &str = "DEFAULT_VEHTYPE";

/// Controller that owns one simulator process (or an attached session) and
/// stores checkpoints as state files under `state_dir`.
#[derive(Debug)]
pub struct TraciController {
    launch: LaunchOptions,
    host: String,
    connect_attempts: u32,
    retry_delay: Duration,
    state_dir: PathBuf,
    connection: Option<Connection>,
    process: Option<SimulatorProcess>,
}

impl TraciController {
    /// Controller that launches its own simulator on [`SimulationController::start`].
    pub fn new(launch: LaunchOptions, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            launch,
            host: "127.0.0.1".to_string(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            state_dir: state_dir.into(),
            connection: None,
            process: None,
        }
    }

    /// Controller over an already established session; `start` launches nothing.
    pub fn attach(connection: Connection, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            connection: Some(connection),
            ..Self::new(LaunchOptions::default(), state_dir)
        }
    }

    pub fn with_connect_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.connect_attempts = attempts;
        self.retry_delay = retry_delay;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// `<state_dir>/simulation_<key>.sumo.state`
    pub fn state_path(&self, key: &CheckpointKey) -> PathBuf {
        self.state_dir.join(format!("simulation_{key}.sumo.state"))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    fn conn(&mut self) -> Result<&mut Connection, SimulatorError> {
        self.connection
            .as_mut()
            .filter(|c| c.is_open())
            .ok_or_else(|| SimulatorError::Protocol("simulator is not connected".into()))
    }

    fn set_vehicle(&mut self, id: &str, variable: u8, value: Writer) -> Result<(), SimulatorError> {
        Ok(self.conn()?.set(command::SET_VEHICLE, variable, id, value)?)
    }

    fn vehicle_double(&mut self, id: &str, variable: u8) -> Result<f64, SimulatorError> {
        Ok(self.conn()?.get_double(command::GET_VEHICLE, variable, id)?)
    }
}

impl SimulationController for TraciController {
    fn start(&mut self, config: &Path, begin_time: f64) -> Result<(), SimulatorError> {
        if self.is_connected() {
            debug!("simulator session already attached");
            return Ok(());
        }
        fs::create_dir_all(&self.state_dir)?;
        let process = SimulatorProcess::spawn(&self.launch, config, begin_time)?;
        self.process = Some(process);
        let mut connection = Connection::connect(
            &self.host,
            self.launch.port,
            self.connect_attempts,
            self.retry_delay,
        )?;
        let (api, identification) = connection.version()?;
        info!(api, %identification, "simulator ready");
        self.connection = Some(connection);
        Ok(())
    }

    fn add_route(&mut self, route_id: &str, edges: &[String]) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value.typed_string_list(edges);
        Ok(self.conn()?.set(command::SET_ROUTE, var::ADD, route_id, value)?)
    }

    fn save_state(&mut self, key: &CheckpointKey) -> Result<Checkpoint, SimulatorError> {
        let location = self.state_path(key).display().to_string();
        let mut value = Writer::new();
        value.typed_string(&location);
        self.conn()?
            .set(command::SET_SIMULATION, var::SAVE_STATE, "", value)?;
        Ok(Checkpoint {
            key: key.clone(),
            location,
        })
    }

    fn load_state(&mut self, checkpoint: &Checkpoint) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value.typed_string(&checkpoint.location);
        let result = self
            .conn()
            .and_then(|c| Ok(c.set(command::SET_SIMULATION, var::LOAD_STATE, "", value)?));
        if let Err(err) = result {
            error!(checkpoint = %checkpoint.key, %err, "state restore failed, closing simulator");
            let _ = self.close();
            return Err(SimulatorError::Fatal(format!(
                "could not load {}: {err}",
                checkpoint.location
            )));
        }
        Ok(())
    }

    fn discard_state(&mut self, checkpoint: &Checkpoint) -> Result<(), SimulatorError> {
        match fs::remove_file(&checkpoint.location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn add_vehicle(&mut self, vehicle: &VehicleInsertion) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value
            .compound(14)
            .typed_string(&vehicle.route_id)
            .typed_string(DEFAULT_VEHICLE_TYPE)
            .typed_string(&format!("{}", vehicle.depart))
            .typed_string(&vehicle.lane.to_string())
            .typed_string(&format!("{}", vehicle.depart_pos))
            .typed_string(&vehicle.depart_speed.to_string())
            .typed_string("current")
            .typed_string("max")
            .typed_string("current")
            .typed_string("")
            .typed_string("")
            .typed_string("")
            .typed_int(0)
            .typed_int(0);
        self.set_vehicle(&vehicle.id, var::ADD_FULL, value)
    }

    fn remove_vehicle_if_present(&mut self, id: &str) -> Result<bool, SimulatorError> {
        if !self.vehicle_ids()?.iter().any(|v| v == id) {
            return Ok(false);
        }
        let mut value = Writer::new();
        value.typed_byte(REMOVE_VAPORIZED);
        self.set_vehicle(id, var::REMOVE, value)?;
        Ok(true)
    }

    fn set_speed(&mut self, id: &str, speed: f64) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value.typed_double(speed);
        self.set_vehicle(id, var::SPEED, value)
    }

    fn set_speed_factor(&mut self, id: &str, factor: f64) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value.typed_double(factor);
        self.set_vehicle(id, var::SPEED_FACTOR, value)
    }

    fn set_lane_change_mode(&mut self, id: &str, mode: i32) -> Result<(), SimulatorError> {
        let mut value = Writer::new();
        value.typed_int(mode);
        self.set_vehicle(id, var::LANE_CHANGE_MODE, value)
    }

    fn step(&mut self) -> Result<(), SimulatorError> {
        Ok(self.conn()?.simulation_step(0.0)?)
    }

    fn current_time(&mut self) -> Result<f64, SimulatorError> {
        Ok(self
            .conn()?
            .get_double(command::GET_SIMULATION, var::TIME, "")?)
    }

    fn min_expected_vehicle_count(&mut self) -> Result<i32, SimulatorError> {
        Ok(self
            .conn()?
            .get_int(command::GET_SIMULATION, var::MIN_EXPECTED_VEHICLES, "")?)
    }

    fn detector_last_step_vehicle_ids(
        &mut self,
        detector_id: &str,
    ) -> Result<Vec<String>, SimulatorError> {
        Ok(self.conn()?.get_string_list(
            command::GET_INDUCTION_LOOP,
            var::LAST_STEP_VEHICLE_ID_LIST,
            detector_id,
        )?)
    }

    fn detector_vehicle_data(
        &mut self,
        detector_id: &str,
    ) -> Result<DetectorReading, SimulatorError> {
        let conn = self.conn()?;
        let entry_time = conn.get(
            command::GET_INDUCTION_LOOP,
            var::LAST_STEP_VEHICLE_DATA,
            detector_id,
            |r| {
                r.compound()?;
                let count = r.typed_int()?;
                let mut first_entry = None;
                for _ in 0..count {
                    let _vehicle = r.typed_string()?;
                    let _length = r.typed_double()?;
                    let entry = r.typed_double()?;
                    let _leave = r.typed_double()?;
                    let _type = r.typed_string()?;
                    first_entry.get_or_insert(entry);
                }
                Ok(first_entry)
            },
        )?;
        let entry_time = entry_time.ok_or_else(|| {
            SimulatorError::Protocol(format!("detector {detector_id} reported no vehicle data"))
        })?;
        let mean_speed = conn.get_double(
            command::GET_INDUCTION_LOOP,
            var::LAST_STEP_MEAN_SPEED,
            detector_id,
        )?;
        Ok(DetectorReading {
            entry_time,
            mean_speed,
        })
    }

    fn vehicle_ids(&mut self) -> Result<Vec<String>, SimulatorError> {
        Ok(self
            .conn()?
            .get_string_list(command::GET_VEHICLE, var::ID_LIST, "")?)
    }

    fn vehicle_kinematics(&mut self, id: &str) -> Result<VehicleKinematics, SimulatorError> {
        let speed_factor = self.vehicle_double(id, var::SPEED_FACTOR)?;
        let conn = self.conn()?;
        let (x, y) = conn.get_position(command::GET_VEHICLE, var::POSITION, id)?;
        let (lon, lat) = conn.convert_to_lon_lat(x, y)?;
        let angle = self.vehicle_double(id, var::ANGLE)?;
        let speed = self.vehicle_double(id, var::SPEED)?;
        let acceleration = self.vehicle_double(id, var::ACCELERATION)?;
        let lane_offset = self.vehicle_double(id, var::LANE_POSITION)?;
        let lane_id = self
            .conn()?
            .get_string(command::GET_VEHICLE, var::LANE_ID, id)?;
        let noise = self.vehicle_double(id, var::NOISE_EMISSION)?;
        Ok(VehicleKinematics {
            speed_factor,
            x: lon,
            y: lat,
            angle,
            speed,
            acceleration,
            lane_offset,
            lane_id,
            noise,
        })
    }

    fn close(&mut self) -> Result<(), SimulatorError> {
        let result = match self.connection.as_mut() {
            Some(connection) => connection.close(),
            None => Ok(()),
        };
        self.connection = None;
        if let Some(process) = self.process.take() {
            if result.is_ok() {
                process.wait()?;
            }
        }
        if let Err(err) = &result {
            warn!(%err, "simulator session did not close cleanly");
        }
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_files_are_named_after_the_checkpoint_key() {
        let controller = TraciController::new(LaunchOptions::default(), "/tmp/states");
        assert_eq!(
            controller.state_path(&CheckpointKey::committed("w2e_out_2020-01-02")),
            PathBuf::from("/tmp/states/simulation_w2e_out_2020-01-02.sumo.state")
        );
        assert_eq!(
            controller.state_path(&CheckpointKey::iteration("w2e_out_2020-01-02", 4)),
            PathBuf::from("/tmp/states/simulation_w2e_out_2020-01-02_4.sumo.state")
        );
    }

    #[test]
    fn commands_before_start_are_rejected() {
        let mut controller = TraciController::new(LaunchOptions::default(), "/tmp/states");
        assert!(matches!(controller.step(), Err(SimulatorError::Protocol(_))));
        assert!(controller.close().is_ok());
    }

    #[test]
    fn discarding_a_missing_state_file_is_not_an_error() {
        let mut controller = TraciController::new(LaunchOptions::default(), "/tmp/states");
        let checkpoint = Checkpoint {
            key: CheckpointKey::iteration("gone", 1),
            location: "/nonexistent/simulation_gone_1.sumo.state".into(),
        };
        assert!(controller.discard_state(&checkpoint).is_ok());
    }
}
