//! Blocking TraCI session over TCP.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TraciError;
use crate::protocol::{
    check_status, command, encode_command, encode_message, get_request, get_request_with,
    next_command, response_value, set_request, split_commands, value_type, var, ProtocolError,
    Reader, ResponseCommand, Writer,
};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 60;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// One open TraCI session.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
}

impl Connection {
    /// Connect to a simulator that may still be booting.
    pub fn connect(
        host: &str,
        port: u16,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, TraciError> {
        let address = format!("{host}:{port}");
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TcpStream::connect(&address) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%address, attempt, "connected to simulator");
                    return Ok(Self::from_stream(stream));
                }
                Err(source) if attempt >= attempts => {
                    return Err(TraciError::Connect {
                        address,
                        attempts,
                        source,
                    });
                }
                Err(_) => thread::sleep(retry_delay),
            }
        }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TraciError> {
        self.stream.as_mut().ok_or(TraciError::Closed)
    }

    fn send(&mut self, commands: &[Vec<u8>]) -> Result<(), TraciError> {
        let message = encode_message(commands);
        let stream = self.stream()?;
        stream.write_all(&message)?;
        stream.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, TraciError> {
        let stream = self.stream()?;
        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        let total = i32::from_be_bytes(header).max(4) as usize;
        let mut body = vec![0u8; total - 4];
        stream.read_exact(&mut body)?;
        Ok(body)
    }

    /// Send one command and return every command of the reply.
    fn exchange(&mut self, request: Vec<u8>) -> Result<Vec<ResponseCommand>, TraciError> {
        self.send(&[request])?;
        let body = self.receive()?;
        Ok(split_commands(&body)?)
    }

    /// Status check plus the value command that follows it.
    fn query(&mut self, request: Vec<u8>, id: u8) -> Result<ResponseCommand, TraciError> {
        let mut replies = self.exchange(request)?.into_iter();
        let status = replies.next().ok_or(TraciError::Closed)?;
        check_status(&status, id)?;
        Ok(replies.next().ok_or(TraciError::Closed)?)
    }

    /// Simulator API version and its identification string.
    pub fn version(&mut self) -> Result<(i32, String), TraciError> {
        let reply = self.query(encode_command(command::GET_VERSION, &[]), command::GET_VERSION)?;
        let mut reader = Reader::new(&reply.payload);
        Ok((reader.i32()?, reader.string()?))
    }

    /// Advance the simulation; `target_time` 0 performs exactly one step.
    pub fn simulation_step(&mut self, target_time: f64) -> Result<(), TraciError> {
        let mut payload = Writer::new();
        payload.f64(target_time);
        self.send(&[encode_command(
            command::SIMULATION_STEP,
            &payload.into_bytes(),
        )])?;
        let body = self.receive()?;
        let mut reader = Reader::new(&body);
        let status = next_command(&mut reader)?;
        check_status(&status, command::SIMULATION_STEP)?;
        let subscriptions = if reader.is_empty() { 0 } else { reader.i32()? };
        if subscriptions > 0 {
            warn!(subscriptions, "ignoring unexpected subscription results");
        }
        Ok(())
    }

    /// Read one variable; `parse` consumes the typed value.
    pub fn get<T>(
        &mut self,
        domain: u8,
        variable: u8,
        object_id: &str,
        parse: impl FnOnce(&mut Reader<'_>) -> Result<T, ProtocolError>,
    ) -> Result<T, TraciError> {
        let reply = self.query(get_request(domain, variable, object_id), domain)?;
        let mut reader = response_value(&reply, domain, variable, object_id)?;
        Ok(parse(&mut reader)?)
    }

    /// Read one variable whose query takes typed `parameters`.
    pub fn get_with<T>(
        &mut self,
        domain: u8,
        variable: u8,
        object_id: &str,
        parameters: Writer,
        parse: impl FnOnce(&mut Reader<'_>) -> Result<T, ProtocolError>,
    ) -> Result<T, TraciError> {
        let request = get_request_with(domain, variable, object_id, &parameters.into_bytes());
        let reply = self.query(request, domain)?;
        let mut reader = response_value(&reply, domain, variable, object_id)?;
        Ok(parse(&mut reader)?)
    }

    /// Convert a network position to `(longitude, latitude)`.
    pub fn convert_to_lon_lat(&mut self, x: f64, y: f64) -> Result<(f64, f64), TraciError> {
        let mut parameters = Writer::new();
        parameters
            .compound(2)
            .typed_position(x, y)
            .typed_ubyte(value_type::POSITION_LON_LAT);
        self.get_with(
            command::GET_SIMULATION,
            var::POSITION_CONVERSION,
            "",
            parameters,
            |r| r.typed_lon_lat(),
        )
    }

    pub fn get_double(&mut self, domain: u8, variable: u8, id: &str) -> Result<f64, TraciError> {
        self.get(domain, variable, id, |r| r.typed_double())
    }

    pub fn get_int(&mut self, domain: u8, variable: u8, id: &str) -> Result<i32, TraciError> {
        self.get(domain, variable, id, |r| r.typed_int())
    }

    pub fn get_string(&mut self, domain: u8, variable: u8, id: &str) -> Result<String, TraciError> {
        self.get(domain, variable, id, |r| r.typed_string())
    }

    pub fn get_string_list(
        &mut self,
        domain: u8,
        variable: u8,
        id: &str,
    ) -> Result<Vec<String>, TraciError> {
        self.get(domain, variable, id, |r| r.typed_string_list())
    }

    pub fn get_position(
        &mut self,
        domain: u8,
        variable: u8,
        id: &str,
    ) -> Result<(f64, f64), TraciError> {
        self.get(domain, variable, id, |r| r.typed_position())
    }

    /// Assign one variable; `value` holds the already typed payload.
    pub fn set(
        &mut self,
        domain: u8,
        variable: u8,
        object_id: &str,
        value: Writer,
    ) -> Result<(), TraciError> {
        let request = set_request(domain, variable, object_id, &value.into_bytes());
        let replies = self.exchange(request)?;
        let status = replies.first().ok_or(TraciError::Closed)?;
        Ok(check_status(status, domain)?)
    }

    /// End the session. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), TraciError> {
        if !self.is_open() {
            return Ok(());
        }
        let result = self
            .exchange(encode_command(command::CLOSE, &[]))
            .and_then(|replies| match replies.first() {
                Some(status) => Ok(check_status(status, command::CLOSE)?),
                None => Ok(()),
            });
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
