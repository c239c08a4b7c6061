//! TraCI wire format: big-endian framing, typed values, status responses.
//!
//! A message is a 4-byte total length followed by commands. Each command is
//! a 1-byte length (or `0` followed by a 4-byte length when it does not fit)
//! then the command id and its payload. Every request command is answered by
//! a status command with the same id; value queries are followed by a
//! response command carrying the value.

use thiserror::Error;

pub mod command {
    pub const GET_VERSION: u8 = 0x00;
    pub const SIMULATION_STEP: u8 = 0x02;
    pub const CLOSE: u8 = 0x7F;

    pub const GET_INDUCTION_LOOP: u8 = 0xa0;
    pub const GET_VEHICLE: u8 = 0xa4;
    pub const GET_SIMULATION: u8 = 0xab;

    pub const SET_VEHICLE: u8 = 0xc4;
    pub const SET_ROUTE: u8 = 0xc6;
    pub const SET_SIMULATION: u8 = 0xcb;

    /// Response id of a get command.
    pub const fn response_to(get: u8) -> u8 {
        get + 0x10
    }
}

pub mod var {
    pub const ID_LIST: u8 = 0x00;

    pub const LAST_STEP_MEAN_SPEED: u8 = 0x11;
    pub const LAST_STEP_VEHICLE_ID_LIST: u8 = 0x12;
    pub const LAST_STEP_VEHICLE_DATA: u8 = 0x17;

    pub const SPEED: u8 = 0x40;
    pub const POSITION: u8 = 0x42;
    pub const ANGLE: u8 = 0x43;
    pub const LANE_ID: u8 = 0x51;
    pub const LANE_POSITION: u8 = 0x56;
    pub const SPEED_FACTOR: u8 = 0x5e;
    pub const NOISE_EMISSION: u8 = 0x66;
    pub const ACCELERATION: u8 = 0x72;
    pub const LANE_CHANGE_MODE: u8 = 0xb6;
    pub const ADD: u8 = 0x80;
    pub const REMOVE: u8 = 0x81;
    pub const ADD_FULL: u8 = 0x85;

    pub const TIME: u8 = 0x66;
    pub const MIN_EXPECTED_VEHICLES: u8 = 0x7d;
    pub const POSITION_CONVERSION: u8 = 0x82;
    pub const SAVE_STATE: u8 = 0x95;
    pub const LOAD_STATE: u8 = 0x96;
}

pub mod value_type {
    pub const POSITION_LON_LAT: u8 = 0x00;
    pub const POSITION_2D: u8 = 0x01;
    pub const UBYTE: u8 = 0x07;
    pub const BYTE: u8 = 0x08;
    pub const INTEGER: u8 = 0x09;
    pub const DOUBLE: u8 = 0x0B;
    pub const STRING: u8 = 0x0C;
    pub const STRING_LIST: u8 = 0x0E;
    pub const COMPOUND: u8 = 0x0F;
}

pub mod status {
    pub const OK: u8 = 0x00;
    pub const NOT_IMPLEMENTED: u8 = 0x01;
    pub const ERR: u8 = 0xFF;
}

/// Vehicle removal reason: vaporized.
pub const REMOVE_VAPORIZED: i8 = 3;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("message truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("expected value type {expected:#04x}, found {found:#04x}")]
    UnexpectedType { expected: u8, found: u8 },
    #[error("expected response to command {expected:#04x}, found {found:#04x}")]
    UnexpectedCommand { expected: u8, found: u8 },
    #[error("string is not valid UTF-8")]
    InvalidString,
    #[error("command {command:#04x} failed: {description}")]
    Failed { command: u8, description: String },
    #[error("command {command:#04x} is not implemented by the simulator")]
    NotImplemented { command: u8 },
    #[error("unknown status {status:#04x} for command {command:#04x}")]
    UnknownStatus { command: u8, status: u8 },
}

/// Append-only encoder for command payloads.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.i32(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn string_list(&mut self, values: &[String]) -> &mut Self {
        self.i32(values.len() as i32);
        for value in values {
            self.string(value);
        }
        self
    }

    pub fn typed_ubyte(&mut self, value: u8) -> &mut Self {
        self.u8(value_type::UBYTE).u8(value)
    }

    pub fn typed_byte(&mut self, value: i8) -> &mut Self {
        self.u8(value_type::BYTE).i8(value)
    }

    pub fn typed_int(&mut self, value: i32) -> &mut Self {
        self.u8(value_type::INTEGER).i32(value)
    }

    pub fn typed_double(&mut self, value: f64) -> &mut Self {
        self.u8(value_type::DOUBLE).f64(value)
    }

    pub fn typed_string(&mut self, value: &str) -> &mut Self {
        self.u8(value_type::STRING).string(value)
    }

    pub fn typed_string_list(&mut self, values: &[String]) -> &mut Self {
        self.u8(value_type::STRING_LIST).string_list(values)
    }

    pub fn compound(&mut self, items: i32) -> &mut Self {
        self.u8(value_type::COMPOUND).i32(items)
    }

    pub fn typed_position(&mut self, x: f64, y: f64) -> &mut Self {
        self.u8(value_type::POSITION_2D).f64(x).f64(y)
    }
}

/// Cursor over a received byte buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.i32()?.max(0) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidString)
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.i32()?.max(0) as usize;
        (0..count).map(|_| self.string()).collect()
    }

    fn expect_type(&mut self, expected: u8) -> Result<(), ProtocolError> {
        let found = self.u8()?;
        if found == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedType { expected, found })
        }
    }

    pub fn typed_int(&mut self) -> Result<i32, ProtocolError> {
        self.expect_type(value_type::INTEGER)?;
        self.i32()
    }

    pub fn typed_double(&mut self) -> Result<f64, ProtocolError> {
        self.expect_type(value_type::DOUBLE)?;
        self.f64()
    }

    pub fn typed_string(&mut self) -> Result<String, ProtocolError> {
        self.expect_type(value_type::STRING)?;
        self.string()
    }

    pub fn typed_string_list(&mut self) -> Result<Vec<String>, ProtocolError> {
        self.expect_type(value_type::STRING_LIST)?;
        self.string_list()
    }

    pub fn typed_position(&mut self) -> Result<(f64, f64), ProtocolError> {
        self.expect_type(value_type::POSITION_2D)?;
        Ok((self.f64()?, self.f64()?))
    }

    /// `(longitude, latitude)` in degrees.
    pub fn typed_lon_lat(&mut self) -> Result<(f64, f64), ProtocolError> {
        self.expect_type(value_type::POSITION_LON_LAT)?;
        Ok((self.f64()?, self.f64()?))
    }

    /// Item count of a compound value.
    pub fn compound(&mut self) -> Result<i32, ProtocolError> {
        self.expect_type(value_type::COMPOUND)?;
        self.i32()
    }

    /// Skip one typed value of any supported type.
    pub fn skip_typed(&mut self) -> Result<(), ProtocolError> {
        match self.u8()? {
            value_type::UBYTE | value_type::BYTE => {
                self.take(1)?;
            }
            value_type::INTEGER => {
                self.take(4)?;
            }
            value_type::DOUBLE => {
                self.take(8)?;
            }
            value_type::POSITION_2D | value_type::POSITION_LON_LAT => {
                self.take(16)?;
            }
            value_type::STRING => {
                self.string()?;
            }
            value_type::STRING_LIST => {
                self.string_list()?;
            }
            value_type::COMPOUND => {
                let items = self.i32()?.max(0);
                for _ in 0..items {
                    self.skip_typed()?;
                }
            }
            found => {
                return Err(ProtocolError::UnexpectedType {
                    expected: value_type::COMPOUND,
                    found,
                })
            }
        }
        Ok(())
    }
}

/// Frame one command: length prefix, id, payload.
pub fn encode_command(id: u8, payload: &[u8]) -> Vec<u8> {
    let short = 2 + payload.len();
    let mut out = Vec::with_capacity(short + 4);
    if short <= u8::MAX as usize {
        out.push(short as u8);
    } else {
        out.push(0);
        out.extend_from_slice(&((short + 4) as i32).to_be_bytes());
    }
    out.push(id);
    out.extend_from_slice(payload);
    out
}

/// Frame a message around already framed commands.
pub fn encode_message(commands: &[Vec<u8>]) -> Vec<u8> {
    let body: usize = commands.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(4 + body);
    out.extend_from_slice(&((4 + body) as i32).to_be_bytes());
    for command in commands {
        out.extend_from_slice(command);
    }
    out
}

/// Payload of a variable query: variable id, object id.
pub fn get_request(domain: u8, variable: u8, object_id: &str) -> Vec<u8> {
    get_request_with(domain, variable, object_id, &[])
}

/// Variable query carrying typed parameters after the object id.
pub fn get_request_with(domain: u8, variable: u8, object_id: &str, parameters: &[u8]) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.u8(variable).string(object_id);
    let mut bytes = payload.into_bytes();
    bytes.extend_from_slice(parameters);
    encode_command(domain, &bytes)
}

/// Variable assignment: variable id, object id, typed value bytes.
pub fn set_request(domain: u8, variable: u8, object_id: &str, value: &[u8]) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.u8(variable).string(object_id);
    let mut bytes = payload.into_bytes();
    bytes.extend_from_slice(value);
    encode_command(domain, &bytes)
}

/// One command of a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCommand {
    pub id: u8,
    pub payload: Vec<u8>,
}

/// Read one framed command at the reader's position.
pub fn next_command(reader: &mut Reader<'_>) -> Result<ResponseCommand, ProtocolError> {
    let short = reader.u8()? as usize;
    let content = if short == 0 {
        (reader.i32()?.max(0) as usize).saturating_sub(5)
    } else {
        short.saturating_sub(1)
    };
    let bytes = reader.take(content)?;
    let (id, payload) = bytes.split_first().ok_or(ProtocolError::Truncated {
        offset: reader.pos,
        needed: 1,
        available: 0,
    })?;
    Ok(ResponseCommand {
        id: *id,
        payload: payload.to_vec(),
    })
}

/// Split a message body (without the total length) into commands.
pub fn split_commands(body: &[u8]) -> Result<Vec<ResponseCommand>, ProtocolError> {
    let mut reader = Reader::new(body);
    let mut commands = Vec::new();
    while !reader.is_empty() {
        commands.push(next_command(&mut reader)?);
    }
    Ok(commands)
}

/// Check a status command answering `expected`.
pub fn check_status(command: &ResponseCommand, expected: u8) -> Result<(), ProtocolError> {
    if command.id != expected {
        return Err(ProtocolError::UnexpectedCommand {
            expected,
            found: command.id,
        });
    }
    let mut reader = Reader::new(&command.payload);
    let result = reader.u8()?;
    let description = reader.string().unwrap_or_default();
    match result {
        status::OK => Ok(()),
        status::NOT_IMPLEMENTED => Err(ProtocolError::NotImplemented { command: expected }),
        status::ERR => Err(ProtocolError::Failed {
            command: expected,
            description,
        }),
        other => Err(ProtocolError::UnknownStatus {
            command: expected,
            status: other,
        }),
    }
}

/// Value part of a get response: checks the response id, variable and object id.
pub fn response_value<'a>(
    command: &'a ResponseCommand,
    get: u8,
    variable: u8,
    object_id: &str,
) -> Result<Reader<'a>, ProtocolError> {
    let expected = command::response_to(get);
    if command.id != expected {
        return Err(ProtocolError::UnexpectedCommand {
            expected,
            found: command.id,
        });
    }
    let mut reader = Reader::new(&command.payload);
    let found = reader.u8()?;
    if found != variable {
        return Err(ProtocolError::UnexpectedCommand {
            expected: variable,
            found,
        });
    }
    let id = reader.string()?;
    if id != object_id {
        return Err(ProtocolError::Failed {
            command: get,
            description: format!("response for '{id}', expected '{object_id}'"),
        });
    }
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commands_use_one_length_byte() {
        let bytes = get_request(command::GET_SIMULATION, var::TIME, "");
        // len, id, var, empty string
        assert_eq!(bytes, vec![7, 0xab, 0x66, 0, 0, 0, 0]);
    }

    #[test]
    fn geo_conversion_query_carries_position_and_target_type() {
        let mut parameters = Writer::new();
        parameters
            .compound(2)
            .typed_position(120.5, -3.25)
            .typed_ubyte(value_type::POSITION_LON_LAT);
        let bytes = get_request_with(
            command::GET_SIMULATION,
            var::POSITION_CONVERSION,
            "",
            &parameters.into_bytes(),
        );
        assert_eq!(bytes[0] as usize, bytes.len());
        assert_eq!(&bytes[1..7], &[0xab, 0x82, 0, 0, 0, 0]);
        assert_eq!(&bytes[7..12], &[0x0F, 0, 0, 0, 2]);
        assert_eq!(bytes[12], value_type::POSITION_2D);
        assert_eq!(&bytes[13..21], &120.5f64.to_be_bytes());
        assert_eq!(&bytes[bytes.len() - 2..], &[value_type::UBYTE, value_type::POSITION_LON_LAT]);

        let mut value = Writer::new();
        value.u8(value_type::POSITION_LON_LAT).f64(18.061234).f64(59.315678);
        let bytes = value.into_bytes();
        assert_eq!(Reader::new(&bytes).typed_lon_lat().unwrap(), (18.061234, 59.315678));
    }

    #[test]
    fn long_commands_switch_to_extended_length() {
        let payload = vec![0xAA; 300];
        let bytes = encode_command(0xc4, &payload);
        assert_eq!(bytes[0], 0);
        assert_eq!(i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 306);
        assert_eq!(bytes[5], 0xc4);
        assert_eq!(bytes.len(), 306);

        let parsed = split_commands(&bytes).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].payload.len(), 300);
    }

    #[test]
    fn message_length_counts_its_own_header() {
        let step = encode_command(command::SIMULATION_STEP, &0.0f64.to_be_bytes());
        let message = encode_message(&[step.clone()]);
        assert_eq!(&message[..4], &((4 + step.len()) as i32).to_be_bytes());
        assert_eq!(&message[4..], step.as_slice());
    }

    #[test]
    fn statuses_map_to_errors() {
        let ok = ResponseCommand {
            id: 0xc4,
            payload: {
                let mut w = Writer::new();
                w.u8(status::OK).string("");
                w.into_bytes()
            },
        };
        assert!(check_status(&ok, 0xc4).is_ok());

        let failed = ResponseCommand {
            id: 0xc4,
            payload: {
                let mut w = Writer::new();
                w.u8(status::ERR).string("Vehicle '3' is not known");
                w.into_bytes()
            },
        };
        assert_eq!(
            check_status(&failed, 0xc4),
            Err(ProtocolError::Failed {
                command: 0xc4,
                description: "Vehicle '3' is not known".into()
            })
        );
        assert!(matches!(
            check_status(&ok, 0xa4),
            Err(ProtocolError::UnexpectedCommand { .. })
        ));
    }

    #[test]
    fn reads_typed_values_in_order() {
        let mut w = Writer::new();
        w.typed_string_list(&["a".into(), "bc".into()])
            .typed_double(12.5)
            .typed_int(-3)
            .u8(value_type::POSITION_2D)
            .f64(1.0)
            .f64(2.0);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.typed_string_list().unwrap(), vec!["a", "bc"]);
        assert_eq!(r.typed_double().unwrap(), 12.5);
        assert_eq!(r.typed_int().unwrap(), -3);
        assert_eq!(r.typed_position().unwrap(), (1.0, 2.0));
        assert!(r.is_empty());
    }

    #[test]
    fn skips_nested_compounds() {
        let mut w = Writer::new();
        w.compound(2)
            .typed_string("veh")
            .compound(1)
            .typed_double(4.0);
        w.typed_int(9);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        r.skip_typed().unwrap();
        assert_eq!(r.typed_int().unwrap(), 9);
    }

    #[test]
    fn truncated_input_is_reported() {
        let mut r = Reader::new(&[0, 0, 0, 5, b'a']);
        assert!(matches!(r.string(), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn response_value_checks_object_id() {
        let mut w = Writer::new();
        w.u8(var::SPEED).string("veh0").typed_double(7.0);
        let command = ResponseCommand {
            id: command::response_to(command::GET_VEHICLE),
            payload: w.into_bytes(),
        };
        let mut value = response_value(&command, command::GET_VEHICLE, var::SPEED, "veh0").unwrap();
        assert_eq!(value.typed_double().unwrap(), 7.0);
        assert!(response_value(&command, command::GET_VEHICLE, var::SPEED, "veh1").is_err());
    }
}
