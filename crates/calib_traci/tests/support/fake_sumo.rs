#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use calib_traci::protocol::{
    command, encode_command, encode_message, split_commands, status, value_type, var, Reader,
    ResponseCommand, Writer,
};
use calib_traci::Connection;

/// What the fake simulator saw, shared with the test thread.
#[derive(Debug, Default)]
pub struct Transcript {
    pub commands: Vec<(u8, u8, String)>,
    /// String fields of every full vehicle insertion, in request order.
    pub insertions: Vec<Vec<String>>,
    pub steps: usize,
    pub closed: bool,
}

/// Behaviour knobs for the fake.
#[derive(Debug, Clone)]
pub struct FakeSumoConfig {
    pub begin_time: f64,
    /// Vehicle ids whose insertion is answered with an error status.
    pub rejected_vehicles: Vec<String>,
    /// Entry time and mean speed reported by every detector.
    pub detector_entry: Option<(String, f64, f64)>,
}

impl Default for FakeSumoConfig {
    fn default() -> Self {
        Self {
            begin_time: 900.0,
            rejected_vehicles: Vec::new(),
            detector_entry: None,
        }
    }
}

/// Single-client TraCI server answering from a tiny in-memory world.
pub struct FakeSumo {
    pub port: u16,
    pub transcript: Arc<Mutex<Transcript>>,
    handle: JoinHandle<()>,
}

impl FakeSumo {
    pub fn spawn(config: FakeSumoConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake simulator");
        let port = listener.local_addr().expect("local addr").port();
        let transcript = Arc::new(Mutex::new(Transcript::default()));
        let shared = Arc::clone(&transcript);
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream, config, shared);
            }
        });
        Self {
            port,
            transcript,
            handle,
        }
    }

    pub fn connect(&self) -> Connection {
        let stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connect to fake");
        Connection::from_stream(stream)
    }

    pub fn join(self) -> Arc<Mutex<Transcript>> {
        let _ = self.handle.join();
        self.transcript
    }
}

struct World {
    time: f64,
    vehicles: BTreeSet<String>,
    routes: BTreeSet<String>,
}

fn serve(mut stream: TcpStream, config: FakeSumoConfig, transcript: Arc<Mutex<Transcript>>) {
    let mut world = World {
        time: config.begin_time,
        vehicles: BTreeSet::new(),
        routes: BTreeSet::new(),
    };
    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let total = i32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; total - 4];
        if stream.read_exact(&mut body).is_err() {
            return;
        }
        let commands = split_commands(&body).expect("well-formed request");
        let mut reply = Vec::new();
        let mut raw_tail = Vec::new();
        let mut closing = false;
        for request in commands {
            let (variable, object) = request_target(&request);
            transcript
                .lock()
                .unwrap()
                .commands
                .push((request.id, variable, object.clone()));
            match request.id {
                command::GET_VERSION => {
                    reply.push(ok(request.id));
                    let mut payload = Writer::new();
                    payload.i32(21).string("fake SUMO");
                    reply.push(encode_command(command::GET_VERSION, &payload.into_bytes()));
                }
                command::SIMULATION_STEP => {
                    world.time += 1.0;
                    transcript.lock().unwrap().steps += 1;
                    reply.push(ok(request.id));
                    raw_tail.extend_from_slice(&0i32.to_be_bytes());
                }
                command::CLOSE => {
                    reply.push(ok(request.id));
                    transcript.lock().unwrap().closed = true;
                    closing = true;
                }
                command::GET_SIMULATION => {
                    reply.push(ok(request.id));
                    let mut value = Writer::new();
                    match variable {
                        var::TIME => value.typed_double(world.time),
                        var::MIN_EXPECTED_VEHICLES => value.typed_int(world.vehicles.len() as i32),
                        var::POSITION_CONVERSION => {
                            let (x, y) = conversion_position(&request);
                            value
                                .u8(value_type::POSITION_LON_LAT)
                                .f64(18.0 + x * 1.0e-5)
                                .f64(59.0 + y * 1.0e-5)
                        }
                        _ => value.typed_int(0),
                    };
                    reply.push(get_response(request.id, variable, &object, value));
                }
                command::SET_SIMULATION => {
                    let path = set_string_value(&request);
                    let result = match variable {
                        var::SAVE_STATE => fs::write(&path, format!("time={}", world.time))
                            .map_err(|e| e.to_string()),
                        var::LOAD_STATE => fs::read_to_string(&path)
                            .map_err(|e| format!("could not load '{path}': {e}"))
                            .map(|state| {
                                if let Some(time) = state.strip_prefix("time=") {
                                    world.time = time.parse().unwrap_or(world.time);
                                }
                                world.vehicles.clear();
                            }),
                        _ => Ok(()),
                    };
                    reply.push(match result {
                        Ok(()) => ok(request.id),
                        Err(message) => err(request.id, &message),
                    });
                }
                command::SET_ROUTE => {
                    world.routes.insert(object);
                    reply.push(ok(request.id));
                }
                command::SET_VEHICLE => match variable {
                    var::ADD_FULL if config.rejected_vehicles.contains(&object) => {
                        reply.push(err(request.id, "Invalid departure"));
                    }
                    var::ADD_FULL => {
                        transcript
                            .lock()
                            .unwrap()
                            .insertions
                            .push(insertion_fields(&request));
                        world.vehicles.insert(object);
                        reply.push(ok(request.id));
                    }
                    var::REMOVE => {
                        world.vehicles.remove(&object);
                        reply.push(ok(request.id));
                    }
                    _ if world.vehicles.contains(&object) => reply.push(ok(request.id)),
                    _ => reply.push(err(request.id, &format!("Vehicle '{object}' is not known"))),
                },
                command::GET_VEHICLE => {
                    reply.push(ok(request.id));
                    let mut value = Writer::new();
                    match variable {
                        var::ID_LIST => {
                            let ids: Vec<String> = world.vehicles.iter().cloned().collect();
                            value.typed_string_list(&ids);
                        }
                        var::POSITION => {
                            value.u8(0x01).f64(120.5).f64(-3.25);
                        }
                        var::LANE_ID => {
                            value.typed_string("151884974#0_0");
                        }
                        _ => {
                            value.typed_double(1.5);
                        }
                    }
                    reply.push(get_response(request.id, variable, &object, value));
                }
                command::GET_INDUCTION_LOOP => {
                    reply.push(ok(request.id));
                    let mut value = Writer::new();
                    match (variable, &config.detector_entry) {
                        (var::LAST_STEP_VEHICLE_DATA, Some((vehicle, entry, _))) => {
                            value
                                .compound(6)
                                .typed_int(1)
                                .typed_string(vehicle)
                                .typed_double(5.0)
                                .typed_double(*entry)
                                .typed_double(-1.0)
                                .typed_string("DEFAULT_VEHTYPE");
                        }
                        (var::LAST_STEP_VEHICLE_DATA, None) => {
                            value.compound(1).typed_int(0);
                        }
                        (var::LAST_STEP_MEAN_SPEED, entry) => {
                            value.typed_double(entry.as_ref().map_or(-1.0, |e| e.2));
                        }
                        (_, entry) => {
                            let ids: Vec<String> =
                                entry.iter().map(|(vehicle, _, _)| vehicle.clone()).collect();
                            value.typed_string_list(&ids);
                        }
                    }
                    reply.push(get_response(request.id, variable, &object, value));
                }
                _ => reply.push(err(request.id, "unsupported")),
            }
        }
        let mut message = encode_message(&reply);
        if !raw_tail.is_empty() {
            message.extend_from_slice(&raw_tail);
            let total = message.len() as i32;
            message[..4].copy_from_slice(&total.to_be_bytes());
        }
        if stream.write_all(&message).is_err() || closing {
            return;
        }
    }
}

fn request_target(request: &ResponseCommand) -> (u8, String) {
    if request.payload.is_empty()
        || matches!(request.id, command::SIMULATION_STEP | command::CLOSE | command::GET_VERSION)
    {
        return (0, String::new());
    }
    let mut reader = Reader::new(&request.payload);
    let variable = reader.u8().unwrap_or(0);
    let object = reader.string().unwrap_or_default();
    (variable, object)
}

/// The twelve string fields of an `ADD_FULL` compound.
fn insertion_fields(request: &ResponseCommand) -> Vec<String> {
    let mut reader = Reader::new(&request.payload);
    let _ = reader.u8();
    let _ = reader.string();
    let _ = reader.compound();
    (0..12).map_while(|_| reader.typed_string().ok()).collect()
}

fn conversion_position(request: &ResponseCommand) -> (f64, f64) {
    let mut reader = Reader::new(&request.payload);
    let _ = reader.u8();
    let _ = reader.string();
    let _ = reader.compound();
    reader.typed_position().unwrap_or((0.0, 0.0))
}

fn set_string_value(request: &ResponseCommand) -> String {
    let mut reader = Reader::new(&request.payload);
    let _ = reader.u8();
    let _ = reader.string();
    reader.typed_string().unwrap_or_default()
}

fn ok(id: u8) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.u8(status::OK).string("");
    encode_command(id, &payload.into_bytes())
}

fn err(id: u8, message: &str) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.u8(status::ERR).string(message);
    encode_command(id, &payload.into_bytes())
}

fn get_response(domain: u8, variable: u8, object: &str, value: Writer) -> Vec<u8> {
    let mut payload = Writer::new();
    payload.u8(variable).string(object);
    let mut bytes = payload.into_bytes();
    bytes.extend_from_slice(&value.into_bytes());
    encode_command(command::response_to(domain), &bytes)
}
