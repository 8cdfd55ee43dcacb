//! Simulated boards
//!
//! In-memory board firmware speaking the real line protocol, plus a
//! [`DiscoveryBackend`] over a configurable set of simulated ports.
//! Lets the discovery and session machinery run, and be tested, without
//! any hardware attached.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

use crate::error::CommsError;
use crate::identity::BoardType;
use crate::ports::PortDescriptor;
use crate::registry::{DiscoveryBackend, DiscoveryConfig};
use crate::transport::Transport;

const ERR_UNKNOWN_VERB: u16 = 1;
const ERR_BAD_ARGS: u16 = 2;

struct SimState {
    manufacturer: String,
    type_token: String,
    serial_id: String,
    firmware_version: String,
    motors: [f64; 2],
    outputs: [bool; 6],
    servos: [f64; 12],
    start_pressed: bool,
    /// When false the firmware goes silent (reads time out)
    responsive: bool,
    /// When true the port behaves as physically removed
    unplugged: bool,
}

/// Handle to one simulated board.
///
/// Clones share state, so a test can keep a handle while the transport
/// lives inside a session, then flip switches mid-flight.
#[derive(Clone)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    pub fn new(board_type: BoardType, serial_id: &str) -> Self {
        let type_token = match board_type {
            BoardType::Power => "PBv4B",
            BoardType::Motor => "MCv4B",
            BoardType::Servo => "SBv4B",
            BoardType::Arduino => "SRduino",
        };
        Self {
            state: Arc::new(Mutex::new(SimState {
                manufacturer: "Student Robotics".to_string(),
                type_token: type_token.to_string(),
                serial_id: serial_id.to_string(),
                firmware_version: "4.4".to_string(),
                motors: [0.0; 2],
                outputs: [false; 6],
                servos: [0.0; 12],
                start_pressed: false,
                responsive: true,
                unplugged: false,
            })),
        }
    }

    /// Report an arbitrary type token, for exercising rejection paths
    pub fn with_type_token(self, token: &str) -> Self {
        self.lock().type_token = token.to_string();
        self
    }

    /// Simulate the operator pressing the start button
    pub fn press_start(&self) {
        self.lock().start_pressed = true;
    }

    /// Make the firmware stop answering (port stays present)
    pub fn set_responsive(&self, responsive: bool) {
        self.lock().responsive = responsive;
    }

    /// Simulate physically pulling the cable
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    pub fn motor_power(&self, motor: usize) -> f64 {
        self.lock().motors[motor]
    }

    pub fn output(&self, output: usize) -> bool {
        self.lock().outputs[output]
    }

    pub fn servo_position(&self, servo: usize) -> f64 {
        self.lock().servos[servo]
    }

    /// A fresh transport attached to this board's firmware
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(SimTransport {
            state: Arc::clone(&self.state),
            pending: VecDeque::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SimTransport {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<Vec<u8>>,
}

impl SimTransport {
    fn gone() -> CommsError {
        CommsError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "simulated port removed",
        ))
    }
}

impl Transport for SimTransport {
    fn write_line(&mut self, line: &[u8]) -> Result<(), CommsError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unplugged {
            return Err(Self::gone());
        }
        if !state.responsive {
            // Firmware hung: accept the bytes, never answer
            return Ok(());
        }
        if let Some(response) = state.respond(line) {
            self.pending.push_back(response);
        }
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, CommsError> {
        if self.state.lock().unwrap_or_else(PoisonError::into_inner).unplugged {
            return Err(Self::gone());
        }
        self.pending.pop_front().ok_or(CommsError::Timeout)
    }

    fn drain(&mut self) -> Result<(), CommsError> {
        if self.state.lock().unwrap_or_else(PoisonError::into_inner).unplugged {
            return Err(Self::gone());
        }
        self.pending.clear();
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), CommsError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unplugged {
            Err(CommsError::PortUnavailable(
                "simulated port removed".to_string(),
            ))
        } else {
            self.pending.clear();
            Ok(())
        }
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

impl SimState {
    /// Execute one request line and produce the firmware's response
    fn respond(&mut self, line: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(line).ok()?;
        let text = text.trim_end_matches(['\r', '\n']);
        let body = text.strip_prefix('*')?;
        let (verb, args_text) = match body.split_once(':') {
            Some((verb, args)) => (verb, args),
            None => (body, ""),
        };
        let args: Vec<&str> = if args_text.is_empty() {
            Vec::new()
        } else {
            args_text.split(',').collect()
        };

        let response = match verb {
            "IDN" => format!(
                "+{},{},{},{}",
                self.manufacturer, self.type_token, self.serial_id, self.firmware_version
            ),
            "STATUS" => {
                // Battery input voltage in millivolts with sensor jitter
                let jitter: i32 = rand::thread_rng().gen_range(-200..=200);
                format!("+{}", 12_100 + jitter)
            }
            "BTN" => format!("+{}", u8::from(self.start_pressed)),
            "MOT" => match parse_indexed_float(&args, self.motors.len()) {
                Some((motor, power)) if (-1.0..=1.0).contains(&power) => {
                    self.motors[motor] = power;
                    "+".to_string()
                }
                _ => error_line(ERR_BAD_ARGS),
            },
            "SRV" => match parse_indexed_float(&args, self.servos.len()) {
                Some((servo, position)) if (-1.0..=1.0).contains(&position) => {
                    self.servos[servo] = position;
                    "+".to_string()
                }
                _ => error_line(ERR_BAD_ARGS),
            },
            "OUT" => {
                let parsed = match args.as_slice() {
                    [index, flag] => index
                        .parse::<usize>()
                        .ok()
                        .filter(|i| *i < self.outputs.len())
                        .zip(match *flag {
                            "1" => Some(true),
                            "0" => Some(false),
                            _ => None,
                        }),
                    _ => None,
                };
                match parsed {
                    Some((index, on)) => {
                        self.outputs[index] = on;
                        "+".to_string()
                    }
                    None => error_line(ERR_BAD_ARGS),
                }
            }
            "BUZZ" => match args.as_slice() {
                [freq, duration]
                    if freq.parse::<u32>().is_ok() && duration.parse::<u32>().is_ok() =>
                {
                    "+".to_string()
                }
                _ => error_line(ERR_BAD_ARGS),
            },
            _ => error_line(ERR_UNKNOWN_VERB),
        };

        Some(format!("{response}\n").into_bytes())
    }
}

fn parse_indexed_float(args: &[&str], bound: usize) -> Option<(usize, f64)> {
    match args {
        [index, value] => {
            let index = index.parse::<usize>().ok().filter(|i| *i < bound)?;
            let value = value.parse::<f64>().ok()?;
            Some((index, value))
        }
        _ => None,
    }
}

fn error_line(code: u16) -> String {
    format!("-{code}")
}

/// Discovery backend over a mutable set of simulated ports.
///
/// Clones share the port table, so a test can hand one clone to the
/// registry and keep another to plug and unplug ports between scans.
#[derive(Default, Clone)]
pub struct SimBackend {
    ports: Arc<Mutex<Vec<(PortDescriptor, SimBoard)>>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a simulated board behind a named port
    pub fn add_port(&self, name: &str, vid: u16, pid: u16, board: SimBoard) {
        let descriptor = PortDescriptor {
            name: name.to_string(),
            vid: Some(vid),
            pid: Some(pid),
            serial_number: Some(board.lock().serial_id.clone()),
        };
        self.lock().push((descriptor, board));
    }

    /// Remove a port, as if the cable was pulled between scans
    pub fn remove_port(&self, name: &str) {
        self.lock().retain(|(descriptor, _)| descriptor.name != name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(PortDescriptor, SimBoard)>> {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiscoveryBackend for SimBackend {
    fn scan(&self) -> Vec<PortDescriptor> {
        self.lock()
            .iter()
            .map(|(descriptor, _)| descriptor.clone())
            .collect()
    }

    fn open(
        &self,
        port: &PortDescriptor,
        _config: &DiscoveryConfig,
    ) -> Result<Box<dyn Transport>, CommsError> {
        let ports = self.lock();
        let board = ports
            .iter()
            .find(|(descriptor, _)| descriptor.name == port.name)
            .map(|(_, board)| board)
            .ok_or_else(|| CommsError::PortUnavailable(format!("{}: no such port", port.name)))?;
        if board.lock().unplugged {
            return Err(CommsError::PortUnavailable(format!(
                "{}: no such port",
                port.name
            )));
        }
        Ok(board.transport())
    }
}
