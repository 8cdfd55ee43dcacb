//! Transport adapter
//!
//! Wraps a single physical serial channel behind a byte-line interface.
//! A line is the unit of data: reads never return partial lines, and
//! every blocking operation is bounded by a caller-supplied timeout.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::debug;

use crate::error::CommsError;
use crate::ports::PortDescriptor;

/// A byte-line channel to one physical device.
///
/// Implementations hold the channel exclusively: opening the same
/// underlying port twice must fail rather than share state.
pub trait Transport: Send {
    /// Write one complete line (terminator included by the caller)
    fn write_line(&mut self, line: &[u8]) -> Result<(), CommsError>;

    /// Read one complete line, blocking up to `timeout`.
    ///
    /// The line terminator is stripped from the result.
    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, CommsError>;

    /// Discard any buffered input not yet consumed.
    ///
    /// A response that arrived after its caller gave up must never be
    /// read as the answer to a later request.
    fn drain(&mut self) -> Result<(), CommsError>;

    /// Re-establish the channel after the port dropped out from under us
    fn reopen(&mut self) -> Result<(), CommsError>;

    /// Release the OS handle. Idempotent.
    fn close(&mut self);
}

/// Map a serialport open failure onto the error taxonomy.
///
/// An exclusively-locked port surfaces as `PortBusy` so callers can tell
/// "someone else owns this" apart from "the device vanished".
fn map_open_error(port_name: &str, err: serialport::Error) -> CommsError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => {
            CommsError::PortUnavailable(format!("{port_name}: {}", err.description))
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            CommsError::PortBusy(format!("{port_name}: {}", err.description))
        }
        _ if err.description.to_lowercase().contains("busy") => {
            CommsError::PortBusy(format!("{port_name}: {}", err.description))
        }
        _ => CommsError::PortUnavailable(format!("{port_name}: {}", err.description)),
    }
}

/// Transport over a real serial port
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the port described by `descriptor` with an exclusive lock.
    pub fn open(descriptor: &PortDescriptor, baud_rate: u32) -> Result<Self, CommsError> {
        let port = Self::open_raw(&descriptor.name, baud_rate)?;
        debug!(port = %descriptor.name, baud_rate, "opened serial transport");
        Ok(Self {
            port_name: descriptor.name.clone(),
            baud_rate,
            port: Some(port),
        })
    }

    fn open_raw(port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, CommsError> {
        // Standard 8N1 configuration. The short intrinsic timeout keeps
        // individual read() calls responsive; read_line enforces the
        // caller's deadline on top.
        let mut port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| map_open_error(port_name, e))?;

        // Keep DTR asserted so Arduino-style boards are not reset by the
        // open itself; drop any garbage queued before we attached.
        let _ = port.write_data_terminal_ready(true);
        let _ = port.clear(serialport::ClearBuffer::All);
        Ok(port)
    }

    /// The system path of the underlying port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &[u8]) -> Result<(), CommsError> {
        let port = self.port.as_mut().ok_or_else(|| {
            CommsError::PortUnavailable(format!("{}: transport closed", self.port_name))
        })?;
        port.write_all(line)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, CommsError> {
        let port = self.port.as_mut().ok_or_else(|| {
            CommsError::PortUnavailable(format!("{}: transport closed", self.port_name))
        })?;

        let deadline = Instant::now() + timeout;
        let mut line = Vec::with_capacity(32);
        let mut byte = [0u8; 1];

        // Byte-at-a-time keeps us from consuming into the next response;
        // the protocol only ever has one line in flight.
        loop {
            if Instant::now() >= deadline {
                return Err(CommsError::Timeout);
            }

            match port.read(&mut byte) {
                Ok(0) => {
                    return Err(CommsError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "serial port closed mid-read",
                    )));
                }
                Ok(_) => {
                    if byte[0] == b'\n' {
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        return Ok(line);
                    }
                    line.push(byte[0]);
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    // Intrinsic port timeout elapsed with no data; keep
                    // polling until the caller's deadline.
                }
                Err(e) => return Err(CommsError::Io(e)),
            }
        }
    }

    fn drain(&mut self) -> Result<(), CommsError> {
        let port = self.port.as_mut().ok_or_else(|| {
            CommsError::PortUnavailable(format!("{}: transport closed", self.port_name))
        })?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| CommsError::Io(e.into()))?;
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), CommsError> {
        self.port = None;
        self.port = Some(Self::open_raw(&self.port_name, self.baud_rate)?);
        debug!(port = %self.port_name, "reopened serial transport");
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "closed serial transport");
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
