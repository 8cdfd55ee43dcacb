//! Power board commands

use std::sync::Arc;

use crate::codec::{Value, ValueKind};
use crate::error::CommsError;
use crate::identity::BoardType;
use crate::session::BoardSession;

/// Number of switchable power outputs
pub const OUTPUT_COUNT: u8 = 6;

/// Typed command surface for a power board
pub struct PowerBoard {
    session: Arc<BoardSession>,
}

impl PowerBoard {
    /// Wrap a session that identified as a power board
    pub fn new(session: Arc<BoardSession>) -> Result<Self, CommsError> {
        super::check_board_type(&session, BoardType::Power)?;
        Ok(Self { session })
    }

    /// Switch one power output on or off
    pub fn set_output(&self, output: u8, on: bool) -> Result<(), CommsError> {
        if output >= OUTPUT_COUNT {
            return Err(CommsError::Protocol(format!(
                "output {output} out of range (0..{OUTPUT_COUNT})"
            )));
        }
        self.session
            .call("OUT", &[Value::Int(output.into()), Value::Bool(on)], &[])?;
        Ok(())
    }

    /// Enable every output, so downstream boards power up and can be
    /// enumerated
    pub fn power_on(&self) -> Result<(), CommsError> {
        for output in 0..OUTPUT_COUNT {
            self.set_output(output, true)?;
        }
        Ok(())
    }

    /// Sound the piezo buzzer
    pub fn buzz(&self, frequency_hz: u32, duration_ms: u32) -> Result<(), CommsError> {
        self.session.call(
            "BUZZ",
            &[
                Value::Int(frequency_hz.into()),
                Value::Int(duration_ms.into()),
            ],
            &[],
        )?;
        Ok(())
    }

    /// Whether the physical start button has been pressed
    pub fn start_button_pressed(&self) -> Result<bool, CommsError> {
        let values = self.session.call("BTN", &[], &[ValueKind::Bool])?;
        match values.first() {
            Some(Value::Bool(pressed)) => Ok(*pressed),
            _ => Err(CommsError::Protocol(
                "start button response missing flag".to_string(),
            )),
        }
    }

    /// Battery input voltage in volts
    pub fn input_voltage(&self) -> Result<f64, CommsError> {
        let values = self.session.call("STATUS", &[], &[ValueKind::Int])?;
        match values.first() {
            Some(Value::Int(millivolts)) => Ok(*millivolts as f64 / 1000.0),
            _ => Err(CommsError::Protocol(
                "status response missing voltage".to_string(),
            )),
        }
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<BoardSession> {
        &self.session
    }
}
