//! Motor board commands

use std::sync::Arc;

use crate::codec::Value;
use crate::error::CommsError;
use crate::identity::BoardType;
use crate::session::BoardSession;

/// Number of motor channels on the board
pub const MOTOR_COUNT: u8 = 2;

/// Typed command surface for a motor board
pub struct MotorBoard {
    session: Arc<BoardSession>,
}

impl MotorBoard {
    /// Wrap a session that identified as a motor board
    pub fn new(session: Arc<BoardSession>) -> Result<Self, CommsError> {
        super::check_board_type(&session, BoardType::Motor)?;
        Ok(Self { session })
    }

    /// Set a motor's output power, -1.0 (full reverse) to 1.0 (full
    /// forward)
    pub fn set_power(&self, motor: u8, power: f64) -> Result<(), CommsError> {
        if motor >= MOTOR_COUNT {
            return Err(CommsError::Protocol(format!(
                "motor {motor} out of range (0..{MOTOR_COUNT})"
            )));
        }
        if !(-1.0..=1.0).contains(&power) {
            return Err(CommsError::Protocol(format!(
                "motor power {power} outside -1.0..=1.0"
            )));
        }
        self.session
            .call("MOT", &[Value::Int(motor.into()), Value::Float(power)], &[])?;
        Ok(())
    }

    /// Stop a motor
    pub fn brake(&self, motor: u8) -> Result<(), CommsError> {
        self.set_power(motor, 0.0)
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<BoardSession> {
        &self.session
    }
}
