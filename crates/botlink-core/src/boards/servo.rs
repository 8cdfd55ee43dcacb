//! Servo board commands

use std::sync::Arc;

use crate::codec::Value;
use crate::error::CommsError;
use crate::identity::BoardType;
use crate::session::BoardSession;

/// Number of servo channels on the board
pub const SERVO_COUNT: u8 = 12;

/// Typed command surface for a servo board
pub struct ServoBoard {
    session: Arc<BoardSession>,
}

impl ServoBoard {
    /// Wrap a session that identified as a servo board
    pub fn new(session: Arc<BoardSession>) -> Result<Self, CommsError> {
        super::check_board_type(&session, BoardType::Servo)?;
        Ok(Self { session })
    }

    /// Set a servo's position, -1.0 to 1.0 across its travel
    pub fn set_position(&self, servo: u8, position: f64) -> Result<(), CommsError> {
        if servo >= SERVO_COUNT {
            return Err(CommsError::Protocol(format!(
                "servo {servo} out of range (0..{SERVO_COUNT})"
            )));
        }
        if !(-1.0..=1.0).contains(&position) {
            return Err(CommsError::Protocol(format!(
                "servo position {position} outside -1.0..=1.0"
            )));
        }
        self.session.call(
            "SRV",
            &[Value::Int(servo.into()), Value::Float(position)],
            &[],
        )?;
        Ok(())
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<BoardSession> {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::BoardIdentity;
    use crate::session::SessionConfig;
    use crate::sim::SimBoard;

    #[test]
    fn test_set_position() {
        let sim = SimBoard::new(BoardType::Servo, "SRV-07");
        let session = Arc::new(BoardSession::new(
            BoardIdentity {
                manufacturer: "Student Robotics".to_string(),
                board_type: BoardType::Servo,
                serial_id: "SRV-07".to_string(),
                firmware_version: "4.4".to_string(),
            },
            "sim0".to_string(),
            sim.transport(),
            SessionConfig::default(),
        ));
        let board = ServoBoard::new(session).unwrap();

        board.set_position(3, -0.75).unwrap();
        assert_eq!(sim.servo_position(3), -0.75);

        assert!(board.set_position(3, 2.0).is_err());
        assert!(board.set_position(40, 0.0).is_err());
    }
}
