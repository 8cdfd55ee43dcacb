//! Typed command surfaces for each board type
//!
//! Thin wrappers that drive a [`BoardSession`](crate::session::BoardSession)
//! with the command schema of one board type. Which schema applies is
//! fixed by the session's resolved [`BoardType`](crate::identity::BoardType);
//! a wrapper refuses to attach to a session of the wrong type.

mod motor;
mod power;
mod servo;

pub use motor::MotorBoard;
pub use power::PowerBoard;
pub use servo::ServoBoard;

use std::sync::Arc;

use crate::error::CommsError;
use crate::identity::BoardType;
use crate::session::BoardSession;

fn check_board_type(session: &Arc<BoardSession>, expected: BoardType) -> Result<(), CommsError> {
    let actual = session.identity().board_type;
    if actual == expected {
        Ok(())
    } else {
        Err(CommsError::Protocol(format!(
            "expected a {expected}, session {} is a {actual}",
            session.serial_id()
        )))
    }
}
