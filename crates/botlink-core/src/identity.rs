//! Board identity resolution
//!
//! A freshly opened transport is not yet known to host a board at all.
//! The resolver sends the fixed `*IDN` query and maps the response onto a
//! typed identity; anything that does not answer the query correctly is
//! rejected. Rejection is the expected outcome for most unrelated serial
//! devices and never aborts a wider scan.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{self, Value, ValueKind};
use crate::error::CommsError;
use crate::transport::Transport;

/// The identity query verb sent to every candidate
pub const IDENTITY_VERB: &str = "IDN";

const IDENTITY_SCHEMA: [ValueKind; 4] = [
    ValueKind::Str, // manufacturer
    ValueKind::Str, // board type token
    ValueKind::Str, // serial id / asset tag
    ValueKind::Str, // firmware version
];

/// The kind of board a device identified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardType {
    Power,
    Motor,
    Servo,
    Arduino,
}

impl BoardType {
    /// Map the firmware's type token onto a board type.
    ///
    /// Tokens follow the firmware naming scheme: `PBv4B`, `MCv4B`,
    /// `SBv4B`, and `SR*` for Arduino firmwares.
    fn from_token(token: &str) -> Option<Self> {
        if token.starts_with("PB") {
            Some(BoardType::Power)
        } else if token.starts_with("MC") {
            Some(BoardType::Motor)
        } else if token.starts_with("SB") {
            Some(BoardType::Servo)
        } else if token.starts_with("SR") || token.starts_with("Arduino") {
            Some(BoardType::Arduino)
        } else {
            None
        }
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoardType::Power => "power board",
            BoardType::Motor => "motor board",
            BoardType::Servo => "servo board",
            BoardType::Arduino => "Arduino",
        };
        f.write_str(name)
    }
}

/// The resolved identity of one physical board.
///
/// The serial id is globally unique per physical board and is the
/// primary key for deduplication in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardIdentity {
    pub manufacturer: String,
    pub board_type: BoardType,
    pub serial_id: String,
    pub firmware_version: String,
}

/// Query an opened transport for its identity.
///
/// Returns [`CommsError::Timeout`] if nothing answers within `timeout`,
/// and [`CommsError::UnrecognizedDevice`] if whatever answered does not
/// speak the identity grammar or reports an unknown board type.
pub fn identify(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<BoardIdentity, CommsError> {
    let request = codec::encode(IDENTITY_VERB, &[])?;
    transport.drain()?;
    transport.write_line(&request)?;
    let line = transport.read_line(timeout)?;

    let fields = match codec::decode(&line, &IDENTITY_SCHEMA) {
        Ok(fields) => fields,
        Err(err) => {
            debug!(?err, "candidate failed the identity grammar");
            return Err(CommsError::UnrecognizedDevice);
        }
    };

    let mut strings = fields.into_iter().map(|v| match v {
        Value::Str(s) => s,
        // IDENTITY_SCHEMA is all-string, so decode only yields Str here
        _ => unreachable!("identity schema is all strings"),
    });
    let manufacturer = strings.next().unwrap_or_default();
    let type_token = strings.next().unwrap_or_default();
    let serial_id = strings.next().unwrap_or_default();
    let firmware_version = strings.next().unwrap_or_default();

    let Some(board_type) = BoardType::from_token(&type_token) else {
        debug!(%type_token, "device reported an unsupported board type");
        return Err(CommsError::UnrecognizedDevice);
    };
    if serial_id.is_empty() {
        return Err(CommsError::UnrecognizedDevice);
    }

    Ok(BoardIdentity {
        manufacturer,
        board_type,
        serial_id,
        firmware_version,
    })
}
