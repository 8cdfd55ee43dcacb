//! Communication errors

use thiserror::Error;

/// Errors that can occur while discovering or talking to boards
#[derive(Error, Debug)]
pub enum CommsError {
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Port busy: {0}")]
    PortBusy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for response")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Board reported error code {0}")]
    Board(u16),

    #[error("Device did not identify as a supported board")]
    UnrecognizedDevice,

    #[error("No board found matching '{0}'")]
    NotFound(String),
}

impl CommsError {
    /// Whether retrying the same exchange can plausibly succeed.
    ///
    /// Protocol and firmware errors are excluded: a malformed exchange
    /// cannot self-correct, and a firmware-reported fault must reach the
    /// caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CommsError::Io(_) | CommsError::Timeout)
    }

    /// Whether the error means the port itself has gone away, as opposed
    /// to a transient hiccup on a port that is still present.
    pub fn indicates_disconnect(&self) -> bool {
        match self {
            CommsError::PortUnavailable(_) => true,
            CommsError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
