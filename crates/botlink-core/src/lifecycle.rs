//! Lifecycle signal boundary
//!
//! Startup/shutdown coordination arrives from an external channel (a
//! competition supervisor, a remote start service, a test harness). The
//! core only consumes the event stream; the wire behind it is out of
//! scope.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::CommsError;

/// A system-state event from the lifecycle channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Started,
    Stopped,
}

/// Source of lifecycle events
pub trait LifecycleSource: Send {
    /// Block for the next event, up to `timeout`
    fn next_event(&mut self, timeout: Duration) -> Result<LifecycleEvent, CommsError>;
}

/// Block until the channel signals `Started`.
///
/// Earlier `Stopped` events are discarded; board command issuance is
/// gated on this returning.
pub fn wait_for_start(source: &mut dyn LifecycleSource) -> Result<(), CommsError> {
    info!("waiting for start signal");
    loop {
        match source.next_event(Duration::from_millis(100)) {
            Ok(LifecycleEvent::Started) => {
                info!("start signal received; continuing");
                return Ok(());
            }
            Ok(LifecycleEvent::Stopped) => {
                debug!("ignoring stop signal while waiting for start");
            }
            Err(CommsError::Timeout) => {}
            Err(err) => return Err(err),
        }
    }
}

/// In-process lifecycle channel, for tests and local wiring
pub struct ChannelLifecycle {
    receiver: Receiver<LifecycleEvent>,
}

impl ChannelLifecycle {
    /// Create a channel pair: the sender side publishes events, the
    /// returned source consumes them
    pub fn new() -> (Sender<LifecycleEvent>, Self) {
        let (sender, receiver) = channel();
        (sender, Self { receiver })
    }
}

impl LifecycleSource for ChannelLifecycle {
    fn next_event(&mut self, timeout: Duration) -> Result<LifecycleEvent, CommsError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(CommsError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CommsError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "lifecycle channel closed",
            ))),
        }
    }
}
