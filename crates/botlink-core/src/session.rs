//! Board sessions
//!
//! A session turns one raw transport into a reliable typed call surface:
//! it serializes callers, retries transient failures, and tracks the
//! connection state of the board on the other end.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::{self, Value, ValueKind};
use crate::error::CommsError;
use crate::identity::BoardIdentity;
use crate::transport::Transport;

/// The cheap status query used by [`BoardSession::heartbeat`]
pub const STATUS_VERB: &str = "STATUS";

const STATUS_SCHEMA: [ValueKind; 1] = [ValueKind::Int];

/// Per-session tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long a single read waits for the response line
    pub read_timeout: Duration,

    /// Total attempts per call, counting the first one.
    ///
    /// Only transient failures (timeouts, I/O errors) are retried.
    pub max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

/// Connection state of a session.
///
/// A session is Connecting whenever its transport has been (re)opened
/// without a confirmed exchange yet; success promotes it to Connected,
/// repeated failure degrades it, and Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport open, first exchange not yet confirmed
    Connecting,
    /// Responding normally
    Connected,
    /// Recent exchanges failed but the port is still present
    Degraded,
    /// Transport gone; the registry evicts the session on next refresh
    Closed,
}

struct Inner {
    transport: Box<dyn Transport>,
    state: SessionState,
    last_activity: Instant,
    config: SessionConfig,
}

/// A live communication binding to one physical board.
///
/// The underlying transport is owned exclusively; concurrent callers are
/// serialized so each observes the response to its own request. The wire
/// protocol has no request tagging, so interleaving would cross-talk.
pub struct BoardSession {
    identity: BoardIdentity,
    port_name: String,
    inner: Mutex<Inner>,
}

impl BoardSession {
    /// Create a session over a transport whose identity has already been
    /// resolved. The session starts Connected: identification itself was
    /// a successful exchange on this transport.
    pub fn new(
        identity: BoardIdentity,
        port_name: String,
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            port_name,
            inner: Mutex::new(Inner {
                transport,
                state: SessionState::Connected,
                last_activity: Instant::now(),
                config,
            }),
        }
    }

    /// The resolved identity of the board behind this session
    pub fn identity(&self) -> &BoardIdentity {
        &self.identity
    }

    /// The board's serial id (the registry key)
    pub fn serial_id(&self) -> &str {
        &self.identity.serial_id
    }

    /// The system path of the port this session is bound to
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Time since the last successful exchange
    pub fn idle_time(&self) -> Duration {
        self.lock().last_activity.elapsed()
    }

    /// Whether the session is still usable (not Closed)
    pub fn is_live(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// Issue a typed command and decode the response against `schema`.
    ///
    /// Timeouts and I/O errors are retried up to the configured attempt
    /// bound, reopening the transport when the port was physically
    /// dropped. Protocol and firmware errors surface immediately. After
    /// exhausting retries the session degrades (port still present) or
    /// closes (device gone) and the last failure is returned.
    pub fn call(
        &self,
        verb: &str,
        args: &[Value],
        schema: &[ValueKind],
    ) -> Result<Vec<Value>, CommsError> {
        self.lock().call(verb, args, schema)
    }

    /// Cheap status probe to distinguish Connected from Degraded without
    /// a full command. Single attempt, never retried.
    pub fn heartbeat(&self) -> Result<(), CommsError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return Err(inner.closed_error(&self.port_name));
        }

        let request = codec::encode(STATUS_VERB, &[])?;
        match inner.exchange(&request, &STATUS_SCHEMA) {
            Ok(_) => {
                inner.note_success();
                Ok(())
            }
            Err(err) if err.is_transient() => {
                inner.note_failure(&err);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Close the underlying transport and mark the session Closed.
    /// Idempotent; used by the registry on eviction and teardown.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.transport.close();
        inner.state = SessionState::Closed;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BoardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("identity", &self.identity)
            .field("port_name", &self.port_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn call(
        &mut self,
        verb: &str,
        args: &[Value],
        schema: &[ValueKind],
    ) -> Result<Vec<Value>, CommsError> {
        if self.state == SessionState::Closed {
            return Err(CommsError::PortUnavailable("session is closed".to_string()));
        }

        let request = codec::encode(verb, args)?;
        let mut last_err = CommsError::Timeout;

        for attempt in 1..=self.config.max_attempts {
            match self.exchange(&request, schema) {
                Ok(values) => {
                    self.note_success();
                    return Ok(values);
                }
                Err(err) if err.is_transient() => {
                    debug!(
                        verb,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "transient failure, retrying"
                    );
                    let dropped = err.indicates_disconnect();
                    last_err = err;
                    if dropped && attempt < self.config.max_attempts {
                        match self.transport.reopen() {
                            // Fresh transport, no exchange confirmed yet
                            Ok(()) => self.state = SessionState::Connecting,
                            Err(reopen_err) => {
                                last_err = reopen_err;
                                break;
                            }
                        }
                    }
                }
                // Retrying a malformed or firmware-rejected exchange
                // cannot self-correct; surface it untouched.
                Err(err) => return Err(err),
            }
        }

        self.note_failure(&last_err);
        Err(last_err)
    }

    /// One drain→encode→write→read→decode round trip.
    ///
    /// Draining first discards any response that arrived after an earlier
    /// attempt gave up, so the line read here was produced for this
    /// request and no other.
    fn exchange(
        &mut self,
        request: &[u8],
        schema: &[ValueKind],
    ) -> Result<Vec<Value>, CommsError> {
        self.transport.drain()?;
        self.transport.write_line(request)?;
        let line = self.transport.read_line(self.config.read_timeout)?;
        codec::decode(&line, schema)
    }

    fn note_success(&mut self) {
        self.last_activity = Instant::now();
        match self.state {
            SessionState::Connecting | SessionState::Degraded => {
                self.state = SessionState::Connected;
            }
            SessionState::Connected | SessionState::Closed => {}
        }
    }

    fn note_failure(&mut self, err: &CommsError) {
        match self.state {
            SessionState::Closed => {}
            _ if err.indicates_disconnect() => {
                warn!(error = %err, "board no longer present, closing session");
                self.transport.close();
                self.state = SessionState::Closed;
            }
            // A session that keeps failing after it already degraded is
            // written off; the registry evicts it on the next refresh.
            SessionState::Degraded => {
                warn!(error = %err, "still unresponsive, closing session");
                self.transport.close();
                self.state = SessionState::Closed;
            }
            _ => {
                warn!(error = %err, "retries exhausted, session degraded");
                self.state = SessionState::Degraded;
            }
        }
    }

    fn closed_error(&self, port_name: &str) -> CommsError {
        CommsError::PortUnavailable(format!("{port_name}: session is closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::BoardType;
    use std::collections::VecDeque;
    use std::sync::Arc;

    fn identity() -> BoardIdentity {
        BoardIdentity {
            manufacturer: "Student Robotics".to_string(),
            board_type: BoardType::Motor,
            serial_id: "MC-001".to_string(),
            firmware_version: "4.4".to_string(),
        }
    }

    /// Transport that replays a fixed script of read outcomes
    struct ScriptedTransport {
        reads: VecDeque<Result<Vec<u8>, CommsError>>,
        reopen_fails: bool,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<Result<Vec<u8>, CommsError>>) -> Self {
            Self {
                reads: reads.into_iter().collect(),
                reopen_fails: false,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn write_line(&mut self, _line: &[u8]) -> Result<(), CommsError> {
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, CommsError> {
            self.reads.pop_front().unwrap_or(Err(CommsError::Timeout))
        }

        // The script models exchange outcomes, not buffer contents
        fn drain(&mut self) -> Result<(), CommsError> {
            Ok(())
        }

        fn reopen(&mut self) -> Result<(), CommsError> {
            if self.reopen_fails {
                Err(CommsError::PortUnavailable("gone".to_string()))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) {}
    }

    fn session(reads: Vec<Result<Vec<u8>, CommsError>>) -> BoardSession {
        BoardSession::new(
            identity(),
            "/dev/ttyACM0".to_string(),
            Box::new(ScriptedTransport::new(reads)),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_two_timeouts_then_success() {
        let session = session(vec![
            Err(CommsError::Timeout),
            Err(CommsError::Timeout),
            Ok(b"+100".to_vec()),
        ]);

        let values = session
            .call("ENC", &[Value::Int(0)], &[ValueKind::Int])
            .unwrap();
        assert_eq!(values, vec![Value::Int(100)]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_retries_bounded_then_degraded() {
        let session = session(vec![]);

        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::Timeout));
        assert_eq!(session.state(), SessionState::Degraded);
    }

    #[test]
    fn test_persistent_timeouts_escalate_to_closed() {
        let session = session(vec![]);

        // First exhaustion degrades, a second with no success in between
        // writes the session off.
        let _ = session.call("ENC", &[], &[ValueKind::Int]);
        assert_eq!(session.state(), SessionState::Degraded);
        let _ = session.call("ENC", &[], &[ValueKind::Int]);
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::PortUnavailable(_)));
    }

    /// Transport with a real input buffer: responses can land in it
    /// after the reader gave up, like bytes sitting in an OS queue
    struct BufferedTransport {
        buffer: Arc<std::sync::Mutex<VecDeque<Vec<u8>>>>,
    }

    impl Transport for BufferedTransport {
        fn write_line(&mut self, _line: &[u8]) -> Result<(), CommsError> {
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, CommsError> {
            self.buffer
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(CommsError::Timeout)
        }

        fn drain(&mut self) -> Result<(), CommsError> {
            self.buffer.lock().unwrap().clear();
            Ok(())
        }

        fn reopen(&mut self) -> Result<(), CommsError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_late_response_never_answers_the_next_call() {
        let buffer = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        let session = BoardSession::new(
            identity(),
            "/dev/ttyACM0".to_string(),
            Box::new(BufferedTransport {
                buffer: Arc::clone(&buffer),
            }),
            SessionConfig {
                max_attempts: 1,
                ..SessionConfig::default()
            },
        );

        // First call gets no answer in time
        let err = session.call("STATUS", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::Timeout));

        // Its response arrives late and sits in the input buffer
        buffer.lock().unwrap().push_back(b"+1".to_vec());

        // The next call must not read the stale line as its own answer
        let result = session.call("BTN", &[], &[ValueKind::Bool]);
        assert!(matches!(result, Err(CommsError::Timeout)));
        assert!(buffer.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reconnects_after_port_drop() {
        let session = session(vec![
            Err(CommsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "device removed",
            ))),
            Ok(b"+7".to_vec()),
        ]);

        // The drop is retried over a reopened transport and the session
        // settles back into Connected once an exchange succeeds.
        let values = session.call("ENC", &[], &[ValueKind::Int]).unwrap();
        assert_eq!(values, vec![Value::Int(7)]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    /// Transport that always times out but counts write attempts
    struct CountingTransport {
        writes: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Transport for CountingTransport {
        fn write_line(&mut self, _line: &[u8]) -> Result<(), CommsError> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, CommsError> {
            Err(CommsError::Timeout)
        }

        fn drain(&mut self) -> Result<(), CommsError> {
            Ok(())
        }

        fn reopen(&mut self) -> Result<(), CommsError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_attempt_count_respects_bound() {
        let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let session = BoardSession::new(
            identity(),
            "/dev/ttyACM0".to_string(),
            Box::new(CountingTransport {
                writes: Arc::clone(&writes),
            }),
            SessionConfig {
                max_attempts: 2,
                ..SessionConfig::default()
            },
        );

        let _ = session.call("ENC", &[], &[ValueKind::Int]);
        // One write per attempt: exactly two, not three
        assert_eq!(writes.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_device_gone_closes_session() {
        let gone = || {
            Err(CommsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "device removed",
            )))
        };
        let mut transport = ScriptedTransport::new(vec![gone(), gone(), gone()]);
        transport.reopen_fails = true;
        let session = BoardSession::new(
            identity(),
            "/dev/ttyACM0".to_string(),
            Box::new(transport),
            SessionConfig::default(),
        );

        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(err.indicates_disconnect());
        assert_eq!(session.state(), SessionState::Closed);

        // Closed is terminal: further calls fail fast
        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::PortUnavailable(_)));
    }

    #[test]
    fn test_protocol_error_not_retried() {
        let session = session(vec![
            Ok(b"not a response".to_vec()),
            Ok(b"+1".to_vec()), // would succeed if (incorrectly) retried
        ]);

        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::Protocol(_)));
        // Protocol errors leave the state alone; the board answered,
        // just not in the expected shape.
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_firmware_error_surfaces_with_code() {
        let session = session(vec![Ok(b"-23".to_vec())]);
        let err = session.call("ENC", &[], &[ValueKind::Int]).unwrap_err();
        assert!(matches!(err, CommsError::Board(23)));
    }

    #[test]
    fn test_heartbeat_recovers_degraded_session() {
        let session = session(vec![
            Err(CommsError::Timeout),
            Err(CommsError::Timeout),
            Err(CommsError::Timeout),
            Ok(b"+12100".to_vec()),
        ]);

        let _ = session.call("ENC", &[], &[ValueKind::Int]);
        assert_eq!(session.state(), SessionState::Degraded);

        session.heartbeat().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    /// Transport that computes each response from the request it saw,
    /// with a deliberate pause to widen any interleaving window.
    struct EchoTransport {
        pending: Option<Vec<u8>>,
    }

    impl Transport for EchoTransport {
        fn write_line(&mut self, line: &[u8]) -> Result<(), CommsError> {
            self.pending = Some(line.to_vec());
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> Result<Vec<u8>, CommsError> {
            std::thread::sleep(Duration::from_millis(5));
            let request = self.pending.take().ok_or(CommsError::Timeout)?;
            let text = String::from_utf8(request)
                .map_err(|_| CommsError::Protocol("bad request".to_string()))?;
            let args = text.trim_end().split_once(':').map(|(_, a)| a).unwrap_or("");
            Ok(format!("+{args}").into_bytes())
        }

        fn drain(&mut self) -> Result<(), CommsError> {
            self.pending = None;
            Ok(())
        }

        fn reopen(&mut self) -> Result<(), CommsError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_concurrent_callers_get_matched_responses() {
        let session = Arc::new(BoardSession::new(
            identity(),
            "/dev/ttyACM0".to_string(),
            Box::new(EchoTransport { pending: None }),
            SessionConfig::default(),
        ));

        let mut handles = Vec::new();
        for i in 0..4i64 {
            let session = Arc::clone(&session);
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    let values = session
                        .call("ECHO", &[Value::Int(i)], &[ValueKind::Int])
                        .unwrap();
                    assert_eq!(values, vec![Value::Int(i)]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
