//! Board registry
//!
//! The top-level coordinator: runs enumeration, resolves identities,
//! owns one session per unique board, and hands out sessions by serial
//! id or board type. Hot-plug is handled by polling: callers decide
//! when to `refresh()`, and the observable state transitions are the
//! same as an event-driven design would produce.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::CommsError;
use crate::identity::{identify, BoardIdentity, BoardType};
use crate::ports::{self, PortDescriptor, SUPPORTED_VID_PIDS};
use crate::session::{BoardSession, SessionConfig};
use crate::transport::{SerialTransport, Transport};

/// Discovery configuration.
///
/// The numeric defaults are tuning placeholders, not protocol constants;
/// baud rate and timeouts are configuration inputs by design.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Baud rate used for every board transport
    pub baud_rate: u32,

    /// How long an identification probe waits for the `*IDN` response
    pub identify_timeout: Duration,

    /// Per-session call tuning
    pub session: SessionConfig,

    /// Upper bound on concurrent identification probes
    pub max_probes: usize,

    /// (vendor id, product id) pairs eligible for probing
    pub allowed_ids: Vec<(u16, u16)>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            identify_timeout: Duration::from_secs(1),
            session: SessionConfig::default(),
            max_probes: 8,
            allowed_ids: SUPPORTED_VID_PIDS.to_vec(),
        }
    }
}

/// Source of candidate ports and transports.
///
/// The seam that separates the registry's coordination logic from the
/// host OS: production code uses [`SerialBackend`], tests substitute
/// simulated hardware.
pub trait DiscoveryBackend: Send + Sync {
    /// Fresh enumeration of currently visible ports
    fn scan(&self) -> Vec<PortDescriptor>;

    /// Open an exclusive transport to one candidate port
    fn open(
        &self,
        port: &PortDescriptor,
        config: &DiscoveryConfig,
    ) -> Result<Box<dyn Transport>, CommsError>;
}

/// Backend over the host's real serial ports
#[derive(Debug, Default)]
pub struct SerialBackend;

impl DiscoveryBackend for SerialBackend {
    fn scan(&self) -> Vec<PortDescriptor> {
        ports::scan()
    }

    fn open(
        &self,
        port: &PortDescriptor,
        config: &DiscoveryConfig,
    ) -> Result<Box<dyn Transport>, CommsError> {
        Ok(Box::new(SerialTransport::open(port, config.baud_rate)?))
    }
}

/// Outcome of one `refresh()` pass
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Identities of newly connected boards
    pub added: Vec<BoardIdentity>,

    /// Serial ids of sessions evicted because their port vanished or
    /// the session had closed
    pub evicted: Vec<String>,

    /// Identities that resolved to a serial id already owned by a live
    /// session. The first resolution wins; these were dropped.
    pub duplicates: Vec<BoardIdentity>,

    /// Port names probed this pass that did not yield a supported board
    pub rejected: Vec<String>,
}

/// Owns every live [`BoardSession`], keyed by serial id.
///
/// The registry is an explicitly constructed value, passed to whoever
/// needs it; there is no process-global board table. Sessions are only
/// reachable through it, and raw transports are never aliased out.
pub struct BoardRegistry {
    backend: Box<dyn DiscoveryBackend>,
    config: DiscoveryConfig,
    table: Mutex<HashMap<String, Arc<BoardSession>>>,
}

impl BoardRegistry {
    /// Create a registry over an arbitrary backend
    pub fn new(backend: Box<dyn DiscoveryBackend>, config: DiscoveryConfig) -> Self {
        Self {
            backend,
            config,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry over the host's serial ports
    pub fn with_serial_ports(config: DiscoveryConfig) -> Self {
        Self::new(Box::new(SerialBackend), config)
    }

    /// Re-enumerate hardware and reconcile the session table.
    ///
    /// Already-connected sessions whose port is still present are left
    /// untouched (no spurious reconnects); sessions whose port vanished
    /// are closed and evicted; new candidates are identified concurrently
    /// across distinct ports, and one session is created per previously
    /// unseen serial id. A misbehaving candidate only costs itself, since
    /// failures are isolated per port.
    pub fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        let candidates: Vec<PortDescriptor> = self
            .backend
            .scan()
            .into_iter()
            .filter(|p| p.matches(&self.config.allowed_ids))
            .collect();
        let present: HashSet<&str> = candidates.iter().map(|p| p.name.as_str()).collect();
        debug!(candidates = candidates.len(), "discovery scan complete");

        // Evict first, under a brief critical section, so a board that
        // moved ports can reconnect within the same pass.
        {
            let mut table = self.lock();
            table.retain(|serial_id, session| {
                let keep = session.is_live() && present.contains(session.port_name());
                if !keep {
                    session.close();
                    info!(serial_id, port = session.port_name(), "evicting session");
                    report.evicted.push(serial_id.clone());
                }
                keep
            });
        }

        // Only probe ports not already bound to a live session.
        let bound: HashSet<String> = {
            let table = self.lock();
            table.values().map(|s| s.port_name().to_string()).collect()
        };
        let probe_list: Vec<&PortDescriptor> = candidates
            .iter()
            .filter(|p| !bound.contains(&p.name))
            .collect();

        // Identification probes each block on their own I/O timeout, so
        // running them in parallel bounds a whole pass to roughly one
        // timeout period instead of one per candidate.
        let mut resolved: Vec<(&PortDescriptor, BoardIdentity, Box<dyn Transport>)> = Vec::new();
        for chunk in probe_list.chunks(self.config.max_probes.max(1)) {
            std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&port| {
                        let backend = self.backend.as_ref();
                        let config = &self.config;
                        scope.spawn(move || probe(backend, config, port))
                    })
                    .collect();

                for (&port, handle) in chunk.iter().zip(handles) {
                    match handle.join() {
                        Ok(Ok((identity, transport))) => {
                            resolved.push((port, identity, transport));
                        }
                        Ok(Err(err)) => {
                            if err.indicates_disconnect() {
                                // Lost a race with a physical unplug;
                                // the candidate simply vanished.
                                debug!(port = %port.name, error = %err, "candidate vanished");
                            } else {
                                debug!(port = %port.name, error = %err, "candidate rejected");
                                report.rejected.push(port.name.clone());
                            }
                        }
                        Err(_) => {
                            warn!(port = %port.name, "identification worker panicked");
                            report.rejected.push(port.name.clone());
                        }
                    }
                }
            });
        }

        // Merge under a brief critical section; in-flight calls on
        // existing sessions are never touched.
        let mut table = self.lock();
        for (port, identity, mut transport) in resolved {
            match table.get(&identity.serial_id) {
                Some(existing) if existing.is_live() => {
                    warn!(
                        serial_id = %identity.serial_id,
                        first = existing.port_name(),
                        second = %port.name,
                        "duplicate identity; keeping the first session"
                    );
                    transport.close();
                    report.duplicates.push(identity);
                }
                _ => {
                    info!(
                        board = %identity.board_type,
                        serial_id = %identity.serial_id,
                        firmware = %identity.firmware_version,
                        port = %port.name,
                        "found board"
                    );
                    let session = Arc::new(BoardSession::new(
                        identity.clone(),
                        port.name.clone(),
                        transport,
                        self.config.session,
                    ));
                    table.insert(identity.serial_id.clone(), session);
                    report.added.push(identity);
                }
            }
        }

        report
    }

    /// Look up a live session by serial id
    pub fn get(&self, serial_id: &str) -> Result<Arc<BoardSession>, CommsError> {
        self.lock()
            .get(serial_id)
            .filter(|s| s.is_live())
            .cloned()
            .ok_or_else(|| CommsError::NotFound(serial_id.to_string()))
    }

    /// All live sessions of a given board type, in stable serial-id order
    pub fn by_type(&self, board_type: BoardType) -> Vec<Arc<BoardSession>> {
        let mut sessions: Vec<Arc<BoardSession>> = self
            .lock()
            .values()
            .filter(|s| s.is_live() && s.identity().board_type == board_type)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.serial_id().cmp(b.serial_id()));
        sessions
    }

    /// The session for a board type of which exactly one must be
    /// connected
    pub fn singular(&self, board_type: BoardType) -> Result<Arc<BoardSession>, CommsError> {
        let mut sessions = self.by_type(board_type);
        match sessions.len() {
            1 => Ok(sessions.remove(0)),
            0 => Err(CommsError::NotFound(board_type.to_string())),
            n => Err(CommsError::NotFound(format!(
                "expected exactly one {board_type}, found {n}"
            ))),
        }
    }

    /// Serial ids of every live session, sorted
    pub fn serial_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .values()
            .filter(|s| s.is_live())
            .map(|s| s.serial_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().values().filter(|s| s.is_live()).count()
    }

    /// Whether no boards are currently connected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session and release all transports
    pub fn close_all(&self) {
        let mut table = self.lock();
        for session in table.values() {
            session.close();
        }
        table.clear();
        info!("registry torn down");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<BoardSession>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BoardRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Open and identify one candidate port
fn probe(
    backend: &dyn DiscoveryBackend,
    config: &DiscoveryConfig,
    port: &PortDescriptor,
) -> Result<(BoardIdentity, Box<dyn Transport>), CommsError> {
    let mut transport = backend.open(port, config)?;
    match identify(transport.as_mut(), config.identify_timeout) {
        Ok(identity) => Ok((identity, transport)),
        Err(err) => {
            transport.close();
            Err(err)
        }
    }
}
