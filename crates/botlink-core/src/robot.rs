//! Robot facade
//!
//! Bundles the registry, the power-up sequence, and the start gate into
//! the object student code holds. The registry inside is an owned value,
//! not a global: dropping the `Robot` tears every session down.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::boards::{MotorBoard, PowerBoard, ServoBoard};
use crate::error::CommsError;
use crate::identity::BoardType;
use crate::lifecycle::{LifecycleEvent, LifecycleSource};
use crate::registry::{BoardRegistry, DiscoveryBackend, DiscoveryConfig, SerialBackend};

/// Frequency of the "waiting for start" beep (A6)
const START_BEEP_HZ: u32 = 1760;

/// Top-level handle to all connected boards
pub struct Robot {
    registry: BoardRegistry,
    started: bool,
}

impl Robot {
    /// Discover boards on the host's serial ports
    pub fn connect(config: DiscoveryConfig) -> Result<Self, CommsError> {
        Self::with_backend(Box::new(SerialBackend), config)
    }

    /// Discover boards through an arbitrary backend
    pub fn with_backend(
        backend: Box<dyn DiscoveryBackend>,
        config: DiscoveryConfig,
    ) -> Result<Self, CommsError> {
        let registry = BoardRegistry::new(backend, config);
        registry.refresh();

        // Power on the outputs so downstream boards get their 12V and
        // show up on the bus, then scan again to catch them.
        match registry.singular(BoardType::Power).and_then(PowerBoard::new) {
            Ok(power) => {
                power.power_on()?;
                registry.refresh();
            }
            Err(err) => {
                info!(error = %err, "no power board; skipping output power-up");
            }
        }

        let robot = Self {
            registry,
            started: false,
        };
        robot.log_connected_boards();
        Ok(robot)
    }

    fn log_connected_boards(&self) {
        for serial_id in self.registry.serial_ids() {
            if let Ok(session) = self.registry.get(&serial_id) {
                let identity = session.identity();
                info!(board = %identity.board_type, serial_id, "found board");
                debug!(
                    serial_id,
                    firmware = %identity.firmware_version,
                    port = session.port_name(),
                    "board details"
                );
            }
        }
    }

    /// Block until the start signal arrives.
    ///
    /// Accepts either the lifecycle channel's `Started` event or the
    /// power board's physical start button, whichever comes first, and
    /// beeps once so the operator knows the robot is armed.
    pub fn wait_start(&mut self, source: &mut dyn LifecycleSource) -> Result<(), CommsError> {
        let power = self
            .registry
            .singular(BoardType::Power)
            .and_then(PowerBoard::new)
            .ok();

        if let Some(power) = &power {
            if let Err(err) = power.buzz(START_BEEP_HZ, 100) {
                warn!(error = %err, "start beep failed");
            }
        }
        info!("waiting for start signal");

        loop {
            if let Some(power) = &power {
                match power.start_button_pressed() {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, "start button poll failed"),
                }
            }
            match source.next_event(Duration::from_millis(100)) {
                Ok(LifecycleEvent::Started) => break,
                Ok(LifecycleEvent::Stopped) | Err(CommsError::Timeout) => {}
                Err(err) => return Err(err),
            }
        }

        info!("start signal received; continuing");
        self.started = true;
        Ok(())
    }

    /// Whether the start gate has been passed
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The board registry, for refreshes and direct session access
    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    /// The single connected power board
    pub fn power_board(&self) -> Result<PowerBoard, CommsError> {
        self.registry
            .singular(BoardType::Power)
            .and_then(PowerBoard::new)
    }

    /// The single connected motor board
    pub fn motor_board(&self) -> Result<MotorBoard, CommsError> {
        self.registry
            .singular(BoardType::Motor)
            .and_then(MotorBoard::new)
    }

    /// All connected motor boards, in serial-id order
    pub fn motor_boards(&self) -> Vec<MotorBoard> {
        self.registry
            .by_type(BoardType::Motor)
            .into_iter()
            .filter_map(|session| MotorBoard::new(session).ok())
            .collect()
    }

    /// The single connected servo board
    pub fn servo_board(&self) -> Result<ServoBoard, CommsError> {
        self.registry
            .singular(BoardType::Servo)
            .and_then(ServoBoard::new)
    }
}
