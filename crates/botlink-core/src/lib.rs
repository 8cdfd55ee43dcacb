//! # Botlink Core Library
//!
//! Board discovery and communication for student robotics kits.
//!
//! This library provides:
//! - USB serial enumeration with VID/PID filtering
//! - The line-oriented request/response protocol the boards speak
//! - Board identification and a live registry keyed by serial id
//! - Retrying sessions that survive transient faults and detect unplugs
//! - Typed command surfaces for power, motor, and servo boards
//! - An in-process simulator for tests and development without hardware
//!
//! ## Supported boards
//!
//! - Student Robotics power, motor, and servo boards
//! - Arduino-based custom boards running compatible firmware
//!
//! ## Example
//!
//! ```rust,ignore
//! use botlink_core::prelude::*;
//!
//! // Discover everything plugged into the host
//! let robot = Robot::connect(DiscoveryConfig::default())?;
//!
//! // Drive a motor at half power
//! robot.motor_board()?.set_power(0, 0.5)?;
//! ```

pub mod boards;
pub mod codec;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod ports;
pub mod registry;
pub mod robot;
pub mod session;
pub mod sim;
pub mod transport;
pub mod vision;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::boards::{MotorBoard, PowerBoard, ServoBoard};
    pub use crate::error::CommsError;
    pub use crate::identity::{BoardIdentity, BoardType};
    pub use crate::lifecycle::{wait_for_start, LifecycleEvent, LifecycleSource};
    pub use crate::ports::PortDescriptor;
    pub use crate::registry::{BoardRegistry, DiscoveryConfig, RefreshReport};
    pub use crate::robot::Robot;
    pub use crate::session::{BoardSession, SessionConfig, SessionState};
    pub use crate::vision::{Frame, MarkerPose, MarkerSource};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
