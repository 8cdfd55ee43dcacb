//! Serial port enumeration
//!
//! Lists the host's serial-capable devices with their USB metadata and
//! filters them down to ports that can plausibly host a supported board.

use serde::{Deserialize, Serialize};
use serialport::{SerialPortInfo, SerialPortType};

/// USB vendor/product ids of supported board hardware.
///
/// Ports whose descriptor does not match one of these pairs are never
/// probed for an identity.
pub const SUPPORTED_VID_PIDS: &[(u16, u16)] = &[
    (0x1BDA, 0x0010), // Power board v4
    (0x0403, 0x6001), // Motor board v4 (FTDI bridge)
    (0x1BDA, 0x0011), // Servo board v4
    (0x2341, 0x0043), // Arduino Uno rev 3
    (0x2A03, 0x0043), // Arduino Uno rev 3
    (0x1A86, 0x7523), // Uno clone
    (0x10C4, 0xEA60), // Ruggeduino
    (0x16D0, 0x0613), // Ruggeduino
];

/// A discovered serial endpoint, valid for one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// System path (e.g. "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor id (if USB device)
    pub vid: Option<u16>,

    /// USB product id (if USB device)
    pub pid: Option<u16>,

    /// Serial number from the USB descriptor (if available)
    pub serial_number: Option<String>,
}

impl PortDescriptor {
    /// Whether this port's USB identity is on the allow-list
    pub fn matches(&self, allowed: &[(u16, u16)]) -> bool {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => allowed.contains(&(vid, pid)),
            _ => false,
        }
    }
}

impl From<SerialPortInfo> for PortDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.serial_number)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            serial_number,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all serial ports currently visible to the OS, in deterministic
/// order. Each call performs a fresh OS query.
pub fn scan() -> Vec<PortDescriptor> {
    let mut ports: Vec<PortDescriptor> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortDescriptor::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}
