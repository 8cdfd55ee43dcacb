//! Board Discovery Demo
//!
//! Runs the full discovery pipeline against simulated hardware: scans,
//! identifies, drives a motor and the power outputs, then pulls a cable
//! and shows the registry reconciling. No boards required.
//!
//! Usage:
//!   cargo run --example discover

use botlink_core::identity::BoardType;
use botlink_core::prelude::*;
use botlink_core::registry::BoardRegistry;
use botlink_core::sim::{SimBackend, SimBoard};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botlink_core=debug".into()),
        )
        .init();

    let backend = SimBackend::new();
    let power = SimBoard::new(BoardType::Power, "PWR-49");
    let motor = SimBoard::new(BoardType::Motor, "MC-001");
    backend.add_port("/dev/ttyACM0", 0x1BDA, 0x0010, power.clone());
    backend.add_port("/dev/ttyACM1", 0x0403, 0x6001, motor);
    backend.add_port(
        "/dev/ttyUSB0",
        0x2341,
        0x0043,
        SimBoard::new(BoardType::Arduino, "ARD-11"),
    );

    let registry = BoardRegistry::new(Box::new(backend.clone()), DiscoveryConfig::default());
    let report = registry.refresh();
    println!("Discovered {} board(s):", report.added.len());
    for identity in &report.added {
        println!(
            "  - {} {} (firmware {})",
            identity.board_type, identity.serial_id, identity.firmware_version
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.added)?);

    let power_board = PowerBoard::new(registry.singular(BoardType::Power)?)?;
    power_board.power_on()?;
    println!("Battery: {:.2} V", power_board.input_voltage()?);

    let motor_board = MotorBoard::new(registry.singular(BoardType::Motor)?)?;
    motor_board.set_power(0, 0.5)?;
    println!("Motor 0 running at half power");
    motor_board.brake(0)?;

    // Pull the motor board's cable and reconcile
    backend.remove_port("/dev/ttyACM1");
    let report = registry.refresh();
    println!("After unplug, evicted: {:?}", report.evicted);
    println!("Boards still connected: {:?}", registry.serial_ids());

    registry.close_all();
    Ok(())
}
