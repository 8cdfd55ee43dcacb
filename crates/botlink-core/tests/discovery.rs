//! End-to-end discovery tests over simulated hardware.
//!
//! Each test builds a `SimBackend`, wires simulated boards behind named
//! ports, and drives the registry exactly the way production code does.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use botlink_core::error::CommsError;
use botlink_core::identity::BoardType;
use botlink_core::registry::{BoardRegistry, DiscoveryConfig};
use botlink_core::session::SessionState;
use botlink_core::sim::{SimBackend, SimBoard};

fn registry_over(backend: SimBackend) -> BoardRegistry {
    BoardRegistry::new(Box::new(backend), DiscoveryConfig::default())
}

#[test]
fn test_discovers_each_supported_board_once() {
    let backend = SimBackend::new();
    backend.add_port(
        "/dev/ttyACM0",
        0x1BDA,
        0x0010,
        SimBoard::new(BoardType::Power, "PWR-49"),
    );
    backend.add_port(
        "/dev/ttyACM1",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001"),
    );
    backend.add_port(
        "/dev/ttyUSB0",
        0x2341,
        0x0043,
        SimBoard::new(BoardType::Arduino, "ARD-11"),
    );

    let registry = registry_over(backend);
    let report = registry.refresh();

    assert_eq!(report.added.len(), 3);
    assert!(report.duplicates.is_empty());
    assert!(report.rejected.is_empty());
    assert_eq!(
        registry.serial_ids(),
        vec!["ARD-11", "MC-001", "PWR-49"]
    );
}

#[test]
fn test_duplicate_serial_id_keeps_first_session() {
    // The same physical board visible through two ports must yield one
    // session; the second resolution is reported, not connected.
    let backend = SimBackend::new();
    let board = SimBoard::new(BoardType::Motor, "MC-001");
    backend.add_port("/dev/ttyACM0", 0x0403, 0x6001, board.clone());
    backend.add_port("/dev/ttyACM1", 0x0403, 0x6001, board);

    let registry = registry_over(backend);
    let report = registry.refresh();

    assert_eq!(registry.len(), 1);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].serial_id, "MC-001");
}

#[test]
fn test_allow_list_filters_before_probing() {
    // A supported motor board on COM-A, an unrelated device on COM-B:
    // COM-B must never be opened, so it shows up in no report bucket.
    let backend = SimBackend::new();
    backend.add_port(
        "COM-A",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001"),
    );
    backend.add_port(
        "COM-B",
        0xDEAD,
        0xBEEF,
        SimBoard::new(BoardType::Motor, "MC-002"),
    );

    let registry = registry_over(backend);
    let report = registry.refresh();

    assert_eq!(registry.serial_ids(), vec!["MC-001"]);
    assert_eq!(registry.get("MC-001").unwrap().port_name(), "COM-A");
    assert!(report.rejected.is_empty());
    assert!(registry.get("MC-002").is_err());
}

#[test]
fn test_refresh_is_idempotent() {
    let backend = SimBackend::new();
    backend.add_port(
        "/dev/ttyACM0",
        0x1BDA,
        0x0010,
        SimBoard::new(BoardType::Power, "PWR-49"),
    );

    let registry = registry_over(backend);
    registry.refresh();
    let first = registry.get("PWR-49").unwrap();

    // A second pass over unchanged hardware must not reconnect anything.
    let report = registry.refresh();
    assert!(report.added.is_empty());
    assert!(report.evicted.is_empty());

    let second = registry.get("PWR-49").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_unplug_closes_session_and_refresh_evicts() {
    let backend = SimBackend::new();
    let board = SimBoard::new(BoardType::Power, "PWR-49");
    backend.add_port("/dev/ttyACM0", 0x1BDA, 0x0010, board.clone());

    let registry = registry_over(backend);
    registry.refresh();
    let session = registry.get("PWR-49").unwrap();

    board.unplug();
    assert!(session.heartbeat().is_err());
    assert_eq!(session.state(), SessionState::Closed);

    // Closed sessions stop being reachable once a refresh reconciles.
    let report = registry.refresh();
    assert_eq!(report.evicted, vec!["PWR-49"]);
    assert!(matches!(
        registry.get("PWR-49"),
        Err(CommsError::NotFound(_))
    ));
}

#[test]
fn test_unresponsive_board_written_off_and_evicted() {
    let backend = SimBackend::new();
    let board = SimBoard::new(BoardType::Motor, "MC-001");
    backend.add_port("/dev/ttyACM0", 0x0403, 0x6001, board.clone());

    let registry = registry_over(backend);
    registry.refresh();
    let session = registry.get("MC-001").unwrap();

    // Firmware hangs: the port is still present but nothing ever answers.
    board.set_responsive(false);
    assert!(session.heartbeat().is_err());
    assert_eq!(session.state(), SessionState::Degraded);
    assert!(session.heartbeat().is_err());
    assert_eq!(session.state(), SessionState::Closed);

    registry.refresh();
    assert!(matches!(
        registry.get("MC-001"),
        Err(CommsError::NotFound(_))
    ));
}

#[test]
fn test_misbehaving_candidate_does_not_block_others() {
    let backend = SimBackend::new();
    backend.add_port(
        "/dev/ttyACM0",
        0x1BDA,
        0x0010,
        SimBoard::new(BoardType::Power, "PWR-49"),
    );
    // Answers the identity query with a token no firmware uses
    backend.add_port(
        "/dev/ttyACM1",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001").with_type_token("GPS"),
    );
    // Never answers at all
    let silent = SimBoard::new(BoardType::Servo, "SRV-07");
    silent.set_responsive(false);
    backend.add_port("/dev/ttyACM2", 0x1BDA, 0x0011, silent);

    let registry = registry_over(backend);
    let report = registry.refresh();

    assert_eq!(registry.serial_ids(), vec!["PWR-49"]);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.rejected.len(), 2);
}

#[test]
fn test_board_returning_on_new_port_reconnects_in_one_pass() {
    let backend = SimBackend::new();
    let board = SimBoard::new(BoardType::Motor, "MC-001");
    backend.add_port("/dev/ttyACM0", 0x0403, 0x6001, board);

    let registry = registry_over(backend.clone());
    registry.refresh();
    assert_eq!(registry.len(), 1);

    // The cable moves to a different port between scans. The stale
    // session is evicted and the same board reconnects within the same
    // refresh pass.
    backend.remove_port("/dev/ttyACM0");
    backend.add_port(
        "/dev/ttyACM3",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001"),
    );

    let report = registry.refresh();
    assert_eq!(report.evicted, vec!["MC-001"]);
    assert_eq!(report.added.len(), 1);
    let session = registry.get("MC-001").unwrap();
    assert_eq!(session.port_name(), "/dev/ttyACM3");
}

#[test]
fn test_singular_accessor_semantics() {
    let backend = SimBackend::new();
    backend.add_port(
        "/dev/ttyACM0",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001"),
    );
    backend.add_port(
        "/dev/ttyACM1",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-002"),
    );

    let registry = registry_over(backend);
    registry.refresh();

    // Zero and more-than-one both fail; the caller asked for "the" board.
    assert!(registry.singular(BoardType::Power).is_err());
    assert!(registry.singular(BoardType::Motor).is_err());
    assert_eq!(registry.by_type(BoardType::Motor).len(), 2);
}

#[test]
fn test_close_all_tears_down_every_session() {
    let backend = SimBackend::new();
    backend.add_port(
        "/dev/ttyACM0",
        0x1BDA,
        0x0010,
        SimBoard::new(BoardType::Power, "PWR-49"),
    );
    backend.add_port(
        "/dev/ttyACM1",
        0x0403,
        0x6001,
        SimBoard::new(BoardType::Motor, "MC-001"),
    );

    let registry = registry_over(backend);
    registry.refresh();
    let power = registry.get("PWR-49").unwrap();

    registry.close_all();
    assert!(registry.is_empty());
    assert_eq!(power.state(), SessionState::Closed);
    assert!(power.heartbeat().is_err());
}
