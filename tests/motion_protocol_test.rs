//! Protocol-level tests for the G-code motion controller over the mock
//! transport: the full command stream of a jog session, the two timeout
//! tiers, and the conservative motion-query fallback.

use plate_scan::config::SerialSettings;
use plate_scan::core::{CommandOutcome, Position};
use plate_scan::motion::GcodeMotion;
use plate_scan::transport::MockLineTransport;
use std::time::Duration;

fn settings() -> SerialSettings {
    SerialSettings {
        port: None,
        baud_rate: 250_000,
        feedrate: 2000.0,
        acceleration: 5.0,
        jerk: 1.0,
        boot_grace_ms: 0,
    }
}

#[tokio::test]
async fn test_full_jog_session_command_stream() {
    let (transport, handle) = MockLineTransport::with_firmware();
    let mut motion = GcodeMotion::new(Box::new(transport), &settings());
    motion.initialize().await;

    assert!(motion.home().await);
    assert!(motion.move_to(12.5, 30.0, 1.5).await);
    assert!(!motion.is_moving().await);
    assert_eq!(motion.position().await, Position::new(12.5, 30.0, 1.5));

    let written = handle.written().await;
    assert_eq!(
        written,
        vec![
            "M205 X1 Y1 Z1",
            "M201 X5 Y5 Z5 E5",
            "G28",
            "G1 X0 Y0 Z0 F2000",
            "G1 X12.5 Y30 Z1.5 F2000",
            "M400",
            "M114",
        ]
    );
    assert_eq!(handle.firmware_position().await, Some((12.5, 30.0, 1.5)));

    motion.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_command_times_out_after_ten_seconds() {
    let (transport, _handle) = MockLineTransport::new();
    let motion = GcodeMotion::new(Box::new(transport), &settings());

    let started = tokio::time::Instant::now();
    let outcome = motion.send_and_await("M400").await;
    let waited = started.elapsed();

    assert_eq!(outcome, CommandOutcome::TimedOut);
    assert!(waited >= Duration::from_secs(10));
    assert!(waited < Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_homing_gets_the_extended_timeout() {
    let (transport, _handle) = MockLineTransport::new();
    let motion = GcodeMotion::new(Box::new(transport), &settings());

    let started = tokio::time::Instant::now();
    let outcome = motion.send_and_await("G28").await;
    let waited = started.elapsed();

    assert_eq!(outcome, CommandOutcome::TimedOut);
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_move_leaves_position_unchanged() {
    let (transport, _handle) = MockLineTransport::new();
    let motion = GcodeMotion::new(Box::new(transport), &settings());

    assert!(!motion.move_to(10.0, 0.0, 0.0).await);
    assert_eq!(motion.position().await, Position::origin());
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_motion_query_reports_still_moving() {
    let (transport, _handle) = MockLineTransport::new();
    let motion = GcodeMotion::new(Box::new(transport), &settings());

    assert!(motion.is_moving().await);
}

#[tokio::test]
async fn test_firmware_error_reply_resolves_failed() {
    let (transport, handle) = MockLineTransport::new();
    let motion = GcodeMotion::new(Box::new(transport), &settings());

    handle
        .reply_next(&["Error:Printer halted. kill() called!"])
        .await;
    let outcome = motion.send_and_await("G28").await;
    assert_eq!(outcome, CommandOutcome::Failed);
    assert!(!outcome.is_ok());
}
