//! G-code motion controller.
//!
//! The stage firmware speaks a half-duplex line protocol: exactly one
//! command may be in flight, and every command eventually resolves with an
//! "ok" line, an "error" line, or a timeout. A background listener task
//! drains the transport on a fixed cadence and matches incoming lines to
//! the single pending-command slot; informational lines received while a
//! command is pending (position reports) are captured alongside the
//! resolution, everything else is chatter.
//!
//! Position tracking is optimistic: the tracked position is updated the
//! moment a move is acknowledged. The authoritative query path (`M114`)
//! exists but its report format is fragile, so [`GcodeMotion::is_moving`]
//! treats any unparsable report as "still moving".

use crate::config::SerialSettings;
use crate::core::{CommandOutcome, MotionDevice, Position};
use crate::transport::LineTransport;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Listener and acknowledgment poll cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Resolution budget for ordinary commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolution budget for homing, which sweeps the full travel range.
const HOMING_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-axis agreement tolerance between reported and tracked position.
const POSITION_TOLERANCE_MM: f64 = 0.1;

#[derive(Default)]
struct PendingSlot {
    /// True while a command awaits resolution
    waiting: bool,
    /// Set by the listener when a resolving line arrives
    outcome: Option<CommandOutcome>,
    /// Last informational line seen while waiting (e.g., an M114 report)
    report: Option<String>,
}

/// Serial-backed XYZ stage controller.
pub struct GcodeMotion {
    /// Shared with the listener task
    transport: Arc<Mutex<Box<dyn LineTransport>>>,

    /// The single pending-command slot (half-duplex protocol)
    slot: Arc<Mutex<PendingSlot>>,

    /// Serializes command issuers so a second send cannot race the slot
    command_gate: Mutex<()>,

    /// Cleared on write failure or listener death; sends then fail fast
    connected: Arc<AtomicBool>,

    /// Last commanded position
    position: Arc<Mutex<Position>>,

    feedrate: f64,
    acceleration: f64,
    jerk: f64,
    boot_grace: Duration,

    task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl GcodeMotion {
    /// Create a controller over an open transport and start its listener.
    pub fn new(transport: Box<dyn LineTransport>, settings: &SerialSettings) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let slot = Arc::new(Mutex::new(PendingSlot::default()));
        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_handle = spawn_listener(
            Arc::clone(&transport),
            Arc::clone(&slot),
            Arc::clone(&connected),
            shutdown_rx,
        );

        Self {
            transport,
            slot,
            command_gate: Mutex::new(()),
            connected,
            position: Arc::new(Mutex::new(Position::origin())),
            feedrate: settings.feedrate,
            acceleration: settings.acceleration,
            jerk: settings.jerk,
            boot_grace: Duration::from_millis(settings.boot_grace_ms),
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Post-connect handshake.
    ///
    /// Printer boards reset when the port opens; wait out the bootloader,
    /// then push the configured motion limits to firmware.
    pub async fn initialize(&mut self) {
        tokio::time::sleep(self.boot_grace).await;

        let jerk = self.jerk;
        let acceleration = self.acceleration;
        if !self.set_jerk(jerk).await {
            warn!("Failed to push jerk limit to firmware");
        }
        if !self.set_acceleration(acceleration).await {
            warn!("Failed to push acceleration limit to firmware");
        }
        info!("Stage ready (feedrate {} mm/min)", self.feedrate);
    }

    /// Send one command and wait for its resolution.
    pub async fn send_and_await(&self, command: &str) -> CommandOutcome {
        self.execute(command).await.0
    }

    /// Send one command; also return the report line captured while waiting.
    async fn execute(&self, command: &str) -> (CommandOutcome, Option<String>) {
        if !self.connected.load(Ordering::SeqCst) {
            warn!("Ignoring '{}': stage is disconnected", command);
            return (CommandOutcome::Failed, None);
        }

        let _gate = self.command_gate.lock().await;

        {
            let mut slot = self.slot.lock().await;
            slot.waiting = true;
            slot.outcome = None;
            slot.report = None;
        }

        debug!("Sending: {}", command);
        if let Err(e) = self.transport.lock().await.write_line(command).await {
            error!("Serial write failed: {:#}", e);
            self.connected.store(false, Ordering::SeqCst);
            self.slot.lock().await.waiting = false;
            return (CommandOutcome::Failed, None);
        }

        let budget = if command.starts_with("G28") {
            HOMING_TIMEOUT
        } else {
            COMMAND_TIMEOUT
        };
        let deadline = Instant::now() + budget;

        loop {
            {
                let mut slot = self.slot.lock().await;
                if let Some(outcome) = slot.outcome.take() {
                    let report = slot.report.take();
                    return (outcome, report);
                }
            }
            if Instant::now() >= deadline {
                let mut slot = self.slot.lock().await;
                slot.waiting = false;
                slot.report = None;
                warn!("Command '{}' timed out after {:?}", command, budget);
                return (CommandOutcome::TimedOut, None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Move to an absolute position. Negative components are clamped to
    /// zero before transmission; the tracked position only changes once
    /// the firmware acknowledges the move.
    pub async fn move_to(&self, x: f64, y: f64, z: f64) -> bool {
        let target = Position::new(x, y, z).clamped();
        let command = format!(
            "G1 X{} Y{} Z{} F{}",
            target.x, target.y, target.z, self.feedrate
        );
        if self.send_and_await(&command).await.is_ok() {
            *self.position.lock().await = target;
            true
        } else {
            false
        }
    }

    /// Home all axes, then return to the origin with an explicit move.
    ///
    /// Some firmwares park off-origin after `G28`, so the follow-up move is
    /// issued unconditionally.
    pub async fn home(&self) -> bool {
        if !self.send_and_await("G28").await.is_ok() {
            warn!("Homing failed or timed out");
            return false;
        }
        *self.position.lock().await = Position::origin();
        info!("Homing complete, returning to origin");
        self.move_to(0.0, 0.0, 0.0).await
    }

    /// Set the feedrate used for subsequent moves (mm/min). Local only;
    /// the value rides along on every `G1`.
    pub fn set_feedrate(&mut self, feedrate: f64) {
        self.feedrate = feedrate;
    }

    /// Push an acceleration limit (mm/s^2) to firmware.
    pub async fn set_acceleration(&mut self, acceleration: f64) -> bool {
        self.acceleration = acceleration;
        let command = format!("M201 X{0} Y{0} Z{0} E{0}", acceleration);
        self.send_and_await(&command).await.is_ok()
    }

    /// Push a jerk limit (mm/s) to firmware.
    pub async fn set_jerk(&mut self, jerk: f64) -> bool {
        self.jerk = jerk;
        let command = format!("M205 X{0} Y{0} Z{0}", jerk);
        self.send_and_await(&command).await.is_ok()
    }

    /// Energize the stepper motors.
    pub async fn enable_steppers(&self) -> bool {
        self.send_and_await("M17").await.is_ok()
    }

    /// Release the stepper motors.
    pub async fn disable_steppers(&self) -> bool {
        self.send_and_await("M84").await.is_ok()
    }

    /// Last commanded position.
    pub async fn position(&self) -> Position {
        *self.position.lock().await
    }

    /// Ask the firmware where it thinks it is.
    ///
    /// Returns `None` when the command fails or the report does not parse.
    pub async fn query_position(&self) -> Option<Position> {
        let (outcome, report) = self.execute("M114").await;
        if !outcome.is_ok() {
            return None;
        }
        parse_position_report(&report?)
    }

    /// Check whether queued motion is still executing.
    ///
    /// `M400` blocks the planner until all queued moves finish; afterwards
    /// the reported position is compared to the tracked one. Conservative:
    /// any failure along the way reports still-moving, because assuming
    /// motion-complete risks capturing during actual motion.
    pub async fn is_moving(&self) -> bool {
        if !self.send_and_await("M400").await.is_ok() {
            return true;
        }
        let reported = match self.query_position().await {
            Some(position) => position,
            None => return true,
        };
        let tracked = *self.position.lock().await;
        !reported.approx_eq(&tracked, POSITION_TOLERANCE_MM)
    }

    /// Stop the listener and close the transport.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
        self.transport.lock().await.close().await;
        self.connected.store(false, Ordering::SeqCst);
        debug!("Motion controller shut down");
    }
}

fn spawn_listener(
    transport: Arc<Mutex<Box<dyn LineTransport>>>,
    slot: Arc<Mutex<PendingSlot>>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            loop {
                let polled = transport.lock().await.poll_line().await;
                match polled {
                    Ok(Some(line)) => resolve_line(&slot, &line).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Serial listener read failed: {:#}", e);
                        connected.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    })
}

async fn resolve_line(slot: &Mutex<PendingSlot>, line: &str) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let mut slot = slot.lock().await;
    if !slot.waiting {
        debug!("Firmware chatter: {}", trimmed);
        return;
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("ok") {
        slot.outcome = Some(CommandOutcome::Acknowledged);
        slot.waiting = false;
    } else if lower.contains("error") {
        slot.outcome = Some(CommandOutcome::Failed);
        slot.waiting = false;
    } else {
        debug!("Firmware report: {}", trimmed);
        slot.report = Some(trimmed.to_string());
    }
}

/// Parse the leading `X: Y: Z:` fields of an `M114` report.
///
/// The trailing `Count X: Y: Z:` stepper fields are ignored. Any missing or
/// malformed axis yields `None`; callers fall back conservatively.
fn parse_position_report(report: &str) -> Option<Position> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for token in report.split_whitespace() {
        if token == "Count" {
            break;
        }
        if let Some(value) = token.strip_prefix("X:") {
            x = value.parse::<f64>().ok();
        } else if let Some(value) = token.strip_prefix("Y:") {
            y = value.parse::<f64>().ok();
        } else if let Some(value) = token.strip_prefix("Z:") {
            z = value.parse::<f64>().ok();
        }
    }

    Some(Position::new(x?, y?, z?))
}

#[async_trait]
impl MotionDevice for GcodeMotion {
    async fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<bool> {
        Ok(GcodeMotion::move_to(self, x, y, z).await)
    }

    async fn home(&mut self) -> Result<bool> {
        Ok(GcodeMotion::home(self).await)
    }

    async fn enable_steppers(&mut self) -> Result<bool> {
        Ok(GcodeMotion::enable_steppers(self).await)
    }

    async fn disable_steppers(&mut self) -> Result<bool> {
        Ok(GcodeMotion::disable_steppers(self).await)
    }

    async fn position(&self) -> Position {
        GcodeMotion::position(self).await
    }

    async fn is_moving(&mut self) -> Result<bool> {
        Ok(GcodeMotion::is_moving(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLineTransport;

    fn test_settings() -> SerialSettings {
        SerialSettings {
            port: None,
            baud_rate: 250_000,
            feedrate: 2000.0,
            acceleration: 5.0,
            jerk: 1.0,
            boot_grace_ms: 0,
        }
    }

    #[test]
    fn test_parse_position_report_happy_path() {
        let report = "X:10.00 Y:0.00 Z:2.50 E:0.00 Count X:800 Y:0 Z:1000";
        assert_eq!(
            parse_position_report(report),
            Some(Position::new(10.0, 0.0, 2.5))
        );
    }

    #[test]
    fn test_parse_position_report_missing_axis_is_none() {
        assert_eq!(parse_position_report("X:10.00 Y:0.00 E:0.00"), None);
    }

    #[test]
    fn test_parse_position_report_malformed_value_is_none() {
        assert_eq!(parse_position_report("X:abc Y:0.00 Z:0.00"), None);
        // Count fields must not backfill a malformed leading axis.
        assert_eq!(
            parse_position_report("X:abc Y:0.00 Z:0.00 Count X:0 Y:0 Z:0"),
            None
        );
    }

    #[tokio::test]
    async fn test_move_acknowledged_updates_position() {
        let (transport, _handle) = MockLineTransport::with_firmware();
        let motion = GcodeMotion::new(Box::new(transport), &test_settings());

        assert!(motion.move_to(10.0, 0.0, 0.0).await);
        assert_eq!(motion.position().await, Position::new(10.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn test_negative_components_clamped_in_command() {
        let (transport, handle) = MockLineTransport::with_firmware();
        let motion = GcodeMotion::new(Box::new(transport), &test_settings());

        assert!(motion.move_to(-5.0, 10.0, -0.5).await);
        assert_eq!(motion.position().await, Position::new(0.0, 10.0, 0.0));
        assert_eq!(
            handle.written().await,
            vec!["G1 X0 Y10 Z0 F2000".to_string()]
        );
    }

    #[tokio::test]
    async fn test_home_resets_position_and_returns_to_origin() {
        let (transport, handle) = MockLineTransport::with_firmware();
        let motion = GcodeMotion::new(Box::new(transport), &test_settings());

        assert!(motion.home().await);
        assert_eq!(motion.position().await, Position::origin());
        assert_eq!(
            handle.written().await,
            vec!["G28".to_string(), "G1 X0 Y0 Z0 F2000".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_command_leaves_position_unchanged() {
        let (transport, handle) = MockLineTransport::new();
        let motion = GcodeMotion::new(Box::new(transport), &test_settings());

        handle.reply_next(&["Error:Printer halted. kill() called!"]).await;
        assert!(!motion.move_to(10.0, 0.0, 0.0).await);
        assert_eq!(motion.position().await, Position::origin());
    }

    #[tokio::test]
    async fn test_query_position_round_trip_through_firmware() {
        let (transport, _handle) = MockLineTransport::with_firmware();
        let motion = GcodeMotion::new(Box::new(transport), &test_settings());

        assert!(motion.move_to(12.0, 8.0, 1.0).await);
        assert_eq!(
            motion.query_position().await,
            Some(Position::new(12.0, 8.0, 1.0))
        );
        assert!(!motion.is_moving().await);
    }

    #[tokio::test]
    async fn test_initialize_pushes_limits_to_firmware() {
        let (transport, handle) = MockLineTransport::with_firmware();
        let mut motion = GcodeMotion::new(Box::new(transport), &test_settings());

        motion.initialize().await;
        assert_eq!(
            handle.written().await,
            vec!["M205 X1 Y1 Z1".to_string(), "M201 X5 Y5 Z5 E5".to_string()]
        );
    }
}
