//! In-memory transport doubles for protocol tests.
//!
//! Two modes:
//!
//! - **Scripted**: tests push response lines through a
//!   [`MockTransportHandle`] and assert on the written command log. Nothing
//!   answers by itself, which makes timeout behavior easy to exercise.
//! - **Firmware**: a [`MockFirmware`] parses each written command and queues
//!   the replies a 3D-printer board would send, including position reports.

use super::LineTransport;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Simulated stage firmware.
///
/// Tracks position and stepper state, answers every understood command with
/// "ok". Deterministic: no latency, no noise.
#[derive(Debug, Default)]
pub struct MockFirmware {
    x: f64,
    y: f64,
    z: f64,
    steppers_enabled: bool,
}

impl MockFirmware {
    /// Parse one command line and return the response lines in order.
    pub fn process(&mut self, command: &str) -> Vec<String> {
        let trimmed = command.trim();

        if trimmed.starts_with("G28") {
            self.x = 0.0;
            self.y = 0.0;
            self.z = 0.0;
            return vec!["ok".to_string()];
        }

        if trimmed.starts_with("G1") || trimmed.starts_with("G0") {
            for token in trimmed.split_whitespace() {
                if let Some(value) = token.strip_prefix('X').and_then(|v| v.parse().ok()) {
                    self.x = value;
                } else if let Some(value) = token.strip_prefix('Y').and_then(|v| v.parse().ok()) {
                    self.y = value;
                } else if let Some(value) = token.strip_prefix('Z').and_then(|v| v.parse().ok()) {
                    self.z = value;
                }
            }
            return vec!["ok".to_string()];
        }

        if trimmed.starts_with("M114") {
            return vec![
                format!(
                    "X:{:.2} Y:{:.2} Z:{:.2} E:0.00 Count X:0 Y:0 Z:0",
                    self.x, self.y, self.z
                ),
                "ok".to_string(),
            ];
        }

        if trimmed.starts_with("M17") {
            self.steppers_enabled = true;
            return vec!["ok".to_string()];
        }

        if trimmed.starts_with("M84") {
            self.steppers_enabled = false;
            return vec!["ok".to_string()];
        }

        // M400 (finish moves), M201/M205 (limits): immediate ack.
        if trimmed.starts_with('M') {
            return vec!["ok".to_string()];
        }

        vec![format!("echo:Unknown command: \"{}\"", trimmed), "ok".to_string()]
    }

    /// Current simulated position.
    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }

    /// Whether the last stepper command left the motors energized.
    pub fn steppers_enabled(&self) -> bool {
        self.steppers_enabled
    }
}

#[derive(Default)]
struct MockState {
    incoming: VecDeque<String>,
    written: Vec<String>,
    firmware: Option<MockFirmware>,
    scripted_replies: VecDeque<Vec<String>>,
}

/// In-memory [`LineTransport`] double.
pub struct MockLineTransport {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

/// Test-side handle onto a [`MockLineTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockLineTransport {
    /// Scripted transport: responses only arrive via the handle.
    pub fn new() -> (Self, MockTransportHandle) {
        Self::build(None)
    }

    /// Transport answered by a simulated firmware.
    pub fn with_firmware() -> (Self, MockTransportHandle) {
        Self::build(Some(MockFirmware::default()))
    }

    fn build(firmware: Option<MockFirmware>) -> (Self, MockTransportHandle) {
        let state = Arc::new(Mutex::new(MockState {
            firmware,
            ..MockState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
                closed: false,
            },
            MockTransportHandle { state },
        )
    }
}

impl MockTransportHandle {
    /// Queue a response line as if the firmware had sent it right now.
    ///
    /// Lines pushed while no command is pending are firmware chatter.
    pub async fn push_response(&self, line: &str) {
        self.state.lock().await.incoming.push_back(line.to_string());
    }

    /// Script the response to the NEXT written command.
    ///
    /// Unlike [`push_response`](Self::push_response), the lines only become
    /// visible once a command is actually written, mirroring a firmware
    /// that answers what it is asked.
    pub async fn reply_next(&self, lines: &[&str]) {
        self.state
            .lock()
            .await
            .scripted_replies
            .push_back(lines.iter().map(|s| s.to_string()).collect());
    }

    /// All command lines written so far, in order.
    pub async fn written(&self) -> Vec<String> {
        self.state.lock().await.written.clone()
    }

    /// Simulated firmware position, if running in firmware mode.
    pub async fn firmware_position(&self) -> Option<(f64, f64, f64)> {
        self.state.lock().await.firmware.as_ref().map(MockFirmware::position)
    }
}

#[async_trait]
impl LineTransport for MockLineTransport {
    async fn write_line(&mut self, text: &str) -> Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("Mock transport is closed"));
        }
        let mut state = self.state.lock().await;
        state.written.push(text.to_string());
        if let Some(firmware) = state.firmware.as_mut() {
            let responses = firmware.process(text);
            state.incoming.extend(responses);
        } else if let Some(replies) = state.scripted_replies.pop_front() {
            state.incoming.extend(replies);
        }
        Ok(())
    }

    async fn poll_line(&mut self) -> Result<Option<String>> {
        Ok(self.state.lock().await.incoming.pop_front())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_firmware_acks_moves_and_tracks_position() {
        let (mut transport, handle) = MockLineTransport::with_firmware();
        transport.write_line("G1 X10 Y5 Z1 F2000").await.unwrap();

        assert_eq!(transport.poll_line().await.unwrap(), Some("ok".to_string()));
        assert_eq!(handle.firmware_position().await, Some((10.0, 5.0, 1.0)));
    }

    #[tokio::test]
    async fn test_firmware_reports_position_before_ack() {
        let (mut transport, _handle) = MockLineTransport::with_firmware();
        transport.write_line("G1 X3 Y4 Z0 F2000").await.unwrap();
        transport.poll_line().await.unwrap();

        transport.write_line("M114").await.unwrap();
        let report = transport.poll_line().await.unwrap().unwrap();
        assert!(report.starts_with("X:3.00 Y:4.00 Z:0.00"));
        assert_eq!(transport.poll_line().await.unwrap(), Some("ok".to_string()));
    }

    #[tokio::test]
    async fn test_scripted_transport_replays_pushed_lines_in_order() {
        let (mut transport, handle) = MockLineTransport::new();
        assert_eq!(transport.poll_line().await.unwrap(), None);

        handle.push_response("echo:busy").await;
        handle.push_response("ok").await;
        transport.write_line("G28").await.unwrap();

        assert_eq!(handle.written().await, vec!["G28".to_string()]);
        assert_eq!(
            transport.poll_line().await.unwrap(),
            Some("echo:busy".to_string())
        );
        assert_eq!(transport.poll_line().await.unwrap(), Some("ok".to_string()));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (mut transport, _handle) = MockLineTransport::new();
        transport.close().await;
        assert!(transport.write_line("G28").await.is_err());
    }
}
