//! Deterministic in-memory stage double.
//!
//! Moves complete instantly and are recorded for assertions. A scripted
//! rejection point lets runner tests exercise the abort path without real
//! hardware.

use crate::core::{MotionDevice, Position};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct ProbeState {
    visited: Vec<Position>,
    homed: bool,
    steppers_enabled: bool,
}

/// Instant, always-succeeding [`MotionDevice`] implementation.
pub struct MockMotion {
    position: Position,
    state: Arc<Mutex<ProbeState>>,
    /// Reject the Nth move (0-based) when set
    fail_move_at: Option<usize>,
    moves_seen: usize,
}

/// Test-side view into a [`MockMotion`].
#[derive(Clone)]
pub struct MockMotionProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MockMotion {
    pub fn new() -> (Self, MockMotionProbe) {
        let state = Arc::new(Mutex::new(ProbeState::default()));
        (
            Self {
                position: Position::origin(),
                state: Arc::clone(&state),
                fail_move_at: None,
                moves_seen: 0,
            },
            MockMotionProbe { state },
        )
    }

    /// Make the Nth `move_to` (0-based) report rejection.
    pub fn fail_move_at(mut self, index: usize) -> Self {
        self.fail_move_at = Some(index);
        self
    }
}

impl MockMotionProbe {
    /// Every accepted move target, in order.
    pub async fn visited(&self) -> Vec<Position> {
        self.state.lock().await.visited.clone()
    }

    /// Whether `home` was called.
    pub async fn homed(&self) -> bool {
        self.state.lock().await.homed
    }

    /// Stepper power state after the last enable/disable call.
    pub async fn steppers_enabled(&self) -> bool {
        self.state.lock().await.steppers_enabled
    }
}

#[async_trait]
impl MotionDevice for MockMotion {
    async fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<bool> {
        let index = self.moves_seen;
        self.moves_seen += 1;
        if self.fail_move_at == Some(index) {
            return Ok(false);
        }
        let target = Position::new(x, y, z).clamped();
        self.position = target;
        self.state.lock().await.visited.push(target);
        Ok(true)
    }

    async fn home(&mut self) -> Result<bool> {
        self.position = Position::origin();
        self.state.lock().await.homed = true;
        Ok(true)
    }

    async fn enable_steppers(&mut self) -> Result<bool> {
        self.state.lock().await.steppers_enabled = true;
        Ok(true)
    }

    async fn disable_steppers(&mut self) -> Result<bool> {
        self.state.lock().await.steppers_enabled = false;
        Ok(true)
    }

    async fn position(&self) -> Position {
        self.position
    }

    async fn is_moving(&mut self) -> Result<bool> {
        Ok(false)
    }
}
