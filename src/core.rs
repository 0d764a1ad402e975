//! Core traits and data types for the plate_scan application.
//!
//! This module defines the foundational abstractions shared by every other
//! module: stage coordinates, well points, command outcomes, captured frames,
//! and the capability traits at the hardware seams.
//!
//! # Architecture Overview
//!
//! Hardware access goes through capability traits:
//!
//! - [`MotionDevice`]: XYZ stage control (move, home, stepper power)
//! - [`CaptureSource`]: single-frame image acquisition
//!
//! Each trait has a real serial/camera implementation and a deterministic
//! in-memory mock, selected at construction time. Experiment logic only ever
//! sees the trait, which keeps the run loop hardware-agnostic and testable.
//!
//! # Thread Safety
//!
//! All traits require `Send + Sync` to enable safe concurrent access across
//! async tasks.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Basic Data Types
// =============================================================================

/// Absolute stage position in millimeters.
///
/// All components are non-negative; the firmware cannot travel below the
/// endstops, so targets are clamped before transmission. Serialized with
/// upper-case axis names (`X`, `Y`, `Z`) to match the persisted path and
/// experiment record formats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in mm
    #[serde(rename = "X")]
    pub x: f64,
    /// Y coordinate in mm
    #[serde(rename = "Y")]
    pub y: f64,
    /// Z coordinate in mm
    #[serde(rename = "Z")]
    pub z: f64,
}

impl Position {
    /// Create a position from raw components.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The machine origin (all axes at their endstops).
    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0 }
    }

    /// Returns a copy with every component clamped to be non-negative.
    pub fn clamped(&self) -> Self {
        Self {
            x: self.x.max(0.0),
            y: self.y.max(0.0),
            z: self.z.max(0.0),
        }
    }

    /// Linear interpolation between two positions, `t` in `[0, 1]`.
    pub fn lerp(a: Self, b: Self, t: f64) -> Self {
        Self {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
            z: a.z + (b.z - a.z) * t,
        }
    }

    /// Euclidean distance to another position in mm.
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// True when every component is within `tolerance` mm of `other`.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3}", self.x, self.y, self.z)
    }
}

/// A single imaging target on the plate: a position plus its well label.
///
/// Immutable once produced by the path generator. Persisted as
/// `{"X": .., "Y": .., "Z": .., "well": ".."}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WellPoint {
    /// Stage position of the well center
    #[serde(flatten)]
    pub position: Position,
    /// Well label in plate notation (e.g., "A1", "F8")
    pub well: String,
}

/// Resolution of a single in-flight G-code command.
///
/// Protocol failures are ordinary return values, never panics. A timed-out
/// or rejected command leaves the tracked position unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Firmware replied with an "ok" line
    Acknowledged,
    /// Firmware replied with an "error" line
    Failed,
    /// No resolution within the command's timeout tier
    TimedOut,
}

impl CommandOutcome {
    /// True only for an acknowledged command.
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Acknowledged)
    }
}

// =============================================================================
// Captured Frames
// =============================================================================

/// A single captured camera frame.
///
/// Pixels are 8-bit grayscale in row-major order. Sensors on this rig output
/// single-channel data, so one byte per pixel keeps frames compact.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Grayscale pixel data, row-major, `width * height` bytes
    pub pixels: Vec<u8>,
    /// UTC timestamp when the frame was captured
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Encode and write the frame to disk.
    ///
    /// The output format is inferred from the file extension (jpg, png, ...).
    pub fn save(&self, path: &Path) -> crate::error::AppResult<()> {
        image::save_buffer(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ColorType::L8,
        )?;
        Ok(())
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// XYZ stage capability trait.
///
/// Experiment logic and the CLI jog commands work against this trait instead
/// of a concrete controller, which enables hardware-agnostic run loops.
/// The boolean results report whether the firmware accepted the command;
/// `Err` is reserved for transport-level failures.
#[async_trait]
pub trait MotionDevice: Send + Sync {
    /// Move to an absolute position in mm. Components below zero are clamped.
    ///
    /// Returns `true` when the firmware acknowledged the move.
    async fn move_to(&mut self, x: f64, y: f64, z: f64) -> Result<bool>;

    /// Home all axes and return to the origin.
    async fn home(&mut self) -> Result<bool>;

    /// Energize the stepper motors.
    async fn enable_steppers(&mut self) -> Result<bool>;

    /// Release the stepper motors.
    async fn disable_steppers(&mut self) -> Result<bool>;

    /// Last commanded position.
    async fn position(&self) -> Position;

    /// Check whether the stage is still executing queued motion.
    ///
    /// Conservative: when the answer cannot be determined this reports `true`.
    async fn is_moving(&mut self) -> Result<bool>;

    /// Wait for queued motion to finish (with timeout).
    async fn wait_motion_complete(&mut self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_moving().await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow::anyhow!("Timeout waiting for motion to settle"));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Single-frame image acquisition capability trait.
///
/// `None` signals a transient grab failure. Callers decide how fatal that
/// is; the experiment runner treats it as a run-aborting fault.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Grab one frame from the sensor.
    async fn grab_frame(&mut self) -> Option<Frame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_zeroes_negative_components() {
        let p = Position::new(-5.0, 3.0, -0.1).clamped();
        assert_eq!(p, Position::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_lerp_endpoints_and_midpoint() {
        let a = Position::new(10.0, 20.0, 1.0);
        let b = Position::new(80.0, 60.0, 1.0);
        assert_eq!(Position::lerp(a, b, 0.0), a);
        assert_eq!(Position::lerp(a, b, 1.0), b);
        assert_eq!(Position::lerp(a, b, 0.5), Position::new(45.0, 40.0, 1.0));
    }

    #[test]
    fn test_well_point_serializes_flat_upper_case_axes() {
        let wp = WellPoint {
            position: Position::new(12.5, 30.0, 2.0),
            well: "B3".to_string(),
        };
        let json = serde_json::to_value(&wp).unwrap();
        assert_eq!(json["X"], 12.5);
        assert_eq!(json["Y"], 30.0);
        assert_eq!(json["Z"], 2.0);
        assert_eq!(json["well"], "B3");
    }

    #[test]
    fn test_approx_eq_tolerance() {
        let a = Position::new(10.0, 0.0, 0.0);
        let b = Position::new(10.05, 0.0, 0.0);
        assert!(a.approx_eq(&b, 0.1));
        assert!(!a.approx_eq(&b, 0.01));
    }

    #[test]
    fn test_command_outcome_is_ok() {
        assert!(CommandOutcome::Acknowledged.is_ok());
        assert!(!CommandOutcome::Failed.is_ok());
        assert!(!CommandOutcome::TimedOut.is_ok());
    }
}
