//! Image capture sources.
//!
//! The capture contract is deliberately thin: produce one frame on demand,
//! or `None` on a transient sensor failure. The real camera lives behind
//! this seam; [`MockCapture`] generates deterministic synthetic frames for
//! tests and mock runs.

use crate::core::{CaptureSource, Frame};
use async_trait::async_trait;
use chrono::Utc;

/// Deterministic synthetic frame source.
///
/// Each frame is a diagonal gradient shifted by the grab counter, so
/// consecutive frames differ but the sequence is fully reproducible. A
/// scripted failure index exercises the run-abort path.
pub struct MockCapture {
    width: u32,
    height: u32,
    grabs: u32,
    /// Return `None` on the Nth grab (0-based) when set
    fail_at: Option<u32>,
}

impl MockCapture {
    /// A small default sensor; big enough to encode, cheap enough for tests.
    pub fn new() -> Self {
        Self {
            width: 64,
            height: 48,
            grabs: 0,
            fail_at: None,
        }
    }

    /// Explicit sensor geometry.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            grabs: 0,
            fail_at: None,
        }
    }

    /// Make the Nth grab (0-based) fail.
    pub fn fail_at(mut self, index: u32) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Number of grab attempts so far.
    pub fn grabs(&self) -> u32 {
        self.grabs
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureSource for MockCapture {
    async fn grab_frame(&mut self) -> Option<Frame> {
        let index = self.grabs;
        self.grabs += 1;
        if self.fail_at == Some(index) {
            return None;
        }

        let mut pixels = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                // Deterministic gradient; no RNG so frames are reproducible.
                pixels.push(((x + y + index) % 256) as u8);
            }
        }

        Some(Frame {
            width: self.width,
            height: self.height,
            pixels,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_deterministic_per_index() {
        let mut first = MockCapture::new();
        let mut second = MockCapture::new();

        let a = first.grab_frame().await.unwrap();
        let b = second.grab_frame().await.unwrap();
        assert_eq!(a.pixels, b.pixels);

        let c = first.grab_frame().await.unwrap();
        assert_ne!(a.pixels, c.pixels);
    }

    #[tokio::test]
    async fn test_scripted_failure_then_recovery() {
        let mut capture = MockCapture::new().fail_at(1);
        assert!(capture.grab_frame().await.is_some());
        assert!(capture.grab_frame().await.is_none());
        assert!(capture.grab_frame().await.is_some());
        assert_eq!(capture.grabs(), 3);
    }

    #[tokio::test]
    async fn test_frame_encodes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");

        let mut capture = MockCapture::with_size(16, 16);
        let frame = capture.grab_frame().await.unwrap();
        frame.save(&path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
