//! Stage motion control.
//!
//! [`GcodeMotion`] is the real controller: a half-duplex request/response
//! state machine over a [`LineTransport`](crate::transport::LineTransport),
//! with a background listener task matching firmware lines to the single
//! pending command. [`MockMotion`] is the deterministic in-memory double
//! used by runner tests and mock CLI runs.

pub mod gcode;
pub mod mock;

pub use gcode::GcodeMotion;
pub use mock::{MockMotion, MockMotionProbe};
