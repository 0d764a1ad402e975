//! Line-oriented serial transport layer.
//!
//! The stage speaks a newline-delimited text protocol, so everything above
//! this layer deals in whole lines. [`LineTransport`] is the capability
//! trait; [`serial`] provides the real serialport-backed implementation and
//! USB port discovery, [`mock`] an in-memory double with an optional
//! scripted firmware for tests.

pub mod mock;
pub mod serial;

use anyhow::Result;
use async_trait::async_trait;

pub use mock::{MockFirmware, MockLineTransport, MockTransportHandle};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialLineTransport;
pub use serial::{discover_port, open_port};

/// Duplex line-oriented channel to the stage firmware.
///
/// Implementations buffer incoming bytes internally and only surface
/// complete lines. `poll_line` never blocks; the motion controller's
/// listener task drives it on a fixed cadence.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Write one command line. A trailing newline is appended.
    async fn write_line(&mut self, text: &str) -> Result<()>;

    /// Return the next complete received line, or `None` when the buffer
    /// holds no full line yet.
    async fn poll_line(&mut self) -> Result<Option<String>>;

    /// Close the channel. Idempotent.
    async fn close(&mut self);
}
