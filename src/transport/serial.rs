//! Serialport-backed transport and USB port discovery.
//!
//! This module wraps the `serialport` crate behind the [`LineTransport`]
//! trait. Reads are non-blocking: `poll_line` drains whatever bytes the OS
//! has buffered into an internal accumulator and splits on `\n`.
//!
//! Compiled out without the `instrument_serial` feature; the free functions
//! then return [`ScanError::SerialFeatureDisabled`] so callers degrade
//! gracefully instead of failing to link.

use crate::error::{AppResult, ScanError};

#[cfg(feature = "instrument_serial")]
use super::LineTransport;
#[cfg(feature = "instrument_serial")]
use anyhow::{Context, Result};
#[cfg(feature = "instrument_serial")]
use async_trait::async_trait;
#[cfg(feature = "instrument_serial")]
use log::{debug, info};
#[cfg(feature = "instrument_serial")]
use serialport::{SerialPort, SerialPortType};
#[cfg(feature = "instrument_serial")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_serial")]
use std::time::Duration;

/// Line transport over a physical serial port.
#[cfg(feature = "instrument_serial")]
pub struct SerialLineTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// The open port; `None` after close
    port: Option<Box<dyn SerialPort>>,

    /// Raw bytes received but not yet terminated by a newline
    accumulator: Vec<u8>,
}

#[cfg(feature = "instrument_serial")]
impl SerialLineTransport {
    fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        // Internal read timeout only; protocol timeouts live in the
        // motion controller.
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    port_name, baud_rate
                )
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            port: Some(port),
            accumulator: Vec::new(),
        })
    }

    /// Pop the first complete line out of the accumulator, if any.
    fn take_line(&mut self) -> Option<String> {
        let newline = self.accumulator.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.accumulator.drain(..=newline).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl LineTransport for SerialLineTransport {
    async fn write_line(&mut self, text: &str) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Serial port '{}' is closed", self.port_name))?;

        port.write_all(text.as_bytes())
            .context("Failed to write to serial port")?;
        port.write_all(b"\n")
            .context("Failed to write to serial port")?;
        port.flush().context("Failed to flush serial port")?;
        Ok(())
    }

    async fn poll_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Ok(None),
        };

        // Drain only what the OS already buffered so this never blocks.
        let available = port
            .bytes_to_read()
            .context("Failed to query serial input buffer")?;
        if available > 0 {
            let mut buffer = vec![0u8; available as usize];
            match port.read(&mut buffer) {
                Ok(n) => self.accumulator.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(anyhow::anyhow!("Serial read error: {}", e)),
            }
        }

        Ok(self.take_line())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
    }
}

/// Open a transport on a named port.
#[cfg(feature = "instrument_serial")]
pub fn open_port(port_name: &str, baud_rate: u32) -> AppResult<SerialLineTransport> {
    SerialLineTransport::open(port_name, baud_rate)
        .map_err(|e| ScanError::Transport(format!("{:#}", e)))
}

/// Find the first USB serial device that opens successfully.
///
/// Known limitation: with more than one USB serial device attached the
/// first enumerated match wins, whether or not it is the stage.
#[cfg(feature = "instrument_serial")]
pub fn discover_port(baud_rate: u32) -> AppResult<String> {
    let ports = serialport::available_ports()
        .map_err(|e| ScanError::Transport(format!("Failed to enumerate serial ports: {}", e)))?;

    for port in ports {
        if !matches!(port.port_type, SerialPortType::UsbPort(_)) {
            continue;
        }
        // Open-then-close probe: a port something else holds open is
        // not a candidate.
        match serialport::new(&port.port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
        {
            Ok(probe) => {
                drop(probe);
                info!("Discovered stage on '{}'", port.port_name);
                return Ok(port.port_name);
            }
            Err(e) => {
                debug!("Skipping '{}': {}", port.port_name, e);
            }
        }
    }

    Err(ScanError::PortNotFound)
}

/// Open a transport on a named port.
#[cfg(not(feature = "instrument_serial"))]
pub fn open_port(_port_name: &str, _baud_rate: u32) -> AppResult<super::MockLineTransport> {
    Err(ScanError::SerialFeatureDisabled)
}

/// Find the first USB serial device that opens successfully.
#[cfg(not(feature = "instrument_serial"))]
pub fn discover_port(_baud_rate: u32) -> AppResult<String> {
    Err(ScanError::SerialFeatureDisabled)
}
