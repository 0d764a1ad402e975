//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle different kinds of errors that can occur, from
//! I/O and configuration issues to hardware-specific problems.
//!
//! ## Error Hierarchy
//!
//! `ScanError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the configuration files.
//! - **`Configuration`**: Represents semantic errors in an experiment or
//!   application configuration, such as values that pass parsing but are
//!   logically invalid (e.g., a zero dwell time). These are caught during the
//!   validation step and name the first violated constraint.
//! - **`Io`**: Wraps standard `std::io::Error`, covering all file I/O issues.
//! - **`Transport`**: Failures on the serial channel itself (open, write,
//!   read). Protocol-level outcomes such as a rejected or timed-out command
//!   are NOT errors; they are reported as `CommandOutcome` values so a flaky
//!   stage can never crash the process.
//! - **`IncompleteCalibration`**: Path generation was requested before all
//!   four plate corners were captured; names the first missing corner.
//! - **`SerialFeatureDisabled`**: The code attempted to use real serial
//!   hardware in a build where the `instrument_serial` feature was compiled
//!   out. Provides a clear message on how to enable it.
//!
//! By using `#[from]`, `ScanError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the application with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No stage found on any serial port")]
    PortNotFound,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Calibration incomplete: corner {0} not captured")]
    IncompleteCalibration(&'static str),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Run error: {0}")]
    Run(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Transport("write failed".to_string());
        assert_eq!(err.to_string(), "Transport error: write failed");
    }

    #[test]
    fn test_incomplete_calibration_names_corner() {
        let err = ScanError::IncompleteCalibration("A8");
        assert!(err.to_string().contains("A8"));
    }
}
