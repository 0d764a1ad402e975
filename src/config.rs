//! Application configuration.
//!
//! Layered settings: compiled-in defaults, then an optional TOML file, then
//! `PLATE_SCAN_*` environment variables. All hardware and file-layout
//! parameters live here so test and mock runs can override them without
//! touching code.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 250000
//! feedrate = 2000.0
//!
//! [plate]
//! rows = 6
//! cols = 8
//!
//! [files]
//! save_dir = "experiments"
//! image_format = "jpg"
//! ```

use crate::error::AppResult;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Serial link and motion tuning parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialSettings {
    /// Explicit port path; `None` enables auto-discovery
    pub port: Option<String>,
    /// Line speed in baud
    pub baud_rate: u32,
    /// Motion feedrate in mm/min
    pub feedrate: f64,
    /// Acceleration in mm/s^2, pushed to firmware on connect
    pub acceleration: f64,
    /// Jerk in mm/s, pushed to firmware on connect
    pub jerk: f64,
    /// Delay after opening the port before the firmware accepts commands
    pub boot_grace_ms: u64,
}

/// Plate geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlateSettings {
    /// Number of rows (A..)
    pub rows: usize,
    /// Number of columns (1..)
    pub cols: usize,
}

/// File layout for captured images and run records.
#[derive(Debug, Clone, Deserialize)]
pub struct FileSettings {
    /// Default parent directory for experiment output
    pub save_dir: String,
    /// Image extension passed to the encoder ("jpg", "png")
    pub image_format: String,
    /// Default filename prefix for captured images
    pub prefix: String,
}

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub serial: SerialSettings,
    pub plate: PlateSettings,
    pub files: FileSettings,
}

impl Settings {
    /// Load settings from defaults, an optional TOML file, and environment.
    ///
    /// Environment variables use the `PLATE_SCAN_` prefix with `__` as the
    /// section separator, e.g. `PLATE_SCAN_SERIAL__BAUD_RATE=115200`.
    pub fn new(config_path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder()
            .set_default("serial.port", None::<String>)?
            .set_default("serial.baud_rate", 250_000)?
            .set_default("serial.feedrate", 2000.0)?
            .set_default("serial.acceleration", 5.0)?
            .set_default("serial.jerk", 1.0)?
            .set_default("serial.boot_grace_ms", 2000)?
            .set_default("plate.rows", 6)?
            .set_default("plate.cols", 8)?
            .set_default("files.save_dir", "experiments")?
            .set_default("files.image_format", "jpg")?
            .set_default("files.prefix", "exp")?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let config = builder
            .add_source(Environment::with_prefix("PLATE_SCAN").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_match_firmware_expectations() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.serial.baud_rate, 250_000);
        assert_eq!(settings.serial.feedrate, 2000.0);
        assert_eq!(settings.serial.acceleration, 5.0);
        assert_eq!(settings.serial.jerk, 1.0);
        assert!(settings.serial.port.is_none());
    }

    #[test]
    #[serial]
    fn test_default_plate_and_file_layout() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.plate.rows, 6);
        assert_eq!(settings.plate.cols, 8);
        assert_eq!(settings.files.save_dir, "experiments");
        assert_eq!(settings.files.image_format, "jpg");
        assert_eq!(settings.files.prefix, "exp");
    }

    #[test]
    #[serial]
    fn test_environment_overrides_defaults() {
        std::env::set_var("PLATE_SCAN__SERIAL__BAUD_RATE", "115200");
        std::env::set_var("PLATE_SCAN__FILES__PREFIX", "plate_a");
        let settings = Settings::new(None);
        std::env::remove_var("PLATE_SCAN__SERIAL__BAUD_RATE");
        std::env::remove_var("PLATE_SCAN__FILES__PREFIX");

        let settings = settings.unwrap();
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.files.prefix, "plate_a");
        assert_eq!(settings.files.image_format, "jpg");
    }

    #[test]
    #[serial]
    fn test_settings_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.toml");
        std::fs::write(
            &file,
            "[serial]\nfeedrate = 1500.0\n\n[plate]\nrows = 8\ncols = 12\n",
        )
        .unwrap();

        let settings = Settings::new(file.to_str()).unwrap();
        assert_eq!(settings.serial.feedrate, 1500.0);
        assert_eq!(settings.plate.rows, 8);
        assert_eq!(settings.plate.cols, 12);
        assert_eq!(settings.serial.baud_rate, 250_000);
    }
}
