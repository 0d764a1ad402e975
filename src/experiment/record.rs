//! Persisted run configuration.
//!
//! Written once at configure time into the run's save folder and never
//! mutated afterwards, so a finished experiment directory is self
//! describing: the record plus the captured images fully reproduce the run
//! parameters.

use crate::core::WellPoint;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Durable record of one configured run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// The full imaging path, in visit order
    pub path_points: Vec<WellPoint>,
    /// Dwell at each well, seconds
    pub pause_time: f64,
    /// Overall run budget, seconds
    pub duration: f64,
    /// Image filename prefix ("" for none)
    pub file_prefix: String,
    /// When the run was configured
    pub timestamp: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Fixed filename inside the save folder.
    pub const FILENAME: &'static str = "experiment_config.json";

    /// Write the record into `folder`.
    pub fn save(&self, folder: &Path) -> AppResult<()> {
        let file = File::create(folder.join(Self::FILENAME))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a record previously written by [`save`](Self::save).
    pub fn load(folder: &Path) -> AppResult<Self> {
        let file = File::open(folder.join(Self::FILENAME))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;

    #[test]
    fn test_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = ExperimentRecord {
            path_points: vec![WellPoint {
                position: Position::new(1.0, 2.0, 0.5),
                well: "A1".to_string(),
            }],
            pause_time: 5.0,
            duration: 3600.0,
            file_prefix: "exp".to_string(),
            timestamp: Utc::now(),
        };

        record.save(dir.path()).unwrap();
        let loaded = ExperimentRecord::load(dir.path()).unwrap();
        assert_eq!(loaded, record);
    }
}
