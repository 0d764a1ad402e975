//! Plate path generation.
//!
//! Pure geometry, no side effects: four calibrated corner positions define
//! a quadrilateral, and [`generate`] bilinearly interpolates a rows x cols
//! grid of well centers across it. Traversal order is either plain raster
//! or boustrophedon ("snake", reversing direction on odd rows to cut travel
//! distance). Well labels always name the LOGICAL grid cell; snake
//! reversal changes visit order, never identity.
//!
//! Paths persist as a JSON array of `{X, Y, Z, well}` objects.

use crate::core::{Position, WellPoint};
use crate::error::{AppResult, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Grid traversal order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    /// Columns ascend on every row
    Raster,
    /// Column direction reverses on odd rows
    Snake,
}

/// The four calibration corners, in capture order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corner {
    /// Origin corner (first row, first column)
    A1,
    /// Same-row far corner
    A8,
    /// Diagonal corner
    F8,
    /// Same-column far corner
    F1,
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Corner::A1 => "A1",
            Corner::A8 => "A8",
            Corner::F8 => "F8",
            Corner::F1 => "F1",
        };
        write!(f, "{}", name)
    }
}

/// Calibration state: corner positions captured one at a time by jogging
/// the stage over each reference well.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCorners {
    pub a1: Option<Position>,
    pub a8: Option<Position>,
    pub f8: Option<Position>,
    pub f1: Option<Position>,
}

impl CalibrationCorners {
    /// Record the current stage position for one corner.
    pub fn capture(&mut self, corner: Corner, position: Position) {
        match corner {
            Corner::A1 => self.a1 = Some(position),
            Corner::A8 => self.a8 = Some(position),
            Corner::F8 => self.f8 = Some(position),
            Corner::F1 => self.f1 = Some(position),
        }
    }

    /// True once all four corners are captured.
    pub fn is_complete(&self) -> bool {
        self.resolved().is_ok()
    }

    /// All four positions, or the first missing corner in capture order.
    fn resolved(&self) -> AppResult<(Position, Position, Position, Position)> {
        let a1 = self.a1.ok_or(ScanError::IncompleteCalibration("A1"))?;
        let a8 = self.a8.ok_or(ScanError::IncompleteCalibration("A8"))?;
        let f8 = self.f8.ok_or(ScanError::IncompleteCalibration("F8"))?;
        let f1 = self.f1.ok_or(ScanError::IncompleteCalibration("F1"))?;
        Ok((a1, a8, f8, f1))
    }
}

/// Generate the ordered imaging path across the plate.
///
/// Bilinear interpolation: each row's endpoints interpolate the A1->F1 and
/// A8->F8 edges, then well centers interpolate between those endpoints.
/// Every point's Z is copied from the A1 corner (plate assumed planar at
/// calibration height). Fails before any hardware interaction when a
/// corner is missing; never returns a partial path.
pub fn generate(
    corners: &CalibrationCorners,
    rows: usize,
    cols: usize,
    pattern: Pattern,
) -> AppResult<Vec<WellPoint>> {
    let (a1, a8, f8, f1) = corners.resolved()?;

    if !(2..=26).contains(&rows) || cols < 2 {
        return Err(ScanError::Configuration(format!(
            "Unsupported plate geometry: {} rows x {} cols",
            rows, cols
        )));
    }

    let mut points = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        let row_t = row as f64 / (rows - 1) as f64;
        let left = Position::lerp(a1, f1, row_t);
        let right = Position::lerp(a8, f8, row_t);

        let columns: Vec<usize> = if pattern == Pattern::Snake && row % 2 == 1 {
            (0..cols).rev().collect()
        } else {
            (0..cols).collect()
        };

        for col in columns {
            let col_t = col as f64 / (cols - 1) as f64;
            let interpolated = Position::lerp(left, right, col_t);
            points.push(WellPoint {
                position: Position::new(interpolated.x, interpolated.y, a1.z),
                well: well_label(row, col),
            });
        }
    }

    Ok(points)
}

/// Plate notation for a logical grid cell: row letter + 1-based column.
fn well_label(row: usize, col: usize) -> String {
    let letter = (b'A' + row as u8) as char;
    format!("{}{}", letter, col + 1)
}

/// Total Euclidean travel distance along the path, in mm.
pub fn travel_distance(points: &[WellPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].position.distance_to(&pair[1].position))
        .sum()
}

/// Rough travel time in minutes at a constant feedrate (mm/min).
///
/// Ignores acceleration ramps and dwell; good enough for run-length
/// estimates in the UI.
pub fn estimated_travel_time(points: &[WellPoint], feedrate_mm_min: f64) -> f64 {
    if feedrate_mm_min <= 0.0 {
        return 0.0;
    }
    travel_distance(points) / feedrate_mm_min
}

/// Write a path to disk as pretty-printed JSON.
pub fn save_path(points: &[WellPoint], path: &Path) -> AppResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), points)?;
    Ok(())
}

/// Load a previously saved path.
pub fn load_path(path: &Path) -> AppResult<Vec<WellPoint>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rectangular_corners() -> CalibrationCorners {
        let mut corners = CalibrationCorners::default();
        corners.capture(Corner::A1, Position::new(0.0, 0.0, 0.0));
        corners.capture(Corner::A8, Position::new(70.0, 0.0, 0.0));
        corners.capture(Corner::F8, Position::new(70.0, 50.0, 0.0));
        corners.capture(Corner::F1, Position::new(0.0, 50.0, 0.0));
        corners
    }

    #[test]
    fn test_snake_grid_corner_values() {
        let path = generate(&rectangular_corners(), 6, 8, Pattern::Snake).unwrap();

        assert_eq!(path[0].position, Position::new(0.0, 0.0, 0.0));
        assert_eq!(path[0].well, "A1");
        assert_eq!(path[7].position, Position::new(70.0, 0.0, 0.0));
        assert_eq!(path[7].well, "A8");
        // Row 1 starts at the reversed end: same X as A8, one row step in Y.
        assert_eq!(path[8].position, Position::new(70.0, 10.0, 0.0));
        assert_eq!(path[8].well, "B8");
    }

    #[test]
    fn test_path_is_complete_and_unique_for_both_patterns() {
        for pattern in [Pattern::Raster, Pattern::Snake] {
            let path = generate(&rectangular_corners(), 6, 8, pattern).unwrap();
            assert_eq!(path.len(), 48);

            let mut labels: Vec<&str> = path.iter().map(|p| p.well.as_str()).collect();
            labels.sort_unstable();
            let mut expected: Vec<String> = Vec::new();
            for row in 0..6u8 {
                for col in 1..=8 {
                    expected.push(format!("{}{}", (b'A' + row) as char, col));
                }
            }
            expected.sort();
            assert_eq!(labels, expected);
        }
    }

    #[test]
    fn test_snake_never_travels_farther_than_raster() {
        let mut corners = CalibrationCorners::default();
        // Slightly skewed plate.
        corners.capture(Corner::A1, Position::new(12.0, 20.5, 1.5));
        corners.capture(Corner::A8, Position::new(81.0, 21.0, 1.5));
        corners.capture(Corner::F8, Position::new(80.0, 61.5, 1.5));
        corners.capture(Corner::F1, Position::new(11.5, 60.0, 1.5));

        let raster = generate(&corners, 6, 8, Pattern::Raster).unwrap();
        let snake = generate(&corners, 6, 8, Pattern::Snake).unwrap();
        assert!(travel_distance(&snake) <= travel_distance(&raster));
    }

    #[test]
    fn test_z_copied_from_a1_everywhere() {
        let mut corners = rectangular_corners();
        corners.capture(Corner::A1, Position::new(0.0, 0.0, 2.5));
        let path = generate(&corners, 6, 8, Pattern::Raster).unwrap();
        assert!(path.iter().all(|p| p.position.z == 2.5));
    }

    #[test]
    fn test_missing_corner_fails_before_generation() {
        let mut corners = rectangular_corners();
        corners.f8 = None;
        let err = generate(&corners, 6, 8, Pattern::Snake).unwrap_err();
        assert!(matches!(err, ScanError::IncompleteCalibration("F8")));
        assert!(!corners.is_complete());
    }

    #[test]
    fn test_travel_time_scales_with_feedrate() {
        let path = generate(&rectangular_corners(), 6, 8, Pattern::Snake).unwrap();
        let slow = estimated_travel_time(&path, 1000.0);
        let fast = estimated_travel_time(&path, 2000.0);
        assert!((slow - 2.0 * fast).abs() < 1e-9);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plate.path");
        let path = generate(&rectangular_corners(), 6, 8, Pattern::Snake).unwrap();

        save_path(&path, &file).unwrap();
        assert_eq!(load_path(&file).unwrap(), path);
    }
}
