//! Configuration for vigia-eye

use crate::error::VisionError;
use crate::geometry::LineModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Gates applied by the capture decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureThresholds {
    /// Minimum rolling mean confidence for a track to be captured
    pub confidence_floor: f32,
    /// Minimum seconds between two captures of the same track
    pub min_seconds_between_captures: f64,
    /// Per-camera capture budget
    pub max_captures: u32,
    /// Confidence gain over the best previous shot required for a re-capture
    pub improvement_margin: f32,
    /// Minimum center displacement (pixels) for a class to count as moving
    pub movement_threshold_px: f32,
    /// Length of the per-track confidence window
    pub window_size: usize,
    /// Seconds between resets of the approval streak watchdog
    pub streak_reset_secs: u64,
}

impl Default for CaptureThresholds {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            min_seconds_between_captures: 3.0,
            max_captures: 15,
            improvement_margin: 0.1,
            movement_threshold_px: 18.0,
            window_size: 5,
            streak_reset_secs: 300,
        }
    }
}

impl CaptureThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err("Confidence floor must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.improvement_margin) {
            return Err("Improvement margin must be between 0 and 1".to_string());
        }
        if !self.min_seconds_between_captures.is_finite() || self.min_seconds_between_captures < 0.0 {
            return Err("Minimum seconds between captures must be non-negative".to_string());
        }
        if !self.movement_threshold_px.is_finite() || self.movement_threshold_px < 0.0 {
            return Err("Movement threshold must be non-negative".to_string());
        }
        if self.window_size == 0 {
            return Err("Confidence window must hold at least one sample".to_string());
        }
        if self.streak_reset_secs == 0 {
            return Err("Streak reset interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Per-camera settings for the capture engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera IP or display name, used to prefix log lines
    pub camera: String,
    /// Grid rows used for cell bookkeeping
    pub rows: u32,
    /// Grid columns used for cell bookkeeping
    pub columns: u32,
    /// Detector models active on this camera
    pub models: Vec<String>,
    /// `(row, column)` cells whose detections are ignored
    pub discarded_cells: Vec<(u32, u32)>,
    pub thresholds: CaptureThresholds,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera: "camara-0".to_string(),
            rows: 18,
            columns: 22,
            models: vec!["Personas".to_string()],
            discarded_cells: Vec::new(),
            thresholds: CaptureThresholds::default(),
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.rows == 0 || self.columns == 0 {
            return Err("Grid must have at least one row and one column".to_string());
        }
        self.rows
            .checked_mul(self.columns)
            .ok_or_else(|| "Grid size would cause integer overflow".to_string())?;
        if let Some((r, c)) = self
            .discarded_cells
            .iter()
            .find(|(r, c)| *r >= self.rows || *c >= self.columns)
        {
            return Err(format!("Discarded cell ({}, {}) lies outside the grid", r, c));
        }
        self.thresholds.validate()
    }
}

/// Settings for the line-crossing counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub line: LineModel,
    /// Classify class 1 as a vessel when counting
    pub vessel_model: bool,
    /// Whether the counter accepts batches right after start
    pub enabled: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            line: LineModel::default(),
            vessel_model: false,
            enabled: true,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigiaConfig {
    pub camera: CameraConfig,
    pub counter: CounterConfig,
    /// Root directory for persisted captures
    pub capture_dir: PathBuf,
    /// Optional plain-text event log
    pub event_log: Option<PathBuf>,
}

impl Default for VigiaConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            counter: CounterConfig::default(),
            capture_dir: PathBuf::from("capturas"),
            event_log: None,
        }
    }
}

impl VigiaConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.camera.validate()?;
        self.counter.line.validate()?;
        if self.capture_dir.as_os_str().is_empty() {
            return Err("Capture directory must not be empty".to_string());
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate().map_err(VisionError::Config)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VisionError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = VigiaConfig::default();
        assert_eq!(config.camera.rows, 18);
        assert_eq!(config.camera.columns, 22);
        assert_eq!(config.camera.thresholds.max_captures, 15);
        assert_eq!(config.camera.thresholds.window_size, 5);
        assert!((config.camera.thresholds.confidence_floor - 0.7).abs() < f32::EPSILON);
        assert!(config.counter.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_grid() {
        let mut config = VigiaConfig::default();
        config.camera.rows = 0;
        assert!(config.validate().is_err());

        config.camera.rows = 4;
        config.camera.columns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_grid_overflow() {
        let mut config = VigiaConfig::default();
        config.camera.rows = u32::MAX;
        config.camera.columns = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_discarded_cell_outside_grid() {
        let mut config = VigiaConfig::default();
        config.camera.discarded_cells = vec![(17, 21)];
        assert!(config.validate().is_ok());

        config.camera.discarded_cells = vec![(18, 0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thresholds_validation() {
        let mut thresholds = CaptureThresholds::default();
        thresholds.confidence_floor = 1.5;
        assert!(thresholds.validate().is_err());

        let mut thresholds = CaptureThresholds::default();
        thresholds.min_seconds_between_captures = -1.0;
        assert!(thresholds.validate().is_err());

        let mut thresholds = CaptureThresholds::default();
        thresholds.window_size = 0;
        assert!(thresholds.validate().is_err());

        let mut thresholds = CaptureThresholds::default();
        thresholds.movement_threshold_px = f32::NAN;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_config_validation_line_out_of_range() {
        let mut config = VigiaConfig::default();
        config.counter.line = LineModel::new((0.0, 0.0), (1.2, 0.5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: VigiaConfig =
            serde_json::from_str(r#"{"camera": {"camera": "10.0.0.7", "rows": 4}}"#).unwrap();
        assert_eq!(config.camera.camera, "10.0.0.7");
        assert_eq!(config.camera.rows, 4);
        assert_eq!(config.camera.columns, 22);
        assert_eq!(config.camera.thresholds, CaptureThresholds::default());
    }
}
