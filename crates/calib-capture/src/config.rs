//! JSON configuration for a calibration session.

use crate::error::{ConfigError, PersistError};
use crate::style::CalibrationStyle;
use calib_capture_core::{CharucoBoard, CharucoBoardSpec};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Thresholds of the capture state machine and the preview rotation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTiming {
    /// Continuous in-view time before tracking starts.
    pub min_ready_ms: i64,
    /// Stationary dwell before a frame is captured.
    pub min_stationary_secs: f64,
    /// Motion metric below which the board counts as stationary.
    pub stationary_threshold: f64,
    /// How long each annotated frame stays in the preview.
    pub preview_period_ms: i64,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            min_ready_ms: 500,
            min_stationary_secs: 4.0,
            stationary_threshold: 5.0,
            preview_period_ms: 1500,
        }
    }
}

fn default_images_file_name() -> String {
    "calibration_images".to_string()
}

fn default_camera_name() -> String {
    "camera".to_string()
}

fn default_camera_info_path() -> String {
    "camera_info.json".to_string()
}

fn default_style_to_save() -> usize {
    CalibrationStyle::K2Free.index()
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrateConfig {
    #[serde(default)]
    pub board: CharucoBoardSpec,
    /// Base path of saved image sets: `<base>.json` plus `<base>_NNN.png`.
    #[serde(default = "default_images_file_name")]
    pub images_file_name: String,
    #[serde(default = "default_camera_name")]
    pub camera_name: String,
    #[serde(default = "default_camera_info_path")]
    pub camera_info_path: String,
    /// Index of the style whose result is saved and detailed per junction.
    #[serde(default = "default_style_to_save")]
    pub style_to_save: usize,
    #[serde(default)]
    pub timing: CaptureTiming,
}

impl Default for CalibrateConfig {
    fn default() -> Self {
        Self {
            board: CharucoBoardSpec::default(),
            images_file_name: default_images_file_name(),
            camera_name: default_camera_name(),
            camera_info_path: default_camera_info_path(),
            style_to_save: default_style_to_save(),
            timing: CaptureTiming::default(),
        }
    }
}

impl CalibrateConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build a validated board from the config.
    pub fn build_board(&self) -> Result<CharucoBoard, ConfigError> {
        Ok(CharucoBoard::new(self.board)?)
    }

    /// Style to persist, clamped into the defined range.
    pub fn style_to_save(&self) -> CalibrationStyle {
        CalibrationStyle::from_index_clamped(self.style_to_save)
    }

    pub fn header_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.json", self.images_file_name))
    }

    pub fn image_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}_{:03}.png", self.images_file_name, index))
    }

    pub fn camera_info_path(&self) -> PathBuf {
        PathBuf::from(&self.camera_info_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: CalibrateConfig = serde_json::from_str(
            r#"{ "camera_name": "front", "timing": { "min_stationary_secs": 2.5 } }"#,
        )
        .expect("config");
        assert_eq!(cfg.camera_name, "front");
        assert_eq!(cfg.board, CharucoBoardSpec::default());
        assert_eq!(cfg.timing.min_stationary_secs, 2.5);
        assert_eq!(cfg.timing.min_ready_ms, 500);
        assert_eq!(cfg.style_to_save(), CalibrationStyle::K2Free);
    }

    #[test]
    fn style_index_is_clamped() {
        let cfg = CalibrateConfig {
            style_to_save: 99,
            ..CalibrateConfig::default()
        };
        assert_eq!(cfg.style_to_save(), *CalibrationStyle::ALL.last().expect("styles"));
    }

    #[test]
    fn image_paths_follow_base_name() {
        let cfg = CalibrateConfig {
            images_file_name: "/tmp/set".to_string(),
            ..CalibrateConfig::default()
        };
        assert_eq!(cfg.header_path(), PathBuf::from("/tmp/set.json"));
        assert_eq!(cfg.image_path(7), PathBuf::from("/tmp/set_007.png"));
    }

    #[test]
    fn json_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        let cfg = CalibrateConfig {
            style_to_save: 4,
            ..CalibrateConfig::default()
        };
        cfg.write_json(&path).expect("write");
        assert_eq!(CalibrateConfig::load_json(&path).expect("load"), cfg);
    }
}
