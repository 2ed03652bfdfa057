//! Image sets and calibration records on disk.
//!
//! An image set is a JSON header (`<base>.json`) listing one PNG per frame
//! (`<base>_NNN.png`). Image file names in the header are relative to the
//! header's directory.

use crate::config::CalibrateConfig;
use crate::error::PersistError;
use crate::frame::{BoardDetector, ImageFrame};
use crate::store::CapturedImageStore;
use crate::sweep::CalibrationResult;
use crate::timestamp::{ClockKind, Timestamp};
use calib_capture_core::{GrayImage, ImageSize};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// One entry of an image-set header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub name: String,
    /// Nanoseconds, kept as text so the value survives any JSON reader.
    pub stamp: String,
    pub clock: ClockKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSetHeader {
    pub width: usize,
    pub height: usize,
    pub images: Vec<ImageEntry>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Write every captured frame as PNG plus the header; returns the header path.
pub fn save_images(store: &CapturedImageStore, config: &CalibrateConfig) -> Result<PathBuf, PersistError> {
    if store.is_empty() {
        return Err(PersistError::EmptyStore);
    }
    let header_path = config.header_path();
    if let Some(dir) = header_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let mut images = Vec::with_capacity(store.len());
    for (index, frame) in store.frames().iter().enumerate() {
        let path = config.image_path(index);
        let img = frame.image();
        let buffer = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
            .ok_or(PersistError::SizeMismatch {
                index,
                expected: store.size(),
                actual: img.size(),
            })?;
        buffer.save(&path)?;
        images.push(ImageEntry {
            name: file_name(&path),
            stamp: frame.stamp().nanos.to_string(),
            clock: frame.stamp().clock,
        });
    }

    let header = ImageSetHeader {
        width: store.size().width,
        height: store.size().height,
        images,
    };
    fs::write(&header_path, serde_json::to_string_pretty(&header)?)?;
    log::info!("saved {} images to {}", store.len(), header_path.display());
    Ok(header_path)
}

/// Rebuild a store from a saved set, detecting markers afresh in every image.
pub fn load_images(config: &CalibrateConfig, detector: &BoardDetector) -> Result<CapturedImageStore, PersistError> {
    let header_path = config.header_path();
    let header: ImageSetHeader = serde_json::from_str(&fs::read_to_string(&header_path)?)?;
    let dir = header_path.parent().unwrap_or_else(|| Path::new(""));
    let size = ImageSize::new(header.width, header.height);

    let mut store = CapturedImageStore::new(size);
    for (index, entry) in header.images.iter().enumerate() {
        let nanos: i64 = entry.stamp.parse().map_err(|_| PersistError::InvalidStamp {
            index,
            value: entry.stamp.clone(),
        })?;
        let luma = image::open(dir.join(&entry.name))?.to_luma8();
        let actual = ImageSize::new(luma.width() as usize, luma.height() as usize);
        let gray = GrayImage::from_raw(actual.width, actual.height, luma.into_raw())
            .filter(|g| g.size() == size)
            .ok_or(PersistError::SizeMismatch {
                index,
                expected: size,
                actual,
            })?;
        let frame = ImageFrame::detect(gray, Timestamp::new(nanos, entry.clock), detector);
        store
            .capture(frame)
            .map_err(|rejected| PersistError::SizeMismatch {
                index,
                expected: rejected.expected,
                actual: rejected.actual,
            })?;
    }
    log::info!("loaded {} images from {}", store.len(), header_path.display());
    Ok(store)
}

/// Camera intrinsics in the layout of a ROS `CameraInfo` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub camera_name: String,
    pub stamp: Timestamp,
    pub width: usize,
    pub height: usize,
    pub distortion_model: String,
    pub k: [f64; 9],
    pub d: [f64; 5],
    pub r: [f64; 9],
    pub p: [f64; 12],
}

impl CameraInfo {
    pub fn from_result(camera_name: &str, stamp: Timestamp, size: ImageSize, result: &CalibrationResult) -> Self {
        let m = &result.solution.camera_matrix;
        let mut k = [0.0; 9];
        let mut p = [0.0; 12];
        for row in 0..3 {
            for col in 0..3 {
                k[row * 3 + col] = m[(row, col)];
                p[row * 4 + col] = m[(row, col)];
            }
        }
        Self {
            camera_name: camera_name.to_string(),
            stamp,
            width: size.width,
            height: size.height,
            distortion_model: "plumb_bob".to_string(),
            k,
            d: result.solution.distortion.to_array(),
            r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            p,
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Write `info` to the configured path and describe where it went.
pub fn save_camera_info(info: &CameraInfo, config: &CalibrateConfig) -> Result<String, PersistError> {
    let path = config.camera_info_path();
    info.write_json(&path)?;
    log::info!("camera info for '{}' written to {}", info.camera_name, path.display());
    Ok(format!(
        "Calibration for camera '{}' saved to file: {}\n",
        info.camera_name,
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_capture_core::{CharucoBoard, CharucoBoardSpec, GrayImageView, MarkerDetection, MarkerDetector};
    use std::sync::Arc;

    struct NoMarkers;

    impl MarkerDetector for NoMarkers {
        fn detect(&self, _image: &GrayImageView<'_>, _precise: bool) -> Vec<MarkerDetection> {
            Vec::new()
        }
    }

    fn detector() -> BoardDetector {
        let board = CharucoBoard::new(CharucoBoardSpec::default()).expect("board");
        BoardDetector::new(Arc::new(NoMarkers), Arc::new(board))
    }

    #[test]
    fn empty_store_is_not_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CalibrateConfig {
            images_file_name: dir.path().join("set").to_string_lossy().into_owned(),
            ..CalibrateConfig::default()
        };
        let store = CapturedImageStore::new(ImageSize::new(4, 4));
        assert!(matches!(save_images(&store, &config), Err(PersistError::EmptyStore)));
        assert!(!config.header_path().exists());
    }

    #[test]
    fn pixels_and_stamps_survive_a_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CalibrateConfig {
            images_file_name: dir.path().join("set").to_string_lossy().into_owned(),
            ..CalibrateConfig::default()
        };
        let detector = detector();
        let mut store = CapturedImageStore::new(ImageSize::new(5, 3));
        let data: Vec<u8> = (0..15).map(|v| v * 10).collect();
        let image = GrayImage::from_raw(5, 3, data).expect("image");
        let stamp = Timestamp::new(1_234_567_890_123, ClockKind::Steady);
        store
            .capture(ImageFrame::detect(image.clone(), stamp, &detector))
            .expect("capture");

        let header = save_images(&store, &config).expect("save");
        let raw = fs::read_to_string(header).expect("header");
        assert!(raw.contains("\"set_000.png\""));
        assert!(raw.contains("\"1234567890123\""));

        let loaded = load_images(&config, &detector).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.size(), ImageSize::new(5, 3));
        assert_eq!(loaded.frames()[0].image(), &image);
        assert_eq!(loaded.frames()[0].stamp(), stamp);
    }

    #[test]
    fn bad_stamp_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CalibrateConfig {
            images_file_name: dir.path().join("set").to_string_lossy().into_owned(),
            ..CalibrateConfig::default()
        };
        let header = ImageSetHeader {
            width: 2,
            height: 2,
            images: vec![ImageEntry {
                name: "missing.png".to_string(),
                stamp: "soon".to_string(),
                clock: ClockKind::System,
            }],
        };
        fs::write(config.header_path(), serde_json::to_string(&header).expect("json")).expect("write");
        let err = load_images(&config, &detector()).unwrap_err();
        assert!(matches!(err, PersistError::InvalidStamp { index: 0, .. }));
    }
}
