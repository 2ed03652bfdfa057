//! Synthetic scenes: a ChArUco board seen by a known pinhole camera.

#![allow(dead_code)]

use calib_capture::core::{
    BoardLayout, CharucoBoard, CharucoBoardSpec, GrayImage, GrayImageView, MarkerDetection,
    MarkerDetector,
};
use calib_capture::solver::{camera_matrix, project_point, Distortion, ViewPose};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

pub const WIDTH: usize = 640;
pub const HEIGHT: usize = 480;

/// Principal point at the pixel-centre convention used when no guess is given.
pub fn camera() -> Matrix3<f64> {
    camera_matrix(600.0, 600.0, 319.5, 239.5)
}

pub fn board() -> CharucoBoard {
    CharucoBoard::new(CharucoBoardSpec::default()).expect("board")
}

/// Pose looking at the board centre with the given tilt and distance.
pub fn pose(rx: f64, ry: f64, rz: f64, depth: f64) -> ViewPose {
    let spec = CharucoBoardSpec::default();
    let centre = Vector3::new(
        0.5 * spec.squares_x as f64 * spec.square_length as f64,
        0.5 * spec.squares_y as f64 * spec.square_length as f64,
        0.0,
    );
    let rot = Rotation3::from_euler_angles(rx, ry, rz);
    ViewPose {
        rvec: rot.scaled_axis(),
        tvec: Vector3::new(0.0, 0.0, depth) - rot * centre,
    }
}

/// Views with enough tilt variety for a full calibration.
pub fn calibration_poses() -> Vec<ViewPose> {
    vec![
        pose(0.3, 0.0, 0.0, 1.3),
        pose(-0.3, 0.1, 0.05, 1.4),
        pose(0.0, 0.35, -0.1, 1.5),
        pose(0.1, -0.3, 0.15, 1.35),
        pose(0.25, 0.25, 0.0, 1.6),
        pose(-0.2, -0.2, -0.1, 1.45),
    ]
}

/// Every marker of `board` projected through `pose`, shifted by `shift` pixels.
pub fn project_markers(board: &CharucoBoard, pose: &ViewPose, shift: f32) -> Vec<MarkerDetection> {
    let k = camera();
    (0..board.marker_count() as u32)
        .filter_map(|id| {
            let corners = board.marker_corners(id)?.map(|c| {
                let uv = project_point(
                    &k,
                    &Distortion::default(),
                    pose,
                    &Point3::new(c.x as f64, c.y as f64, 0.0),
                );
                Point2::new(uv.x as f32 + shift, uv.y as f32)
            });
            Some(MarkerDetection::new(id, corners))
        })
        .collect()
}

/// Returns the markers of scene `k` for an image whose first pixel is `k`.
/// Scene 0 is always empty.
pub struct ScriptedDetector {
    scenes: Vec<Vec<MarkerDetection>>,
}

impl ScriptedDetector {
    pub fn new(scenes: Vec<Vec<MarkerDetection>>) -> Self {
        let mut all = vec![Vec::new()];
        all.extend(scenes);
        Self { scenes: all }
    }
}

impl MarkerDetector for ScriptedDetector {
    fn detect(&self, image: &GrayImageView<'_>, _precise: bool) -> Vec<MarkerDetection> {
        let key = image.data.first().copied().unwrap_or(0) as usize;
        self.scenes.get(key).cloned().unwrap_or_default()
    }
}

/// Uniform frame selecting scene `key`.
pub fn frame(key: u8) -> GrayImage {
    GrayImage::filled(WIDTH, HEIGHT, key)
}

/// Route `log` output through the test harness; `RUST_LOG=debug` shows it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
