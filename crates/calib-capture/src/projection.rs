//! Outer board boundary projected into one image.

use calib_capture_core::{BoardLayout, HomographySolver, MarkerDetection};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// The four outer board corners (TL, TR, BR, BL) in image pixels.
///
/// Created per frame when a board is seen and never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardProjection {
    corners: [Point2<f32>; 4],
    delta_scale_factor: f64,
}

impl BoardProjection {
    /// `max_image_dimension` is `max(width, height)` of the frame.
    pub fn new(corners: [Point2<f32>; 4], max_image_dimension: usize) -> Self {
        let longest = longest_side(&corners);
        let delta_scale_factor = if longest > 0.0 {
            max_image_dimension as f64 / 4.0 / longest
        } else {
            0.0
        };
        Self {
            corners,
            delta_scale_factor,
        }
    }

    /// Fit a board-to-image homography from every detected marker corner and
    /// project the outer board corners through it.
    ///
    /// Returns `None` without markers or when the fit fails.
    pub fn from_markers(
        board: &dyn BoardLayout,
        markers: &[MarkerDetection],
        solver: &dyn HomographySolver,
        max_image_dimension: usize,
    ) -> Option<Self> {
        if markers.is_empty() {
            return None;
        }
        let mut board_pts = Vec::with_capacity(markers.len() * 4);
        let mut image_pts = Vec::with_capacity(markers.len() * 4);
        for m in markers {
            let Some(on_board) = board.marker_corners(m.id) else {
                log::debug!("marker {} is not on the board, ignored", m.id);
                continue;
            };
            board_pts.extend_from_slice(&on_board);
            image_pts.extend_from_slice(&m.corners);
        }

        let h = solver.solve(&board_pts, &image_pts)?;
        let corners = board.board_corners().map(|p| h.apply(p));
        if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return None;
        }
        Some(Self::new(corners, max_image_dimension))
    }

    #[inline]
    pub fn corners(&self) -> &[Point2<f32>; 4] {
        &self.corners
    }

    /// Pixels-per-unit normalization: `max_image_dimension / 4 / longest_side`.
    #[inline]
    pub fn delta_scale_factor(&self) -> f64 {
        self.delta_scale_factor
    }

    pub fn longest_side(&self) -> f64 {
        longest_side(&self.corners)
    }

    /// Summed corner displacement to `other`, scaled by this projection's
    /// `delta_scale_factor`.
    pub fn corner_pixel_delta(&self, other: &BoardProjection) -> f64 {
        let delta: f64 = self
            .corners
            .iter()
            .zip(other.corners.iter())
            .map(|(a, b)| f64::from((b - a).norm()))
            .sum();
        delta * self.delta_scale_factor
    }
}

pub(crate) fn longest_side(corners: &[Point2<f32>; 4]) -> f64 {
    (0..4)
        .map(|i| f64::from((corners[(i + 1) % 4] - corners[i]).norm()))
        .fold(0.0, f64::max)
}
