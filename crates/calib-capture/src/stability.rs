//! Frame-to-frame board motion test.

use crate::projection::{longest_side, BoardProjection};
use nalgebra::Point2;

/// Normalization constant applied with the longest board side.
const LONGEST_SIDE_SCALE: f64 = 0.001;

/// Decides whether the board stopped moving by comparing the outer corners
/// of consecutive frames.
///
/// The baseline slides: every [`test_stationary`](Self::test_stationary)
/// compares against the corners of the previous call.
#[derive(Clone, Debug)]
pub struct StabilityTracker {
    baseline: [Point2<f32>; 4],
    threshold: f64,
}

impl StabilityTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            baseline: [Point2::origin(); 4],
            threshold,
        }
    }

    pub fn reset(&mut self, projection: &BoardProjection) {
        self.baseline = *projection.corners();
    }

    #[inline]
    pub fn baseline(&self) -> &[Point2<f32>; 4] {
        &self.baseline
    }

    /// Normalized motion metric of `projection` against the baseline.
    ///
    /// Summed corner displacement divided by `4 * longest_side * 0.001`, so
    /// the same relative jitter scores the same at any apparent board size.
    pub fn motion(&self, projection: &BoardProjection) -> f64 {
        let corners = projection.corners();
        let delta: f64 = corners
            .iter()
            .zip(self.baseline.iter())
            .map(|(c, b)| f64::from((c - b).norm()))
            .sum();
        let longest = longest_side(corners);
        if longest <= 0.0 {
            return f64::INFINITY;
        }
        delta / (4.0 * longest * LONGEST_SIDE_SCALE)
    }

    /// Returns true when the board moved less than the threshold since the
    /// last call, then moves the baseline to `projection`.
    pub fn test_stationary(&mut self, projection: &BoardProjection) -> bool {
        let metric = self.motion(projection);
        self.baseline = *projection.corners();
        metric < self.threshold
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(5.0)
    }
}
