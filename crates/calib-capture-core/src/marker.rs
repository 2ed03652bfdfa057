use crate::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// One decoded fiducial marker with its image corners (TL, TR, BR, BL).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub id: u32,
    pub corners: [Point2<f32>; 4],
}

impl MarkerDetection {
    pub fn new(id: u32, corners: [Point2<f32>; 4]) -> Self {
        Self { id, corners }
    }
}

/// Finds fiducial markers in a grayscale frame.
///
/// `precise` selects refined corner localization over the fast path; the
/// capture loop runs fast, the calibration sweep re-detects precisely.
pub trait MarkerDetector: Send + Sync {
    fn detect(&self, image: &GrayImageView<'_>, precise: bool) -> Vec<MarkerDetection>;
}
