//! Captured frames and the detection context that produces them.

use crate::projection::BoardProjection;
use crate::timestamp::Timestamp;
use calib_capture_core::{
    BoardLayout, DltHomographySolver, GrayImage, HomographySolver, ImageSize, MarkerDetection,
    MarkerDetector,
};
use std::sync::Arc;

/// Marker detector, board layout and homography solver used to turn a raw
/// image into an [`ImageFrame`].
///
/// Cheap to clone; the calibration worker keeps its own copy.
#[derive(Clone)]
pub struct BoardDetector {
    markers: Arc<dyn MarkerDetector>,
    board: Arc<dyn BoardLayout>,
    homography: Arc<dyn HomographySolver>,
}

impl BoardDetector {
    pub fn new(markers: Arc<dyn MarkerDetector>, board: Arc<dyn BoardLayout>) -> Self {
        Self {
            markers,
            board,
            homography: Arc::new(DltHomographySolver),
        }
    }

    pub fn with_homography_solver(mut self, homography: Arc<dyn HomographySolver>) -> Self {
        self.homography = homography;
        self
    }

    #[inline]
    pub fn board(&self) -> &dyn BoardLayout {
        self.board.as_ref()
    }

    #[inline]
    pub fn homography_solver(&self) -> &dyn HomographySolver {
        self.homography.as_ref()
    }

    fn detect(&self, image: &GrayImage, precise: bool) -> (Vec<MarkerDetection>, Option<BoardProjection>) {
        let markers = self.markers.detect(&image.view(), precise);
        let projection = BoardProjection::from_markers(
            self.board.as_ref(),
            &markers,
            self.homography.as_ref(),
            image.size().max_dimension(),
        );
        (markers, projection)
    }
}

impl std::fmt::Debug for BoardDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardDetector")
            .field("junctions", &self.board.junction_count())
            .finish_non_exhaustive()
    }
}

/// One grayscale frame with its detected markers and board projection.
#[derive(Clone, Debug)]
pub struct ImageFrame {
    image: GrayImage,
    stamp: Timestamp,
    markers: Vec<MarkerDetection>,
    projection: Option<BoardProjection>,
}

impl ImageFrame {
    /// Build a frame using fast marker detection.
    pub fn detect(image: GrayImage, stamp: Timestamp, detector: &BoardDetector) -> Self {
        let (markers, projection) = detector.detect(&image, false);
        Self {
            image,
            stamp,
            markers,
            projection,
        }
    }

    /// Detect again with precise corner localization, replacing markers and
    /// projection.
    pub fn redetect(&mut self, detector: &BoardDetector) {
        let (markers, projection) = detector.detect(&self.image, true);
        self.markers = markers;
        self.projection = projection;
    }

    #[inline]
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    #[inline]
    pub fn stamp(&self) -> Timestamp {
        self.stamp
    }

    #[inline]
    pub fn markers(&self) -> &[MarkerDetection] {
        &self.markers
    }

    #[inline]
    pub fn projection(&self) -> Option<&BoardProjection> {
        self.projection.as_ref()
    }

    #[inline]
    pub fn size(&self) -> ImageSize {
        self.image.size()
    }
}
