//! Sub-pixel junction localization from local marker homographies.
//!
//! Each detected marker gives an exact 4-point homography valid near that
//! marker. A junction is predicted through the homographies of its (one or
//! two) adjacent markers, the predictions are averaged, and the result is
//! refined on the image inside a window that stays clear of the marker
//! corners.

use calib_capture_core::{
    BoardLayout, GrayImageView, Homography, HomographySolver, MarkerDetection, SubPixWindow,
    SubPixelRefiner,
};
use log::debug;
use nalgebra::{Point2, Point3};
use std::collections::BTreeMap;

/// Smallest and largest half-window used for refinement, in pixels.
const MIN_HALF_WINDOW: i32 = 2;
const MAX_HALF_WINDOW: i32 = 10;

/// Junctions found in one frame.
///
/// `board_points[i]` and `image_points[i]` describe the same junction;
/// `index_of` maps junction ids to `i`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameJunctions {
    pub board_points: Vec<Point3<f32>>,
    pub image_points: Vec<Point2<f32>>,
    pub windows: Vec<SubPixWindow>,
    pub index_of: BTreeMap<usize, usize>,
}

impl FrameJunctions {
    #[inline]
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }

    /// Refined image location of a junction, if it was found.
    pub fn image_point(&self, junction_id: usize) -> Option<Point2<f32>> {
        self.index_of
            .get(&junction_id)
            .map(|&i| self.image_points[i])
    }

    fn push(&mut self, junction_id: usize, board: Point2<f32>, image: Point2<f32>, window: SubPixWindow) {
        self.index_of.insert(junction_id, self.image_points.len());
        self.board_points.push(Point3::new(board.x, board.y, 0.0));
        self.image_points.push(image);
        self.windows.push(window);
    }
}

/// Local homography of one detected marker and its index in the detection list.
#[derive(Clone, Copy, Debug)]
pub struct MarkerHomography {
    pub homography: Homography,
    pub detection_index: usize,
}

pub struct JunctionInterpolator<'a> {
    board: &'a dyn BoardLayout,
    homography: &'a dyn HomographySolver,
    refiner: &'a dyn SubPixelRefiner,
}

impl<'a> JunctionInterpolator<'a> {
    pub fn new(
        board: &'a dyn BoardLayout,
        homography: &'a dyn HomographySolver,
        refiner: &'a dyn SubPixelRefiner,
    ) -> Self {
        Self {
            board,
            homography,
            refiner,
        }
    }

    /// Fit one homography per detected marker from its 4 corners.
    ///
    /// Markers not on the board or with a degenerate fit are left out; the
    /// first detection of a repeated id wins.
    pub fn marker_homographies(&self, markers: &[MarkerDetection]) -> BTreeMap<u32, MarkerHomography> {
        let mut out = BTreeMap::new();
        for (detection_index, m) in markers.iter().enumerate() {
            if out.contains_key(&m.id) {
                continue;
            }
            let Some(on_board) = self.board.marker_corners(m.id) else {
                continue;
            };
            match self.homography.solve(&on_board, &m.corners) {
                Some(homography) => {
                    out.insert(
                        m.id,
                        MarkerHomography {
                            homography,
                            detection_index,
                        },
                    );
                }
                None => debug!("marker {} homography is degenerate", m.id),
            }
        }
        out
    }

    /// Locate every board junction that has at least one detected neighbour marker.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(markers = markers.len())))]
    pub fn interpolate(&self, image: &GrayImageView<'_>, markers: &[MarkerDetection]) -> FrameJunctions {
        let homographies = self.marker_homographies(markers);
        let mut out = FrameJunctions::default();

        for junction_id in 0..self.board.junction_count() {
            let Some(location) = self.board.junction_location(junction_id) else {
                continue;
            };

            let mut candidates: Vec<Point2<f32>> = Vec::with_capacity(2);
            let mut closest: Vec<Point2<f32>> = Vec::with_capacity(2);
            for adj in self.board.adjacent_markers(junction_id) {
                if let Some(mh) = homographies.get(&adj.marker_id) {
                    candidates.push(mh.homography.apply(location));
                    closest.push(markers[mh.detection_index].corners[adj.closest_corner]);
                }
            }
            if candidates.is_empty() {
                continue;
            }

            let n = candidates.len() as f32;
            let sum = candidates
                .iter()
                .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
            let mean = Point2::from(sum / n);
            if !mean.x.is_finite() || !mean.y.is_finite() {
                continue;
            }

            let window = sub_pix_window(mean, &closest);
            let refined = self.refiner.refine(image, mean, window);
            out.push(junction_id, location, refined, window);
        }

        debug!(
            "interpolated {} of {} junctions from {} markers",
            out.len(),
            self.board.junction_count(),
            markers.len()
        );
        out
    }
}

/// Half-window that keeps the refinement away from the marker corners.
///
/// Per axis: the smallest distance from the candidate to any of the
/// `closest` corners, floored, minus one pixel, clamped to `[2, 10]`.
pub fn sub_pix_window(candidate: Point2<f32>, closest: &[Point2<f32>]) -> SubPixWindow {
    let (dx, dy) = closest.iter().fold((f32::INFINITY, f32::INFINITY), |(dx, dy), c| {
        (dx.min((candidate.x - c.x).abs()), dy.min((candidate.y - c.y).abs()))
    });
    let axis = |d: f32| {
        let d = if d.is_finite() { d.floor() as i32 } else { MAX_HALF_WINDOW };
        (d - 1).clamp(MIN_HALF_WINDOW, MAX_HALF_WINDOW) as u32
    };
    SubPixWindow::new(axis(dx), axis(dy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calib_capture_core::{CharucoBoard, CharucoBoardSpec, DltHomographySolver};

    struct KeepCandidate;

    impl SubPixelRefiner for KeepCandidate {
        fn refine(&self, _image: &GrayImageView<'_>, candidate: Point2<f32>, _w: SubPixWindow) -> Point2<f32> {
            candidate
        }
    }

    fn board() -> CharucoBoard {
        CharucoBoard::new(CharucoBoardSpec {
            squares_x: 5,
            squares_y: 4,
            square_length: 1.0,
            marker_length: 0.6,
            upper_left_white_not_black: false,
        })
        .expect("board")
    }

    fn to_image(p: Point2<f32>) -> Point2<f32> {
        Point2::new(40.0 * p.x + 10.0, 40.0 * p.y + 20.0)
    }

    #[test]
    fn window_is_clamped_per_axis() {
        let c = Point2::new(50.0, 50.0);
        let w = sub_pix_window(c, &[Point2::new(57.9, 50.5)]);
        assert_eq!(w, SubPixWindow::new(6, 2));
        let w = sub_pix_window(c, &[Point2::new(80.0, 80.0), Point2::new(20.0, 75.0)]);
        assert_eq!(w, SubPixWindow::new(10, 10));
    }

    #[test]
    fn junctions_follow_detected_markers_only() {
        let board = board();
        let markers: Vec<MarkerDetection> = [0u32, 1]
            .iter()
            .map(|&id| MarkerDetection::new(id, board.marker_corners(id).expect("marker").map(to_image)))
            .collect();
        let img = calib_capture_core::GrayImage::filled(240, 200, 128);
        let interp = JunctionInterpolator::new(&board, &DltHomographySolver, &KeepCandidate);
        let found = interp.interpolate(&img.view(), &markers);

        assert!(!found.is_empty());
        for (&id, &i) in &found.index_of {
            assert!(id < board.junction_count());
            let has_neighbour = board
                .adjacent_markers(id)
                .iter()
                .any(|a| a.marker_id == 0 || a.marker_id == 1);
            assert!(has_neighbour, "junction {id} has no detected neighbour");
            let expected = to_image(board.junction_location(id).expect("junction"));
            assert!((found.image_points[i] - expected).norm() < 1e-2);
            assert_eq!(found.board_points[i].z, 0.0);
        }
        assert_eq!(found.board_points.len(), found.image_points.len());
    }

    #[test]
    fn unknown_marker_ids_are_ignored() {
        let board = board();
        let markers = vec![MarkerDetection::new(999, [Point2::origin(); 4])];
        let img = calib_capture_core::GrayImage::filled(16, 16, 0);
        let interp = JunctionInterpolator::new(&board, &DltHomographySolver, &KeepCandidate);
        assert!(interp.interpolate(&img.view(), &markers).is_empty());
    }
}
