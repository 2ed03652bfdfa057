//! ChArUco board layout: marker placement, junction ids and adjacency.
//!
//! Board frame: origin at the top-left board corner, x to the right, y down,
//! z = 0 on the board plane. Marker corners are ordered TL, TR, BR, BL.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Index of a marker corner in TL, TR, BR, BL order.
pub type CornerIndex = usize;

/// Static board specification.
///
/// `squares_x`/`squares_y` are **square counts** (not inner junction counts).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoardSpec {
    pub squares_x: u32,
    pub squares_y: u32,
    /// Side of one chessboard square, in board units.
    pub square_length: f32,
    /// Side of one marker, in board units.
    pub marker_length: f32,
    /// When false the top-left square is black and carries no marker.
    #[serde(default)]
    pub upper_left_white_not_black: bool,
}

impl Default for CharucoBoardSpec {
    fn default() -> Self {
        Self {
            squares_x: 12,
            squares_y: 9,
            square_length: 0.06,
            marker_length: 0.045,
            upper_left_white_not_black: false,
        }
    }
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum BoardError {
    #[error("squares_x and squares_y must be >= 2")]
    InvalidSize,
    #[error("square_length must be > 0")]
    InvalidSquareLength,
    #[error("marker_length must be in (0, square_length)")]
    InvalidMarkerLength,
}

/// One marker touching a junction, plus which of its corners is nearest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdjacentMarker {
    pub marker_id: u32,
    pub closest_corner: CornerIndex,
}

/// Geometry queries the junction interpolator and board projection need.
pub trait BoardLayout: Send + Sync {
    /// Number of lattice junctions; valid ids are `0..junction_count()`.
    fn junction_count(&self) -> usize;

    /// Junctions per board row, used to lay out per-junction reports.
    fn junctions_per_row(&self) -> usize;

    /// Board-plane location of a junction.
    fn junction_location(&self, junction_id: usize) -> Option<Point2<f32>>;

    /// The markers (1 or 2) adjacent to a junction, in a stable order.
    fn adjacent_markers(&self, junction_id: usize) -> Vec<AdjacentMarker>;

    /// Board-plane corners of a marker (TL, TR, BR, BL).
    fn marker_corners(&self, marker_id: u32) -> Option<[Point2<f32>; 4]>;

    /// Outer corners of the whole board (TL, TR, BR, BL).
    fn board_corners(&self) -> [Point2<f32>; 4];
}

/// Precomputed board mapping helpers.
#[derive(Clone, Debug)]
pub struct CharucoBoard {
    spec: CharucoBoardSpec,
    /// Marker id -> square cell `(sx, sy)`.
    marker_cells: Vec<[u32; 2]>,
    /// Square cell (row-major) -> marker id, `None` for black squares.
    cell_markers: Vec<Option<u32>>,
}

impl CharucoBoard {
    /// Validate and create a board from a spec.
    pub fn new(spec: CharucoBoardSpec) -> Result<Self, BoardError> {
        if spec.squares_x < 2 || spec.squares_y < 2 {
            return Err(BoardError::InvalidSize);
        }
        if !spec.square_length.is_finite() || spec.square_length <= 0.0 {
            return Err(BoardError::InvalidSquareLength);
        }
        if !spec.marker_length.is_finite()
            || spec.marker_length <= 0.0
            || spec.marker_length >= spec.square_length
        {
            return Err(BoardError::InvalidMarkerLength);
        }

        let mut marker_cells = Vec::new();
        let mut cell_markers = vec![None; (spec.squares_x * spec.squares_y) as usize];
        for sy in 0..spec.squares_y {
            for sx in 0..spec.squares_x {
                if is_white_square(&spec, sx, sy) {
                    cell_markers[(sy * spec.squares_x + sx) as usize] =
                        Some(marker_cells.len() as u32);
                    marker_cells.push([sx, sy]);
                }
            }
        }

        Ok(Self {
            spec,
            marker_cells,
            cell_markers,
        })
    }

    /// Return the underlying board specification.
    #[inline]
    pub fn spec(&self) -> CharucoBoardSpec {
        self.spec
    }

    /// Number of markers on the board.
    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_cells.len()
    }

    /// Square-cell coordinates `(sx, sy)` for the given marker id.
    pub fn marker_cell(&self, marker_id: u32) -> Option<[u32; 2]> {
        self.marker_cells.get(marker_id as usize).copied()
    }

    fn marker_at(&self, sx: u32, sy: u32) -> Option<u32> {
        if sx >= self.spec.squares_x || sy >= self.spec.squares_y {
            return None;
        }
        self.cell_markers[(sy * self.spec.squares_x + sx) as usize]
    }

    /// Inner-intersection coordinates `(ix, iy)` of a junction, both >= 1.
    fn junction_cell(&self, junction_id: usize) -> Option<[u32; 2]> {
        if junction_id >= self.junction_count() {
            return None;
        }
        let stride = self.junctions_per_row();
        let ix = (junction_id % stride) as u32 + 1;
        let iy = (junction_id / stride) as u32 + 1;
        Some([ix, iy])
    }
}

fn is_white_square(spec: &CharucoBoardSpec, sx: u32, sy: u32) -> bool {
    // Top-left black => white squares have (sx + sy) odd.
    let odd = (sx + sy) % 2 == 1;
    odd != spec.upper_left_white_not_black
}

impl BoardLayout for CharucoBoard {
    fn junction_count(&self) -> usize {
        ((self.spec.squares_x - 1) * (self.spec.squares_y - 1)) as usize
    }

    fn junctions_per_row(&self) -> usize {
        (self.spec.squares_x - 1) as usize
    }

    fn junction_location(&self, junction_id: usize) -> Option<Point2<f32>> {
        let [ix, iy] = self.junction_cell(junction_id)?;
        let s = self.spec.square_length;
        Some(Point2::new(ix as f32 * s, iy as f32 * s))
    }

    fn adjacent_markers(&self, junction_id: usize) -> Vec<AdjacentMarker> {
        let Some([ix, iy]) = self.junction_cell(junction_id) else {
            return Vec::new();
        };
        // The four squares around the junction, with the marker corner that
        // touches the junction side of each square.
        let around = [
            (ix - 1, iy - 1, 2), // square up-left: its BR corner
            (ix, iy - 1, 3),     // up-right: BL
            (ix - 1, iy, 1),     // down-left: TR
            (ix, iy, 0),         // down-right: TL
        ];
        around
            .into_iter()
            .filter_map(|(sx, sy, corner)| {
                self.marker_at(sx, sy).map(|marker_id| AdjacentMarker {
                    marker_id,
                    closest_corner: corner,
                })
            })
            .collect()
    }

    fn marker_corners(&self, marker_id: u32) -> Option<[Point2<f32>; 4]> {
        let [sx, sy] = self.marker_cell(marker_id)?;
        let s = self.spec.square_length;
        let m = self.spec.marker_length;
        let x0 = sx as f32 * s + 0.5 * (s - m);
        let y0 = sy as f32 * s + 0.5 * (s - m);
        Some([
            Point2::new(x0, y0),
            Point2::new(x0 + m, y0),
            Point2::new(x0 + m, y0 + m),
            Point2::new(x0, y0 + m),
        ])
    }

    fn board_corners(&self) -> [Point2<f32>; 4] {
        let w = self.spec.squares_x as f32 * self.spec.square_length;
        let h = self.spec.squares_y as f32 * self.spec.square_length;
        [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ]
    }
}
