//! Plane-to-image homographies.
//!
//! Marker corners give exactly four correspondences, a whole board gives
//! many. Both cases are solved on Hartley-normalized coordinates: four pairs
//! through an 8x8 linear system with `h33 = 1`, more pairs through the SVD
//! null vector of the stacked DLT constraints. [`HomographySolver`] is the
//! seam the capture pipeline calls through.

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Projective map `dst ~ h * src`, scaled so that `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.h * Vector3::new(f64::from(p.x), f64::from(p.y), 1.0);
        Point2::new((q.x / q.z) as f32, (q.y / q.z) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    pub fn apply_all(&self, pts: &[Point2<f32>]) -> Vec<Point2<f32>> {
        pts.iter().map(|&p| self.apply(p)).collect()
    }
}

/// Fits a projective transform `dst ~ H * src` from point correspondences.
pub trait HomographySolver: Send + Sync {
    /// Returns `None` for fewer than 4 pairs, mismatched lengths or a
    /// degenerate configuration.
    fn solve(&self, src: &[Point2<f32>], dst: &[Point2<f32>]) -> Option<Homography>;
}

/// Normalized DLT; exact 4-point solve when given exactly 4 pairs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DltHomographySolver;

impl HomographySolver for DltHomographySolver {
    fn solve(&self, src: &[Point2<f32>], dst: &[Point2<f32>]) -> Option<Homography> {
        estimate_homography_board_to_img(src, dst)
    }
}

/// Points moved to their centroid and scaled to mean distance `sqrt(2)`,
/// with the similarity `t` that did it.
struct Normalized {
    points: Vec<Point2<f64>>,
    t: Matrix3<f64>,
}

impl Normalized {
    fn new(pts: &[Point2<f32>]) -> Self {
        let n = pts.len().max(1) as f64;
        let (sx, sy) = pts
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + f64::from(p.x), sy + f64::from(p.y)));
        let (cx, cy) = (sx / n, sy / n);
        let spread = pts
            .iter()
            .map(|p| (f64::from(p.x) - cx).hypot(f64::from(p.y) - cy))
            .sum::<f64>()
            / n;
        let s = if spread > 1e-12 {
            std::f64::consts::SQRT_2 / spread
        } else {
            1.0
        };
        let points = pts
            .iter()
            .map(|p| Point2::new(s * (f64::from(p.x) - cx), s * (f64::from(p.y) - cy)))
            .collect();
        let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
        Self { points, t }
    }
}

/// `H = T_dst^-1 * Hn * T_src`, rescaled to `h33 = 1`.
fn denormalize(hn: Matrix3<f64>, src: &Normalized, dst: &Normalized) -> Option<Homography> {
    let h = dst.t.try_inverse()? * hn * src.t;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(Homography::new(h / scale))
}

/// Estimate H such that `p_img ~ H * p_board`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(n = board_pts.len())))]
pub fn estimate_homography_board_to_img(
    board_pts: &[Point2<f32>],
    img_pts: &[Point2<f32>],
) -> Option<Homography> {
    if board_pts.len() != img_pts.len() || board_pts.len() < 4 {
        return None;
    }
    if let (Ok(src), Ok(dst)) = (
        <&[Point2<f32>; 4]>::try_from(board_pts),
        <&[Point2<f32>; 4]>::try_from(img_pts),
    ) {
        return homography_from_4pt(src, dst);
    }

    let src = Normalized::new(board_pts);
    let dst = Normalized::new(img_pts);

    // Two rows per pair:
    //   [x y 1 0 0 0 -ux -uy -u]
    //   [0 0 0 x y 1 -vx -vy -v]
    let mut a = DMatrix::<f64>::zeros(2 * board_pts.len(), 9);
    for (k, (s, d)) in src.points.iter().zip(&dst.points).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let r = 2 * k;
        a.row_mut(r)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u]);
        a.row_mut(r + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v]);
    }

    // Null vector: right singular vector of the smallest singular value.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(smallest);
    let hn = Matrix3::from_fn(|r, c| h[3 * r + c]);
    denormalize(hn, &src, &dst)
}

/// Exact homography of 4 correspondences in matching corner order, e.g. one
/// marker's board-plane corners and its detected image corners.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let src = Normalized::new(src);
    let dst = Normalized::new(dst);

    // With h33 = 1, each pair (x, y) -> (u, v) gives
    //   h11 x + h12 y + h13 - h31 u x - h32 u y = u
    //   h21 x + h22 y + h23 - h31 v x - h32 v y = v
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (s, d)) in src.points.iter().zip(&dst.points).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let r = 2 * k;
        a.row_mut(r)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(r + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[r] = u;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    denormalize(hn, &src, &dst)
}
