//! Sub-pixel refinement of saddle-type corners (chessboard junctions).
//!
//! Uses the gradient-orthogonality criterion: at the true corner `q`, every
//! image gradient `g(p)` in a neighbourhood is orthogonal to `p - q`. Each
//! iteration solves the weighted 2x2 normal equations of that condition and
//! re-centres the window on the new estimate.

use crate::{gradient_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Half-sizes of the search window; the window spans `2*half+1` pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPixWindow {
    pub half_width: u32,
    pub half_height: u32,
}

impl SubPixWindow {
    pub fn new(half_width: u32, half_height: u32) -> Self {
        Self {
            half_width,
            half_height,
        }
    }
}

/// Refines a candidate corner location inside a search window.
pub trait SubPixelRefiner: Send + Sync {
    fn refine(
        &self,
        image: &GrayImageView<'_>,
        candidate: Point2<f32>,
        window: SubPixWindow,
    ) -> Point2<f32>;
}

/// Termination criteria for [`CornerSubPixRefiner`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CornerSubPixParams {
    pub max_iters: usize,
    /// Stop once the squared update falls below `epsilon^2`.
    pub epsilon: f64,
}

impl Default for CornerSubPixParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            epsilon: f64::EPSILON,
        }
    }
}

/// Iterative gradient-orthogonality refiner.
#[derive(Clone, Copy, Debug, Default)]
pub struct CornerSubPixRefiner {
    pub params: CornerSubPixParams,
}

impl CornerSubPixRefiner {
    pub fn new(params: CornerSubPixParams) -> Self {
        Self { params }
    }
}

impl SubPixelRefiner for CornerSubPixRefiner {
    fn refine(
        &self,
        image: &GrayImageView<'_>,
        candidate: Point2<f32>,
        window: SubPixWindow,
    ) -> Point2<f32> {
        let wx = window.half_width.max(1) as i32;
        let wy = window.half_height.max(1) as i32;

        let mut weights = Vec::with_capacity(((2 * wx + 1) * (2 * wy + 1)) as usize);
        for i in -wy..=wy {
            let vy = i as f64 / wy as f64;
            for j in -wx..=wx {
                let vx = j as f64 / wx as f64;
                weights.push((-(vx * vx + vy * vy)).exp());
            }
        }

        let start = (candidate.x as f64, candidate.y as f64);
        let mut current = start;
        for _ in 0..self.params.max_iters {
            let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
            let mut k = 0;
            for i in -wy..=wy {
                for j in -wx..=wx {
                    let m = weights[k];
                    k += 1;
                    let px = current.0 + j as f64;
                    let py = current.1 + i as f64;
                    let (gx, gy) = gradient_bilinear(image, px as f32, py as f32);
                    let (gx, gy) = (gx as f64, gy as f64);
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    // Offsets relative to the window centre keep sums small.
                    bb1 += gxx * j as f64 + gxy * i as f64;
                    bb2 += gxy * j as f64 + gyy * i as f64;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= f64::EPSILON * (a * c).abs().max(1.0) {
                break;
            }
            let dx = (c * bb1 - b * bb2) / det;
            let dy = (a * bb2 - b * bb1) / det;
            current = (current.0 + dx, current.1 + dy);
            if dx * dx + dy * dy <= self.params.epsilon * self.params.epsilon {
                break;
            }
        }

        // A corner that wandered outside the window locked onto something else.
        if (current.0 - start.0).abs() > wx as f64 || (current.1 - start.1).abs() > wy as f64 {
            return candidate;
        }
        Point2::new(current.0 as f32, current.1 as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GrayImage;

    fn saddle_image(cx: f32, cy: f32) -> GrayImage {
        let (w, h) = (48usize, 48usize);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let tx = ((x as f32 - cx) / 1.5).tanh();
                let ty = ((y as f32 - cy) / 1.5).tanh();
                data.push((127.5 + 127.5 * tx * ty).round() as u8);
            }
        }
        GrayImage::from_raw(w, h, data).expect("image")
    }

    #[test]
    fn converges_onto_saddle_point() {
        let img = saddle_image(23.3, 24.6);
        let refiner = CornerSubPixRefiner::default();
        let p = refiner.refine(&img.view(), Point2::new(24.5, 23.5), SubPixWindow::new(6, 6));
        assert!((p.x - 23.3).abs() < 0.15, "x = {}", p.x);
        assert!((p.y - 24.6).abs() < 0.15, "y = {}", p.y);
    }

    #[test]
    fn flat_patch_keeps_candidate() {
        let img = GrayImage::filled(32, 32, 90);
        let refiner = CornerSubPixRefiner::default();
        let c = Point2::new(15.2_f32, 16.7);
        assert_eq!(refiner.refine(&img.view(), c, SubPixWindow::new(4, 4)), c);
    }
}
