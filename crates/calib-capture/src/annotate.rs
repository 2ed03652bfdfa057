//! Drawing helpers for live feedback and the calibration preview.

use crate::capture::FeedbackOutline;
use calib_capture_core::{GrayImage, MarkerDetection, SubPixWindow};
use image::{Rgb, RgbImage};
use imageproc::drawing;
use imageproc::rect::Rect;
use nalgebra::Point2;

pub const PENDING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const DONE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const CAPTURED_BOARD_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const MARKER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MARKER_ORIGIN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const JUNCTION_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

/// Gray to RGB copy.
pub fn to_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width as u32, gray.height as u32, |x, y| {
        let v = gray.data[y as usize * gray.width + x as usize];
        Rgb([v, v, v])
    })
}

fn as_tuple(p: Point2<f32>) -> (f32, f32) {
    (p.x, p.y)
}

/// Line drawn `width` pixels thick by stacking offset copies.
pub fn draw_thick_line(img: &mut RgbImage, from: Point2<f32>, to: Point2<f32>, width: u32, color: Rgb<u8>) {
    let d = to - from;
    let len = d.norm();
    let normal = if len > 0.0 {
        nalgebra::Vector2::new(-d.y / len, d.x / len)
    } else {
        nalgebra::Vector2::new(0.0, 1.0)
    };
    let half = (width as f32 - 1.0) / 2.0;
    let mut offset = -half;
    while offset <= half + 1e-3 {
        let shift = normal * offset;
        drawing::draw_line_segment_mut(img, as_tuple(from + shift), as_tuple(to + shift), color);
        offset += 1.0;
    }
}

/// Board outline split into done/pending colours, 3 px wide.
pub fn draw_feedback(img: &mut RgbImage, outline: &FeedbackOutline) {
    for seg in outline.segments() {
        let color = if seg.done { DONE_COLOR } else { PENDING_COLOR };
        draw_thick_line(img, seg.from, seg.to, 3, color);
    }
}

/// Closed quadrilateral outline.
pub fn draw_board_outline(img: &mut RgbImage, corners: &[Point2<f32>; 4], color: Rgb<u8>) {
    for i in 0..4 {
        drawing::draw_line_segment_mut(img, as_tuple(corners[i]), as_tuple(corners[(i + 1) % 4]), color);
    }
}

/// Marker outlines with a cross on each marker's first corner.
pub fn draw_markers(img: &mut RgbImage, markers: &[MarkerDetection]) {
    for m in markers {
        draw_board_outline(img, &m.corners, MARKER_COLOR);
        let c0 = m.corners[0];
        drawing::draw_cross_mut(img, MARKER_ORIGIN_COLOR, c0.x.round() as i32, c0.y.round() as i32);
    }
}

/// Refined junction with the box of its sub-pixel search window.
pub fn draw_junction(img: &mut RgbImage, p: Point2<f32>, window: SubPixWindow) {
    let x = (p.x - window.half_width as f32).round() as i32;
    let y = (p.y - window.half_height as f32).round() as i32;
    let rect = Rect::at(x, y).of_size(2 * window.half_width + 1, 2 * window.half_height + 1);
    drawing::draw_hollow_rect_mut(img, rect, JUNCTION_COLOR);
    drawing::draw_cross_mut(img, JUNCTION_COLOR, p.x.round() as i32, p.y.round() as i32);
}
