//! Core types and utilities for ChArUco capture and calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete marker detector or image codec: detection is a
//! [`MarkerDetector`] seam, images are plain row-major buffers.

mod board;
mod homography;
mod image;
mod logger;
mod marker;
mod subpix;

pub use board::{
    AdjacentMarker, BoardError, BoardLayout, CharucoBoard, CharucoBoardSpec, CornerIndex,
};
pub use homography::{
    estimate_homography_board_to_img, homography_from_4pt, DltHomographySolver, Homography,
    HomographySolver,
};
pub use image::{gradient_bilinear, sample_bilinear, GrayImage, GrayImageView, ImageSize};
pub use marker::{MarkerDetection, MarkerDetector};
pub use subpix::{CornerSubPixParams, CornerSubPixRefiner, SubPixWindow, SubPixelRefiner};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, level_from_env, LOG_ENV_VAR};
