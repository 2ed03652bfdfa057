//! Stationary-board capture and multi-style intrinsic calibration for ChArUco
//! targets.
//!
//! Frames go into a [`CalibrationSession`]. A small state machine waits until
//! the board has been in view for a moment and then held still, and captures
//! that frame. On `calibrate` the captured set is re-detected, every board
//! junction is located to sub-pixel precision through the homographies of its
//! neighbouring markers, and a camera model is solved once per
//! [`CalibrationStyle`] on a background thread.
//!
//! ## Quickstart
//!
//! ```no_run
//! use calib_capture::{CalibrateConfig, CalibrationSession, Timestamp};
//! use calib_capture::core::{GrayImage, GrayImageView, MarkerDetection, MarkerDetector};
//! use std::sync::Arc;
//!
//! struct MyDetector;
//!
//! impl MarkerDetector for MyDetector {
//!     fn detect(&self, _image: &GrayImageView<'_>, _precise: bool) -> Vec<MarkerDetection> {
//!         Vec::new()
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = CalibrationSession::new(CalibrateConfig::default(), Arc::new(MyDetector))?;
//! for _ in 0..100 {
//!     session.submit_frame(GrayImage::filled(1280, 720, 0), Timestamp::now());
//! }
//! println!("{}", session.command("calibrate", Timestamp::now()));
//! println!("{}", session.poll(Timestamp::now()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module map
//! - [`capture`], [`stability`], [`projection`]: deciding when to capture.
//! - [`junction`], [`style`], [`sweep`]: junction extraction and the solve sweep.
//! - [`task`], [`report`], [`persist`]: background execution and outputs.
//! - [`session`]: the command facade.

pub mod annotate;
pub mod capture;
pub mod config;
mod error;
pub mod frame;
pub mod junction;
pub mod persist;
pub mod projection;
pub mod report;
pub mod session;
pub mod stability;
pub mod store;
pub mod style;
pub mod sweep;
pub mod task;
pub mod timestamp;

pub use calib_capture_core as core;
pub use calib_capture_solver as solver;

pub use capture::{CaptureState, CaptureStateKind, CaptureStateMachine, FeedbackOutline, TickOutcome};
pub use config::{CalibrateConfig, CaptureTiming};
pub use error::{ConfigError, FrameRejected, PersistError};
pub use frame::{BoardDetector, ImageFrame};
pub use junction::{FrameJunctions, JunctionInterpolator};
pub use persist::CameraInfo;
pub use projection::BoardProjection;
pub use session::{CalibrationSession, CaptureEvent};
pub use stability::StabilityTracker;
pub use store::CapturedImageStore;
pub use style::CalibrationStyle;
pub use sweep::{CalibrationResult, CalibrationRun, CalibrationSweep, MIN_VIEW_JUNCTIONS};
pub use task::{AsyncCalibrationTask, TaskStatus};
pub use timestamp::{ClockKind, Timestamp};
