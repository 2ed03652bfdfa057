//! Intrinsic camera calibration from planar targets.
//!
//! The camera is a pinhole with plumb-bob distortion. [`LevenbergMarquardtSolver`]
//! initializes from per-view homographies and then refines all free
//! intrinsics together with one pose per view. Which intrinsics are free is
//! selected with [`CalibrationFlags`].

mod camera;
mod error;
mod flags;
mod init;
mod solver;

pub use camera::{camera_matrix, project_point, project_points, Distortion, ViewPose};
pub use error::SolveError;
pub use flags::CalibrationFlags;
pub use solver::{
    validate_views, CalibrationInput, CalibrationSolution, LevenbergMarquardtParams,
    LevenbergMarquardtSolver, NonlinearCalibrationSolver, SolveStatus,
};
