use thiserror::Error;

/// Reasons a calibration problem cannot be solved.
///
/// [`crate::NonlinearCalibrationSolver`] implementations report these as a
/// degenerate solution; [`crate::validate_views`] exposes them directly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("no views to calibrate from")]
    NoViews,
    #[error("board/image view counts differ ({object} vs {image})")]
    MismatchedViews { object: usize, image: usize },
    #[error("view {view}: {object} board points vs {image} image points")]
    MismatchedPoints {
        view: usize,
        object: usize,
        image: usize,
    },
    #[error("view {view} has {points} points, need at least 4")]
    TooFewPoints { view: usize, points: usize },
    #[error("{residuals} residuals cannot constrain {params} parameters")]
    Underdetermined { residuals: usize, params: usize },
    #[error("homography of view {view} is degenerate")]
    DegenerateHomography { view: usize },
    #[error("pose of view {view} could not be recovered")]
    PoseRecovery { view: usize },
    #[error("solution is not finite")]
    NonFinite,
    #[error("minimizer stopped: {reason}")]
    Terminated { reason: String },
}
