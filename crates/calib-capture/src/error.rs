use calib_capture_core::{BoardError, ImageSize};

/// Errors of saving or loading image sets, configs and calibrations.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("no captured images to save")]
    EmptyStore,
    #[error("image {index} is {actual:?}, expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: ImageSize,
        actual: ImageSize,
    },
    #[error("image {index} has an unreadable stamp {value:?}")]
    InvalidStamp { index: usize, value: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Board(#[from] BoardError),
}

/// A frame whose size differs from the session's.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame is {actual:?}, session expects {expected:?}")]
pub struct FrameRejected {
    pub expected: ImageSize,
    pub actual: ImageSize,
}
