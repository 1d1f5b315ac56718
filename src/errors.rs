//! Error types shared across the SLAM pipeline.

use thiserror::Error;

/// Errors surfaced by the SLAM core. None are recoverable without the
/// caller's help. Per-frame degradations (`InsufficientMatches`,
/// `OptimizerNonConvergence`, and the sticky `TrackingLost`) do not
/// fail the `track` call itself: the driver logs them, folds them into
/// its state machine, and keeps the latest one inspectable through
/// `RgbdSlam::last_degradation`.
#[derive(Error, Debug)]
pub enum SlamError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("input image has wrong shape: expected {expected_width}x{expected_height}, got {width}x{height}")]
    InputShape {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("first frame produced no depth-backed features to initialize from")]
    NoDepthForInit,

    #[error("not enough matches for pose optimization: {found} < {required}")]
    InsufficientMatches { found: usize, required: usize },

    #[error("pose optimizer exhausted its evaluation budget")]
    OptimizerNonConvergence,

    #[error("tracking is lost")]
    TrackingLost,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SlamError>;
