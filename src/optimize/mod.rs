//! Pose refinement by robust non-linear least squares.

pub mod loss;
pub mod pose_optimizer;

pub use loss::generalized_loss;
pub use pose_optimizer::{OptimizationOutcome, PoseOptimizer, Termination};
