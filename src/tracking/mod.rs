//! Pose prediction and driver state.

pub mod motion_model;
pub mod state;

pub use motion_model::MotionModel;
pub use state::SlamState;
