//! Geometry utilities: poses, rotation parametrization, projection.

pub mod camera;
pub mod pose;
pub mod so3;

pub use camera::CameraIntrinsics;
pub use pose::Pose;
