//! Feature extraction: geometric primitives and keypoints.

pub mod keypoints;
pub mod primitives;
