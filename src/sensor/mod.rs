//! Sensor-side data preparation: depth image to organized point cloud.

pub mod cloud;

pub use cloud::{CloudTransformer, DepthImage, OrganizedCloud};
