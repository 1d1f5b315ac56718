//! Top-level SLAM driver.

pub mod slam;

pub use slam::RgbdSlam;
