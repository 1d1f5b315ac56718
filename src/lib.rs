//! Real-time RGB-D SLAM with geometric-primitive mapping.
//!
//! Given time-registered grayscale and depth frames from a calibrated
//! depth camera, the engine estimates the 6-DoF camera pose per frame
//! and maintains a local map of 3D keypoints and planar/cylindrical
//! surface primitives. Per-frame latency is the design priority; there
//! is no global optimization, loop closure, or relocalization.
//!
//! The entry point is [`system::RgbdSlam`]:
//!
//! ```ignore
//! let mut slam = RgbdSlam::new(config, Pose::identity(), 640, 480)?;
//! let pose = slam.track(&gray, &depth)?;
//! ```

pub mod config;
pub mod errors;
pub mod features;
pub mod geometry;
pub mod io;
pub mod map;
pub mod optimize;
pub mod sensor;
pub mod system;
pub mod tracking;
pub mod viz;

pub use config::Config;
pub use errors::{Result, SlamError};
pub use geometry::Pose;
pub use system::RgbdSlam;
pub use tracking::SlamState;
