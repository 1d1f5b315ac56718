//! Local map: 3D keypoint and primitive stores with a staged/confirmed
//! lifecycle, frame-to-map matching, and pruning.

pub mod local_map;
pub mod map_point;
pub mod map_primitive;
pub mod matches;

pub use local_map::LocalMap;
pub use map_point::{MapPoint, MapPointId, PointStage};
pub use map_primitive::{MapPrimitive, MapPrimitiveId};
pub use matches::{PointMatch, PrimitiveMatch};
