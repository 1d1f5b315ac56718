//! Per-frame match containers.
//!
//! Matches are plain values carrying everything the optimizer needs;
//! they never reference back into the map.

use nalgebra::{Vector2, Vector3};

use super::map_point::MapPointId;
use super::map_primitive::MapPrimitiveId;

/// A 3D-to-2D correspondence between a map point and a current-frame
/// keypoint.
#[derive(Debug, Clone)]
pub struct PointMatch {
    /// Map point position in the world frame.
    pub world: Vector3<f64>,
    /// Observed pixel in the current frame.
    pub screen: Vector2<f64>,
    pub id: MapPointId,
    /// Index of the matched keypoint in the frame's keypoint list.
    pub keypoint_index: usize,
}

/// A correspondence between a detected primitive and a map primitive.
#[derive(Debug, Clone)]
pub struct PrimitiveMatch {
    pub map_id: MapPrimitiveId,
    /// Segmentation label of the detected primitive.
    pub detected_label: u8,
}
