//! Geometric-primitive detection on organized point clouds.
//!
//! Cell-wise plane fitting feeds a histogram-guided region grower; the
//! grown regions become planes or RANSAC-fitted cylinders, are merged,
//! and have their boundaries refined into per-pixel masks.

pub mod cylinder_segment;
pub mod detector;
pub mod histogram;
pub mod plane_segment;
pub mod shapes;

pub use cylinder_segment::CylinderSegment;
pub use detector::PrimitiveDetector;
pub use histogram::Histogram;
pub use plane_segment::PlaneSegment;
pub use shapes::{CylinderParameters, PlaneParameters, Primitive, PrimitiveShape, CYLINDER_LABEL_OFFSET};
