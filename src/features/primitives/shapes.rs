//! Detected primitive shapes: tagged plane/cylinder variants with
//! their segmentation masks.

use image::GrayImage;
use nalgebra::Vector3;

/// Label offset separating cylinder labels from plane labels in the
/// segmentation image: planes use 1..=49, cylinders 50..=255.
pub const CYLINDER_LABEL_OFFSET: u8 = 50;

/// Sentinel for "not matched against the map".
pub const UNMATCHED: u64 = 0;

/// Plane parameters in the camera frame.
#[derive(Debug, Clone)]
pub struct PlaneParameters {
    /// Unit normal, oriented camera-ward (`normal.z <= 0`).
    pub normal: Vector3<f64>,
    /// Offset such that `normal . p + d = 0` on the plane.
    pub d: f64,
    /// Centroid of the supporting points.
    pub mean: Vector3<f64>,
}

/// Cylinder parameters for one committed sub-segment.
#[derive(Debug, Clone)]
pub struct CylinderParameters {
    /// Unit direction of the principal axis.
    pub axis: Vector3<f64>,
    /// Two points delimiting the fitted span of the axis.
    pub axis_point_1: Vector3<f64>,
    pub axis_point_2: Vector3<f64>,
    pub radius: f64,
}

/// Shape-specific parameters of a detected primitive.
#[derive(Debug, Clone)]
pub enum PrimitiveShape {
    Plane(PlaneParameters),
    Cylinder(CylinderParameters),
}

/// A segmented primitive: its segmentation label, a cell-resolution
/// binary mask, shape parameters, and the id of the map primitive it
/// matched (if any).
#[derive(Debug, Clone)]
pub struct Primitive {
    /// Label this primitive carries in the segmentation image.
    pub label: u8,
    /// Binary mask over the cell grid (non-zero = covered).
    pub mask: GrayImage,
    pub shape: PrimitiveShape,
    /// Map primitive id assigned by matching; `UNMATCHED` until then.
    pub matched_id: u64,
}

impl Primitive {
    pub fn new_plane(label: u8, mask: GrayImage, parameters: PlaneParameters) -> Self {
        Self {
            label,
            mask,
            shape: PrimitiveShape::Plane(parameters),
            matched_id: UNMATCHED,
        }
    }

    pub fn new_cylinder(label: u8, mask: GrayImage, parameters: CylinderParameters) -> Self {
        Self {
            label,
            mask,
            shape: PrimitiveShape::Cylinder(parameters),
            matched_id: UNMATCHED,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_id != UNMATCHED
    }

    pub fn is_plane(&self) -> bool {
        matches!(self.shape, PrimitiveShape::Plane(_))
    }

    pub fn is_cylinder(&self) -> bool {
        matches!(self.shape, PrimitiveShape::Cylinder(_))
    }

    /// Intersection-over-union of the two masks. Zero when the union is
    /// empty or the masks disagree in size.
    pub fn iou(&self, other: &Primitive) -> f64 {
        mask_iou(&self.mask, &other.mask)
    }

    /// Shape similarity used for map matching. Dispatches on the tags;
    /// a plane is never similar to a cylinder.
    pub fn is_similar(&self, other: &Primitive, minimum_iou: f64, minimum_normals_dot: f64) -> bool {
        if self.iou(other) < minimum_iou {
            return false;
        }
        match (&self.shape, &other.shape) {
            (PrimitiveShape::Plane(a), PrimitiveShape::Plane(b)) => {
                (a.normal.dot(&b.normal) + 1.0) / 2.0 > minimum_normals_dot
            }
            (PrimitiveShape::Cylinder(a), PrimitiveShape::Cylinder(b)) => {
                a.axis.dot(&b.axis).abs() > minimum_normals_dot
            }
            _ => false,
        }
    }

    /// Signed distance from a point to the primitive surface.
    pub fn distance(&self, point: &Vector3<f64>) -> f64 {
        match &self.shape {
            PrimitiveShape::Plane(plane) => plane.normal.dot(&(point - plane.mean)),
            PrimitiveShape::Cylinder(cylinder) => {
                let direction = cylinder.axis_point_2 - cylinder.axis_point_1;
                let length = direction.norm();
                if length <= 0.0 {
                    return (point - cylinder.axis_point_2).norm() - cylinder.radius;
                }
                direction.cross(&(point - cylinder.axis_point_2)).norm() / length - cylinder.radius
            }
        }
    }
}

/// IoU of two binary masks.
pub fn mask_iou(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 0.0;
    }
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let (sa, sb) = (pa.0[0] > 0, pb.0[0] > 0);
        if sa || sb {
            union += 1;
        }
        if sa && sb {
            intersection += 1;
        }
    }
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with(width: u32, height: u32, filled: impl Fn(u32, u32) -> bool) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if filled(x, y) {
                    mask.put_pixel(x, y, Luma([1]));
                }
            }
        }
        mask
    }

    fn frontal_plane(label: u8, mask: GrayImage) -> Primitive {
        Primitive::new_plane(
            label,
            mask,
            PlaneParameters {
                normal: Vector3::new(0.0, 0.0, -1.0),
                d: 2.0,
                mean: Vector3::new(0.0, 0.0, 2.0),
            },
        )
    }

    fn vertical_cylinder(label: u8, mask: GrayImage) -> Primitive {
        Primitive::new_cylinder(
            label,
            mask,
            CylinderParameters {
                axis: Vector3::y(),
                axis_point_1: Vector3::new(0.0, -1.0, 2.0),
                axis_point_2: Vector3::new(0.0, 1.0, 2.0),
                radius: 0.25,
            },
        )
    }

    #[test]
    fn iou_of_identical_masks_is_one() {
        let mask = mask_with(8, 8, |x, _| x < 4);
        let a = frontal_plane(1, mask.clone());
        let b = frontal_plane(2, mask);
        assert_eq!(a.iou(&b), 1.0);
    }

    #[test]
    fn iou_of_disjoint_masks_is_zero() {
        let a = frontal_plane(1, mask_with(8, 8, |x, _| x < 4));
        let b = frontal_plane(2, mask_with(8, 8, |x, _| x >= 4));
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn half_overlap_iou() {
        let a = frontal_plane(1, mask_with(8, 8, |x, _| x < 4));
        let b = frontal_plane(2, mask_with(8, 8, |x, _| (2..6).contains(&x)));
        // Intersection 2 columns, union 6 columns.
        assert!((a.iou(&b) - 2.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn cross_type_similarity_is_false() {
        let mask = mask_with(8, 8, |_, _| true);
        let plane = frontal_plane(1, mask.clone());
        let cylinder = vertical_cylinder(50, mask);
        assert!(!plane.is_similar(&cylinder, 0.0, 0.0));
        assert!(!cylinder.is_similar(&plane, 0.0, 0.0));
    }

    #[test]
    fn coplanar_planes_are_similar() {
        let mask = mask_with(8, 8, |_, _| true);
        let a = frontal_plane(1, mask.clone());
        let b = frontal_plane(2, mask);
        assert!(a.is_similar(&b, 0.5, 0.9));
    }

    #[test]
    fn antiparallel_cylinder_axes_still_match() {
        let mask = mask_with(8, 8, |_, _| true);
        let a = vertical_cylinder(50, mask.clone());
        let mut b = vertical_cylinder(51, mask);
        if let PrimitiveShape::Cylinder(ref mut p) = b.shape {
            p.axis = -p.axis;
        }
        assert!(a.is_similar(&b, 0.5, 0.9));
    }

    #[test]
    fn plane_distance_is_signed_point_plane_distance() {
        let plane = frontal_plane(1, mask_with(4, 4, |_, _| true));
        assert!((plane.distance(&Vector3::new(0.0, 0.0, 2.0))).abs() < 1e-12);
        assert!((plane.distance(&Vector3::new(0.0, 0.0, 3.0)) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn cylinder_distance_vanishes_on_surface() {
        let cylinder = vertical_cylinder(50, mask_with(4, 4, |_, _| true));
        assert!(cylinder.distance(&Vector3::new(0.25, 0.0, 2.0)).abs() < 1e-12);
        assert!((cylinder.distance(&Vector3::new(0.5, 0.0, 2.0)) - 0.25).abs() < 1e-12);
    }
}
