//! Organized point cloud construction from a depth image.
//!
//! The primitive detector consumes the cloud through per-cell block
//! indexing, so points are stored *cell-contiguous*: the `cell * cell`
//! points of each grid patch occupy one contiguous run, patches ordered
//! row-major over the cell grid, pixels row-major inside a patch.

use image::{ImageBuffer, Luma};
use nalgebra::Vector3;

use crate::geometry::CameraIntrinsics;

/// Depth map: one 32-bit float per pixel, zero or non-finite meaning
/// "no measurement".
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Back-projected depth image with cell-contiguous point layout.
/// Invalid pixels carry `z = 0` and are skipped by all consumers.
#[derive(Debug, Clone)]
pub struct OrganizedCloud {
    points: Vec<Vector3<f64>>,
    cell_size: usize,
    cell_cols: usize,
    cell_rows: usize,
}

impl OrganizedCloud {
    fn new(width: usize, height: usize, cell_size: usize) -> Self {
        Self {
            points: vec![Vector3::zeros(); width * height],
            cell_size,
            cell_cols: width / cell_size,
            cell_rows: height / cell_size,
        }
    }

    pub fn cell_cols(&self) -> usize {
        self.cell_cols
    }

    pub fn cell_rows(&self) -> usize {
        self.cell_rows
    }

    pub fn cell_count(&self) -> usize {
        self.cell_cols * self.cell_rows
    }

    pub fn points_per_cell(&self) -> usize {
        self.cell_size * self.cell_size
    }

    /// All points of one grid cell, in patch row-major order.
    pub fn cell_points(&self, cell_id: usize) -> &[Vector3<f64>] {
        let per_cell = self.points_per_cell();
        let start = cell_id * per_cell;
        &self.points[start..start + per_cell]
    }

    /// Storage index of pixel `(row, col)` under the cell-contiguous
    /// layout.
    pub fn index_of(&self, row: usize, col: usize) -> usize {
        let cell = (row / self.cell_size) * self.cell_cols + col / self.cell_size;
        let within = (row % self.cell_size) * self.cell_size + col % self.cell_size;
        cell * self.points_per_cell() + within
    }

    pub fn point(&self, index: usize) -> &Vector3<f64> {
        &self.points[index]
    }
}

/// Reusable depth-to-cloud converter; the point buffer is allocated at
/// construction and rewritten in place every frame.
pub struct CloudTransformer {
    intrinsics: CameraIntrinsics,
    width: usize,
    height: usize,
    cloud: OrganizedCloud,
}

impl CloudTransformer {
    pub fn new(intrinsics: CameraIntrinsics, width: usize, height: usize, cell_size: usize) -> Self {
        Self {
            intrinsics,
            width,
            height,
            cloud: OrganizedCloud::new(width, height, cell_size),
        }
    }

    /// Back-project `depth` into the cloud buffer and return it.
    pub fn organize(&mut self, depth: &DepthImage) -> &OrganizedCloud {
        debug_assert_eq!(depth.width() as usize, self.width);
        debug_assert_eq!(depth.height() as usize, self.height);

        for row in 0..self.height {
            for col in 0..self.width {
                let z = depth.get_pixel(col as u32, row as u32).0[0] as f64;
                let index = self.cloud.index_of(row, col);
                self.cloud.points[index] = if z.is_finite() && z > 0.0 {
                    self.intrinsics.unproject(col as f64, row as f64, z)
                } else {
                    Vector3::zeros()
                };
            }
        }
        &self.cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 40.0,
            fy: 40.0,
            cx: 20.0,
            cy: 20.0,
        }
    }

    fn flat_depth(width: u32, height: u32, z: f32) -> DepthImage {
        DepthImage::from_pixel(width, height, Luma([z]))
    }

    #[test]
    fn cell_contiguous_layout() {
        let cloud = OrganizedCloud::new(40, 40, 20);
        // First pixel of the second cell in the top row.
        assert_eq!(cloud.index_of(0, 20), 400);
        // Second row of the first cell.
        assert_eq!(cloud.index_of(1, 0), 20);
        // First pixel of the second cell row.
        assert_eq!(cloud.index_of(20, 0), 800);
        assert_eq!(cloud.cell_count(), 4);
        assert_eq!(cloud.points_per_cell(), 400);
    }

    #[test]
    fn flat_plane_back_projects_to_constant_depth() {
        let mut transformer = CloudTransformer::new(intrinsics(), 40, 40, 20);
        let cloud = transformer.organize(&flat_depth(40, 40, 2.0));
        for cell in 0..cloud.cell_count() {
            for p in cloud.cell_points(cell) {
                assert_relative_eq!(p.z, 2.0, epsilon = 1e-9);
            }
        }
        // The principal point lands on the optical axis.
        let center = cloud.point(cloud.index_of(20, 20));
        assert_relative_eq!(center.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(center.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn invalid_depth_becomes_zero_point() {
        let mut depth = flat_depth(40, 40, 1.0);
        depth.put_pixel(3, 5, Luma([0.0]));
        depth.put_pixel(4, 5, Luma([f32::NAN]));
        let mut transformer = CloudTransformer::new(intrinsics(), 40, 40, 20);
        let cloud = transformer.organize(&depth);
        assert_eq!(cloud.point(cloud.index_of(5, 3)).z, 0.0);
        assert_eq!(cloud.point(cloud.index_of(5, 4)).z, 0.0);
        assert!(cloud.point(cloud.index_of(5, 5)).z > 0.0);
    }
}
