//! Per-cell plane fitting by PCA over accumulated second moments.

use nalgebra::{Matrix3, Vector3};

use crate::config::DepthConfig;
use crate::sensor::OrganizedCloud;

/// Planarity score (flatness ratio) a fitted cell must reach.
pub const SCORE_THRESHOLD: f64 = 100.0;

/// Accumulates the points of one grid cell (or a merged region) and
/// fits a plane to them.
///
/// Only the sums `S = sum(p p^T)` (upper triangle), `sum(p)` and the
/// point count are stored, so two segments merge by adding their
/// accumulators; `fit` is cheap enough to re-run after every expansion.
#[derive(Debug, Clone)]
pub struct PlaneSegment {
    sum: Vector3<f64>,
    // xx, xy, xz, yy, yz, zz
    sum_sq: [f64; 6],
    count: usize,

    mean: Vector3<f64>,
    normal: Vector3<f64>,
    d: f64,
    mse: f64,
    score: f64,
    planar: bool,
}

impl PlaneSegment {
    pub fn new() -> Self {
        Self {
            sum: Vector3::zeros(),
            sum_sq: [0.0; 6],
            count: 0,
            mean: Vector3::zeros(),
            normal: Vector3::zeros(),
            d: 0.0,
            mse: 0.0,
            score: 0.0,
            planar: false,
        }
    }

    /// Reset to the empty state, keeping the allocation-free layout.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Accumulate the points of cell `cell_id` and fit, rejecting the
    /// cell on sparse depth, depth discontinuities, or a poor fit.
    pub fn init(
        &mut self,
        cloud: &OrganizedCloud,
        cell_id: usize,
        cell_size: usize,
        depth: &DepthConfig,
    ) {
        self.clear();

        let points = cloud.cell_points(cell_id);
        let mut discontinuities = 0u32;

        for row in 0..cell_size {
            let mut previous_z: Option<f64> = None;
            for col in 0..cell_size {
                let p = &points[row * cell_size + col];
                if p.z <= 0.0 {
                    previous_z = None;
                    continue;
                }
                self.push(p);

                if let Some(prev) = previous_z {
                    let tolerance = depth.sigma_margin * (depth.sigma_error + depth.alpha * p.z * p.z);
                    if (p.z - prev).abs() > tolerance {
                        discontinuities += 1;
                    }
                }
                previous_z = Some(p.z);
            }
        }

        if self.count < points.len() / 2 || discontinuities > depth.discontinuity_limit {
            self.planar = false;
            return;
        }

        self.fit();
        self.planar = self.score >= SCORE_THRESHOLD;
    }

    fn push(&mut self, p: &Vector3<f64>) {
        self.sum += p;
        self.sum_sq[0] += p.x * p.x;
        self.sum_sq[1] += p.x * p.y;
        self.sum_sq[2] += p.x * p.z;
        self.sum_sq[3] += p.y * p.y;
        self.sum_sq[4] += p.y * p.z;
        self.sum_sq[5] += p.z * p.z;
        self.count += 1;
    }

    /// Merge another segment's accumulators into this one. The caller
    /// re-fits when it is done expanding.
    pub fn expand(&mut self, other: &PlaneSegment) {
        self.sum += other.sum;
        for (a, b) in self.sum_sq.iter_mut().zip(other.sum_sq.iter()) {
            *a += b;
        }
        self.count += other.count;
    }

    /// Fit the plane: eigendecompose the centered covariance, take the
    /// smallest-eigenvalue direction as the normal (flipped camera-ward
    /// so `n.z <= 0`), and derive offset, MSE, and flatness score.
    pub fn fit(&mut self) {
        if self.count == 0 {
            return;
        }
        let inv_count = 1.0 / self.count as f64;
        self.mean = self.sum * inv_count;

        let covariance = Matrix3::new(
            self.sum_sq[0] * inv_count - self.mean.x * self.mean.x,
            self.sum_sq[1] * inv_count - self.mean.x * self.mean.y,
            self.sum_sq[2] * inv_count - self.mean.x * self.mean.z,
            self.sum_sq[1] * inv_count - self.mean.x * self.mean.y,
            self.sum_sq[3] * inv_count - self.mean.y * self.mean.y,
            self.sum_sq[4] * inv_count - self.mean.y * self.mean.z,
            self.sum_sq[2] * inv_count - self.mean.x * self.mean.z,
            self.sum_sq[4] * inv_count - self.mean.y * self.mean.z,
            self.sum_sq[5] * inv_count - self.mean.z * self.mean.z,
        );

        let eigen = covariance.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
        let lambda_min = eigen.eigenvalues[order[0]].max(0.0);
        let lambda_mid = eigen.eigenvalues[order[1]].max(0.0);

        let mut normal = eigen.eigenvectors.column(order[0]).into_owned();
        let norm = normal.norm();
        if norm > 0.0 {
            normal /= norm;
        }
        if normal.z > 0.0 {
            normal = -normal;
        }

        self.normal = normal;
        self.d = -normal.dot(&self.mean);
        self.mse = lambda_min;
        self.score = if lambda_min > f64::EPSILON {
            lambda_mid / lambda_min
        } else {
            f64::MAX
        };
    }

    pub fn is_planar(&self) -> bool {
        self.planar
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    pub fn mean(&self) -> &Vector3<f64> {
        &self.mean
    }

    pub fn d(&self) -> f64 {
        self.d
    }

    pub fn mse(&self) -> f64 {
        self.mse
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Default for PlaneSegment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepthConfig;
    use crate::geometry::CameraIntrinsics;
    use crate::sensor::{CloudTransformer, DepthImage};
    use approx::assert_relative_eq;
    use image::Luma;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    const CELL: usize = 20;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 40.0,
            fy: 40.0,
            cx: 10.0,
            cy: 10.0,
        }
    }

    /// Render a plane `n . p + d = 0` into a 20x20 depth image, with
    /// optional Gaussian depth noise.
    fn plane_depth(normal: &nalgebra::Vector3<f64>, d: f64, sigma: f64) -> DepthImage {
        let k = intrinsics();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let noise = Normal::new(0.0, sigma.max(1e-300)).unwrap();
        let mut depth = DepthImage::new(CELL as u32, CELL as u32);
        for v in 0..CELL as u32 {
            for u in 0..CELL as u32 {
                let denominator = normal.x * (u as f64 - k.cx) / k.fx
                    + normal.y * (v as f64 - k.cy) / k.fy
                    + normal.z;
                let mut z = -d / denominator;
                if sigma > 0.0 {
                    z += noise.sample(&mut rng);
                }
                depth.put_pixel(u, v, Luma([z as f32]));
            }
        }
        depth
    }

    fn fit_cell(depth_image: &DepthImage) -> PlaneSegment {
        let mut transformer = CloudTransformer::new(intrinsics(), CELL, CELL, CELL);
        let cloud = transformer.organize(depth_image);
        let mut segment = PlaneSegment::new();
        segment.init(cloud, 0, CELL, &DepthConfig::default());
        segment
    }

    #[test]
    fn fits_noiseless_frontal_plane() {
        let n = nalgebra::Vector3::new(0.0, 0.0, -1.0);
        let segment = fit_cell(&plane_depth(&n, 2.0, 0.0));
        assert!(segment.is_planar());
        assert_relative_eq!(segment.normal().dot(&n), 1.0, epsilon = 1e-6);
        assert_relative_eq!(segment.d(), 2.0, epsilon = 1e-6);
        assert!(segment.mse() < 1e-10);
    }

    #[test]
    fn fits_tilted_plane_under_noise() {
        let sigma = 0.002;
        let n = nalgebra::Vector3::new(0.3, -0.2, -1.0).normalize();
        let segment = fit_cell(&plane_depth(&n, 2.0, sigma));
        assert!(segment.is_planar());
        assert!(segment.normal().dot(&n).abs() > 1.0 - 10.0 * sigma * sigma);
        // MSE tracks the noise variance; the plane is near-frontal so
        // depth noise maps almost directly onto plane distance.
        assert!(segment.mse() < 4.0 * sigma * sigma);
        assert!(segment.mse() > 0.1 * sigma * sigma);
    }

    #[test]
    fn rejects_cell_with_sparse_depth() {
        let n = nalgebra::Vector3::new(0.0, 0.0, -1.0);
        let mut depth = plane_depth(&n, 2.0, 0.0);
        for v in 0..CELL as u32 {
            for u in 0..CELL as u32 {
                if u % 3 != 0 {
                    depth.put_pixel(u, v, Luma([0.0]));
                }
            }
        }
        let segment = fit_cell(&depth);
        assert!(!segment.is_planar());
    }

    #[test]
    fn rejects_depth_discontinuity() {
        let n = nalgebra::Vector3::new(0.0, 0.0, -1.0);
        let mut depth = plane_depth(&n, 2.0, 0.0);
        // A step edge through the middle of the cell.
        for v in 0..CELL as u32 {
            for u in CELL as u32 / 2..CELL as u32 {
                let z = depth.get_pixel(u, v).0[0];
                depth.put_pixel(u, v, Luma([z + 1.0]));
            }
        }
        let segment = fit_cell(&depth);
        assert!(!segment.is_planar());
    }

    #[test]
    fn expansion_matches_joint_fit() {
        let n = nalgebra::Vector3::new(0.1, 0.0, -1.0).normalize();
        let depth = plane_depth(&n, 1.5, 0.0);
        let mut transformer = CloudTransformer::new(intrinsics(), CELL, CELL, CELL);
        let cloud = transformer.organize(&depth);

        let mut whole = PlaneSegment::new();
        whole.init(cloud, 0, CELL, &DepthConfig::default());

        // Re-accumulate through two halves merged by expand().
        let mut left = PlaneSegment::new();
        let mut right = PlaneSegment::new();
        for (i, p) in cloud.cell_points(0).iter().enumerate() {
            if i % 2 == 0 {
                left.push(p);
            } else {
                right.push(p);
            }
        }
        left.expand(&right);
        left.fit();

        assert_relative_eq!(left.normal().dot(whole.normal()), 1.0, epsilon = 1e-9);
        assert_relative_eq!(left.d(), whole.d(), epsilon = 1e-9);
    }
}
