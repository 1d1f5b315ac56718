//! Cylinder fitting over a set of small planar cells.
//!
//! A grown region whose cells are not coplanar may still be an
//! extrusion: the cell normals of a cylindrical patch all lie in the
//! plane orthogonal to the cylinder axis. The fit estimates that axis
//! from the normals, projects the cell centroids onto the orthogonal
//! plane, and extracts circles there by RANSAC, each accepted circle
//! becoming one segment of the cylinder.

use nalgebra::{DMatrix, Matrix3, Vector2, Vector3};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::CylinderConfig;

/// RANSAC trials per removal round; saturates the 3-sample success
/// probability for the region sizes the grow loop admits.
const RANSAC_TRIALS: usize = 100;

/// Minimum cells left for another extraction round.
const MINIMUM_CELLS_FOR_FIT: usize = 6;

/// One circle extracted along the axis.
#[derive(Debug, Clone)]
struct SegmentFit {
    /// Extreme points of the inlier span on the axis.
    axis_point_1: Vector3<f64>,
    axis_point_2: Vector3<f64>,
    axis_length: f64,
    radius: f64,
    mse: f64,
    /// Local-cell inlier mask, indexed like `local_to_global`.
    inliers: Vec<bool>,
}

/// A cylinder fitted to activated planar cells: one shared axis, one or
/// more circle segments along it.
#[derive(Debug, Clone)]
pub struct CylinderSegment {
    axis: Vector3<f64>,
    segments: Vec<SegmentFit>,
    local_to_global: Vec<usize>,
}

impl CylinderSegment {
    /// Fit a cylinder to cells described by their fitted normals and
    /// centroids. `local_to_global[i]` maps local index `i` back to the
    /// grid cell id.
    pub fn fit(
        normals: &[Vector3<f64>],
        centroids: &[Vector3<f64>],
        local_to_global: Vec<usize>,
        config: &CylinderConfig,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        debug_assert_eq!(normals.len(), centroids.len());
        debug_assert_eq!(normals.len(), local_to_global.len());

        let cell_count = normals.len();
        let axis = estimate_axis(normals);

        // Orthonormal basis of the plane perpendicular to the axis.
        let reference = if axis.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let u = axis.cross(&reference).normalize();
        let v = axis.cross(&u);

        let projected: Vec<Vector2<f64>> = centroids
            .iter()
            .map(|c| Vector2::new(u.dot(c), v.dot(c)))
            .collect();
        let along_axis: Vec<f64> = centroids.iter().map(|c| axis.dot(c)).collect();

        let mut segments = Vec::new();
        let mut remaining: Vec<usize> = (0..cell_count).collect();

        while remaining.len() >= MINIMUM_CELLS_FOR_FIT {
            let Some((center, radius, inlier_ids)) =
                ransac_circle(&remaining, &projected, config, rng)
            else {
                break;
            };
            if (inlier_ids.len() as f64) < config.ransac_minimum_score {
                break;
            }

            // Least-squares refinement over the consensus set.
            let (center, radius) = refine_circle(&inlier_ids, &projected).unwrap_or((center, radius));

            let mse = inlier_ids
                .iter()
                .map(|&i| {
                    let residual = (projected[i] - center).norm() - radius;
                    residual * residual
                })
                .sum::<f64>()
                / inlier_ids.len() as f64;

            let t_min = inlier_ids
                .iter()
                .map(|&i| along_axis[i])
                .fold(f64::INFINITY, f64::min);
            let t_max = inlier_ids
                .iter()
                .map(|&i| along_axis[i])
                .fold(f64::NEG_INFINITY, f64::max);

            let center_3d = u * center.x + v * center.y;
            let axis_point_1 = center_3d + axis * t_min;
            let axis_point_2 = center_3d + axis * t_max;

            let mut inliers = vec![false; cell_count];
            for &i in &inlier_ids {
                inliers[i] = true;
            }

            segments.push(SegmentFit {
                axis_point_1,
                axis_point_2,
                axis_length: (axis_point_2 - axis_point_1).norm(),
                radius,
                mse,
                inliers,
            });

            remaining.retain(|&i| !inlier_ids.contains(&i));
        }

        Self {
            axis,
            segments,
            local_to_global,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn mse_at(&self, segment: usize) -> f64 {
        self.segments[segment].mse
    }

    pub fn is_inlier_at(&self, segment: usize, local_index: usize) -> bool {
        self.segments[segment].inliers[local_index]
    }

    pub fn local_to_global(&self, local_index: usize) -> usize {
        self.local_to_global[local_index]
    }

    pub fn local_cell_count(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn axis_point_1(&self, segment: usize) -> &Vector3<f64> {
        &self.segments[segment].axis_point_1
    }

    pub fn axis_point_2(&self, segment: usize) -> &Vector3<f64> {
        &self.segments[segment].axis_point_2
    }

    pub fn axis_length(&self, segment: usize) -> f64 {
        self.segments[segment].axis_length
    }

    pub fn radius(&self, segment: usize) -> f64 {
        self.segments[segment].radius
    }

    pub fn axis(&self) -> &Vector3<f64> {
        &self.axis
    }

    /// Signed distance from a point to one segment's surface:
    /// `|(P2 - P1) x (p - P2)| / |P2 - P1| - r`.
    pub fn distance_to_segment(&self, segment: usize, point: &Vector3<f64>) -> f64 {
        let fit = &self.segments[segment];
        if fit.axis_length <= 0.0 {
            return (point - fit.axis_point_2).norm() - fit.radius;
        }
        let direction = fit.axis_point_2 - fit.axis_point_1;
        direction.cross(&(point - fit.axis_point_2)).norm() / fit.axis_length - fit.radius
    }

    /// Signed distance to the nearest segment surface.
    pub fn distance(&self, point: &Vector3<f64>) -> f64 {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, _)| self.distance_to_segment(i, point))
            .min_by(|a, b| a.abs().total_cmp(&b.abs()))
            .unwrap_or(f64::MAX)
    }
}

/// Cylinder axis: the direction in which the cell normals vary least,
/// i.e. the smallest right-singular vector of the stacked normals.
fn estimate_axis(normals: &[Vector3<f64>]) -> Vector3<f64> {
    let mut stacked = DMatrix::zeros(normals.len(), 3);
    for (i, n) in normals.iter().enumerate() {
        stacked.set_row(i, &n.transpose());
    }
    let svd = stacked.svd(false, true);
    let v_t = svd.v_t.expect("svd requested v_t");

    let mut smallest = 0;
    for i in 1..svd.singular_values.len() {
        if svd.singular_values[i] < svd.singular_values[smallest] {
            smallest = i;
        }
    }
    let axis = Vector3::new(v_t[(smallest, 0)], v_t[(smallest, 1)], v_t[(smallest, 2)]);
    let norm = axis.norm();
    if norm > 0.0 {
        axis / norm
    } else {
        Vector3::z()
    }
}

/// RANSAC a circle over the remaining projected centroids. Returns the
/// best (center, radius, inlier ids) or `None` when every sampled
/// triple was degenerate.
fn ransac_circle(
    remaining: &[usize],
    projected: &[Vector2<f64>],
    config: &CylinderConfig,
    rng: &mut ChaCha8Rng,
) -> Option<(Vector2<f64>, f64, Vec<usize>)> {
    let mut best: Option<(Vector2<f64>, f64, Vec<usize>)> = None;

    for _ in 0..RANSAC_TRIALS {
        let mut sample = remaining.to_vec();
        sample.partial_shuffle(rng, 3);
        let (a, b, c) = (projected[sample[0]], projected[sample[1]], projected[sample[2]]);

        let Some((center, radius)) = circle_through(a, b, c) else {
            continue;
        };

        let inliers: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| ((projected[i] - center).norm() - radius).abs() < config.ransac_sqrt_max_distance)
            .collect();

        if best.as_ref().map_or(true, |(_, _, b)| inliers.len() > b.len()) {
            best = Some((center, radius, inliers));
        }
    }

    best.filter(|(_, _, inliers)| inliers.len() >= 3)
}

/// Circumcircle of three points; `None` when they are (near) collinear.
fn circle_through(a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>) -> Option<(Vector2<f64>, f64)> {
    let det = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if det.abs() < 1e-12 {
        return None;
    }
    let a2 = a.norm_squared();
    let b2 = b.norm_squared();
    let c2 = c.norm_squared();
    let center = Vector2::new(
        (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / det,
        (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / det,
    );
    Some((center, (a - center).norm()))
}

/// Algebraic (Kasa) least-squares circle refit over a consensus set.
fn refine_circle(ids: &[usize], projected: &[Vector2<f64>]) -> Option<(Vector2<f64>, f64)> {
    if ids.len() < 3 {
        return None;
    }
    // x^2 + y^2 = 2 a x + 2 b y + c, solved by normal equations.
    let mut ata = Matrix3::zeros();
    let mut atb = Vector3::zeros();
    for &i in ids {
        let p = projected[i];
        let row = Vector3::new(2.0 * p.x, 2.0 * p.y, 1.0);
        ata += row * row.transpose();
        atb += row * p.norm_squared();
    }
    let solution = ata.lu().solve(&atb)?;
    let center = Vector2::new(solution.x, solution.y);
    let radius_sq = solution.z + center.norm_squared();
    if radius_sq <= 0.0 {
        return None;
    }
    Some((center, radius_sq.sqrt()))
}
