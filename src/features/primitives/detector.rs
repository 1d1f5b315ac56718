//! Organized-cloud segmentation into planar and cylindrical primitives.
//!
//! The pipeline runs five stages per frame:
//! 1. fit a plane to every grid cell (arena of accumulators, no
//!    per-frame allocation),
//! 2. histogram the planar-cell normals,
//! 3. seed-and-grow regions from the dominant direction bin, deciding
//!    plane vs cylinder per region by model MSE,
//! 4. merge adjacent compatible planes and refit,
//! 5. refine region boundaries with erode/dilate masks and per-pixel
//!    distance competition, emitting the final primitives and a
//!    full-resolution label image.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{Config, CylinderConfig, DepthConfig, PrimitiveConfig};
use crate::sensor::OrganizedCloud;

use super::cylinder_segment::CylinderSegment;
use super::histogram::Histogram;
use super::plane_segment::PlaneSegment;
use super::shapes::{
    CylinderParameters, PlaneParameters, Primitive, CYLINDER_LABEL_OFFSET,
};

/// Lower clamp of the per-cell merge tolerance, in depth units.
const MERGE_TOLERANCE_FLOOR: f64 = 20.0;

/// A grown region this small is handed to the cylinder fitter only if
/// it clears this many cells.
const MINIMUM_CELLS_FOR_CYLINDER: usize = 6;

/// Mask fill value for morphology.
const MASK_ON: u8 = 255;

/// Detects planes and cylinders in an organized point cloud.
///
/// All grid-sized and image-sized buffers are allocated at construction
/// and reset in place; only the returned primitive list grows per call.
pub struct PrimitiveDetector {
    cell_size: usize,
    cell_cols: usize,
    cell_rows: usize,
    cell_count: usize,
    points_per_cell: usize,

    primitive: PrimitiveConfig,
    depth: DepthConfig,
    cylinder: CylinderConfig,
    /// sin(acos(maximum_cos_angle)), precomputed for merge tolerances.
    sin_angle_for_merge: f64,

    rng: ChaCha8Rng,

    // Arena of per-cell fits, reused every frame.
    plane_grid: Vec<PlaneSegment>,
    cell_distance_tols: Vec<f64>,
    histogram: Histogram,
    cell_angles: Vec<(f64, f64)>,
    unassigned: Vec<bool>,
    activation: Vec<bool>,
    grow_stack: Vec<(usize, usize, Vector3<f64>, f64)>,

    // Region labels over the cell grid (1-based, 0 = none).
    grid_plane_map: Vec<u32>,
    grid_cylinder_map: Vec<u32>,
    grid_plane_eroded: Vec<u8>,
    grid_cylinder_eroded: Vec<u8>,

    // Per-pixel competition buffers, cell-contiguous indexing.
    distances_stacked: Vec<f64>,
    seg_map_stacked: Vec<u8>,

    // Region fits of the current frame.
    plane_segments: Vec<PlaneSegment>,
    cylinder_segments: Vec<CylinderSegment>,

    segmentation: GrayImage,
}

impl PrimitiveDetector {
    pub fn new(width: usize, height: usize, config: &Config) -> Self {
        let cell_size = config.primitive.depth_map_patch_size as usize;
        let cell_cols = width / cell_size;
        let cell_rows = height / cell_size;
        let cell_count = cell_cols * cell_rows;

        Self {
            cell_size,
            cell_cols,
            cell_rows,
            cell_count,
            points_per_cell: cell_size * cell_size,
            primitive: config.primitive,
            depth: config.depth,
            cylinder: config.cylinder,
            sin_angle_for_merge: (1.0 - config.primitive.maximum_cos_angle.powi(2)).sqrt(),
            rng: ChaCha8Rng::seed_from_u64(config.cylinder.ransac_seed),
            plane_grid: (0..cell_count).map(|_| PlaneSegment::new()).collect(),
            cell_distance_tols: vec![0.0; cell_count],
            histogram: Histogram::new(cell_size),
            cell_angles: vec![(0.0, 0.0); cell_count],
            unassigned: vec![false; cell_count],
            activation: vec![false; cell_count],
            grow_stack: Vec::with_capacity(cell_count),
            grid_plane_map: vec![0; cell_count],
            grid_cylinder_map: vec![0; cell_count],
            grid_plane_eroded: vec![0; cell_count],
            grid_cylinder_eroded: vec![0; cell_count],
            distances_stacked: vec![f64::MAX; width * height],
            seg_map_stacked: vec![0; width * height],
            plane_segments: Vec::new(),
            cylinder_segments: Vec::new(),
            segmentation: GrayImage::new(width as u32, height as u32),
        }
    }

    /// Run the full pipeline. The returned list is freshly built; the
    /// label image is available through [`segmentation`](Self::segmentation)
    /// until the next call.
    pub fn find_primitives(&mut self, cloud: &OrganizedCloud) -> Vec<Primitive> {
        debug_assert_eq!(cloud.cell_count(), self.cell_count);

        self.reset_buffers();
        self.init_planar_cell_fitting(cloud);
        let remaining = self.init_histogram();

        let cylinder_regions = self.grow_planes_and_cylinders(remaining);
        let merge_labels = self.merge_planes();

        let mut primitives = Vec::new();
        self.refine_plane_boundaries(cloud, &merge_labels, &mut primitives);
        if self.cylinder.use_detection {
            self.refine_cylinder_boundaries(cloud, &cylinder_regions, &mut primitives);
        }
        self.write_segmentation();
        primitives
    }

    /// Full-resolution label image of the last call: 0 background,
    /// 1..=49 planes, 50..=255 cylinders.
    pub fn segmentation(&self) -> &GrayImage {
        &self.segmentation
    }

    fn reset_buffers(&mut self) {
        self.histogram.reset();
        self.plane_segments.clear();
        self.cylinder_segments.clear();
        self.grid_plane_map.fill(0);
        self.grid_cylinder_map.fill(0);
        self.grid_plane_eroded.fill(0);
        self.grid_cylinder_eroded.fill(0);
        self.unassigned.fill(false);
        self.distances_stacked.fill(f64::MAX);
        self.seg_map_stacked.fill(0);
    }

    fn init_planar_cell_fitting(&mut self, cloud: &OrganizedCloud) {
        for cell_id in 0..self.cell_count {
            self.plane_grid[cell_id].init(cloud, cell_id, self.cell_size, &self.depth);
            self.cell_distance_tols[cell_id] = 0.0;

            if self.plane_grid[cell_id].is_planar() {
                let points = cloud.cell_points(cell_id);
                let diameter = (points[points.len() - 1] - points[0]).norm();
                let tolerance = (diameter * self.sin_angle_for_merge)
                    .clamp(MERGE_TOLERANCE_FLOOR, self.primitive.maximum_merge_distance);
                self.cell_distance_tols[cell_id] = tolerance * tolerance;
            }
        }
    }

    fn init_histogram(&mut self) -> usize {
        let mut remaining = 0;
        for cell_id in 0..self.cell_count {
            if self.plane_grid[cell_id].is_planar() {
                self.cell_angles[cell_id] = Histogram::angles_of_normal(self.plane_grid[cell_id].normal());
                self.unassigned[cell_id] = true;
                remaining += 1;
            } else {
                self.cell_angles[cell_id] = (0.0, 0.0);
            }
        }
        self.histogram.init(&self.cell_angles, &self.unassigned);
        remaining
    }

    /// Seed-and-grow loop. Returns `(cylinder_index, sub_segment)`
    /// pairs for every committed cylinder sub-region.
    fn grow_planes_and_cylinders(&mut self, mut remaining: usize) -> Vec<(usize, usize)> {
        let mut cylinder_regions = Vec::new();
        let mut cylinder_label_count = 0u32;
        let mut seed_candidates = Vec::new();

        while remaining > 0 {
            self.histogram.points_from_most_frequent_bin(&mut seed_candidates);
            if seed_candidates.len() < self.primitive.minimum_plane_seed_count {
                break;
            }

            // Seed with the lowest-MSE candidate.
            let seed_id = seed_candidates
                .iter()
                .copied()
                .min_by(|&a, &b| self.plane_grid[a].mse().total_cmp(&self.plane_grid[b].mse()))
                .expect("non-empty candidate set");

            let mut new_segment = self.plane_grid[seed_id].clone();

            self.activation.fill(false);
            self.region_growing(
                seed_id % self.cell_cols,
                seed_id / self.cell_cols,
                *new_segment.normal(),
                new_segment.d(),
            );

            // Merge activated cells and consume them from the histogram.
            let mut activated = 0usize;
            for cell_id in 0..self.cell_count {
                if self.activation[cell_id] {
                    if cell_id != seed_id {
                        new_segment.expand(&self.plane_grid[cell_id]);
                    }
                    self.histogram.remove_point(cell_id);
                    self.unassigned[cell_id] = false;
                    remaining -= 1;
                    activated += 1;
                }
            }

            if activated < self.primitive.minimum_cell_activated {
                self.histogram.remove_point(seed_id);
                continue;
            }

            new_segment.fit();

            if !self.cylinder.use_detection || new_segment.score() > 100.0 {
                self.plane_segments.push(new_segment);
                let label = self.plane_segments.len() as u32;
                for cell_id in 0..self.cell_count {
                    if self.activation[cell_id] {
                        self.grid_plane_map[cell_id] = label;
                    }
                }
            } else if activated >= MINIMUM_CELLS_FOR_CYLINDER {
                // The region is not flat enough for a plane: try an
                // extrusion, then keep whichever model explains each
                // sub-segment better.
                let mut normals = Vec::with_capacity(activated);
                let mut centroids = Vec::with_capacity(activated);
                let mut local_to_global = Vec::with_capacity(activated);
                for cell_id in 0..self.cell_count {
                    if self.activation[cell_id] {
                        normals.push(*self.plane_grid[cell_id].normal());
                        centroids.push(*self.plane_grid[cell_id].mean());
                        local_to_global.push(cell_id);
                    }
                }
                let cylinder = CylinderSegment::fit(
                    &normals,
                    &centroids,
                    local_to_global,
                    &self.cylinder,
                    &mut self.rng,
                );

                for sub in 0..cylinder.segment_count() {
                    let mut sub_plane = PlaneSegment::new();
                    for local in 0..cylinder.local_cell_count() {
                        if cylinder.is_inlier_at(sub, local) {
                            sub_plane.expand(&self.plane_grid[cylinder.local_to_global(local)]);
                        }
                    }
                    sub_plane.fit();

                    if sub_plane.mse() < cylinder.mse_at(sub) {
                        self.plane_segments.push(sub_plane);
                        let label = self.plane_segments.len() as u32;
                        for local in 0..cylinder.local_cell_count() {
                            if cylinder.is_inlier_at(sub, local) {
                                self.grid_plane_map[cylinder.local_to_global(local)] = label;
                            }
                        }
                    } else {
                        cylinder_label_count += 1;
                        cylinder_regions.push((self.cylinder_segments.len(), sub));
                        for local in 0..cylinder.local_cell_count() {
                            if cylinder.is_inlier_at(sub, local) {
                                self.grid_cylinder_map[cylinder.local_to_global(local)] =
                                    cylinder_label_count;
                            }
                        }
                    }
                }
                self.cylinder_segments.push(cylinder);
            }
        }
        cylinder_regions
    }

    /// Iterative 4-connected flood fill over the cell grid. Each
    /// neighbor is tested against the plane of the cell that reached
    /// it, so growth follows gentle curvature.
    fn region_growing(&mut self, x: usize, y: usize, normal: Vector3<f64>, d: f64) {
        self.grow_stack.clear();
        self.grow_stack.push((x, y, normal, d));

        while let Some((x, y, normal, d)) = self.grow_stack.pop() {
            let index = y * self.cell_cols + x;
            if !self.unassigned[index] || self.activation[index] {
                continue;
            }

            let cell = &self.plane_grid[index];
            if normal.dot(cell.normal()) < self.primitive.maximum_cos_angle {
                continue;
            }
            let plane_distance = normal.dot(cell.mean()) + d;
            if plane_distance * plane_distance > self.cell_distance_tols[index] {
                continue;
            }

            self.activation[index] = true;

            let cell_normal = *cell.normal();
            let cell_d = cell.d();
            if x > 0 {
                self.grow_stack.push((x - 1, y, cell_normal, cell_d));
            }
            if x + 1 < self.cell_cols {
                self.grow_stack.push((x + 1, y, cell_normal, cell_d));
            }
            if y > 0 {
                self.grow_stack.push((x, y - 1, cell_normal, cell_d));
            }
            if y + 1 < self.cell_rows {
                self.grow_stack.push((x, y + 1, cell_normal, cell_d));
            }
        }
    }

    /// Union adjacent plane regions whose fits agree; returns the merge
    /// label of every region.
    fn merge_planes(&mut self) -> Vec<usize> {
        let plane_count = self.plane_segments.len();
        let mut association = vec![false; plane_count * plane_count];
        self.connected_components(&mut association);

        let mut merge_labels: Vec<usize> = (0..plane_count).collect();

        for row in 0..plane_count {
            let mut expanded = false;
            let representative = merge_labels[row];

            for col in row + 1..plane_count {
                if !association[row * plane_count + col] {
                    continue;
                }
                let candidate = self.plane_segments[col].clone();
                let target = &self.plane_segments[representative];

                let cos_angle = target.normal().dot(candidate.normal());
                let offset = target.normal().dot(candidate.mean()) + target.d();

                if cos_angle > self.primitive.maximum_cos_angle
                    && offset * offset < self.primitive.maximum_merge_distance
                {
                    self.plane_segments[representative].expand(&candidate);
                    merge_labels[col] = representative;
                    expanded = true;
                } else {
                    association[row * plane_count + col] = false;
                }
            }
            if expanded {
                self.plane_segments[representative].fit();
            }
        }
        merge_labels
    }

    /// Mark region pairs that touch over a cell edge.
    fn connected_components(&self, association: &mut [bool]) {
        let plane_count = self.plane_segments.len();
        if plane_count == 0 {
            return;
        }
        for row in 0..self.cell_rows.saturating_sub(1) {
            for col in 0..self.cell_cols.saturating_sub(1) {
                let here = self.grid_plane_map[row * self.cell_cols + col];
                if here == 0 {
                    continue;
                }
                let right = self.grid_plane_map[row * self.cell_cols + col + 1];
                let below = self.grid_plane_map[(row + 1) * self.cell_cols + col];
                for other in [right, below] {
                    if other > 0 && other != here {
                        let (a, b) = ((here - 1) as usize, (other - 1) as usize);
                        association[a * plane_count + b] = true;
                        association[b * plane_count + a] = true;
                    }
                }
            }
        }
    }

    fn refine_plane_boundaries(
        &mut self,
        cloud: &OrganizedCloud,
        merge_labels: &[usize],
        primitives: &mut Vec<Primitive>,
    ) {
        let plane_count = self.plane_segments.len();
        let mut label_allocator = 0u8;

        for region in 0..plane_count {
            if merge_labels[region] != region {
                continue;
            }
            if label_allocator + 1 >= CYLINDER_LABEL_OFFSET {
                break;
            }

            let mut mask = GrayImage::new(self.cell_cols as u32, self.cell_rows as u32);
            for member in region..plane_count {
                if merge_labels[member] != region {
                    continue;
                }
                for cell_id in 0..self.cell_count {
                    if self.grid_plane_map[cell_id] == (member + 1) as u32 {
                        mask.put_pixel(
                            (cell_id % self.cell_cols) as u32,
                            (cell_id / self.cell_cols) as u32,
                            Luma([MASK_ON]),
                        );
                    }
                }
            }

            let eroded = erode(&mask, Norm::L1, 1);
            if eroded.pixels().all(|p| p.0[0] == 0) {
                continue;
            }
            let dilated = dilate(&mask, Norm::LInf, 1);

            label_allocator += 1;
            let label = label_allocator;

            let segment = &self.plane_segments[region];
            let normal = *segment.normal();
            let d = segment.d();
            let max_distance_sq = 9.0 * segment.mse();

            primitives.push(Primitive::new_plane(
                label,
                dilated.clone(),
                PlaneParameters {
                    normal,
                    d,
                    mean: *segment.mean(),
                },
            ));

            for cell_id in 0..self.cell_count {
                let x = (cell_id % self.cell_cols) as u32;
                let y = (cell_id / self.cell_cols) as u32;
                if eroded.get_pixel(x, y).0[0] > 0 {
                    self.grid_plane_eroded[cell_id] = label;
                } else if dilated.get_pixel(x, y).0[0] > 0 {
                    // Boundary band: claim pixels by plane distance.
                    let offset = cell_id * self.points_per_cell;
                    for (j, point) in cloud.cell_points(cell_id).iter().enumerate() {
                        let distance = normal.dot(point) + d;
                        let distance_sq = distance * distance;
                        let slot = offset + j;
                        if distance_sq < max_distance_sq && distance_sq < self.distances_stacked[slot]
                        {
                            self.distances_stacked[slot] = distance_sq;
                            self.seg_map_stacked[slot] = label;
                        }
                    }
                }
            }
        }
    }

    fn refine_cylinder_boundaries(
        &mut self,
        cloud: &OrganizedCloud,
        cylinder_regions: &[(usize, usize)],
        primitives: &mut Vec<Primitive>,
    ) {
        let mut label_allocator = CYLINDER_LABEL_OFFSET - 1;

        for (pair_index, &(cylinder_index, sub)) in cylinder_regions.iter().enumerate() {
            if label_allocator == u8::MAX {
                break;
            }

            let mut mask = GrayImage::new(self.cell_cols as u32, self.cell_rows as u32);
            for cell_id in 0..self.cell_count {
                if self.grid_cylinder_map[cell_id] == (pair_index + 1) as u32 {
                    mask.put_pixel(
                        (cell_id % self.cell_cols) as u32,
                        (cell_id / self.cell_cols) as u32,
                        Luma([MASK_ON]),
                    );
                }
            }

            let eroded = erode(&mask, Norm::L1, 1);
            if eroded.pixels().all(|p| p.0[0] == 0) {
                continue;
            }
            let dilated = dilate(&mask, Norm::LInf, 1);

            label_allocator += 1;
            let label = label_allocator;

            let cylinder = &self.cylinder_segments[cylinder_index];
            let p1 = *cylinder.axis_point_1(sub);
            let p2 = *cylinder.axis_point_2(sub);
            let axis_length = cylinder.axis_length(sub);
            let radius = cylinder.radius(sub);
            let max_distance_sq = 9.0 * cylinder.mse_at(sub);

            primitives.push(Primitive::new_cylinder(
                label,
                dilated.clone(),
                CylinderParameters {
                    axis: *cylinder.axis(),
                    axis_point_1: p1,
                    axis_point_2: p2,
                    radius,
                },
            ));

            let direction = p2 - p1;
            for cell_id in 0..self.cell_count {
                let x = (cell_id % self.cell_cols) as u32;
                let y = (cell_id / self.cell_cols) as u32;
                if eroded.get_pixel(x, y).0[0] > 0 {
                    self.grid_cylinder_eroded[cell_id] = label;
                } else if dilated.get_pixel(x, y).0[0] > 0 {
                    let offset = cell_id * self.points_per_cell;
                    for (j, point) in cloud.cell_points(cell_id).iter().enumerate() {
                        if point.z <= 0.0 {
                            continue;
                        }
                        let distance = if axis_length > 0.0 {
                            direction.cross(&(point - p2)).norm() / axis_length - radius
                        } else {
                            (point - p2).norm() - radius
                        };
                        let distance_sq = distance * distance;
                        let slot = offset + j;
                        if distance_sq < max_distance_sq && distance_sq < self.distances_stacked[slot]
                        {
                            self.distances_stacked[slot] = distance_sq;
                            self.seg_map_stacked[slot] = label;
                        }
                    }
                }
            }
        }
    }

    /// Assemble the full-resolution label image: eroded interiors fill
    /// whole cells, boundary bands use the per-pixel competition result.
    fn write_segmentation(&mut self) {
        for cell_id in 0..self.cell_count {
            let cell_col = cell_id % self.cell_cols;
            let cell_row = cell_id / self.cell_cols;
            let x0 = (cell_col * self.cell_size) as u32;
            let y0 = (cell_row * self.cell_size) as u32;

            let interior_label = if self.grid_plane_eroded[cell_id] > 0 {
                self.grid_plane_eroded[cell_id]
            } else {
                self.grid_cylinder_eroded[cell_id]
            };

            if interior_label > 0 {
                for dy in 0..self.cell_size as u32 {
                    for dx in 0..self.cell_size as u32 {
                        self.segmentation.put_pixel(x0 + dx, y0 + dy, Luma([interior_label]));
                    }
                }
            } else {
                let offset = cell_id * self.points_per_cell;
                for dy in 0..self.cell_size {
                    for dx in 0..self.cell_size {
                        let label = self.seg_map_stacked[offset + dy * self.cell_size + dx];
                        self.segmentation
                            .put_pixel(x0 + dx as u32, y0 + dy as u32, Luma([label]));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CameraIntrinsics;
    use crate::sensor::{CloudTransformer, DepthImage};
    use rand::Rng;

    const W: usize = 80;
    const H: usize = 80;
    const CELL: usize = 20;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 80.0,
            fy: 80.0,
            cx: 40.0,
            cy: 40.0,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.primitive.minimum_plane_seed_count = 4;
        config.primitive.minimum_cell_activated = 4;
        config
    }

    fn detect(depth: &DepthImage, config: &Config) -> (Vec<Primitive>, GrayImage) {
        let mut transformer = CloudTransformer::new(intrinsics(), W, H, CELL);
        let cloud = transformer.organize(depth);
        let mut detector = PrimitiveDetector::new(W, H, config);
        let primitives = detector.find_primitives(cloud);
        (primitives, detector.segmentation().clone())
    }

    fn flat_depth(z: f32) -> DepthImage {
        DepthImage::from_pixel(W as u32, H as u32, Luma([z]))
    }

    #[test]
    fn single_plane_yields_one_primitive() {
        let (primitives, segmentation) = detect(&flat_depth(2000.0), &config());
        assert_eq!(primitives.len(), 1);
        assert!(primitives[0].is_plane());
        assert_eq!(primitives[0].label, 1);

        // The interior of the frame carries the plane label.
        assert_eq!(segmentation.get_pixel(40, 40).0[0], 1);
    }

    #[test]
    fn two_separated_planes_stay_separate() {
        // Left half at 1 m, right half at 3 m (millimeter units), far
        // beyond the merge distance.
        let mut depth = DepthImage::new(W as u32, H as u32);
        for y in 0..H as u32 {
            for x in 0..W as u32 {
                let z = if x < 40 { 1000.0 } else { 3000.0 };
                depth.put_pixel(x, y, Luma([z]));
            }
        }
        let (primitives, _) = detect(&depth, &config());
        assert_eq!(primitives.len(), 2);
        assert!(primitives.iter().all(|p| p.is_plane()));
    }

    #[test]
    fn random_depth_yields_no_primitives() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut depth = DepthImage::new(W as u32, H as u32);
        for y in 0..H as u32 {
            for x in 0..W as u32 {
                depth.put_pixel(x, y, Luma([rng.gen_range(500.0..4000.0)]));
            }
        }
        let (primitives, segmentation) = detect(&depth, &config());
        assert!(primitives.is_empty());
        assert!(segmentation.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn empty_depth_yields_no_primitives() {
        let (primitives, _) = detect(&flat_depth(0.0), &config());
        assert!(primitives.is_empty());
    }

    #[test]
    fn stored_mask_is_the_dilated_mask() {
        // A plane covering the left half: its stored mask must extend
        // one cell into the right half (dilation), while the grown
        // region itself is only the left columns.
        let mut depth = DepthImage::new(W as u32, H as u32);
        for y in 0..H as u32 {
            for x in 0..W as u32 {
                let z = if x < 40 { 1000.0 } else { 0.0 };
                depth.put_pixel(x, y, Luma([z]));
            }
        }
        let (primitives, _) = detect(&depth, &config());
        assert_eq!(primitives.len(), 1);
        let mask = &primitives[0].mask;
        let covered: usize = mask.pixels().filter(|p| p.0[0] > 0).count();
        // Region is 2x4 cells; the dilated mask adds the adjacent column.
        assert!(covered > 8, "dilated mask should exceed the 8 region cells, got {covered}");
    }

    #[test]
    fn labels_respect_plane_range() {
        let (primitives, segmentation) = detect(&flat_depth(1500.0), &config());
        for p in &primitives {
            if p.is_plane() {
                assert!((1..CYLINDER_LABEL_OFFSET).contains(&p.label));
            } else {
                assert!(p.label >= CYLINDER_LABEL_OFFSET);
            }
        }
        for pixel in segmentation.pixels() {
            let label = pixel.0[0];
            assert!(label == 0 || primitives.iter().any(|p| p.label == label));
        }
    }
}
