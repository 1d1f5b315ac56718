//! The local map: keypoint and primitive landmark stores, frame
//! matching, and the per-frame update sweep.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector2;

use crate::config::{Config, PointConfig, PrimitiveConfig};
use crate::features::keypoints::{Keypoint, TrackedPrior};
use crate::features::primitives::Primitive;
use crate::geometry::{CameraIntrinsics, Pose};

use super::map_point::{MapPoint, MapPointId, PointStage};
use super::map_primitive::{MapPrimitive, MapPrimitiveId};
use super::matches::{PointMatch, PrimitiveMatch};

/// Pixel radius of the projection search for unidentified keypoints.
const SEARCH_RADIUS: f64 = 25.0;

/// Two keypoints this close with agreeing descriptors are the same
/// landmark; guards against duplicate insertions.
const DUPLICATE_PIXEL_RADIUS: f64 = 0.5;

/// Landmark stores and the matching/update logic around them.
pub struct LocalMap {
    intrinsics: CameraIntrinsics,
    point_config: PointConfig,
    primitive_config: PrimitiveConfig,
    points: BTreeMap<MapPointId, MapPoint>,
    primitives: BTreeMap<MapPrimitiveId, MapPrimitive>,
    next_point_id: u64,
    next_primitive_id: u64,
}

impl LocalMap {
    pub fn new(intrinsics: CameraIntrinsics, config: &Config) -> Self {
        Self {
            intrinsics,
            point_config: config.point,
            primitive_config: config.primitive,
            points: BTreeMap::new(),
            primitives: BTreeMap::new(),
            next_point_id: 1,
            next_primitive_id: 1,
        }
    }

    /// Points to seed into next-frame optical-flow tracking: everything
    /// staged, plus confirmed points whose liability has not decayed
    /// below the configured floor.
    pub fn tracked_features(&self) -> Vec<TrackedPrior> {
        self.points
            .values()
            .filter(|p| {
                p.stage == PointStage::Staged
                    || p.liability(self.point_config.age_liability)
                        >= self.point_config.minimum_liability_for_map
            })
            .map(|p| TrackedPrior {
                map_id: p.id,
                pixel: p.last_pixel,
                descriptor: p.descriptor,
            })
            .collect()
    }

    /// Associate current keypoints with map points.
    ///
    /// Keypoints carrying a tracked map id use it directly; the rest
    /// are matched by projecting every live map point into the
    /// predicted frame and taking the nearest candidate that also
    /// passes the descriptor threshold. Each map point matches at most
    /// one keypoint.
    pub fn match_keypoints(&mut self, predicted: &Pose, keypoints: &[Keypoint]) -> Vec<PointMatch> {
        // Every live point has now been offered to matching at least
        // once; newly created points lose their grace period here.
        for point in self.points.values_mut() {
            point.fresh = false;
        }

        let mut matches = Vec::new();
        let mut used: BTreeSet<MapPointId> = BTreeSet::new();

        // Fast path: keypoints that kept their identity through
        // optical-flow tracking.
        for (index, keypoint) in keypoints.iter().enumerate() {
            let Some(id) = keypoint.map_id else { continue };
            if used.contains(&id) {
                continue;
            }
            if let Some(point) = self.points.get(&id) {
                matches.push(PointMatch {
                    world: point.position,
                    screen: keypoint.pixel,
                    id,
                    keypoint_index: index,
                });
                used.insert(id);
            }
        }

        // Projection path for the remaining keypoints.
        let world_to_camera = predicted.world_to_camera();
        let projected: Vec<(MapPointId, Vector2<f64>)> = self
            .points
            .values()
            .filter_map(|p| {
                self.intrinsics
                    .project(&p.position, &world_to_camera)
                    .map(|pixel| (p.id, pixel))
            })
            .collect();

        for (index, keypoint) in keypoints.iter().enumerate() {
            if keypoint.map_id.is_some() && matches.iter().any(|m| m.keypoint_index == index) {
                continue;
            }
            let mut best: Option<(MapPointId, f64)> = None;
            for &(id, pixel) in &projected {
                if used.contains(&id) {
                    continue;
                }
                let distance = (pixel - keypoint.pixel).norm();
                if distance > SEARCH_RADIUS {
                    continue;
                }
                let descriptor_distance = self.points[&id].descriptor.hamming(&keypoint.descriptor);
                if f64::from(descriptor_distance) >= self.point_config.maximum_match_distance {
                    continue;
                }
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((id, distance));
                }
            }
            if let Some((id, _)) = best {
                matches.push(PointMatch {
                    world: self.points[&id].position,
                    screen: keypoint.pixel,
                    id,
                    keypoint_index: index,
                });
                used.insert(id);
            }
        }

        matches
    }

    /// Associate detected primitives with map primitives by mask IoU
    /// and normal agreement. Winning detections get their `matched_id`
    /// set; each map primitive is matched at most once per frame.
    pub fn match_primitives(&mut self, detected: &mut [Primitive]) -> Vec<PrimitiveMatch> {
        for primitive in self.primitives.values_mut() {
            primitive.matched_label = None;
        }

        let mut matches = Vec::new();
        for detection in detected.iter_mut() {
            for (id, landmark) in self.primitives.iter_mut() {
                if landmark.matched_label.is_some() {
                    continue;
                }
                if detection.is_similar(
                    &landmark.primitive,
                    self.primitive_config.minimum_iou,
                    self.primitive_config.minimum_normals_dot,
                ) {
                    detection.matched_id = id.0;
                    landmark.matched_label = Some(detection.label);
                    matches.push(PrimitiveMatch {
                        map_id: *id,
                        detected_label: detection.label,
                    });
                    break;
                }
            }
        }
        matches
    }

    /// Apply the frame's verdict to the map.
    ///
    /// Matched points (minus optimizer outliers) age up and may get
    /// confirmed; everything else ages toward eviction. When
    /// `triangulate` is set, unmatched keypoints with depth become new
    /// staged points anchored at the refined pose.
    pub fn update(
        &mut self,
        refined: &Pose,
        keypoints: &[Keypoint],
        matches: &[PointMatch],
        outliers: &[MapPointId],
        detected_primitives: Vec<Primitive>,
        triangulate: bool,
    ) {
        let outlier_set: BTreeSet<MapPointId> = outliers.iter().copied().collect();
        let mut matched_pixels: BTreeMap<MapPointId, Vector2<f64>> = BTreeMap::new();
        let mut matched_keypoints: BTreeSet<usize> = BTreeSet::new();

        for point_match in matches {
            matched_keypoints.insert(point_match.keypoint_index);
            if !outlier_set.contains(&point_match.id) {
                matched_pixels.insert(point_match.id, point_match.screen);
            }
        }

        let age_liability = self.point_config.age_liability;
        for point in self.points.values_mut() {
            if point.fresh {
                // Created since the last match cycle; it has not been
                // offered to matching yet, so it cannot be missed.
                continue;
            }
            match matched_pixels.get(&point.id) {
                Some(pixel) => point.mark_matched(*pixel, age_liability),
                None => point.mark_unmatched(),
            }
        }

        self.clean_untracked();

        if triangulate {
            for (index, keypoint) in keypoints.iter().enumerate() {
                if matched_keypoints.contains(&index) || keypoint.depth <= 0.0 {
                    continue;
                }
                if self.is_duplicate(keypoint) {
                    continue;
                }
                let camera_point =
                    self.intrinsics
                        .unproject(keypoint.pixel.x, keypoint.pixel.y, keypoint.depth);
                let id = MapPointId::new(self.next_point_id);
                self.next_point_id += 1;
                self.points.insert(
                    id,
                    MapPoint::new_staged(
                        id,
                        refined.to_world(&camera_point),
                        keypoint.descriptor,
                        keypoint.pixel,
                    ),
                );
            }
        }

        self.update_primitives(detected_primitives);
    }

    /// Drop points whose unmatched streak disqualifies them.
    pub fn clean_untracked(&mut self) {
        let maximum = self.point_config.unmatched_count_to_loose;
        self.points.retain(|_, point| !point.should_evict(maximum));
    }

    fn is_duplicate(&self, keypoint: &Keypoint) -> bool {
        self.points.values().any(|p| {
            (p.last_pixel - keypoint.pixel).norm() < DUPLICATE_PIXEL_RADIUS
                && f64::from(p.descriptor.hamming(&keypoint.descriptor))
                    < self.point_config.maximum_match_distance
        })
    }

    fn update_primitives(&mut self, detected: Vec<Primitive>) {
        let mut refreshed: BTreeSet<MapPrimitiveId> = BTreeSet::new();

        for detection in detected {
            if detection.matched_id != 0 {
                let id = MapPrimitiveId::new(detection.matched_id);
                if let Some(landmark) = self.primitives.get_mut(&id) {
                    landmark.matched_label = Some(detection.label);
                    landmark.primitive = detection;
                    landmark.unmatched_streak = 0;
                    refreshed.insert(id);
                    continue;
                }
            }

            // A detection the matcher could not place may still
            // coincide with a landmark added after matching ran (e.g.
            // on a replayed update); refresh instead of duplicating.
            let similar = self
                .primitives
                .iter()
                .filter(|(id, _)| !refreshed.contains(*id))
                .find(|(_, landmark)| {
                    detection.is_similar(
                        &landmark.primitive,
                        self.primitive_config.minimum_iou,
                        self.primitive_config.minimum_normals_dot,
                    )
                })
                .map(|(id, _)| *id);

            match similar {
                Some(id) => {
                    if let Some(landmark) = self.primitives.get_mut(&id) {
                        landmark.matched_label = Some(detection.label);
                        landmark.primitive = detection;
                        landmark.unmatched_streak = 0;
                        refreshed.insert(id);
                    }
                }
                None => {
                    let id = MapPrimitiveId::new(self.next_primitive_id);
                    self.next_primitive_id += 1;
                    self.primitives.insert(id, MapPrimitive::new(id, detection));
                    refreshed.insert(id);
                }
            }
        }

        let maximum = self.point_config.unmatched_count_to_loose;
        for (_, landmark) in self.primitives.iter_mut() {
            if !refreshed.contains(&landmark.id) {
                landmark.matched_label = None;
                landmark.unmatched_streak += 1;
            }
        }
        self.primitives
            .retain(|_, landmark| landmark.unmatched_streak <= maximum);
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.points
            .values()
            .filter(|p| p.stage == PointStage::Confirmed)
            .count()
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn points(&self) -> impl Iterator<Item = &MapPoint> {
        self.points.values()
    }

    pub fn primitives(&self) -> impl Iterator<Item = &MapPrimitive> {
        self.primitives.values()
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.primitives.clear();
        // Ids keep increasing; a reset must not recycle identities.
    }
}
