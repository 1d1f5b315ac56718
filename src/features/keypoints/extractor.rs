//! Keypoint extraction: fuses optically-tracked map-point priors with
//! freshly detected corners and attaches depth to every keypoint.

use image::GrayImage;
use nalgebra::Vector2;

use crate::config::Config;
use crate::map::MapPointId;
use crate::sensor::DepthImage;

use super::descriptor::{Descriptor, DescriptorExtractor};
use super::detector::CornerDetector;
use super::flow::FlowTracker;

/// Cap on freshly detected corners per frame.
const MAX_CORNERS: usize = 500;

/// Minimum pixel spacing between a fresh detection and an already
/// tracked keypoint.
const MIN_KEYPOINT_SPACING: f64 = 3.0;

/// A map point handed back for optical-flow tracking: where it was
/// last seen and how it looked.
#[derive(Debug, Clone)]
pub struct TrackedPrior {
    pub map_id: MapPointId,
    pub pixel: Vector2<f64>,
    pub descriptor: Descriptor,
}

/// A keypoint of the current frame with its depth and descriptor.
/// `map_id` is set for keypoints carried over by tracking.
#[derive(Debug, Clone)]
pub struct Keypoint {
    pub pixel: Vector2<f64>,
    pub depth: f64,
    pub descriptor: Descriptor,
    pub map_id: Option<MapPointId>,
}

/// Detects and tracks keypoints across frames.
pub struct KeypointExtractor {
    detector: CornerDetector,
    descriptors: DescriptorExtractor,
    tracker: FlowTracker,
    maximum_match_distance: u32,
    previous_gray: Option<GrayImage>,
}

impl KeypointExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            detector: CornerDetector::new(config.keypoint.minimum_hessian, MAX_CORNERS),
            descriptors: DescriptorExtractor::new(),
            tracker: FlowTracker::default(),
            maximum_match_distance: config.point.maximum_match_distance as u32,
            previous_gray: None,
        }
    }

    /// Compute the frame's keypoints.
    ///
    /// Priors are optically tracked from the previous image and keep
    /// their map ids and descriptors. When `redetect` is set, fresh
    /// corners are added away from the tracked ones; keypoints without
    /// valid depth or with a near-duplicate descriptor are dropped.
    pub fn compute(
        &mut self,
        gray: &GrayImage,
        depth: &DepthImage,
        priors: &[TrackedPrior],
        redetect: bool,
    ) -> Vec<Keypoint> {
        let mut keypoints = Vec::new();

        if let Some(previous) = &self.previous_gray {
            if !priors.is_empty() {
                let positions: Vec<(f32, f32)> = priors
                    .iter()
                    .map(|p| (p.pixel.x as f32, p.pixel.y as f32))
                    .collect();
                let tracked = self.tracker.track(previous, gray, &positions);

                for (prior, result) in priors.iter().zip(tracked) {
                    let Some((x, y)) = result else { continue };
                    let z = depth_at(depth, x, y);
                    if z <= 0.0 {
                        continue;
                    }
                    keypoints.push(Keypoint {
                        pixel: Vector2::new(x as f64, y as f64),
                        depth: z,
                        descriptor: prior.descriptor,
                        map_id: Some(prior.map_id),
                    });
                }
            }
        }

        if redetect {
            for corner in self.detector.detect(gray) {
                let pixel = Vector2::new(corner.x as f64, corner.y as f64);
                if keypoints
                    .iter()
                    .any(|k| (k.pixel - pixel).norm() < MIN_KEYPOINT_SPACING)
                {
                    continue;
                }
                let Some(descriptor) = self.descriptors.compute(gray, corner.x, corner.y) else {
                    continue;
                };
                let z = depth_at(depth, corner.x, corner.y);
                if z <= 0.0 {
                    continue;
                }
                if keypoints
                    .iter()
                    .any(|k| k.descriptor.hamming(&descriptor) < self.maximum_match_distance)
                {
                    continue;
                }
                keypoints.push(Keypoint {
                    pixel,
                    depth: z,
                    descriptor,
                    map_id: None,
                });
            }
        }

        self.previous_gray = Some(gray.clone());
        keypoints
    }

    /// Forget the previous frame (after a driver reset).
    pub fn reset(&mut self) {
        self.previous_gray = None;
    }
}

/// Depth at the nearest pixel; zero when out of bounds or invalid.
fn depth_at(depth: &DepthImage, x: f32, y: f32) -> f64 {
    let col = x.round() as i64;
    let row = y.round() as i64;
    if col < 0 || row < 0 || col >= depth.width() as i64 || row >= depth.height() as i64 {
        return 0.0;
    }
    let z = depth.get_pixel(col as u32, row as u32).0[0] as f64;
    if z.is_finite() && z > 0.0 {
        z
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn textured(seed: u64) -> GrayImage {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut image = GrayImage::new(96, 96);
        for y in 0..96 {
            for x in 0..96 {
                image.put_pixel(x, y, Luma([rng.gen_range(0..=255u8)]));
            }
        }
        image
    }

    fn flat_depth(z: f32) -> DepthImage {
        DepthImage::from_pixel(96, 96, Luma([z]))
    }

    #[test]
    fn detection_attaches_depth() {
        let mut extractor = KeypointExtractor::new(&Config::default());
        let keypoints = extractor.compute(&textured(1), &flat_depth(2.0), &[], true);
        assert!(!keypoints.is_empty());
        for k in &keypoints {
            assert_eq!(k.depth, 2.0);
            assert!(k.map_id.is_none());
        }
    }

    #[test]
    fn keypoints_without_depth_are_dropped() {
        let mut extractor = KeypointExtractor::new(&Config::default());
        let keypoints = extractor.compute(&textured(1), &flat_depth(0.0), &[], true);
        assert!(keypoints.is_empty());
    }

    #[test]
    fn priors_are_tracked_with_their_ids() {
        let mut extractor = KeypointExtractor::new(&Config::default());
        let gray = textured(1);
        let depth = flat_depth(1.5);

        let first = extractor.compute(&gray, &depth, &[], true);
        assert!(!first.is_empty());

        let priors: Vec<TrackedPrior> = first
            .iter()
            .enumerate()
            .map(|(i, k)| TrackedPrior {
                map_id: MapPointId::new(i as u64 + 1),
                pixel: k.pixel,
                descriptor: k.descriptor,
            })
            .collect();

        // Same image again: tracked positions must stay put.
        let second = extractor.compute(&gray, &depth, &priors, false);
        assert!(!second.is_empty());
        for k in &second {
            let id = k.map_id.expect("tracked keypoint keeps its id");
            let prior = &priors[(id.0 - 1) as usize];
            assert!((k.pixel - prior.pixel).norm() < 0.5);
        }
    }

    #[test]
    fn no_redetect_without_priors_is_empty() {
        let mut extractor = KeypointExtractor::new(&Config::default());
        let keypoints = extractor.compute(&textured(1), &flat_depth(1.0), &[], false);
        assert!(keypoints.is_empty());
    }
}
