//! The per-frame SLAM driver.
//!
//! Owns every pipeline component and runs the frame flow: organized
//! cloud, primitive detection, keypoint extraction, motion-model
//! prediction, map matching, pose optimization, and the map update.
//! Single-threaded and synchronous; `track` must not be re-entered.

use std::collections::VecDeque;
use std::time::Instant;

use image::{GrayImage, RgbImage};
use tracing::{debug, info, warn};

use crate::config::{Config, TriangulationPolicy};
use crate::errors::{Result, SlamError};
use crate::features::keypoints::KeypointExtractor;
use crate::features::primitives::PrimitiveDetector;
use crate::geometry::{CameraIntrinsics, Pose};
use crate::map::LocalMap;
use crate::optimize::PoseOptimizer;
use crate::sensor::{CloudTransformer, DepthImage};
use crate::tracking::{MotionModel, SlamState};
use crate::viz;

/// Length of the recent-match-count window driving the
/// decreasing-matches triangulation policy.
const MATCH_WINDOW: usize = 3;

/// Accumulated per-stage processing times, reported on demand.
#[derive(Debug, Default, Clone, Copy)]
struct FrameTimers {
    cloud_seconds: f64,
    primitive_seconds: f64,
    pose_seconds: f64,
    frames: u64,
}

/// Real-time RGB-D SLAM over grayscale + depth frames.
pub struct RgbdSlam {
    config: Config,
    width: u32,
    height: u32,

    state: SlamState,
    current_pose: Pose,
    start_pose: Pose,

    cloud_transformer: CloudTransformer,
    primitive_detector: PrimitiveDetector,
    keypoint_extractor: KeypointExtractor,
    motion_model: MotionModel,
    local_map: LocalMap,
    pose_optimizer: PoseOptimizer,

    frame_count: u64,
    keypoint_counter: u32,
    consecutive_failures: u32,
    last_matches: VecDeque<usize>,
    /// Degradation recorded by the last `track` call, if any. These
    /// conditions are non-fatal (the call still returns a pose), so
    /// they are surfaced here instead of through the return value.
    last_degradation: Option<SlamError>,
    timers: FrameTimers,
}

impl RgbdSlam {
    /// Build a SLAM instance for a fixed image geometry. The image
    /// dimensions must be multiples of the cell size.
    pub fn new(config: Config, start_pose: Pose, width: u32, height: u32) -> Result<Self> {
        config.validate()?;
        let cell = config.primitive.depth_map_patch_size;
        if width % cell != 0 || height % cell != 0 {
            return Err(SlamError::ConfigInvalid(format!(
                "image {width}x{height} is not a multiple of the {cell}px cell size"
            )));
        }

        let intrinsics = CameraIntrinsics::from_config(&config.camera);
        let slam = Self {
            width,
            height,
            state: SlamState::NotInitialized,
            current_pose: start_pose.clone(),
            start_pose,
            cloud_transformer: CloudTransformer::new(
                intrinsics,
                width as usize,
                height as usize,
                cell as usize,
            ),
            primitive_detector: PrimitiveDetector::new(width as usize, height as usize, &config),
            keypoint_extractor: KeypointExtractor::new(&config),
            motion_model: MotionModel::new(config.tracking.motion_smoothing),
            local_map: LocalMap::new(intrinsics, &config),
            pose_optimizer: PoseOptimizer::new(intrinsics, &config),
            frame_count: 0,
            keypoint_counter: 0,
            consecutive_failures: 0,
            last_matches: VecDeque::from(vec![usize::MAX; MATCH_WINDOW]),
            last_degradation: None,
            timers: FrameTimers::default(),
            config,
        };
        Ok(slam)
    }

    pub fn state(&self) -> SlamState {
        self.state
    }

    pub fn current_pose(&self) -> &Pose {
        &self.current_pose
    }

    pub fn local_map(&self) -> &LocalMap {
        &self.local_map
    }

    /// The non-fatal degradation recorded by the last `track` call:
    /// [`SlamError::InsufficientMatches`] or
    /// [`SlamError::OptimizerNonConvergence`] while still tracking,
    /// [`SlamError::TrackingLost`] once the sticky transition fired.
    /// `None` after a cleanly tracked frame.
    pub fn last_degradation(&self) -> Option<&SlamError> {
        self.last_degradation.as_ref()
    }

    /// Process one frame and return the new camera pose.
    ///
    /// Once tracking is lost the call becomes a pass-through that
    /// returns the frozen pose.
    pub fn track(&mut self, gray: &GrayImage, depth: &DepthImage) -> Result<Pose> {
        self.frame_count += 1;

        if self.state == SlamState::Lost {
            return Ok(self.current_pose.clone());
        }

        self.check_shape(gray.width(), gray.height())?;
        self.check_shape(depth.width(), depth.height())?;

        let started = Instant::now();
        let cloud = self.cloud_transformer.organize(depth);
        self.timers.cloud_seconds += started.elapsed().as_secs_f64();

        let redetect = self.keypoint_counter % self.config.keypoint.refresh_frequency == 0;
        if redetect {
            self.keypoint_counter = 0;
        }
        self.keypoint_counter += 1;

        let priors = self.local_map.tracked_features();
        let keypoints = self
            .keypoint_extractor
            .compute(gray, depth, &priors, redetect);

        let started = Instant::now();
        let mut primitives = self.primitive_detector.find_primitives(cloud);
        self.timers.primitive_seconds += started.elapsed().as_secs_f64();

        if self.state == SlamState::NotInitialized {
            if keypoints.is_empty() && primitives.is_empty() {
                return Err(SlamError::NoDepthForInit);
            }
            let init_pose = self.current_pose.clone();
            self.local_map
                .update(&init_pose, &keypoints, &[], &[], primitives, true);
            self.motion_model.reset(&init_pose);
            self.state = SlamState::Tracking;
            self.record_matches(self.local_map.point_count());
            info!(
                points = self.local_map.point_count(),
                primitives = self.local_map.primitive_count(),
                "map initialized"
            );
            self.timers.frames += 1;
            return Ok(self.current_pose.clone());
        }

        let started = Instant::now();
        let predicted = self.motion_model.predict(&self.current_pose);
        let matches = self.local_map.match_keypoints(&predicted, &keypoints);
        let _primitive_matches = self.local_map.match_primitives(&mut primitives);

        if matches.len() < self.config.point.minimum_for_optimization {
            let failure = SlamError::InsufficientMatches {
                found: matches.len(),
                required: self.config.point.minimum_for_optimization,
            };
            warn!(
                error = %failure,
                keypoints = keypoints.len(),
                "pose frozen for this frame"
            );
            self.register_failure(failure);
            self.timers.pose_seconds += started.elapsed().as_secs_f64();
            self.timers.frames += 1;
            return Ok(self.current_pose.clone());
        }

        let outcome = self.pose_optimizer.optimize(&predicted, &matches);
        self.timers.pose_seconds += started.elapsed().as_secs_f64();

        self.record_matches(matches.len());

        if outcome.should_update_map {
            self.consecutive_failures = 0;
            self.last_degradation = None;
            let refined = outcome.pose;
            let triangulate = self.needs_triangulation();
            self.local_map.update(
                &refined,
                &keypoints,
                &matches,
                &outcome.outliers,
                primitives,
                triangulate,
            );
            self.motion_model.update(&refined);
            self.current_pose = refined;
        } else {
            let failure = SlamError::OptimizerNonConvergence;
            warn!(
                error = %failure,
                termination = %outcome.termination,
                evaluations = outcome.evaluations,
                "keeping pose, skipping map update"
            );
            self.motion_model.update(&outcome.pose);
            self.current_pose = outcome.pose;
            self.register_failure(failure);
        }

        debug!(
            frame = self.frame_count,
            state = ?self.state,
            matches = matches.len(),
            map_points = self.local_map.point_count(),
            map_primitives = self.local_map.primitive_count(),
            "frame tracked"
        );

        self.timers.frames += 1;
        Ok(self.current_pose.clone())
    }

    /// Restart from the configured start pose with an empty map.
    pub fn reset(&mut self) {
        self.state = SlamState::NotInitialized;
        self.current_pose = self.start_pose.clone();
        self.local_map.reset();
        self.motion_model.reset(&self.start_pose.clone());
        self.keypoint_extractor.reset();
        self.keypoint_counter = 0;
        self.consecutive_failures = 0;
        self.last_matches = VecDeque::from(vec![usize::MAX; MATCH_WINDOW]);
        self.last_degradation = None;
    }

    /// Segmentation label image of the last tracked frame: 0 is
    /// background, 1..=49 planes, 50..=255 cylinders.
    pub fn segmentation(&self) -> &GrayImage {
        self.primitive_detector.segmentation()
    }

    /// Render the primitive masks and tracked points over an RGB frame.
    pub fn debug_overlay(&self, pose: &Pose, rgb: &RgbImage) -> RgbImage {
        viz::overlay::debug_overlay(
            pose,
            rgb,
            self.primitive_detector.segmentation(),
            &self.local_map,
        )
    }

    /// Log accumulated per-stage mean processing times.
    pub fn log_statistics(&self) {
        if self.timers.frames == 0 {
            return;
        }
        let frames = self.timers.frames as f64;
        info!(
            frames = self.timers.frames,
            mean_cloud_ms = %format_args!("{:.2}", 1e3 * self.timers.cloud_seconds / frames),
            mean_primitives_ms = %format_args!("{:.2}", 1e3 * self.timers.primitive_seconds / frames),
            mean_pose_ms = %format_args!("{:.2}", 1e3 * self.timers.pose_seconds / frames),
            "processing statistics"
        );
    }

    fn check_shape(&self, width: u32, height: u32) -> Result<()> {
        if width != self.width || height != self.height {
            return Err(SlamError::InputShape {
                expected_width: self.width,
                expected_height: self.height,
                width,
                height,
            });
        }
        Ok(())
    }

    /// Count a tracking failure and keep its cause inspectable; enough
    /// consecutive failures make the sticky Lost transition.
    fn register_failure(&mut self, cause: SlamError) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.tracking.lost_after_failures {
            warn!(frame = self.frame_count, "tracking lost");
            self.state = SlamState::Lost;
            self.last_degradation = Some(SlamError::TrackingLost);
        } else {
            self.last_degradation = Some(cause);
        }
    }

    fn record_matches(&mut self, count: usize) {
        self.last_matches.push_back(count);
        while self.last_matches.len() > MATCH_WINDOW {
            self.last_matches.pop_front();
        }
    }

    /// Decide whether this frame may add new map points.
    fn needs_triangulation(&self) -> bool {
        match self.config.triangulation.policy {
            TriangulationPolicy::Always => true,
            TriangulationPolicy::MapSize => {
                self.local_map.confirmed_count() < self.config.triangulation.map_size_limit
            }
            TriangulationPolicy::DecreasingMatches => {
                decreasing_matches(&self.last_matches, self.config.triangulation.decreasing_ratio)
            }
        }
    }
}

/// True when the window is strictly decreasing under `ratio`: each
/// newer count must not exceed `ratio` times its predecessor. Warmup
/// sentinel values (`usize::MAX`) keep the test false until the window
/// holds real counts.
pub fn decreasing_matches(window: &VecDeque<usize>, ratio: f64) -> bool {
    for i in 1..window.len() {
        let older = window[i - 1];
        let newer = window[i];
        if older == usize::MAX || newer == usize::MAX {
            return false;
        }
        if newer as f64 > ratio * older as f64 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(values: &[usize]) -> VecDeque<usize> {
        values.iter().copied().collect()
    }

    #[test]
    fn warmup_window_never_triggers() {
        assert!(!decreasing_matches(&window(&[usize::MAX, usize::MAX, 500]), 0.99));
        assert!(!decreasing_matches(&window(&[usize::MAX, 500, 495]), 0.99));
    }

    #[test]
    fn steep_decrease_triggers_once_window_is_real() {
        assert!(decreasing_matches(&window(&[500, 495, 490]), 0.99));
    }

    #[test]
    fn shallow_decrease_does_not_trigger() {
        // 497/500 is a 0.6% drop, above the 0.99 ratio.
        assert!(!decreasing_matches(&window(&[500, 497, 494]), 0.99));
    }

    #[test]
    fn increase_does_not_trigger() {
        assert!(!decreasing_matches(&window(&[490, 495, 500]), 0.99));
    }

    #[test]
    fn relaxed_ratio_accepts_shallow_decreases() {
        assert!(decreasing_matches(&window(&[500, 497, 494]), 1.0));
    }
}
