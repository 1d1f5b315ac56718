//! Configuration loading from TOML.
//!
//! Every tunable of the pipeline lives here, grouped the way the
//! components consume them. All fields have defaults, so an absent file
//! or an empty table yields a runnable configuration. The whole struct
//! is validated once at startup and then passed by reference into every
//! component at construction; nothing reads configuration globally.
//!
//! ```toml
//! [camera]
//! fx = 520.9
//! fy = 521.0
//! cx = 325.1
//! cy = 249.7
//!
//! [primitive]
//! depth_map_patch_size = 20
//!
//! [triangulation]
//! policy = "decreasing_matches"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{Result, SlamError};

/// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub point: PointConfig,
    #[serde(default)]
    pub keypoint: KeypointConfig,
    #[serde(default)]
    pub primitive: PrimitiveConfig,
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub cylinder: CylinderConfig,
    #[serde(default)]
    pub triangulation: TriangulationConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl Config {
    /// Read and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| SlamError::ConfigInvalid(format!("{}: {e}", path.as_ref().display())))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| SlamError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.camera.fx <= 0.0 || self.camera.fy <= 0.0 {
            return Err(SlamError::ConfigInvalid(
                "camera focal lengths must be positive".into(),
            ));
        }
        if self.primitive.depth_map_patch_size == 0 {
            return Err(SlamError::ConfigInvalid(
                "primitive.depth_map_patch_size must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.primitive.maximum_cos_angle) {
            return Err(SlamError::ConfigInvalid(
                "primitive.maximum_cos_angle must be a cosine in [0, 1]".into(),
            ));
        }
        if self.point.loss_scale <= 0.0 {
            return Err(SlamError::ConfigInvalid(
                "point.loss_scale must be positive".into(),
            ));
        }
        if self.point.minimum_for_optimization == 0 {
            return Err(SlamError::ConfigInvalid(
                "point.minimum_for_optimization must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.triangulation.decreasing_ratio) {
            return Err(SlamError::ConfigInvalid(
                "triangulation.decreasing_ratio must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tracking.motion_smoothing) {
            return Err(SlamError::ConfigInvalid(
                "tracking.motion_smoothing must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "defaults::focal")]
    pub fx: f64,
    #[serde(default = "defaults::focal")]
    pub fy: f64,
    #[serde(default = "defaults::center")]
    pub cx: f64,
    #[serde(default = "defaults::center")]
    pub cy: f64,
    /// Stereo baseline; unused on the pure RGB-D path but recognized.
    #[serde(default)]
    pub baseline: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fx: defaults::focal(),
            fy: defaults::focal(),
            cx: defaults::center(),
            cy: defaults::center(),
            baseline: 0.0,
        }
    }
}

/// Map-point matching, lifecycle, and pose-optimization settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PointConfig {
    /// Minimum matched points required before running the optimizer.
    #[serde(default = "defaults::minimum_for_optimization")]
    pub minimum_for_optimization: usize,
    /// Residual-evaluation budget for the Levenberg-Marquardt solver.
    #[serde(default = "defaults::maximum_optimization_call")]
    pub maximum_optimization_call: usize,
    /// Uniform residual scaling; the residual multiplier is
    /// `sqrt(error_multiplier / match_count)`.
    #[serde(default = "defaults::error_multiplier")]
    pub error_multiplier: f64,
    /// Shape parameter of the generalized robust loss.
    #[serde(default = "defaults::loss_alpha")]
    pub loss_alpha: f64,
    /// Scale parameter of the generalized robust loss.
    #[serde(default = "defaults::loss_scale")]
    pub loss_scale: f64,
    /// Maximum descriptor distance (Hamming bits) for a match.
    #[serde(default = "defaults::maximum_match_distance")]
    pub maximum_match_distance: f64,
    /// Consecutive unmatched frames before a confirmed point is dropped.
    #[serde(default = "defaults::unmatched_count_to_loose")]
    pub unmatched_count_to_loose: u32,
    /// Consecutive matched frames before a staged point is confirmed.
    #[serde(default = "defaults::age_liability")]
    pub age_liability: u32,
    /// Minimum liability score for a point to be seeded into
    /// next-frame optical-flow tracking.
    #[serde(default = "defaults::minimum_liability_for_map")]
    pub minimum_liability_for_map: f64,
}

impl Default for PointConfig {
    fn default() -> Self {
        Self {
            minimum_for_optimization: defaults::minimum_for_optimization(),
            maximum_optimization_call: defaults::maximum_optimization_call(),
            error_multiplier: defaults::error_multiplier(),
            loss_alpha: defaults::loss_alpha(),
            loss_scale: defaults::loss_scale(),
            maximum_match_distance: defaults::maximum_match_distance(),
            unmatched_count_to_loose: defaults::unmatched_count_to_loose(),
            age_liability: defaults::age_liability(),
            minimum_liability_for_map: defaults::minimum_liability_for_map(),
        }
    }
}

/// Keypoint detector settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct KeypointConfig {
    /// Run full detection every N frames; in between, only tracked
    /// priors are used.
    #[serde(default = "defaults::refresh_frequency")]
    pub refresh_frequency: u32,
    /// Detector response threshold (intensity contrast for the corner
    /// test).
    #[serde(default = "defaults::minimum_hessian")]
    pub minimum_hessian: u32,
}

impl Default for KeypointConfig {
    fn default() -> Self {
        Self {
            refresh_frequency: defaults::refresh_frequency(),
            minimum_hessian: defaults::minimum_hessian(),
        }
    }
}

/// Primitive segmentation and matching settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PrimitiveConfig {
    /// Minimum cosine of the angle between two plane normals to allow
    /// growing or merging across them.
    #[serde(default = "defaults::maximum_cos_angle")]
    pub maximum_cos_angle: f64,
    /// Maximum squared point-to-plane distance for merging regions.
    #[serde(default = "defaults::maximum_merge_distance")]
    pub maximum_merge_distance: f64,
    /// Minimum mask IoU for matching a detected primitive to the map.
    #[serde(default = "defaults::minimum_iou")]
    pub minimum_iou: f64,
    /// Minimum normal agreement for primitive matching.
    #[serde(default = "defaults::minimum_normals_dot")]
    pub minimum_normals_dot: f64,
    /// Cell side length in pixels; image dimensions must be multiples.
    #[serde(default = "defaults::depth_map_patch_size")]
    pub depth_map_patch_size: u32,
    /// Minimum cells in a histogram bin to seed a region grow.
    #[serde(default = "defaults::minimum_plane_seed_count")]
    pub minimum_plane_seed_count: usize,
    /// Minimum cells a grown region must cover to survive.
    #[serde(default = "defaults::minimum_cell_activated")]
    pub minimum_cell_activated: usize,
}

impl Default for PrimitiveConfig {
    fn default() -> Self {
        Self {
            maximum_cos_angle: defaults::maximum_cos_angle(),
            maximum_merge_distance: defaults::maximum_merge_distance(),
            minimum_iou: defaults::minimum_iou(),
            minimum_normals_dot: defaults::minimum_normals_dot(),
            depth_map_patch_size: defaults::depth_map_patch_size(),
            minimum_plane_seed_count: defaults::minimum_plane_seed_count(),
            minimum_cell_activated: defaults::minimum_cell_activated(),
        }
    }
}

/// Depth-discontinuity model: a jump between adjacent points is
/// suspicious when it exceeds `sigma_margin * (sigma_error + alpha * z^2)`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DepthConfig {
    #[serde(default = "defaults::sigma_error")]
    pub sigma_error: f64,
    #[serde(default = "defaults::sigma_margin")]
    pub sigma_margin: f64,
    /// Suspicious jumps tolerated per cell before the cell is rejected.
    #[serde(default = "defaults::discontinuity_limit")]
    pub discontinuity_limit: u32,
    #[serde(default = "defaults::depth_alpha")]
    pub alpha: f64,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            sigma_error: defaults::sigma_error(),
            sigma_margin: defaults::sigma_margin(),
            discontinuity_limit: defaults::discontinuity_limit(),
            alpha: defaults::depth_alpha(),
        }
    }
}

/// Cylinder RANSAC settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CylinderConfig {
    /// Maximum |radial distance - radius| for a cell to count as a
    /// circle inlier.
    #[serde(default = "defaults::ransac_sqrt_max_distance")]
    pub ransac_sqrt_max_distance: f64,
    /// Minimum inlier count for an accepted circle.
    #[serde(default = "defaults::ransac_minimum_score")]
    pub ransac_minimum_score: f64,
    /// Disable to treat every grown region as a plane candidate.
    #[serde(default = "defaults::use_detection")]
    pub use_detection: bool,
    /// RNG seed for reproducible RANSAC sampling.
    #[serde(default = "defaults::ransac_seed")]
    pub ransac_seed: u64,
}

impl Default for CylinderConfig {
    fn default() -> Self {
        Self {
            ransac_sqrt_max_distance: defaults::ransac_sqrt_max_distance(),
            ransac_minimum_score: defaults::ransac_minimum_score(),
            use_detection: defaults::use_detection(),
            ransac_seed: defaults::ransac_seed(),
        }
    }
}

/// When new map points are triangulated from unmatched keypoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriangulationPolicy {
    /// Every frame.
    Always,
    /// Only while the confirmed map is small.
    MapSize,
    /// Only when recent match counts are strictly decreasing.
    DecreasingMatches,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TriangulationConfig {
    #[serde(default = "defaults::policy")]
    pub policy: TriangulationPolicy,
    /// Strictness of the decreasing-matches test: frame i must have
    /// fewer than `ratio * matches[i - 1]` matches.
    #[serde(default = "defaults::decreasing_ratio")]
    pub decreasing_ratio: f64,
    /// Confirmed-map-size ceiling for the `map_size` policy.
    #[serde(default = "defaults::map_size_limit")]
    pub map_size_limit: usize,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            policy: defaults::policy(),
            decreasing_ratio: defaults::decreasing_ratio(),
            map_size_limit: defaults::map_size_limit(),
        }
    }
}

/// Driver-level state machine settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrackingConfig {
    /// Consecutive tracking failures before the sticky Lost transition.
    #[serde(default = "defaults::lost_after_failures")]
    pub lost_after_failures: u32,
    /// Low-pass factor for the constant-velocity motion model
    /// (0 = no smoothing, keep the latest velocity estimate).
    #[serde(default)]
    pub motion_smoothing: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            lost_after_failures: defaults::lost_after_failures(),
            motion_smoothing: 0.0,
        }
    }
}

mod defaults {
    use super::TriangulationPolicy;

    pub fn focal() -> f64 {
        520.0
    }
    pub fn center() -> f64 {
        240.0
    }
    pub fn minimum_for_optimization() -> usize {
        10
    }
    pub fn maximum_optimization_call() -> usize {
        1024
    }
    pub fn error_multiplier() -> f64 {
        500.0
    }
    pub fn loss_alpha() -> f64 {
        2.0
    }
    pub fn loss_scale() -> f64 {
        1.0
    }
    pub fn maximum_match_distance() -> f64 {
        64.0
    }
    pub fn unmatched_count_to_loose() -> u32 {
        10
    }
    pub fn age_liability() -> u32 {
        5
    }
    pub fn minimum_liability_for_map() -> f64 {
        0.2
    }
    pub fn refresh_frequency() -> u32 {
        5
    }
    pub fn minimum_hessian() -> u32 {
        20
    }
    pub fn maximum_cos_angle() -> f64 {
        0.965_925_8 // cos(15 deg)
    }
    pub fn maximum_merge_distance() -> f64 {
        100.0
    }
    pub fn minimum_iou() -> f64 {
        0.2
    }
    pub fn minimum_normals_dot() -> f64 {
        0.9
    }
    pub fn depth_map_patch_size() -> u32 {
        20
    }
    pub fn minimum_plane_seed_count() -> usize {
        6
    }
    pub fn minimum_cell_activated() -> usize {
        5
    }
    pub fn sigma_error() -> f64 {
        1.425e-3
    }
    pub fn sigma_margin() -> f64 {
        5.0
    }
    pub fn discontinuity_limit() -> u32 {
        3
    }
    pub fn depth_alpha() -> f64 {
        0.02
    }
    pub fn ransac_sqrt_max_distance() -> f64 {
        0.04
    }
    pub fn ransac_minimum_score() -> f64 {
        6.0
    }
    pub fn use_detection() -> bool {
        true
    }
    pub fn ransac_seed() -> u64 {
        42
    }
    pub fn policy() -> TriangulationPolicy {
        TriangulationPolicy::DecreasingMatches
    }
    pub fn decreasing_ratio() -> f64 {
        0.99
    }
    pub fn map_size_limit() -> usize {
        1000
    }
    pub fn lost_after_failures() -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_valid_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.primitive.depth_map_patch_size, 20);
        assert_eq!(config.triangulation.policy, TriangulationPolicy::DecreasingMatches);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            fx = 100.0

            [triangulation]
            policy = "map_size"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera.fx, 100.0);
        assert_eq!(config.camera.fy, defaults::focal());
        assert_eq!(config.triangulation.policy, TriangulationPolicy::MapSize);
    }

    #[test]
    fn zero_patch_size_rejected() {
        let config: Config = toml::from_str(
            r#"
            [primitive]
            depth_map_patch_size = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_focal_rejected() {
        let config: Config = toml::from_str(
            r#"
            [camera]
            fx = -1.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
