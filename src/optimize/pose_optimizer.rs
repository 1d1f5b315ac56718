//! Levenberg-Marquardt pose refinement on reprojection residuals.
//!
//! The optimizer works on a 6-vector delta relative to the predicted
//! pose: a world-frame translation and a scaled-axis rotation, both
//! starting at zero. Residuals are robust losses of mean-normalized
//! reprojection distances, and the Jacobian is numerical, so the cost
//! model stays in one place.

use nalgebra::{DMatrix, DVector, Vector3};

use crate::config::{Config, PointConfig};
use crate::geometry::{CameraIntrinsics, Pose};
use crate::map::{MapPointId, PointMatch};

use super::loss::generalized_loss;

/// Central-difference step for the numerical Jacobian.
const JACOBIAN_STEP: f64 = 1e-7;
/// Gradient-norm convergence threshold.
const GRADIENT_TOLERANCE: f64 = 1e-12;
/// Relative step-size convergence threshold.
const STEP_TOLERANCE: f64 = 1e-12;
/// Relative cost-reduction convergence threshold.
const REDUCTION_TOLERANCE: f64 = 1e-12;
/// Reprojection distance below which a match is never an outlier.
const OUTLIER_FLOOR_PIXELS: f64 = 2.0;

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    GradientTolerance,
    StepTolerance,
    ReductionTolerance,
    SingularUpdate,
    TooManyEvaluations,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Termination::GradientTolerance => "gradient below tolerance",
            Termination::StepTolerance => "step below tolerance",
            Termination::ReductionTolerance => "relative reduction below tolerance",
            Termination::SingularUpdate => "singular normal equations",
            Termination::TooManyEvaluations => "too many function evaluations",
        };
        f.write_str(text)
    }
}

/// Result of one refinement call.
#[derive(Debug)]
pub struct OptimizationOutcome {
    pub pose: Pose,
    /// False when the solver ran out of its evaluation budget; the
    /// caller keeps the pose but skips the map update.
    pub should_update_map: bool,
    /// Matches whose final reprojection distance disqualifies them.
    pub outliers: Vec<MapPointId>,
    pub termination: Termination,
    pub evaluations: usize,
}

/// Refines a predicted pose against 3D-to-2D point matches.
pub struct PoseOptimizer {
    intrinsics: CameraIntrinsics,
    point: PointConfig,
}

impl PoseOptimizer {
    pub fn new(intrinsics: CameraIntrinsics, config: &Config) -> Self {
        Self {
            intrinsics,
            point: config.point,
        }
    }

    pub fn optimize(&self, predicted: &Pose, matches: &[PointMatch]) -> OptimizationOutcome {
        if matches.is_empty() {
            return OptimizationOutcome {
                pose: predicted.clone(),
                should_update_map: false,
                outliers: Vec::new(),
                termination: Termination::TooManyEvaluations,
                evaluations: 0,
            };
        }

        let multiplier = (self.point.error_multiplier / matches.len() as f64).sqrt();
        let budget = self.point.maximum_optimization_call;
        let mut evaluations = 0usize;

        let mut params = DVector::<f64>::zeros(6);
        let mut residuals = self.residuals(predicted, matches, multiplier, &params);
        evaluations += 1;
        let mut cost = residuals.norm_squared();

        let mut lambda = 1e-3;
        let mut termination = Termination::TooManyEvaluations;

        while evaluations + 13 <= budget {
            // Numerical Jacobian by central differences.
            let mut jacobian = DMatrix::<f64>::zeros(matches.len(), 6);
            for column in 0..6 {
                let mut forward = params.clone();
                let mut backward = params.clone();
                forward[column] += JACOBIAN_STEP;
                backward[column] -= JACOBIAN_STEP;
                let residuals_forward = self.residuals(predicted, matches, multiplier, &forward);
                let residuals_backward = self.residuals(predicted, matches, multiplier, &backward);
                evaluations += 2;
                for row in 0..matches.len() {
                    jacobian[(row, column)] =
                        (residuals_forward[row] - residuals_backward[row]) / (2.0 * JACOBIAN_STEP);
                }
            }

            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < GRADIENT_TOLERANCE {
                termination = Termination::GradientTolerance;
                break;
            }

            let jtj = jacobian.transpose() * &jacobian;
            let mut damped = jtj.clone();
            for i in 0..6 {
                damped[(i, i)] += lambda * damped[(i, i)].max(1e-9);
            }

            let Some(step) = damped.lu().solve(&(-&gradient)) else {
                termination = Termination::SingularUpdate;
                break;
            };

            if step.norm() < STEP_TOLERANCE * (params.norm() + STEP_TOLERANCE) {
                termination = Termination::StepTolerance;
                break;
            }

            let trial = &params + &step;
            let trial_residuals = self.residuals(predicted, matches, multiplier, &trial);
            evaluations += 1;
            let trial_cost = trial_residuals.norm_squared();

            if trial_cost < cost {
                let reduction = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                params = trial;
                residuals = trial_residuals;
                cost = trial_cost;
                lambda = (lambda * 0.1).max(1e-12);
                if reduction < REDUCTION_TOLERANCE {
                    termination = Termination::ReductionTolerance;
                    break;
                }
            } else {
                lambda = (lambda * 10.0).min(1e10);
            }
        }

        let pose = apply_delta(predicted, &params);
        let should_update_map = termination != Termination::TooManyEvaluations;
        let outliers = self.classify_outliers(&pose, matches);

        OptimizationOutcome {
            pose,
            should_update_map,
            outliers,
            termination,
            evaluations,
        }
    }

    /// Residual vector: robust loss of mean-normalized reprojection
    /// distances, scaled by the per-match multiplier.
    fn residuals(
        &self,
        predicted: &Pose,
        matches: &[PointMatch],
        multiplier: f64,
        params: &DVector<f64>,
    ) -> DVector<f64> {
        let pose = apply_delta(predicted, params);
        let world_to_camera = pose.world_to_camera();

        let mut distances = DVector::<f64>::zeros(matches.len());
        let mut mean = 0.0;
        for (i, point_match) in matches.iter().enumerate() {
            let distance = self.intrinsics.reprojection_distance(
                &point_match.world,
                &point_match.screen,
                &world_to_camera,
            );
            distances[i] = distance;
            mean += distance;
        }
        mean /= matches.len() as f64;

        if mean > 0.0 {
            for i in 0..matches.len() {
                let normalized = distances[i] * distances[i] / mean;
                distances[i] = multiplier
                    * generalized_loss(normalized, self.point.loss_alpha, self.point.loss_scale);
            }
        }
        distances
    }

    /// Split the matches by their final reprojection distance: beyond
    /// twice the mean (and an absolute floor) they are outliers.
    fn classify_outliers(&self, pose: &Pose, matches: &[PointMatch]) -> Vec<MapPointId> {
        let world_to_camera = pose.world_to_camera();
        let distances: Vec<f64> = matches
            .iter()
            .map(|m| {
                self.intrinsics
                    .reprojection_distance(&m.world, &m.screen, &world_to_camera)
            })
            .collect();
        let mean = distances.iter().sum::<f64>() / matches.len() as f64;
        let threshold = (2.0 * mean).max(OUTLIER_FLOOR_PIXELS);

        matches
            .iter()
            .zip(distances.iter())
            .filter(|(_, &d)| d > threshold)
            .map(|(m, _)| m.id)
            .collect()
    }
}

fn apply_delta(predicted: &Pose, params: &DVector<f64>) -> Pose {
    predicted.compose_delta(
        &Vector3::new(params[0], params[1], params[2]),
        &Vector3::new(params[3], params[4], params[5]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::so3;
    use nalgebra::{UnitQuaternion, Vector2};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 520.0,
            fy: 520.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    fn optimizer() -> PoseOptimizer {
        PoseOptimizer::new(intrinsics(), &Config::default())
    }

    /// Matches generated by projecting random world points through a
    /// known ground-truth pose.
    fn synthetic_matches(truth: &Pose, count: usize) -> Vec<PointMatch> {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let k = intrinsics();
        let world_to_camera = truth.world_to_camera();
        let mut matches = Vec::new();
        while matches.len() < count {
            let world = Vector3::new(
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(1.0..4.0),
            );
            if let Some(screen) = k.project(&world, &world_to_camera) {
                matches.push(PointMatch {
                    world,
                    screen,
                    id: MapPointId::new(matches.len() as u64 + 1),
                    keypoint_index: matches.len(),
                });
            }
        }
        matches
    }

    #[test]
    fn recovers_ground_truth_from_perturbed_prediction() {
        let truth = Pose::new(
            Vector3::new(0.1, -0.05, 0.2),
            UnitQuaternion::from_euler_angles(0.02, -0.01, 0.03),
        );
        let matches = synthetic_matches(&truth, 40);

        let predicted = truth.compose_delta(
            &Vector3::new(0.02, -0.015, 0.01),
            &Vector3::new(0.005, 0.004, -0.006),
        );
        let outcome = optimizer().optimize(&predicted, &matches);

        assert!(outcome.should_update_map, "terminated via {}", outcome.termination);
        assert!((outcome.pose.position - truth.position).norm() < 1e-6);
        let rotation_error =
            so3::scaled_axis(&(truth.orientation.inverse() * outcome.pose.orientation));
        assert!(rotation_error.norm() < 1e-7);
    }

    #[test]
    fn perfect_prediction_stays_put() {
        let truth = Pose::identity();
        let matches = synthetic_matches(&truth, 20);
        let outcome = optimizer().optimize(&truth, &matches);
        assert!((outcome.pose.position - truth.position).norm() < 1e-9);
        assert!(outcome.outliers.is_empty());
    }

    #[test]
    fn corrupted_observation_is_flagged_as_outlier() {
        let truth = Pose::identity();
        let mut matches = synthetic_matches(&truth, 30);
        let corrupted_id = matches[5].id;
        matches[5].screen += Vector2::new(120.0, -90.0);

        // Cauchy loss keeps the gross outlier from dragging the pose.
        let mut config = Config::default();
        config.point.loss_alpha = 0.0;
        let optimizer = PoseOptimizer::new(intrinsics(), &config);
        let outcome = optimizer.optimize(&truth, &matches);
        assert!(outcome.outliers.contains(&corrupted_id));
        // The inliers keep the pose pinned.
        assert!((outcome.pose.position - truth.position).norm() < 1e-3);
    }

    #[test]
    fn empty_match_set_reports_failure() {
        let outcome = optimizer().optimize(&Pose::identity(), &[]);
        assert!(!outcome.should_update_map);
        assert_eq!(outcome.evaluations, 0);
    }

    #[test]
    fn tight_budget_reports_non_convergence() {
        let truth = Pose::identity();
        let matches = synthetic_matches(&truth, 20);
        let predicted = truth.compose_delta(
            &Vector3::new(0.05, 0.0, 0.0),
            &Vector3::zeros(),
        );

        let mut config = Config::default();
        config.point.maximum_optimization_call = 10;
        let optimizer = PoseOptimizer::new(intrinsics(), &config);
        let outcome = optimizer.optimize(&predicted, &matches);
        assert_eq!(outcome.termination, Termination::TooManyEvaluations);
        assert!(!outcome.should_update_map);
    }
}
