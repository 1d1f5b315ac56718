//! Constant-velocity motion model for pose prediction.

use nalgebra::{UnitQuaternion, Vector3};

use crate::geometry::Pose;

/// Predicts the next pose by extrapolating the velocity observed
/// between the two previous frames, optionally low-pass filtered.
pub struct MotionModel {
    previous: Option<Pose>,
    /// Translation per frame, world frame.
    velocity: Vector3<f64>,
    /// Rotation per frame.
    angular_velocity: UnitQuaternion<f64>,
    /// Low-pass factor in `[0, 1]`; 0 keeps the newest estimate.
    smoothing: f64,
}

impl MotionModel {
    pub fn new(smoothing: f64) -> Self {
        Self {
            previous: None,
            velocity: Vector3::zeros(),
            angular_velocity: UnitQuaternion::identity(),
            smoothing,
        }
    }

    /// Extrapolate one nominal frame interval ahead of `last`.
    pub fn predict(&self, last: &Pose) -> Pose {
        Pose::new(
            last.position + self.velocity,
            last.orientation * self.angular_velocity,
        )
    }

    /// Re-estimate the velocities from the newest refined pose.
    pub fn update(&mut self, current: &Pose) {
        if let Some(previous) = &self.previous {
            let new_velocity = current.position - previous.position;
            let new_angular = previous.orientation.inverse() * current.orientation;

            self.velocity = self.velocity * self.smoothing + new_velocity * (1.0 - self.smoothing);
            self.angular_velocity = self
                .angular_velocity
                .slerp(&new_angular, 1.0 - self.smoothing);
        }
        self.previous = Some(current.clone());
    }

    /// Restart from a known pose with zero motion.
    pub fn reset(&mut self, pose: &Pose) {
        self.previous = Some(pose.clone());
        self.velocity = Vector3::zeros();
        self.angular_velocity = UnitQuaternion::identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn prediction_without_history_is_the_last_pose() {
        let model = MotionModel::new(0.0);
        let pose = Pose::new(
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, 0.0, 0.0),
        );
        let predicted = model.predict(&pose);
        assert_relative_eq!((predicted.position - pose.position).norm(), 0.0);
        assert_relative_eq!(predicted.orientation.angle_to(&pose.orientation), 0.0);
    }

    #[test]
    fn constant_translation_is_extrapolated() {
        let mut model = MotionModel::new(0.0);
        let step = Vector3::new(0.0, 0.0, 0.05);

        let first = Pose::identity();
        let second = Pose::new(step, UnitQuaternion::identity());
        model.update(&first);
        model.update(&second);

        let predicted = model.predict(&second);
        assert_relative_eq!((predicted.position - (second.position + step)).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_rotation_is_extrapolated() {
        let mut model = MotionModel::new(0.0);
        let delta = UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0);

        let first = Pose::identity();
        let second = Pose::new(Vector3::zeros(), delta);
        model.update(&first);
        model.update(&second);

        let predicted = model.predict(&second);
        let expected = delta * delta;
        assert_relative_eq!(predicted.orientation.angle_to(&expected), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn reset_clears_velocities() {
        let mut model = MotionModel::new(0.0);
        model.update(&Pose::identity());
        model.update(&Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()));
        model.reset(&Pose::identity());
        let predicted = model.predict(&Pose::identity());
        assert_relative_eq!(predicted.position.norm(), 0.0);
    }

    #[test]
    fn smoothing_damps_velocity_jumps() {
        let mut smoothed = MotionModel::new(0.5);
        smoothed.update(&Pose::identity());
        smoothed.update(&Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()));
        // Half of the raw 1.0 step survives the filter.
        let predicted = smoothed.predict(&Pose::identity());
        assert_relative_eq!(predicted.position.x, 0.5, epsilon = 1e-12);
    }
}
