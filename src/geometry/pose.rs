//! Camera pose: position and orientation in the world frame.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use super::so3;

/// A 6-DoF camera pose `T_wc` (camera-to-world).
///
/// The orientation is kept as a unit quaternion; every constructor
/// renormalizes, so accumulated drift from composition never leaks out.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Camera center in world coordinates.
    pub position: Vector3<f64>,
    /// Rotation from camera to world axes.
    pub orientation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation: UnitQuaternion::new_normalize(*orientation.quaternion()),
        }
    }

    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }

    /// The 4x4 rigid world-to-camera transform `[R^T | -R^T t]`.
    pub fn world_to_camera(&self) -> Matrix4<f64> {
        let rotation_t = self.orientation.to_rotation_matrix().into_inner().transpose();
        let translation = -rotation_t * self.position;

        let mut transform = Matrix4::identity();
        transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation_t);
        transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        transform
    }

    /// Map a world point into the camera frame.
    pub fn to_camera(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.orientation.inverse() * (world - self.position)
    }

    /// Map a camera-frame point into the world frame.
    pub fn to_world(&self, camera: &Vector3<f64>) -> Vector3<f64> {
        self.orientation * camera + self.position
    }

    /// Apply a small correction expressed as a world-frame translation
    /// delta plus a scaled-axis rotation delta. This is the update the
    /// pose optimizer iterates on, starting from the all-zero delta.
    pub fn compose_delta(&self, translation: &Vector3<f64>, rotation: &Vector3<f64>) -> Pose {
        let delta_q = so3::quaternion_from_scaled_axis(rotation);
        Pose::new(self.position + translation, self.orientation * delta_q)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn world_to_camera_inverse_is_the_camera_pose() {
        let pose = Pose::new(
            Vector3::new(1.0, -2.0, 0.5),
            UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1),
        );
        let w2c = pose.world_to_camera();
        let c2w = w2c.try_inverse().unwrap();
        assert_relative_eq!((w2c * c2w - Matrix4::identity()).norm(), 0.0, epsilon = 1e-12);

        // The inverse carries the camera center and rotation directly.
        let origin = c2w * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(
            (Vector3::new(origin.x, origin.y, origin.z) - pose.position).norm(),
            0.0,
            epsilon = 1e-12
        );
        let rotation = pose.orientation.to_rotation_matrix().into_inner();
        assert_relative_eq!(
            (c2w.fixed_view::<3, 3>(0, 0) - rotation).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn to_camera_agrees_with_matrix() {
        let pose = Pose::new(
            Vector3::new(0.3, 0.7, -1.0),
            UnitQuaternion::from_euler_angles(-0.1, 0.6, 0.2),
        );
        let p = Vector3::new(2.0, -1.0, 4.0);
        let via_matrix = pose.world_to_camera() * Vector4::new(p.x, p.y, p.z, 1.0);
        let direct = pose.to_camera(&p);
        assert_relative_eq!(
            (direct - Vector3::new(via_matrix.x, via_matrix.y, via_matrix.z)).norm(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn to_world_inverts_to_camera() {
        let pose = Pose::new(
            Vector3::new(-0.2, 0.1, 2.0),
            UnitQuaternion::from_euler_angles(0.5, 0.0, -0.3),
        );
        let p = Vector3::new(1.0, 2.0, 3.0);
        let roundtrip = pose.to_world(&pose.to_camera(&p));
        assert_relative_eq!((roundtrip - p).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_delta_is_identity_update() {
        let pose = Pose::new(
            Vector3::new(1.0, 1.0, 1.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let updated = pose.compose_delta(&Vector3::zeros(), &Vector3::zeros());
        assert_relative_eq!((updated.position - pose.position).norm(), 0.0);
        assert_relative_eq!(updated.orientation.angle_to(&pose.orientation), 0.0, epsilon = 1e-12);
    }
}
