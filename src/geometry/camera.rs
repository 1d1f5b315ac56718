//! Pinhole camera model: projection and back-projection.

use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

use crate::config::CameraConfig;

/// Pixel distance reported for a point that falls behind the image
/// plane; large enough to dominate any genuine reprojection residual.
pub const BEHIND_CAMERA_DISTANCE: f64 = 1.0e4;

/// Pinhole intrinsics shared by projection, back-projection, and the
/// organized-cloud builder.
#[derive(Debug, Clone, Copy)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn from_config(camera: &CameraConfig) -> Self {
        Self {
            fx: camera.fx,
            fy: camera.fy,
            cx: camera.cx,
            cy: camera.cy,
        }
    }

    /// Project a world point through a world-to-camera transform.
    ///
    /// Returns `None` when the transformed point has non-positive depth.
    pub fn project(&self, world: &Vector3<f64>, world_to_camera: &Matrix4<f64>) -> Option<Vector2<f64>> {
        let camera = world_to_camera * Vector4::new(world.x, world.y, world.z, 1.0);
        self.project_camera_point(&Vector3::new(camera.x, camera.y, camera.z))
    }

    /// Project a camera-frame point onto the image plane.
    pub fn project_camera_point(&self, camera: &Vector3<f64>) -> Option<Vector2<f64>> {
        if camera.z <= 0.0 {
            return None;
        }
        Some(Vector2::new(
            self.fx * camera.x / camera.z + self.cx,
            self.fy * camera.y / camera.z + self.cy,
        ))
    }

    /// Back-project a pixel with known depth into the camera frame.
    pub fn unproject(&self, u: f64, v: f64, z: f64) -> Vector3<f64> {
        Vector3::new((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Distance between the projection of `world` and an observation,
    /// with the behind-camera sentinel folded in. This is the raw term
    /// fed to the pose optimizer's robust loss.
    pub fn reprojection_distance(
        &self,
        world: &Vector3<f64>,
        observed: &Vector2<f64>,
        world_to_camera: &Matrix4<f64>,
    ) -> f64 {
        match self.project(world, world_to_camera) {
            Some(projected) => (projected - observed).norm(),
            None => BEHIND_CAMERA_DISTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 520.9,
            fy: 521.0,
            cx: 325.1,
            cy: 249.7,
        }
    }

    #[test]
    fn project_after_unproject_is_identity() {
        let k = intrinsics();
        let identity = Pose::identity().world_to_camera();
        for (u, v, z) in [(10.0, 20.0, 0.5), (325.1, 249.7, 2.0), (600.0, 10.0, 7.3)] {
            let p = k.unproject(u, v, z);
            let projected = k.project(&p, &identity).unwrap();
            assert_relative_eq!(projected.x, u, epsilon = 1e-9);
            assert_relative_eq!(projected.y, v, epsilon = 1e-9);
        }
    }

    #[test]
    fn point_behind_camera_is_rejected() {
        let k = intrinsics();
        let identity = Pose::identity().world_to_camera();
        assert!(k.project(&Vector3::new(0.0, 0.0, -1.0), &identity).is_none());
        assert_relative_eq!(
            k.reprojection_distance(
                &Vector3::new(0.0, 0.0, -1.0),
                &Vector2::new(320.0, 240.0),
                &identity
            ),
            BEHIND_CAMERA_DISTANCE
        );
    }

    #[test]
    fn projection_follows_camera_translation() {
        let k = intrinsics();
        let pose = Pose::new(nalgebra::Vector3::new(0.0, 0.0, 1.0), nalgebra::UnitQuaternion::identity());
        // A point two meters out, seen from one meter closer.
        let p = Vector3::new(0.2, 0.0, 2.0);
        let projected = k.project(&p, &pose.world_to_camera()).unwrap();
        assert_relative_eq!(projected.x, k.fx * 0.2 / 1.0 + k.cx, epsilon = 1e-9);
        assert_relative_eq!(projected.y, k.cy, epsilon = 1e-9);
    }
}
