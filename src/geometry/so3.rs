//! Scaled-axis rotation parametrization.
//!
//! The pose optimizer works on a 3-vector rotation delta rather than a
//! quaternion: the scaled axis is singularity-free below a half turn and
//! its three components are independent, which suits a least-squares
//! parameter block.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Compute the scaled-axis representation of a rotation quaternion.
///
/// The sign of `w` is forced positive first so the returned angle stays
/// in `[0, pi)`. For a vanishing vector part the small-angle form
/// `2 * v / w` is used.
pub fn scaled_axis(quat: &UnitQuaternion<f64>) -> Vector3<f64> {
    let q = if quat.w >= 0.0 {
        *quat.quaternion()
    } else {
        Quaternion::new(-quat.w, -quat.i, -quat.j, -quat.k)
    };
    let qv = Vector3::new(q.i, q.j, q.k);

    let sin_half_angle = qv.norm();
    if sin_half_angle > 0.0 {
        let angle = 2.0 * sin_half_angle.atan2(q.w);
        qv * (angle / sin_half_angle)
    } else {
        // w dominates; first-order expansion of 2 * atan2(s, w) / s
        qv * (2.0 / q.w)
    }
}

/// Reconstruct a rotation quaternion from its scaled-axis representation.
pub fn quaternion_from_scaled_axis(axis: &Vector3<f64>) -> UnitQuaternion<f64> {
    let angle = axis.norm();
    let half = angle * 0.5;
    let scale = if angle > 0.0 { half.sin() / angle } else { 0.5 };
    UnitQuaternion::from_quaternion(Quaternion::new(
        half.cos(),
        axis.x * scale,
        axis.y * scale,
        axis.z * scale,
    ))
}
