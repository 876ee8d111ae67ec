//! 6-DOF robot pose.

use serde::{Deserialize, Serialize};

use super::Point3;
use super::transform::Transform3;
use crate::core::math::normalize_angle;

/// Robot pose in 3D space: position in meters, ZYX Euler attitude in
/// radians. Angles are normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose6 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Pose6 {
    /// Create a new pose with normalized angles.
    pub fn new(x: f32, y: f32, z: f32, roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            x,
            y,
            z,
            roll: normalize_angle(roll),
            pitch: normalize_angle(pitch),
            yaw: normalize_angle(yaw),
        }
    }

    /// Identity pose at the origin.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }

    /// Position component as a point.
    #[inline]
    pub fn position(&self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }

    /// Row-major rotation matrix R = Rz(yaw) · Ry(pitch) · Rx(roll).
    pub fn rotation_matrix(&self) -> [f32; 9] {
        let (sr, cr) = self.roll.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        let (sy, cy) = self.yaw.sin_cos();

        [
            cy * cp,
            cy * sp * sr - sy * cr,
            cy * sp * cr + sy * sr,
            sy * cp,
            sy * sp * sr + cy * cr,
            sy * sp * cr - cy * sr,
            -sp,
            cp * sr,
            cp * cr,
        ]
    }

    /// Homogeneous transform carrying points from this pose's local frame
    /// into its parent frame.
    pub fn transform(&self) -> Transform3 {
        Transform3::new(self.rotation_matrix(), [self.x, self.y, self.z])
    }

    /// Recover roll/pitch/yaw from a row-major rotation matrix.
    ///
    /// Valid away from gimbal lock (|pitch| < π/2 − ε).
    pub fn angles_from_rotation(r: &[f32; 9]) -> (f32, f32, f32) {
        let pitch = (-r[6]).clamp(-1.0, 1.0).asin();
        let roll = r[7].atan2(r[8]);
        let yaw = r[3].atan2(r[0]);
        (roll, pitch, yaw)
    }

    /// Build a pose from a homogeneous transform.
    pub fn from_transform(tf: &Transform3) -> Self {
        let (roll, pitch, yaw) = Self::angles_from_rotation(&tf.r);
        Self::new(tf.t[0], tf.t[1], tf.t[2], roll, pitch, yaw)
    }

    /// Compose: apply `delta` (expressed in this pose's frame) to this pose.
    pub fn compose(&self, delta: &Pose6) -> Pose6 {
        Pose6::from_transform(&self.transform().compose(&delta.transform()))
    }

    /// Incremental pose `self ⊖ other`: the motion that carries `other`
    /// into `self`, expressed in `other`'s frame.
    pub fn ominus(&self, other: &Pose6) -> Pose6 {
        Pose6::from_transform(&other.transform().inverse().compose(&self.transform()))
    }

    /// Euclidean distance between pose positions.
    #[inline]
    pub fn distance(&self, other: &Pose6) -> f32 {
        self.position().distance(&other.position())
    }

    /// Mean of a set of poses: linear mean for position, circular mean for
    /// each angle. A single pose is its own mean.
    pub fn mean(poses: &[Pose6]) -> Pose6 {
        if poses.is_empty() {
            return Pose6::identity();
        }

        let n = poses.len() as f32;
        let mut x = 0.0;
        let mut y = 0.0;
        let mut z = 0.0;
        let mut sr = (0.0f32, 0.0f32);
        let mut sp = (0.0f32, 0.0f32);
        let mut sy = (0.0f32, 0.0f32);

        for p in poses {
            x += p.x;
            y += p.y;
            z += p.z;
            sr.0 += p.roll.sin();
            sr.1 += p.roll.cos();
            sp.0 += p.pitch.sin();
            sp.1 += p.pitch.cos();
            sy.0 += p.yaw.sin();
            sy.1 += p.yaw.cos();
        }

        Pose6::new(
            x / n,
            y / n,
            z / n,
            sr.0.atan2(sr.1),
            sp.0.atan2(sp.1),
            sy.0.atan2(sy.1),
        )
    }
}

impl Default for Pose6 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn test_rotation_matrix_identity() {
        let r = Pose6::identity().rotation_matrix();
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        for (a, b) in r.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rotation_matrix_yaw_only() {
        let p = Pose6::new(0.0, 0.0, 0.0, 0.0, 0.0, FRAC_PI_2);
        let r = p.rotation_matrix();
        // Rz(π/2) maps +x to +y.
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(r[3], 1.0, epsilon = 1e-6);
        assert_relative_eq!(r[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_angles_roundtrip() {
        let p = Pose6::new(0.0, 0.0, 0.0, 0.3, -0.4, 1.2);
        let (roll, pitch, yaw) = Pose6::angles_from_rotation(&p.rotation_matrix());
        assert_relative_eq!(roll, 0.3, epsilon = 1e-5);
        assert_relative_eq!(pitch, -0.4, epsilon = 1e-5);
        assert_relative_eq!(yaw, 1.2, epsilon = 1e-5);
    }

    #[test]
    fn test_compose_identity() {
        let p = Pose6::new(1.0, 2.0, 0.5, 0.1, -0.2, 0.7);
        let c = p.compose(&Pose6::identity());
        assert_relative_eq!(c.x, p.x, epsilon = 1e-5);
        assert_relative_eq!(c.yaw, p.yaw, epsilon = 1e-5);
    }

    #[test]
    fn test_compose_forward_after_yaw() {
        let p = Pose6::new(0.0, 0.0, 0.0, 0.0, 0.0, FRAC_PI_2);
        let c = p.compose(&Pose6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        assert_relative_eq!(c.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(c.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ominus_recovers_increment() {
        let a = Pose6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.2);
        let delta = Pose6::new(0.5, 0.1, 0.0, 0.0, 0.0, 0.1);
        let b = a.compose(&delta);
        let rec = b.ominus(&a);
        assert_relative_eq!(rec.x, delta.x, epsilon = 1e-5);
        assert_relative_eq!(rec.y, delta.y, epsilon = 1e-5);
        assert_relative_eq!(rec.yaw, delta.yaw, epsilon = 1e-5);
    }

    #[test]
    fn test_ominus_of_self_is_identity() {
        let p = Pose6::new(3.0, -1.0, 0.2, 0.05, -0.03, 2.5);
        let d = p.ominus(&p);
        assert_relative_eq!(d.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(d.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(d.z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(d.yaw, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mean_of_single_pose() {
        let p = Pose6::new(1.0, 2.0, 3.0, 0.1, 0.2, 0.3);
        let m = Pose6::mean(&[p]);
        assert_relative_eq!(m.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(m.yaw, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_mean_circular_yaw() {
        let a = Pose6::new(0.0, 0.0, 0.0, 0.0, 0.0, PI - 0.1);
        let b = Pose6::new(0.0, 0.0, 0.0, 0.0, 0.0, -PI + 0.1);
        let m = Pose6::mean(&[a, b]);
        assert!(m.yaw.abs() > PI - 0.01, "yaw {}", m.yaw);
    }

    #[test]
    fn test_mean_positions() {
        let a = Pose6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let b = Pose6::new(2.0, 4.0, 1.0, 0.0, 0.0, FRAC_PI_4);
        let m = Pose6::mean(&[a, b]);
        assert_relative_eq!(m.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(m.y, 2.0, epsilon = 1e-5);
        assert_relative_eq!(m.yaw, FRAC_PI_4 / 2.0, epsilon = 1e-5);
    }
}
