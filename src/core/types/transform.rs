//! Homogeneous rigid transform.

use serde::{Deserialize, Serialize};

use super::Point3;

/// A rigid transform as a row-major 3×3 rotation and a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3 {
    /// Rotation matrix, row-major.
    pub r: [f32; 9],
    /// Translation in meters.
    pub t: [f32; 3],
}

impl Transform3 {
    /// Build from rotation and translation.
    pub fn new(r: [f32; 9], t: [f32; 3]) -> Self {
        Self { r, t }
    }

    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            t: [0.0, 0.0, 0.0],
        }
    }

    /// Apply the transform to a point: R·p + t.
    #[inline]
    pub fn transform(&self, p: &Point3) -> Point3 {
        let r = &self.r;
        Point3 {
            x: p.x * r[0] + p.y * r[1] + p.z * r[2] + self.t[0],
            y: p.x * r[3] + p.y * r[4] + p.z * r[5] + self.t[1],
            z: p.x * r[6] + p.y * r[7] + p.z * r[8] + self.t[2],
            intensity: p.intensity,
        }
    }

    /// Rotate a direction vector without translating it.
    #[inline]
    pub fn rotate(&self, v: &[f32; 3]) -> [f32; 3] {
        let r = &self.r;
        [
            v[0] * r[0] + v[1] * r[1] + v[2] * r[2],
            v[0] * r[3] + v[1] * r[4] + v[2] * r[5],
            v[0] * r[6] + v[1] * r[7] + v[2] * r[8],
        ]
    }

    /// Inverse transform: (Rᵀ, −Rᵀ·t).
    pub fn inverse(&self) -> Transform3 {
        let r = &self.r;
        let rt = [r[0], r[3], r[6], r[1], r[4], r[7], r[2], r[5], r[8]];
        let t = [
            -(rt[0] * self.t[0] + rt[1] * self.t[1] + rt[2] * self.t[2]),
            -(rt[3] * self.t[0] + rt[4] * self.t[1] + rt[5] * self.t[2]),
            -(rt[6] * self.t[0] + rt[7] * self.t[1] + rt[8] * self.t[2]),
        ];
        Transform3::new(rt, t)
    }

    /// Compose: self ∘ other (apply `other` first, then `self`).
    pub fn compose(&self, other: &Transform3) -> Transform3 {
        let a = &self.r;
        let b = &other.r;
        let mut r = [0.0f32; 9];
        for i in 0..3 {
            for j in 0..3 {
                r[i * 3 + j] =
                    a[i * 3] * b[j] + a[i * 3 + 1] * b[3 + j] + a[i * 3 + 2] * b[6 + j];
            }
        }
        let bt = other.t;
        let t = [
            a[0] * bt[0] + a[1] * bt[1] + a[2] * bt[2] + self.t[0],
            a[3] * bt[0] + a[4] * bt[1] + a[5] * bt[2] + self.t[1],
            a[6] * bt[0] + a[7] * bt[1] + a[8] * bt[2] + self.t[2],
        ];
        Transform3::new(r, t)
    }

    /// Maximum absolute deviation of R·Rᵀ from the identity.
    ///
    /// Used to validate orthonormality after SVD-derived compositions.
    pub fn orthonormality_error(&self) -> f32 {
        let rrt = self.compose(&Transform3::new(self.inverse().r, [0.0; 3]));
        let mut err = 0.0f32;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                err = err.max((rrt.r[i * 3 + j] - expected).abs());
            }
        }
        err
    }

    /// Determinant of the rotation block.
    pub fn rotation_determinant(&self) -> f32 {
        let r = &self.r;
        r[0] * (r[4] * r[8] - r[5] * r[7]) - r[1] * (r[3] * r[8] - r[5] * r[6])
            + r[2] * (r[3] * r[7] - r[4] * r[6])
    }
}

impl Default for Transform3 {
    fn default() -> Self {
        Self::identity()
    }
}
