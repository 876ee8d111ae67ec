//! 3D point type used for LiDAR returns and feature positions.

use serde::{Deserialize, Serialize};

/// A 3D point in meters, with an optional LiDAR intensity reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
    /// Z coordinate in meters
    pub z: f32,
    /// Return intensity, if the sensor reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
}

impl Point3 {
    /// Create a new point without intensity.
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            intensity: None,
        }
    }

    /// Create a new point carrying an intensity reading.
    #[inline]
    pub fn with_intensity(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self {
            x,
            y,
            z,
            intensity: Some(intensity),
        }
    }

    /// Euclidean norm of the position vector.
    #[inline]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_squared(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point3) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Distance to another point in the xy plane only.
    #[inline]
    pub fn distance_xy(&self, other: &Point3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Point3 {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}
