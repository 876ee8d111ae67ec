//! Visual interest-point features with descriptors.

use serde::{Deserialize, Serialize};

use crate::core::types::Point3;

/// Length of the Haar-wavelet descriptor: 4×4 subregions × 4 sums.
pub const DESCRIPTOR_LEN: usize = 64;

/// An image interest point with its 3D back-projection, color sample and
/// fixed-length descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFeature {
    pub id: u32,
    /// Back-projected position (camera frame locally, map frame once stored).
    pub pos: Point3,
    /// Pixel coordinates in the left image.
    pub u: u32,
    pub v: u32,
    /// RGB sample at the keypoint.
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Descriptor vector, `DESCRIPTOR_LEN` floats, L2-normalized.
    pub descriptor: Vec<f32>,
    /// Sign of the Laplacian at the keypoint; cheap match rejection.
    pub laplacian: i8,
    pub n_observations: u32,
}

impl ImageFeature {
    pub fn new(id: u32, u: u32, v: u32, pos: Point3) -> Self {
        Self {
            id,
            pos,
            u,
            v,
            r: 0,
            g: 0,
            b: 0,
            descriptor: Vec::new(),
            laplacian: 0,
            n_observations: 0,
        }
    }

    /// Squared L2 distance between descriptors.
    ///
    /// Returns `f32::MAX` when either descriptor is missing or lengths
    /// differ, so callers can gate on it directly.
    pub fn descriptor_distance(&self, other: &ImageFeature) -> f32 {
        if self.descriptor.is_empty() || self.descriptor.len() != other.descriptor.len() {
            return f32::MAX;
        }
        self.descriptor
            .iter()
            .zip(other.descriptor.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_distance_identical() {
        let mut a = ImageFeature::new(0, 10, 20, Point3::default());
        a.descriptor = vec![0.5; DESCRIPTOR_LEN];
        let b = a.clone();
        assert_eq!(a.descriptor_distance(&b), 0.0);
    }

    #[test]
    fn test_descriptor_distance_missing() {
        let a = ImageFeature::new(0, 0, 0, Point3::default());
        let b = a.clone();
        assert_eq!(a.descriptor_distance(&b), f32::MAX);
    }

    #[test]
    fn test_descriptor_distance_value() {
        let mut a = ImageFeature::new(0, 0, 0, Point3::default());
        let mut b = ImageFeature::new(1, 0, 0, Point3::default());
        a.descriptor = vec![1.0, 0.0];
        b.descriptor = vec![0.0, 0.0];
        assert_eq!(a.descriptor_distance(&b), 1.0);
    }
}
