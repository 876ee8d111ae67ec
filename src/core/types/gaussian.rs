//! 2D Gaussian used for semantic landmark uncertainty.

use serde::{Deserialize, Serialize};

use super::Point3;

/// A 2D Gaussian over the xy plane: mean position, axis-aligned standard
/// deviations along the principal axes, and the principal-axis angle for
/// ellipse rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian2 {
    /// Mean position (z carried through unchanged).
    pub mean: Point3,
    /// Standard deviation along the major axis in meters.
    pub stdev_x: f32,
    /// Standard deviation along the minor axis in meters.
    pub stdev_y: f32,
    /// Principal-axis angle in radians.
    pub theta: f32,
}

impl Gaussian2 {
    /// Create a Gaussian from mean and principal-axis standard deviations.
    pub fn new(mean: Point3, stdev_x: f32, stdev_y: f32, theta: f32) -> Self {
        Self {
            mean,
            stdev_x,
            stdev_y,
            theta,
        }
    }

    /// Isotropic Gaussian.
    pub fn isotropic(mean: Point3, stdev: f32) -> Self {
        Self::new(mean, stdev, stdev, 0.0)
    }

    /// Build from a 2×2 covariance matrix [xx, xy; xy, yy] by eigen
    /// decomposition: stdevs are square roots of the eigenvalues, theta
    /// is the orientation of the dominant eigenvector.
    pub fn from_covariance(mean: Point3, xx: f32, xy: f32, yy: f32) -> Self {
        let trace = xx + yy;
        let det = xx * yy - xy * xy;
        let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();

        let l1 = (trace / 2.0 + disc).max(0.0);
        let l2 = (trace / 2.0 - disc).max(0.0);

        // Eigenvector for l1 solves (xx - l1)·vx + xy·vy = 0.
        let angle = if xy.abs() > 1e-12 {
            ((l1 - xx) / xy).atan()
        } else if xx >= yy {
            0.0
        } else {
            std::f32::consts::FRAC_PI_2
        };

        Self::new(mean, l1.sqrt(), l2.sqrt(), angle)
    }
}
