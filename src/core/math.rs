//! Scalar math primitives shared across the pipeline.
//!
//! Angle arithmetic, Gaussian densities for particle weighting, and
//! zero-mean Gaussian sampling for motion noise and RANSAC-free jitter.

use std::f32::consts::PI;

use rand::Rng;

/// Normalize angle to [-π, π].
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Shortest signed angular difference from `a` to `b`.
#[inline]
pub fn angle_diff(a: f32, b: f32) -> f32 {
    normalize_angle(b - a)
}

/// Gaussian probability density of `x` under a zero-mean normal with
/// standard deviation `sigma`.
///
/// Returns 1.0 for a degenerate `sigma` so a disabled noise term does not
/// zero out a particle weight product.
#[inline]
pub fn gauss_pdf(x: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 1.0;
    }
    let norm = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
    norm * (-0.5 * (x / sigma) * (x / sigma)).exp()
}

/// Sample a zero-mean Gaussian with standard deviation `sigma` using the
/// polar Box-Muller transform.
pub fn sample_gaussian<R: Rng>(rng: &mut R, sigma: f32) -> f32 {
    if sigma <= 0.0 {
        return 0.0;
    }

    loop {
        let x1 = 2.0 * rng.random::<f32>() - 1.0;
        let x2 = 2.0 * rng.random::<f32>() - 1.0;
        let w = x1 * x1 + x2 * x2;
        if w > 0.0 && w < 1.0 {
            return sigma * x2 * (-2.0 * w.ln() / w).sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_normalize_angle_wraps() {
        assert_relative_eq!(normalize_angle(0.0), 0.0);
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(-3.0 * PI), -PI, epsilon = 1e-5);
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_angle_diff_crosses_pi() {
        assert_relative_eq!(angle_diff(PI - 0.1, -PI + 0.1), 0.2, epsilon = 1e-5);
        assert_relative_eq!(angle_diff(-PI + 0.1, PI - 0.1), -0.2, epsilon = 1e-5);
    }

    #[test]
    fn test_gauss_pdf_peak_at_zero() {
        let peak = gauss_pdf(0.0, 1.0);
        assert!(gauss_pdf(0.5, 1.0) < peak);
        assert!(gauss_pdf(-0.5, 1.0) < peak);
        assert_relative_eq!(peak, 0.3989422804014327, epsilon = 1e-12);
    }

    #[test]
    fn test_gauss_pdf_degenerate_sigma() {
        assert_relative_eq!(gauss_pdf(1.0, 0.0), 1.0);
    }

    #[test]
    fn test_sample_gaussian_statistics() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 5000;
        let sigma = 0.5;
        let samples: Vec<f32> = (0..n).map(|_| sample_gaussian(&mut rng, sigma)).collect();

        let mean = samples.iter().sum::<f32>() / n as f32;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n as f32;

        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var.sqrt() - sigma).abs() < 0.05, "stdev {}", var.sqrt());
    }

    #[test]
    fn test_sample_gaussian_zero_sigma() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_gaussian(&mut rng, 0.0), 0.0);
    }
}
