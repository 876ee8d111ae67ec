//! Point-to-point ICP over an NN source.
//!
//! Aligns a source cloud against a target (map planar layer or frozen
//! point set) starting from an initial transform. Each iteration matches
//! every transformed source point to its nearest target, solves the rigid
//! delta from the SVD of the cross-covariance, and composes it onto the
//! running solution. The alignment is rejected outright when it drifts
//! too far from the initial guess.

use nalgebra::{Matrix3, Vector3};

use crate::config::IcpConfig;
use crate::core::types::{Point3, Pose6, Transform3};
use crate::error::{Result, SlamError};

use super::nn::NearestSource;

/// Divergence guard relative to the initial guess.
const MAX_JUMP_TRANSLATION: f32 = 0.3;
const MAX_JUMP_ROTATION: f32 = 0.35;

/// Outcome of a successful alignment.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Final source-to-target transform.
    pub transform: Transform3,
    /// RMS correspondence error of the last iteration.
    pub rms_error: f32,
    /// Source cloud carried through the final transform.
    pub aligned: Vec<Point3>,
    /// Inlier count of the last iteration.
    pub inliers: usize,
    /// Iterations actually run.
    pub iterations: u32,
    /// Per-inlier correspondence errors of the last iteration.
    pub errors: Vec<f32>,
}

/// Point-to-point ICP matcher borrowing its target.
pub struct Icp<'a, S: NearestSource> {
    target: &'a S,
    config: IcpConfig,
}

impl<'a, S: NearestSource> Icp<'a, S> {
    pub fn new(target: &'a S, config: IcpConfig) -> Self {
        Self { target, config }
    }

    /// Align `source` against the target starting from `initial`.
    pub fn align(&self, initial: Transform3, source: &[Point3]) -> Result<IcpResult> {
        if source.is_empty() {
            log::warn!("icp: empty source cloud, returning initial guess");
            return Ok(IcpResult {
                transform: initial,
                rms_error: 0.0,
                aligned: Vec::new(),
                inliers: 0,
                iterations: 0,
                errors: Vec::new(),
            });
        }

        let mut rotation = matrix_from(&initial.r);
        let mut translation = Vector3::new(initial.t[0], initial.t[1], initial.t[2]);

        let mut iterations = 0u32;
        let mut previous_rms = f32::MAX;
        let mut last = None;

        while iterations < self.config.max_iters {
            match self.step(&mut rotation, &mut translation, source) {
                Ok(step) => {
                    iterations += 1;
                    let delta = (step.rms - previous_rms).abs();
                    previous_rms = step.rms;
                    last = Some(step);
                    if delta < self.config.tolerance {
                        break;
                    }
                }
                Err(e) => {
                    if last.is_some() {
                        break;
                    }
                    return Err(e);
                }
            }
        }

        let Some(last) = last else {
            return Err(SlamError::IcpDegenerate("no iterations ran"));
        };
        let transform = transform_from(&rotation, &translation);

        // Reject solutions that jumped away from the prior.
        let delta = Pose6::from_transform(&initial.inverse().compose(&transform));
        if delta.x.abs() > MAX_JUMP_TRANSLATION
            || delta.y.abs() > MAX_JUMP_TRANSLATION
            || delta.z.abs() > MAX_JUMP_TRANSLATION
            || delta.roll.abs() > MAX_JUMP_ROTATION
            || delta.pitch.abs() > MAX_JUMP_ROTATION
            || delta.yaw.abs() > MAX_JUMP_ROTATION
        {
            return Err(SlamError::IcpHugeJump {
                dx: delta.x,
                dy: delta.y,
                dz: delta.z,
                droll: delta.roll,
                dpitch: delta.pitch,
                dyaw: delta.yaw,
            });
        }

        let aligned = source.iter().map(|p| transform.transform(p)).collect();

        Ok(IcpResult {
            transform,
            rms_error: last.rms,
            aligned,
            inliers: last.inliers,
            iterations,
            errors: last.errors,
        })
    }

    /// One ICP iteration: match, solve, compose.
    fn step(
        &self,
        rotation: &mut Matrix3<f32>,
        translation: &mut Vector3<f32>,
        source: &[Point3],
    ) -> Result<StepResult> {
        let search_radius = if self.config.reject_outliers {
            self.config.distance_threshold
        } else {
            self.config.distance_threshold * 4.0
        };

        let mut inlier_sources: Vec<Vector3<f32>> = Vec::new();
        let mut inlier_targets: Vec<Vector3<f32>> = Vec::new();
        let mut correspondences = 0usize;

        for p in source {
            let sp = Vector3::new(p.x, p.y, p.z);
            let transformed = *rotation * sp + *translation;
            let query = Point3::new(transformed[0], transformed[1], transformed[2]);

            let Some((target_pt, dist)) = self.target.nearest(&query, search_radius) else {
                continue;
            };
            correspondences += 1;

            if dist < self.config.distance_threshold || !self.config.reject_outliers {
                inlier_sources.push(transformed);
                inlier_targets.push(Vector3::new(target_pt.x, target_pt.y, target_pt.z));
            }
        }

        if correspondences == 0 {
            return Err(SlamError::IcpDegenerate("no correspondences"));
        }
        if inlier_sources.is_empty() {
            return Err(SlamError::IcpDegenerate("no inliers"));
        }

        let n = inlier_sources.len() as f32;
        let source_mean = inlier_sources
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / n;
        let target_mean = inlier_targets
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / n;

        // Cross-covariance A = Σ Δt·Δsᵀ.
        let mut a = Matrix3::zeros();
        for (s, t) in inlier_sources.iter().zip(inlier_targets.iter()) {
            a += (t - target_mean) * (s - source_mean).transpose();
        }

        let svd = a.svd(true, true);
        let u = svd.u.ok_or(SlamError::IcpDegenerate("svd failed"))?;
        let v_t = svd.v_t.ok_or(SlamError::IcpDegenerate("svd failed"))?;

        let mut delta_r = u * v_t;
        if delta_r.determinant() < 0.0 {
            // Reflection case: flip the sign of U's last column.
            let mut u_fixed = u;
            for i in 0..3 {
                u_fixed[(i, 2)] = -u_fixed[(i, 2)];
            }
            delta_r = u_fixed * v_t;
        }
        let delta_t = target_mean - delta_r * source_mean;

        // RMS error under the incremental solution.
        let mut errors = Vec::with_capacity(inlier_sources.len());
        let mut rms = 0.0f32;
        for (s, t) in inlier_sources.iter().zip(inlier_targets.iter()) {
            let e = (t - (delta_r * s + delta_t)).norm();
            errors.push(e);
            rms += e;
        }
        rms /= n;

        *rotation = delta_r * *rotation;
        *translation = delta_r * *translation + delta_t;

        Ok(StepResult {
            rms,
            inliers: inlier_sources.len(),
            errors,
        })
    }
}

struct StepResult {
    rms: f32,
    inliers: usize,
    errors: Vec<f32>,
}

fn matrix_from(r: &[f32; 9]) -> Matrix3<f32> {
    Matrix3::new(r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7], r[8])
}

fn transform_from(r: &Matrix3<f32>, t: &Vector3<f32>) -> Transform3 {
    Transform3::new(
        [
            r[(0, 0)],
            r[(0, 1)],
            r[(0, 2)],
            r[(1, 0)],
            r[(1, 1)],
            r[(1, 2)],
            r[(2, 0)],
            r[(2, 1)],
            r[(2, 2)],
        ],
        [t[0], t[1], t[2]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::nn::PointSet;
    use approx::assert_relative_eq;

    /// Grid of points on the plane z = 0.
    fn plane_grid(spacing: f32, n: usize) -> Vec<Point3> {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(Point3::new(i as f32 * spacing, j as f32 * spacing, 0.0));
            }
        }
        points
    }

    fn offset(points: &[Point3], dx: f32, dy: f32, dz: f32) -> Vec<Point3> {
        points
            .iter()
            .map(|p| Point3::new(p.x + dx, p.y + dy, p.z + dz))
            .collect()
    }

    #[test]
    fn test_identity_alignment() {
        let target_points = plane_grid(0.3, 10);
        let target = PointSet::from_points(target_points.clone());
        let icp = Icp::new(&target, IcpConfig::default());

        let result = icp.align(Transform3::identity(), &target_points).unwrap();
        assert!(result.rms_error < 1e-4);
        for &t in &result.transform.t {
            assert_relative_eq!(t, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_translation_recovery() {
        let target = PointSet::from_points(plane_grid(0.3, 12));
        // Source sampled from the same plane, offset by +0.1 in x.
        let source = offset(&plane_grid(0.3, 12), 0.1, 0.0, 0.0);

        let icp = Icp::new(&target, IcpConfig::default());
        let result = icp.align(Transform3::identity(), &source).unwrap();

        assert_relative_eq!(result.transform.t[0], -0.1, epsilon = 0.01);
        assert_relative_eq!(result.transform.t[1], 0.0, epsilon = 0.01);
        assert_relative_eq!(result.transform.t[2], 0.0, epsilon = 0.01);
    }

    #[test]
    fn test_rotation_determinant_invariant() {
        let target = PointSet::from_points(plane_grid(0.3, 12));
        let source = offset(&plane_grid(0.3, 12), 0.08, 0.05, 0.0);

        let icp = Icp::new(&target, IcpConfig::default());
        let result = icp.align(Transform3::identity(), &source).unwrap();

        assert!((result.transform.rotation_determinant() - 1.0).abs() < 1e-4);
        assert!(result.transform.orthonormality_error() < 1e-5);
    }

    #[test]
    fn test_huge_jump_rejected() {
        // Wide spacing so the 0.5 m offset still matches the shifted
        // neighbor, converging to a correction beyond the guard.
        let mut config = IcpConfig::default();
        config.distance_threshold = 0.8;
        let target = PointSet::from_points(plane_grid(1.5, 10));
        let source = offset(&plane_grid(1.5, 10), 0.5, 0.0, 0.0);

        let icp = Icp::new(&target, config);
        let err = icp.align(Transform3::identity(), &source).unwrap_err();
        assert!(matches!(err, SlamError::IcpHugeJump { .. }));
    }

    #[test]
    fn test_no_correspondences() {
        let target = PointSet::from_points(plane_grid(0.3, 5));
        let source = offset(&plane_grid(0.3, 5), 100.0, 0.0, 0.0);

        let icp = Icp::new(&target, IcpConfig::default());
        let err = icp.align(Transform3::identity(), &source).unwrap_err();
        assert!(matches!(err, SlamError::IcpDegenerate(_)));
    }

    #[test]
    fn test_empty_source_returns_initial() {
        let target = PointSet::from_points(plane_grid(0.3, 5));
        let icp = Icp::new(&target, IcpConfig::default());
        let initial = Transform3::new(Transform3::identity().r, [0.5, 0.0, 0.0]);

        let result = icp.align(initial, &[]).unwrap();
        assert_eq!(result.iterations, 0);
        assert_relative_eq!(result.transform.t[0], 0.5);
    }

    #[test]
    fn test_small_yaw_recovery() {
        let base = plane_grid(0.25, 14);
        let target = PointSet::from_points(base.clone());

        // Rotate the source by a small yaw about the grid center.
        let yaw = 0.05f32;
        let (s, c) = yaw.sin_cos();
        let center = 0.25 * 13.0 / 2.0;
        let source: Vec<Point3> = base
            .iter()
            .map(|p| {
                let (x, y) = (p.x - center, p.y - center);
                Point3::new(c * x - s * y + center, s * x + c * y + center, 0.0)
            })
            .collect();

        let icp = Icp::new(&target, IcpConfig::default());
        let result = icp.align(Transform3::identity(), &source).unwrap();
        let pose = Pose6::from_transform(&result.transform);

        assert_relative_eq!(pose.yaw, -yaw, epsilon = 0.01);
    }
}
