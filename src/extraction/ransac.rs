//! RANSAC plane fitting with PCA normal refinement.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::Rng;
use rand::rngs::StdRng;

use crate::core::types::Point3;
use crate::error::{Result, SlamError};
use crate::features::Plane;

/// Hard cap on attempts to draw three distinct sample indices.
const MAX_SAMPLE_TRIES: usize = 1000;

/// Fit a plane to a point set.
///
/// Runs `max_iters` RANSAC rounds with the given inlier threshold, keeps
/// the consensus set, then refines the normal by PCA over the inliers
/// (eigenvector of the smallest covariance eigenvalue), flipped so
/// `normal.z >= 0` and normalized. The hessian coefficients are rewritten
/// from the refined normal and the inlier centroid.
pub fn fit_plane(
    points: &[Point3],
    max_iters: usize,
    dist_threshold: f32,
    rng: &mut StdRng,
) -> Result<Plane> {
    if points.len() < 3 {
        return Err(SlamError::RansacNoFit(points.len()));
    }

    let mut best_inliers: Vec<Point3> = Vec::new();
    let mut best_hessian = (0.0f32, 0.0f32, 0.0f32, 0.0f32);

    for _ in 0..max_iters {
        let Some((p1, p2, p3)) = sample_triplet(points, rng) else {
            return Err(SlamError::RansacNoFit(points.len()));
        };

        // Hessian coefficients from the cross product of two edges.
        let v1 = Vector3::new(p2.x - p1.x, p2.y - p1.y, p2.z - p1.z);
        let v2 = Vector3::new(p3.x - p1.x, p3.y - p1.y, p3.z - p1.z);
        let abc = v1.cross(&v2);
        if abc.norm() < 1e-9 {
            // Collinear sample; try another round.
            continue;
        }

        let mut candidate = Plane {
            a: abc[0],
            b: abc[1],
            c: abc[2],
            d: -(abc[0] * p1.x + abc[1] * p1.y + abc[2] * p1.z),
            ..Default::default()
        };
        candidate.normalize();

        let mut inliers = Vec::new();
        for pt in points {
            if candidate.point_distance(pt) < dist_threshold {
                inliers.push(*pt);
            }
        }

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;
            best_hessian = (candidate.a, candidate.b, candidate.c, candidate.d);
        }
    }

    if best_inliers.is_empty() {
        return Err(SlamError::RansacNoFit(points.len()));
    }

    let mut plane = Plane {
        a: best_hessian.0,
        b: best_hessian.1,
        c: best_hessian.2,
        d: best_hessian.3,
        points: best_inliers,
        ..Default::default()
    };
    refine_normal(&mut plane);
    Ok(plane)
}

/// Draw three pairwise-distinct indices, giving up after
/// `MAX_SAMPLE_TRIES` attempts.
fn sample_triplet<'a>(
    points: &'a [Point3],
    rng: &mut StdRng,
) -> Option<(&'a Point3, &'a Point3, &'a Point3)> {
    let n = points.len();
    for _ in 0..MAX_SAMPLE_TRIES {
        let i1 = rng.random_range(0..n);
        let i2 = rng.random_range(0..n);
        let i3 = rng.random_range(0..n);
        if i1 != i2 && i1 != i3 && i2 != i3 {
            return Some((&points[i1], &points[i2], &points[i3]));
        }
    }
    None
}

/// PCA refinement: the normal is the eigenvector of the smallest
/// eigenvalue of the inlier covariance. The hessian is rewritten so
/// a² + b² + c² = 1 and d places the plane through the inlier centroid.
fn refine_normal(plane: &mut Plane) {
    let n = plane.points.len() as f32;
    if n < 3.0 {
        plane.normalize();
        plane.normal = [plane.a, plane.b, plane.c];
        return;
    }

    let mut centroid = Vector3::zeros();
    for p in &plane.points {
        centroid += Vector3::new(p.x, p.y, p.z);
    }
    centroid /= n;

    let mut cov = Matrix3::zeros();
    for p in &plane.points {
        let d = Vector3::new(p.x, p.y, p.z) - centroid;
        cov += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let mut normal = eigen.eigenvectors.column(min_idx).into_owned();

    if normal[2] < 0.0 {
        normal = -normal;
    }
    let norm = normal.norm();
    if norm > 1e-9 {
        normal /= norm;
    }

    plane.a = normal[0];
    plane.b = normal[1];
    plane.c = normal[2];
    plane.d = -normal.dot(&centroid);
    plane.normal = [normal[0], normal[1], normal[2]];
}
