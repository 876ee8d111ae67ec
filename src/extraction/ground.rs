//! Ground candidate extraction from the range image.

use crate::config::LidarConfig;
use crate::core::types::Point3;
use crate::features::Plane;

use super::range_image::RangeImage;

/// Collect ground candidate points by comparing vertically adjacent rings.
///
/// For every column, rows from V/2 up to V−2 are compared with the ring
/// above; when both cells hold returns and the vertical angle between the
/// two points stays within `ground_th`, both points become candidates.
/// The candidate plane keeps the (row, col) indices for later masking.
pub fn ground_candidates(image: &RangeImage, config: &LidarConfig) -> Plane {
    let mut candidates = Plane::default();

    let row_min = config.vertical_scans / 2;
    let row_max = config.vertical_scans.saturating_sub(1);

    for col in 0..config.horizontal_scans {
        for row in row_min..row_max {
            if !image.is_valid(row, col) || !image.is_valid(row + 1, col) {
                continue;
            }

            let lower = image.point(row, col);
            let upper = image.point(row + 1, col);

            let dx = upper.x - lower.x;
            let dy = upper.y - lower.y;
            let dz = upper.z - lower.z;
            let vertical_angle = dz.atan2((dx * dx + dy * dy).sqrt());

            if vertical_angle.abs() <= config.ground_th {
                candidates.points.push(*lower);
                candidates.points.push(*upper);
                candidates.indexes.push((row, col));
                candidates.indexes.push((row + 1, col));
            }
        }
    }

    candidates
}

/// Ground candidates as a flat point list (convenience for tests).
pub fn candidate_points(image: &RangeImage, config: &LidarConfig) -> Vec<Point3> {
    ground_candidates(image, config).points
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthesize a flat plane at z = +h, visible in the compared rings.
    fn plane_cloud(height: f32) -> Vec<Point3> {
        let config = LidarConfig::default();
        let mut cloud = Vec::new();
        for ring in 0..config.vertical_scans {
            let vertical = ring as f32 * config.ang_res_y - config.vertical_angle_bottom;
            if vertical <= 0.01 {
                continue;
            }
            let horizontal_range = height / vertical.tan();
            for step in 0..360 {
                let azimuth = step as f32 * 1.0_f32.to_radians();
                cloud.push(Point3::new(
                    horizontal_range * azimuth.cos(),
                    horizontal_range * azimuth.sin(),
                    height,
                ));
            }
        }
        cloud
    }

    #[test]
    fn test_flat_plane_produces_candidates() {
        let config = LidarConfig::default();
        let cloud = plane_cloud(1.0);
        let image = RangeImage::project(&cloud, &config);
        let candidates = ground_candidates(&image, &config);

        assert!(
            candidates.points.len() > 100,
            "expected many candidates, got {}",
            candidates.points.len()
        );
        // Candidate pairs lie on the plane, so their z matches the height.
        for p in &candidates.points {
            assert!((p.z - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_indexes_parallel_points() {
        let config = LidarConfig::default();
        let image = RangeImage::project(&plane_cloud(1.0), &config);
        let candidates = ground_candidates(&image, &config);
        assert_eq!(candidates.points.len(), candidates.indexes.len());
    }

    #[test]
    fn test_vertical_wall_rejected() {
        let config = LidarConfig::default();
        // A vertical wall ahead: consecutive rings see it at steeply
        // different heights, violating the ground angle gate.
        let mut cloud = Vec::new();
        for ring in 0..config.vertical_scans {
            let vertical = ring as f32 * config.ang_res_y - config.vertical_angle_bottom;
            let x = 10.0;
            cloud.push(Point3::new(x, 0.0, x * vertical.tan()));
        }
        let image = RangeImage::project(&cloud, &config);
        let candidates = ground_candidates(&image, &config);
        assert!(candidates.points.is_empty());
    }

    #[test]
    fn test_empty_image_no_candidates() {
        let config = LidarConfig::default();
        let image = RangeImage::project(&[], &config);
        assert!(candidate_points(&image, &config).is_empty());
    }
}
