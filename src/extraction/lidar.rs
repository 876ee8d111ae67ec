//! The composed LiDAR frontend.
//!
//! One call per frame: project the cloud into the range image, fit the
//! ground plane, segment the remaining structure, split the vegetation
//! rows and pick corner/planar features, then carry everything into base
//! frame through the mounting transform.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::LidarConfig;
use crate::core::types::{Point3, Pose6, Transform3};
use crate::error::{Result, SlamError};
use crate::features::{Corner, Line2, Planar, SemiPlane};

use super::corners;
use super::ground;
use super::range_image::RangeImage;
use super::ransac;
use super::segmentation;
use super::vegetation;

/// Ground RANSAC rounds and inlier threshold (meters).
const GROUND_RANSAC_ITERS: usize = 20;
const GROUND_RANSAC_THRESHOLD: f32 = 0.08;

/// Features extracted from one LiDAR frame, in base frame.
#[derive(Debug, Default)]
pub struct LidarFrame {
    pub corners: Vec<Corner>,
    pub planars: Vec<Planar>,
    /// Ground plane, absent when RANSAC found no fit this frame.
    pub ground: Option<SemiPlane>,
    /// Non-ground side planes bounded by their hulls.
    pub side_planes: Vec<SemiPlane>,
    /// Fitted vegetation row lines, up to two.
    pub vegetation_lines: Vec<Line2>,
}

/// LiDAR feature extractor. Owns the seeded RNG driving RANSAC so a fixed
/// seed reproduces a frame exactly.
#[derive(Debug)]
pub struct LidarExtractor {
    config: LidarConfig,
    sensor_to_base: Transform3,
    rng: StdRng,
}

impl LidarExtractor {
    pub fn new(config: &LidarConfig, seed: u64) -> Self {
        let m = config.sensor_to_base;
        let sensor_to_base = Pose6::new(m[0], m[1], m[2], m[3], m[4], m[5]).transform();
        Self {
            config: config.clone(),
            sensor_to_base,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &LidarConfig {
        &self.config
    }

    /// Process one cloud in sensor frame.
    pub fn process(&mut self, cloud: &[Point3]) -> Result<LidarFrame> {
        if cloud.len() < self.config.min_cloud_size {
            return Err(SlamError::EmptyCloud {
                got: cloud.len(),
                min: self.config.min_cloud_size,
            });
        }

        let image = RangeImage::project(cloud, &self.config);

        // Ground plane: candidates from the ring comparison, outliers
        // removed by RANSAC, normal refined by PCA.
        let candidates = ground::ground_candidates(&image, &self.config);
        let ground_plane = match ransac::fit_plane(
            &candidates.points,
            GROUND_RANSAC_ITERS,
            GROUND_RANSAC_THRESHOLD,
            &mut self.rng,
        ) {
            Ok(mut plane) => {
                plane.indexes = candidates.indexes;
                Some(plane)
            }
            Err(e) => {
                log::debug!("ground fit skipped: {e}");
                None
            }
        };

        // Segment everything the ground did not claim.
        let ground_indexes: &[(usize, usize)] = ground_plane
            .as_ref()
            .map(|p| p.indexes.as_slice())
            .unwrap_or(&[]);
        let seg = segmentation::segment(&image, ground_indexes, &self.config);

        // Vegetation rows from the segmented points.
        let rows = vegetation::extract_rows(
            &seg.points,
            GROUND_RANSAC_ITERS,
            GROUND_RANSAC_THRESHOLD,
            &mut self.rng,
        );

        // Edge and surface features.
        let (corner_feats, planar_feats) = corners::extract_features(&seg, &self.config);

        log::debug!(
            "lidar frame: {} segmented, {} corners, {} planars, ground {}",
            seg.len(),
            corner_feats.len(),
            planar_feats.len(),
            ground_plane.is_some(),
        );

        let mut frame = LidarFrame {
            corners: corner_feats,
            planars: planar_feats,
            ground: ground_plane.map(SemiPlane::from_plane),
            side_planes: rows.side_planes,
            vegetation_lines: rows.lines,
        };
        self.to_base_frame(&mut frame);
        Ok(frame)
    }

    /// Carry all outputs through the sensor mounting transform.
    fn to_base_frame(&self, frame: &mut LidarFrame) {
        let tf = &self.sensor_to_base;
        if *tf == Transform3::identity() {
            return;
        }

        for corner in &mut frame.corners {
            corner.pos = tf.transform(&corner.pos);
        }
        for planar in &mut frame.planars {
            planar.pos = tf.transform(&planar.pos);
        }
        if let Some(ground) = &mut frame.ground {
            *ground = ground.transformed(tf);
        }

        // Side planes and lines: transform the inliers, then refit the
        // row lines in base frame.
        frame.vegetation_lines.clear();
        for side in &mut frame.side_planes {
            *side = side.transformed(tf);
            frame.vegetation_lines.push(Line2::fit(&side.plane.points));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LidarExtractor {
        LidarExtractor::new(&LidarConfig::default(), 42)
    }

    /// A vineyard-like scene: two long wall-like rows at y = ±2 plus a
    /// flat plane visible in the upper rings.
    fn vineyard_cloud() -> Vec<Point3> {
        let cfg = LidarConfig::default();
        let mut cloud = Vec::new();

        // Vine rows: vertical surfaces along x at y = ±2.
        for ring in 4..10 {
            let vertical = ring as f32 * cfg.ang_res_y - cfg.vertical_angle_bottom;
            for step in 0..600 {
                let azimuth = (step as f32 - 300.0) * cfg.ang_res_x;
                // Left row.
                if azimuth.sin().abs() > 0.15 {
                    let y = if azimuth.sin() > 0.0 { 2.0 } else { -2.0 };
                    let x = y / azimuth.tan();
                    if (1.5..45.0).contains(&x) {
                        let r = (x * x + y * y).sqrt();
                        cloud.push(Point3::new(x, y, r * vertical.tan()));
                    }
                }
            }
        }

        // A canopy plane overhead, visible in the upper rings.
        for ring in 10..16 {
            let vertical = ring as f32 * cfg.ang_res_y - cfg.vertical_angle_bottom;
            if vertical <= 0.05 {
                continue;
            }
            let range = 2.0 / vertical.tan();
            for step in 0..360 {
                let azimuth = step as f32 * 1.0_f32.to_radians();
                cloud.push(Point3::new(
                    range * azimuth.cos(),
                    range * azimuth.sin(),
                    2.0,
                ));
            }
        }

        cloud
    }

    #[test]
    fn test_empty_cloud_rejected() {
        let mut ex = extractor();
        let cloud = vec![Point3::new(5.0, 0.0, 0.0); 10];
        assert!(matches!(
            ex.process(&cloud),
            Err(SlamError::EmptyCloud { got: 10, .. })
        ));
    }

    #[test]
    fn test_vineyard_frame_has_features() {
        let mut ex = extractor();
        let frame = ex.process(&vineyard_cloud()).unwrap();

        assert!(!frame.planars.is_empty(), "no planars");
        assert!(frame.ground.is_some(), "no ground plane");
    }

    #[test]
    fn test_ground_normal_points_up() {
        let mut ex = extractor();
        let frame = ex.process(&vineyard_cloud()).unwrap();
        let ground = frame.ground.unwrap();

        let n = ground.plane.normal;
        let norm = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(n[2] >= 0.0);
    }

    #[test]
    fn test_mounting_transform_applied() {
        let mut config = LidarConfig::default();
        // Sensor mounted 0.5 m above base origin.
        config.sensor_to_base = [0.0, 0.0, 0.5, 0.0, 0.0, 0.0];
        let mut raised = LidarExtractor::new(&config, 42);
        let mut level = extractor();

        let cloud = vineyard_cloud();
        let frame_raised = raised.process(&cloud).unwrap();
        let frame_level = level.process(&cloud).unwrap();

        // Every feature gains the mounting offset in z.
        if let (Some(a), Some(b)) = (&frame_raised.ground, &frame_level.ground) {
            let za = a.plane.points[0].z;
            let zb = b.plane.points[0].z;
            assert!((za - zb - 0.5).abs() < 1e-4, "za {} zb {}", za, zb);
        }
    }

    #[test]
    fn test_deterministic_given_seed() {
        let cloud = vineyard_cloud();
        let frame_a = LidarExtractor::new(&LidarConfig::default(), 7)
            .process(&cloud)
            .unwrap();
        let frame_b = LidarExtractor::new(&LidarConfig::default(), 7)
            .process(&cloud)
            .unwrap();

        assert_eq!(frame_a.corners.len(), frame_b.corners.len());
        assert_eq!(frame_a.planars.len(), frame_b.planars.len());
    }
}
