//! Correspondence-aware multi-layer map updates.
//!
//! Every frame, observed features are carried into map frame with the
//! estimated pose, matched against the owning cell (and for visual
//! features a small neighborhood), and either blended into their
//! correspondence with a running mean or inserted fresh. Semantic
//! landmarks additionally drive their per-landmark Kalman filters.

use crate::config::CameraConfig;
use crate::core::types::{Point3, Pose6};
use crate::error::SlamError;
use crate::features::{Corner, MapFeature, Planar, SemanticFeature};
use crate::localization::Observation;

use super::landmark_filter::{LandmarkBank, ObservationNoise};
use super::occupancy::OccupancyMap;

/// Matching radius for visual, corner and planar correspondences, meters.
const CORRESPONDENCE_THRESHOLD: f32 = 0.02;
/// Cell neighborhood searched for visual features when the owning cell
/// has no match.
const VISUAL_ADJACENT_CELLS: usize = 2;
/// Association radius for semantic landmarks, meters.
const LANDMARK_ASSOC_DIST: f32 = 0.5;
/// Every Nth ground inlier contributes an elevation sample.
const ELEVATION_STRIDE: usize = 10;

/// Per-frame mapper statistics for the log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapperStats {
    pub new_landmarks: usize,
    pub updated_landmarks: usize,
    pub new_features: usize,
    pub updated_features: usize,
    pub dropped: usize,
}

/// The multi-layer mapper. Owns the landmark filter bank and the id
/// counters for everything it inserts.
#[derive(Debug)]
pub struct MultiLayerMapper {
    cam: CameraConfig,
    bank: LandmarkBank,
    next_landmark_id: u32,
    next_feature_id: u32,
}

impl MultiLayerMapper {
    pub fn new(cam: &CameraConfig) -> Self {
        Self {
            cam: cam.clone(),
            bank: LandmarkBank::new(),
            next_landmark_id: 1,
            next_feature_id: 1,
        }
    }

    /// The landmark filter bank (read-only snapshot for exporters).
    pub fn bank(&self) -> &LandmarkBank {
        &self.bank
    }

    /// Merge one frame's observation into the map at the given pose.
    pub fn update(
        &mut self,
        pose: &Pose6,
        obsv: &Observation,
        map: &mut OccupancyMap,
    ) -> MapperStats {
        let mut stats = MapperStats::default();

        self.update_landmarks(pose, obsv, map, &mut stats);
        self.update_visual(pose, obsv, map, &mut stats);
        self.update_corners(pose, obsv, map, &mut stats);
        self.update_planars(pose, obsv, map, &mut stats);
        self.update_ground(pose, obsv, map);

        stats
    }

    // ------------------------------------------------------------------
    // Semantic landmarks
    // ------------------------------------------------------------------

    fn update_landmarks(
        &mut self,
        pose: &Pose6,
        obsv: &Observation,
        map: &mut OccupancyMap,
        stats: &mut MapperStats,
    ) {
        for obs in &obsv.landmarks {
            let heading = pose.yaw + obs.bearing;
            let projected = Point3::new(
                pose.x + obs.depth * heading.cos(),
                pose.y + obs.depth * heading.sin(),
                0.0,
            );
            let noise = ObservationNoise::from_depth(&self.cam, obs.depth);

            let correspondence = map
                .nearest_semantic(&projected, LANDMARK_ASSOC_DIST)
                .cloned();

            match correspondence {
                Some(old) => {
                    let Some((state, gauss)) =
                        self.bank.observe(old.id, pose, obs.depth, obs.bearing, &noise)
                    else {
                        continue;
                    };
                    let mut refreshed = SemanticFeature::new(old.id, state, gauss, old.label);
                    refreshed.n_observations = old.n_observations + 1;

                    match map.update(
                        &MapFeature::Semantic(old),
                        MapFeature::Semantic(refreshed),
                    ) {
                        Ok(true) => stats.updated_landmarks += 1,
                        Ok(false) => {}
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("landmark update failed: {e}"),
                    }
                }
                None => {
                    let id = self.next_landmark_id;
                    self.next_landmark_id += 1;

                    let filter = self.bank.register(id, pose, obs.depth, obs.bearing, &noise);
                    let feature =
                        SemanticFeature::new(id, filter.state(), filter.gaussian(), obs.label);

                    match map.insert(MapFeature::Semantic(feature)) {
                        Ok(()) => stats.new_landmarks += 1,
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("landmark insert failed: {e}"),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Visual features
    // ------------------------------------------------------------------

    fn update_visual(
        &mut self,
        pose: &Pose6,
        obsv: &Observation,
        map: &mut OccupancyMap,
        stats: &mut MapperStats,
    ) {
        let tf = pose.transform();

        for feature in &obsv.surf_features {
            let projected = tf.transform(&feature.pos);

            // Owning cell first, then the adjacent neighborhood.
            let correspondence = map
                .nearest_visual(&projected, CORRESPONDENCE_THRESHOLD)
                .cloned()
                .or_else(|| {
                    map.nearest_visual(
                        &projected,
                        VISUAL_ADJACENT_CELLS as f32 * map.resolution(),
                    )
                    .filter(|hit| projected.distance(&hit.pos) < CORRESPONDENCE_THRESHOLD)
                    .cloned()
                });

            match correspondence {
                Some(old) => {
                    let blended = running_mean(&old.pos, &projected, old.n_observations);
                    let mut refreshed = feature.clone();
                    refreshed.id = old.id;
                    refreshed.pos = blended;
                    refreshed.n_observations = old.n_observations + 1;

                    match map.update(
                        &MapFeature::Visual(old),
                        MapFeature::Visual(refreshed),
                    ) {
                        Ok(true) => stats.updated_features += 1,
                        Ok(false) => {}
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("visual update failed: {e}"),
                    }
                }
                None => {
                    let mut fresh = feature.clone();
                    fresh.id = self.next_feature_id;
                    self.next_feature_id += 1;
                    fresh.pos = projected;
                    fresh.n_observations = 1;

                    match map.insert(MapFeature::Visual(fresh)) {
                        Ok(()) => stats.new_features += 1,
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("visual insert failed: {e}"),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Corners and planars
    // ------------------------------------------------------------------

    fn update_corners(
        &mut self,
        pose: &Pose6,
        obsv: &Observation,
        map: &mut OccupancyMap,
        stats: &mut MapperStats,
    ) {
        let tf = pose.transform();

        for corner in &obsv.corners {
            let projected = tf.transform(&corner.pos);
            let correspondence = map
                .nearest_corner(&projected, CORRESPONDENCE_THRESHOLD)
                .cloned();

            match correspondence {
                Some(old) => {
                    let blended = running_mean(&old.pos, &projected, old.n_observations);
                    let mut refreshed = Corner::new(blended, corner.which_plane);
                    refreshed.id = old.id;
                    refreshed.n_observations = old.n_observations + 1;
                    refreshed.correspondence = Some(old.pos);

                    match map.update(
                        &MapFeature::Corner(old),
                        MapFeature::Corner(refreshed),
                    ) {
                        Ok(true) => stats.updated_features += 1,
                        Ok(false) => {}
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("corner update failed: {e}"),
                    }
                }
                None => {
                    let mut fresh = Corner::new(projected, corner.which_plane);
                    fresh.id = self.next_feature_id;
                    self.next_feature_id += 1;
                    fresh.n_observations = 1;

                    match map.insert(MapFeature::Corner(fresh)) {
                        Ok(()) => stats.new_features += 1,
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("corner insert failed: {e}"),
                    }
                }
            }
        }
    }

    fn update_planars(
        &mut self,
        pose: &Pose6,
        obsv: &Observation,
        map: &mut OccupancyMap,
        stats: &mut MapperStats,
    ) {
        let tf = pose.transform();

        for planar in &obsv.planars {
            let projected = tf.transform(&planar.pos);
            let correspondence = map
                .nearest_planar(&projected, CORRESPONDENCE_THRESHOLD)
                .cloned();

            match correspondence {
                Some(old) => {
                    let blended = running_mean(&old.pos, &projected, old.n_observations);
                    let mut refreshed = Planar::new(blended, planar.which_plane);
                    refreshed.id = old.id;
                    refreshed.n_observations = old.n_observations + 1;

                    match map.update(
                        &MapFeature::Planar(old),
                        MapFeature::Planar(refreshed),
                    ) {
                        Ok(true) => stats.updated_features += 1,
                        Ok(false) => {}
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("planar update failed: {e}"),
                    }
                }
                None => {
                    let mut fresh = Planar::new(projected, planar.which_plane);
                    fresh.id = self.next_feature_id;
                    self.next_feature_id += 1;
                    fresh.n_observations = 1;

                    match map.insert(MapFeature::Planar(fresh)) {
                        Ok(()) => stats.new_features += 1,
                        Err(SlamError::OutOfBounds(..)) => stats.dropped += 1,
                        Err(e) => log::warn!("planar insert failed: {e}"),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Ground plane and vegetation lines
    // ------------------------------------------------------------------

    fn update_ground(&mut self, pose: &Pose6, obsv: &Observation, map: &mut OccupancyMap) {
        let tf = pose.transform();

        // Latest estimate replaces the stored ground plane outright.
        if let Some(ground) = &obsv.ground {
            let in_map = ground.transformed(&tf);
            for p in in_map.plane.points.iter().step_by(ELEVATION_STRIDE) {
                let _ = map.update_elevation(p.x, p.y, p.z);
            }
            map.ground_plane = Some(in_map);
        }

        // Vegetation lines are rewritten every frame.
        if !obsv.vegetation_lines.is_empty() {
            map.vegetation_lines = obsv
                .vegetation_lines
                .iter()
                .map(|line| line.transformed(&tf))
                .collect();
        }
    }
}

/// Running-mean position blend: (p_corr·n + p_obs) / (n + 1).
fn running_mean(correspondence: &Point3, observed: &Point3, n: u32) -> Point3 {
    let n = n.max(1) as f32;
    Point3::new(
        (correspondence.x * n + observed.x) / (n + 1.0),
        (correspondence.y * n + observed.y) / (n + 1.0),
        (correspondence.z * n + observed.z) / (n + 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::features::{LandmarkLabel, LandmarkObservation};
    use approx::assert_relative_eq;

    fn mapper() -> MultiLayerMapper {
        MultiLayerMapper::new(&CameraConfig::default())
    }

    fn empty_map() -> OccupancyMap {
        OccupancyMap::new(&MapConfig::default()).unwrap()
    }

    fn landmark_obs(bearing: f32, depth: f32) -> Observation {
        Observation {
            landmarks: vec![LandmarkObservation {
                label: LandmarkLabel::Trunk,
                bearing,
                depth,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_new_landmark_created() {
        let mut m = mapper();
        let mut map = empty_map();

        let stats = m.update(&Pose6::identity(), &landmark_obs(0.0, 5.0), &mut map);
        assert_eq!(stats.new_landmarks, 1);

        let stored = map
            .nearest_semantic(&Point3::new(5.0, 0.0, 0.0), 0.5)
            .unwrap();
        assert!((stored.pos.x - 5.0).abs() < 0.05);
        assert_eq!(stored.n_observations, 1);
        assert!(m.bank().contains(stored.id));
    }

    #[test]
    fn test_reobservation_updates_landmark() {
        let mut m = mapper();
        let mut map = empty_map();

        m.update(&Pose6::identity(), &landmark_obs(0.0, 5.0), &mut map);
        let trace_before = m.bank().get(1).unwrap().covariance_trace();

        // Robot advanced 0.1 m; same trunk seen slightly closer.
        let pose = Pose6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0);
        let stats = m.update(&pose, &landmark_obs(0.0, 4.9), &mut map);
        assert_eq!(stats.updated_landmarks, 1);
        assert_eq!(stats.new_landmarks, 0);

        let stored = map
            .nearest_semantic(&Point3::new(5.0, 0.0, 0.0), 0.5)
            .unwrap();
        assert_eq!(stored.n_observations, 2);
        assert!((stored.pos.x - 5.0).abs() < 0.05, "x {}", stored.pos.x);

        // EKF covariance shrinks with the second observation.
        assert!(m.bank().get(1).unwrap().covariance_trace() < trace_before);
    }

    #[test]
    fn test_observation_counts_monotonic() {
        let mut m = mapper();
        let mut map = empty_map();

        let mut last = 0;
        for _ in 0..5 {
            m.update(&Pose6::identity(), &landmark_obs(0.0, 5.0), &mut map);
            let stored = map
                .nearest_semantic(&Point3::new(5.0, 0.0, 0.0), 0.5)
                .unwrap();
            assert!(stored.n_observations > last);
            last = stored.n_observations;
        }
    }

    #[test]
    fn test_corner_blended_on_reobservation() {
        let mut m = mapper();
        let mut map = empty_map();

        let obsv = Observation {
            corners: vec![Corner::new(Point3::new(2.0, 1.0, 0.1), 1)],
            ..Default::default()
        };
        m.update(&Pose6::identity(), &obsv, &mut map);

        // Same corner seen 1 cm off.
        let obsv2 = Observation {
            corners: vec![Corner::new(Point3::new(2.01, 1.0, 0.1), 1)],
            ..Default::default()
        };
        let stats = m.update(&Pose6::identity(), &obsv2, &mut map);
        assert_eq!(stats.updated_features, 1);

        let stored = map
            .nearest_corner(&Point3::new(2.0, 1.0, 0.1), 0.1)
            .unwrap();
        assert_relative_eq!(stored.pos.x, 2.005, epsilon = 1e-4);
        assert_eq!(stored.n_observations, 2);
        assert_eq!(stored.which_plane, 1);
    }

    #[test]
    fn test_distant_corner_inserted_fresh() {
        let mut m = mapper();
        let mut map = empty_map();

        let obsv = Observation {
            corners: vec![Corner::new(Point3::new(2.0, 1.0, 0.0), 1)],
            ..Default::default()
        };
        m.update(&Pose6::identity(), &obsv, &mut map);

        // 10 cm away: beyond the correspondence radius.
        let obsv2 = Observation {
            corners: vec![Corner::new(Point3::new(2.1, 1.0, 0.0), 1)],
            ..Default::default()
        };
        let stats = m.update(&Pose6::identity(), &obsv2, &mut map);
        assert_eq!(stats.new_features, 1);
        assert_eq!(stats.updated_features, 0);
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let mut m = mapper();
        let mut map = empty_map();

        // Landmark projected far beyond the map extents.
        let stats = m.update(&Pose6::identity(), &landmark_obs(0.0, 9.0e2), &mut map);
        let _ = stats;
        // Nothing stored; the frame continues.
        let (semantic, ..) = map.layer_counts();
        assert_eq!(semantic, 0);
    }

    #[test]
    fn test_ground_plane_replaced() {
        use crate::features::{Plane, SemiPlane};

        let mut m = mapper();
        let mut map = empty_map();

        let ground = SemiPlane::from_plane(Plane {
            a: 0.0,
            b: 0.0,
            c: 1.0,
            d: 0.5,
            normal: [0.0, 0.0, 1.0],
            points: vec![Point3::new(1.0, 0.0, -0.5), Point3::new(2.0, 0.0, -0.5)],
            ..Default::default()
        });
        let obsv = Observation {
            ground: Some(ground),
            ..Default::default()
        };

        m.update(&Pose6::identity(), &obsv, &mut map);
        assert!(map.ground_plane.is_some());

        // Elevation sampled under the ground inliers.
        assert_eq!(map.at(1.0, 0.0, -0.5).unwrap().elevation, Some(-0.5));
    }

    #[test]
    fn test_vegetation_lines_rewritten() {
        use crate::features::Line2;

        let mut m = mapper();
        let mut map = empty_map();

        let obsv = Observation {
            vegetation_lines: vec![Line2::new(0.0, -2.0), Line2::new(0.0, 2.0)],
            ..Default::default()
        };
        m.update(&Pose6::identity(), &obsv, &mut map);
        assert_eq!(map.vegetation_lines.len(), 2);
        assert_relative_eq!(map.vegetation_lines[0].b, -2.0, epsilon = 1e-4);

        // Next frame rewrites them.
        let obsv2 = Observation {
            vegetation_lines: vec![Line2::new(0.1, -1.9)],
            ..Default::default()
        };
        m.update(&Pose6::identity(), &obsv2, &mut map);
        assert_eq!(map.vegetation_lines.len(), 1);
    }
}
