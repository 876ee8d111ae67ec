//! Localization wrapper: ICP motion refinement plus the particle filter.
//!
//! `process` runs one localization cycle against the two-map form: the
//! previous frame's map snapshot feeds the ICP motion prior, the current
//! map feeds the particle weight update.

use std::time::Instant;

use crate::config::SlamConfig;
use crate::core::types::{Point3, Pose6};
use crate::error::Result;
use crate::mapping::OccupancyMap;
use crate::matching::Icp;

use super::Observation;
use super::particle_filter::{Particle, ParticleFilter};

/// The localizer.
#[derive(Debug)]
pub struct Localizer {
    pf: ParticleFilter,
    config: SlamConfig,
    average_pose: Pose6,
    p_odom: Option<Pose6>,
    /// Wall time of the last particle filter cycle, milliseconds.
    pub last_pf_time_ms: f32,
    /// Whether the last cycle used an ICP-refined increment.
    pub last_icp_refined: bool,
}

impl Localizer {
    pub fn new(config: &SlamConfig) -> Self {
        let pf = ParticleFilter::new(
            &config.particle_filter,
            &config.flags,
            config.seed,
            &Pose6::identity(),
        );
        Self {
            pf,
            config: config.clone(),
            average_pose: Pose6::identity(),
            p_odom: None,
            last_pf_time_ms: 0.0,
            last_icp_refined: false,
        }
    }

    /// Initialize the filter around the first pose and seed the odometry
    /// cache.
    pub fn init(&mut self, initial_pose: &Pose6, odom: &Pose6) {
        self.pf.init(initial_pose);
        self.average_pose = self.pf.mean_pose();
        self.p_odom = Some(*odom);
    }

    /// Run one localization cycle.
    ///
    /// On weight collapse the previous pose estimate is preserved, the
    /// odometry cache still advances, and the error is surfaced for the
    /// caller's strike accounting.
    pub fn process(
        &mut self,
        odom: &Pose6,
        obsv: &Observation,
        previous_map: &OccupancyMap,
        map: &OccupancyMap,
    ) -> Result<()> {
        let started = Instant::now();

        let raw_delta = match &self.p_odom {
            Some(p) => odom.ominus(p),
            None => Pose6::identity(),
        };
        let delta = self.refine_increment(&raw_delta, obsv, previous_map);

        self.pf.motion_model(&delta);
        self.pf.update(obsv, map);

        let normalized = self.pf.normalize();
        self.p_odom = Some(*odom);

        match normalized {
            Ok(()) => {
                self.pf.resample();
                self.average_pose = self.pf.mean_pose();
                self.last_pf_time_ms = started.elapsed().as_secs_f32() * 1e3;
                Ok(())
            }
            Err(e) => {
                self.last_pf_time_ms = started.elapsed().as_secs_f32() * 1e3;
                Err(e)
            }
        }
    }

    /// LiDAR odometry: refine the raw increment by aligning the frame's
    /// planars against the previous map. Falls back to the raw increment
    /// when ICP is disabled, degenerate, or jumps.
    fn refine_increment(
        &mut self,
        raw_delta: &Pose6,
        obsv: &Observation,
        previous_map: &OccupancyMap,
    ) -> Pose6 {
        self.last_icp_refined = false;
        if !self.config.flags.use_icp || obsv.planars.is_empty() {
            return *raw_delta;
        }

        // Carry the planars into map frame through the odometry-predicted
        // pose, then let ICP solve the residual correction from identity.
        let prior = self.average_pose.compose(raw_delta);
        let prior_tf = prior.transform();
        let source: Vec<Point3> = obsv
            .planars
            .iter()
            .map(|p| prior_tf.transform(&p.pos))
            .collect();

        let icp = Icp::new(previous_map, self.config.icp.clone());
        match icp.align(crate::core::types::Transform3::identity(), &source) {
            Ok(result) => {
                let refined_tf = result.transform.compose(&prior_tf);
                let refined_prior = Pose6::from_transform(&refined_tf);
                self.last_icp_refined = true;
                log::debug!(
                    "icp refined increment: rms {:.4}, {} inliers, {} iters",
                    result.rms_error,
                    result.inliers,
                    result.iterations
                );
                refined_prior.ominus(&self.average_pose)
            }
            Err(e) => {
                log::warn!("icp refinement rejected, using raw odometry: {e}");
                *raw_delta
            }
        }
    }

    /// Latest pose estimate.
    pub fn pose(&self) -> Pose6 {
        self.average_pose
    }

    pub fn particles(&self) -> &[Particle] {
        self.pf.particles()
    }

    pub fn particles_before_resampling(&self) -> &[Particle] {
        self.pf.particles_before_resampling()
    }

    /// Particle xy spread, for diagnostics.
    pub fn xy_stdev(&self) -> f32 {
        self.pf.xy_stdev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::error::SlamError;

    fn localizer() -> Localizer {
        let mut config = SlamConfig {
            seed: 42,
            ..Default::default()
        };
        config.particle_filter.number_particles = 200;
        Localizer::new(&config)
    }

    fn empty_map() -> OccupancyMap {
        OccupancyMap::new(&MapConfig::default()).unwrap()
    }

    #[test]
    fn test_pure_odometry_tracking() {
        let mut loc = localizer();
        let map = empty_map();
        loc.init(&Pose6::identity(), &Pose6::identity());

        // Ten frames, +0.1 m in x each.
        for i in 1..=10 {
            let odom = Pose6::new(i as f32 * 0.1, 0.0, 0.0, 0.0, 0.0, 0.0);
            loc.process(&odom, &Observation::default(), &map, &map).unwrap();
        }

        let pose = loc.pose();
        // stt-driven noise accumulates over T frames; stay within a few
        // multiples of sqrt(stt² · T).
        assert!((pose.x - 1.0).abs() < 0.15, "x {}", pose.x);
        assert!(pose.y.abs() < 0.15, "y {}", pose.y);
    }

    #[test]
    fn test_collapse_preserves_pose() {
        let mut loc = localizer();
        let map = empty_map();
        loc.init(&Pose6::identity(), &Pose6::identity());

        let obsv = Observation {
            landmarks: vec![
                crate::features::LandmarkObservation {
                    label: crate::features::LandmarkLabel::Trunk,
                    bearing: 0.0,
                    depth: 5.0,
                };
                3
            ],
            ..Default::default()
        };

        let pose_before = loc.pose();
        let err = loc
            .process(&Pose6::identity(), &obsv, &map, &map)
            .unwrap_err();
        assert!(matches!(err, SlamError::WeightCollapse(_)));
        assert_eq!(loc.pose(), pose_before);
    }

    #[test]
    fn test_icp_disabled_without_planars() {
        let mut loc = localizer();
        let map = empty_map();
        loc.init(&Pose6::identity(), &Pose6::identity());
        loc.process(
            &Pose6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0),
            &Observation::default(),
            &map,
            &map,
        )
        .unwrap();
        assert!(!loc.last_icp_refined);
    }
}
