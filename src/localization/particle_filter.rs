//! Particle filter over the multi-layer map.
//!
//! Weighting multiplies per-source likelihoods (semantic landmarks, LiDAR
//! corners/planars, ground attitude, visual descriptors, vegetation row
//! yaw, GNSS), each per-feature factor clipped to a floor so a single
//! miss cannot zero a particle outright. Resampling is low-variance
//! stochastic universal sampling over the full set every frame.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{FlagsConfig, ParticleFilterConfig};
use crate::core::math::{angle_diff, gauss_pdf, sample_gaussian};
use crate::core::types::{Point3, Pose6};
use crate::error::{Result, SlamError};
use crate::mapping::OccupancyMap;

use super::Observation;
use super::motion_model::MotionModel;

/// Per-feature likelihood floor.
const LIKELIHOOD_FLOOR: f64 = 1e-12;
/// Weight-sum epsilon below which normalization reports a collapse.
const COLLAPSE_EPSILON: f64 = 1e-25;

/// NN search radii per feature kind, meters.
const LANDMARK_SEARCH_DIST: f32 = 3.0;
const CORNER_SEARCH_DIST: f32 = 0.5;
const VISUAL_SEARCH_DIST: f32 = 0.3;

/// One pose hypothesis with its importance weight.
#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub id: u32,
    pub pose: Pose6,
    pub weight: f64,
}

impl Particle {
    pub fn new(id: u32, pose: Pose6) -> Self {
        Self {
            id,
            pose,
            weight: 1.0,
        }
    }
}

/// The particle filter.
#[derive(Debug)]
pub struct ParticleFilter {
    config: ParticleFilterConfig,
    flags: FlagsConfig,
    motion_model: MotionModel,
    particles: Vec<Particle>,
    /// Pre-resample snapshot kept for diagnostics.
    particles_before_resampling: Vec<Particle>,
    rng: StdRng,
    /// Robot height over the ground plane captured at init; anchors the
    /// ground z-consistency term.
    reference_ground_height: Option<f32>,
}

impl ParticleFilter {
    /// Create the filter with all particles spread around `initial_pose`.
    pub fn new(
        config: &ParticleFilterConfig,
        flags: &FlagsConfig,
        seed: u64,
        initial_pose: &Pose6,
    ) -> Self {
        let seed = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(12345)
        } else {
            seed
        };

        let mut filter = Self {
            config: config.clone(),
            flags: flags.clone(),
            motion_model: MotionModel::new(config),
            particles: Vec::new(),
            particles_before_resampling: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            reference_ground_height: None,
        };
        filter.init(initial_pose);
        filter
    }

    /// (Re)initialize the particle set around a pose.
    pub fn init(&mut self, pose: &Pose6) {
        let c = &self.config;
        let mut particles = Vec::with_capacity(c.number_particles);
        for id in 0..c.number_particles {
            let noisy = Pose6::new(
                pose.x + sample_gaussian(&mut self.rng, c.sigma_xy),
                pose.y + sample_gaussian(&mut self.rng, c.sigma_xy),
                pose.z + sample_gaussian(&mut self.rng, c.sigma_z),
                pose.roll + sample_gaussian(&mut self.rng, c.sigma_roll),
                pose.pitch + sample_gaussian(&mut self.rng, c.sigma_pitch),
                pose.yaw + sample_gaussian(&mut self.rng, c.sigma_yaw),
            );
            particles.push(Particle::new(id as u32, noisy));
        }
        self.particles = particles;
        self.particles_before_resampling.clear();
        self.reference_ground_height = None;
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_before_resampling(&self) -> &[Particle] {
        &self.particles_before_resampling
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Prediction: propagate every particle through the motion model.
    pub fn motion_model(&mut self, delta: &Pose6) {
        for i in 0..self.particles.len() {
            let pose = self.particles[i].pose;
            self.particles[i].pose = self.motion_model.sample(&pose, delta, &mut self.rng);
        }
    }

    /// Correction: weight every particle against the observation and map.
    pub fn update(&mut self, obsv: &Observation, map: &OccupancyMap) {
        // Capture the ground-height datum on the first usable estimate.
        if self.reference_ground_height.is_none() {
            if let Some(ground) = &obsv.ground {
                self.reference_ground_height = Some(ground_height(ground));
            }
        }

        let weights: Vec<f64> = self
            .particles
            .iter()
            .map(|p| self.particle_weight(p, obsv, map))
            .collect();
        for (particle, w) in self.particles.iter_mut().zip(weights) {
            particle.weight = w;
        }
    }

    /// Product of per-source likelihoods for one particle.
    fn particle_weight(&self, particle: &Particle, obsv: &Observation, map: &OccupancyMap) -> f64 {
        let c = &self.config;
        let tf = particle.pose.transform();
        let mut w: f64 = 1.0;

        if self.flags.use_landmarks {
            for obs in &obsv.landmarks {
                let heading = particle.pose.yaw + obs.bearing;
                let projected = Point3::new(
                    particle.pose.x + obs.depth * heading.cos(),
                    particle.pose.y + obs.depth * heading.sin(),
                    0.0,
                );
                let factor = match map.nearest_semantic(&projected, LANDMARK_SEARCH_DIST) {
                    Some(landmark) => gauss_pdf(
                        projected.distance_xy(&landmark.pos) as f64,
                        c.sigma_landmark_matching as f64,
                    ),
                    None => 0.0,
                };
                w *= factor.max(LIKELIHOOD_FLOOR);
            }
        }

        if self.flags.use_corners {
            for corner in &obsv.corners {
                let projected = tf.transform(&corner.pos);
                let factor = match map.nearest_corner(&projected, CORNER_SEARCH_DIST) {
                    Some(hit) => gauss_pdf(
                        projected.distance(&hit.pos) as f64,
                        c.sigma_corner_matching as f64,
                    ),
                    None => 0.0,
                };
                w *= factor.max(LIKELIHOOD_FLOOR);
            }

            for planar in &obsv.planars {
                let projected = tf.transform(&planar.pos);
                let factor = match map.nearest_planar(&projected, CORNER_SEARCH_DIST) {
                    Some(hit) => gauss_pdf(
                        projected.distance(&hit.pos) as f64,
                        c.sigma_corner_matching as f64,
                    ),
                    None => 0.0,
                };
                w *= factor.max(LIKELIHOOD_FLOOR);
            }
        }

        // Ground plane: z/roll/pitch consistency.
        if self.flags.use_ground_plane {
            if let Some(ground) = &obsv.ground {
                // Ground normal in robot frame is
                // (−sinθ, cosθ·sinφ, cosθ·cosφ) for attitude (φ, θ).
                let n = ground.plane.normal;
                let measured_pitch = (-n[0]).clamp(-1.0, 1.0).asin();
                let measured_roll = n[1].atan2(n[2]);

                w *= gauss_pdf(
                    angle_diff(measured_roll, particle.pose.roll) as f64,
                    c.sigma_roll as f64,
                )
                .max(LIKELIHOOD_FLOOR);
                w *= gauss_pdf(
                    angle_diff(measured_pitch, particle.pose.pitch) as f64,
                    c.sigma_pitch as f64,
                )
                .max(LIKELIHOOD_FLOOR);

                if let Some(reference) = self.reference_ground_height {
                    let expected_z = ground_height(ground) - reference;
                    w *= gauss_pdf((particle.pose.z - expected_z) as f64, c.sigma_z as f64)
                        .max(LIKELIHOOD_FLOOR);
                }
            }
        }

        if self.flags.use_image_features {
            for feature in &obsv.surf_features {
                let projected = tf.transform(&feature.pos);
                let factor = match map.nearest_visual(&projected, VISUAL_SEARCH_DIST) {
                    Some(hit) => {
                        let dd = feature.descriptor_distance(hit);
                        if dd.is_finite() {
                            gauss_pdf(dd.sqrt() as f64, c.sigma_feature_matching as f64)
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                w *= factor.max(LIKELIHOOD_FLOOR);
            }
        }

        // Vegetation rows: associate each observed line with the stored
        // row nearest its intercept point, then weight by yaw
        // consistency.
        if self.flags.use_vegetation_lines && !map.vegetation_lines.is_empty() {
            for observed in &obsv.vegetation_lines {
                let anchor = tf.transform(&Point3::new(0.0, observed.b, 0.0));
                let stored = map.vegetation_lines.iter().min_by(|a, b| {
                    a.dist(&anchor)
                        .partial_cmp(&b.dist(&anchor))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                if let Some(stored) = stored {
                    let expected = particle.pose.yaw + observed.yaw();
                    let diff = angle_diff(stored.yaw(), expected);
                    w *= gauss_pdf(diff as f64, c.sigma_vegetation_lines_yaw as f64)
                        .max(LIKELIHOOD_FLOOR);
                }
            }
        }

        if self.flags.use_gps {
            if let Some(gps) = &obsv.gps {
                let dx = particle.pose.x - gps.x;
                let dy = particle.pose.y - gps.y;
                let dist = ((dx * dx + dy * dy) as f64).sqrt();
                w *= gauss_pdf(dist, c.sigma_gps as f64).max(LIKELIHOOD_FLOOR);
            }
        }

        w
    }

    /// Normalize weights to sum 1. A sum below epsilon reports a
    /// collapse and leaves the weights untouched.
    pub fn normalize(&mut self) -> Result<()> {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !sum.is_finite() || sum < COLLAPSE_EPSILON {
            return Err(SlamError::WeightCollapse(sum));
        }
        for p in &mut self.particles {
            p.weight /= sum;
        }
        Ok(())
    }

    /// Low-variance stochastic universal sampling. The unresampled set is
    /// preserved for diagnostics.
    pub fn resample(&mut self) {
        self.particles_before_resampling = self.particles.clone();

        let n = self.particles.len();
        if n == 0 {
            return;
        }

        let step = 1.0 / n as f64;
        let start = self.rng.random::<f64>() * step;

        let mut new_particles = Vec::with_capacity(n);
        let mut cumulative = self.particles[0].weight;
        let mut idx = 0usize;

        for k in 0..n {
            let u = start + k as f64 * step;
            while u > cumulative && idx < n - 1 {
                idx += 1;
                cumulative += self.particles[idx].weight;
            }
            let mut p = self.particles[idx];
            p.id = k as u32;
            p.weight = step;
            new_particles.push(p);
        }

        self.particles = new_particles;
    }

    /// Mean pose of the current particle set.
    pub fn mean_pose(&self) -> Pose6 {
        let poses: Vec<Pose6> = self.particles.iter().map(|p| p.pose).collect();
        Pose6::mean(&poses)
    }

    /// Standard deviation of particle xy positions around the mean.
    pub fn xy_stdev(&self) -> f32 {
        if self.particles.is_empty() {
            return 0.0;
        }
        let mean = self.mean_pose();
        let sum_sq: f32 = self
            .particles
            .iter()
            .map(|p| {
                let dx = p.pose.x - mean.x;
                let dy = p.pose.y - mean.y;
                dx * dx + dy * dy
            })
            .sum();
        (sum_sq / self.particles.len() as f32).sqrt()
    }
}

/// Robot height over a ground plane observed in robot frame.
fn ground_height(ground: &crate::features::SemiPlane) -> f32 {
    let c = ground.plane.c;
    if c.abs() < 1e-6 {
        return 0.0;
    }
    ground.plane.d / c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::core::types::Gaussian2;
    use crate::features::{LandmarkLabel, LandmarkObservation, MapFeature, SemanticFeature};

    fn filter_with(n: usize, pose: Pose6) -> ParticleFilter {
        let config = ParticleFilterConfig {
            number_particles: n,
            ..Default::default()
        };
        ParticleFilter::new(&config, &FlagsConfig::default(), 42, &pose)
    }

    fn map_with_landmark(x: f32, y: f32) -> OccupancyMap {
        let mut map = OccupancyMap::new(&MapConfig::default()).unwrap();
        let pos = Point3::new(x, y, 0.0);
        map.insert(MapFeature::Semantic(SemanticFeature::new(
            1,
            pos,
            Gaussian2::isotropic(pos, 0.2),
            LandmarkLabel::Trunk,
        )))
        .unwrap();
        map
    }

    #[test]
    fn test_initialization_centered() {
        let filter = filter_with(500, Pose6::new(1.0, 2.0, 0.0, 0.0, 0.0, 0.5));
        let mean = filter.mean_pose();
        assert!((mean.x - 1.0).abs() < 0.05);
        assert!((mean.y - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_single_particle_mean_valid() {
        let filter = filter_with(1, Pose6::new(3.0, -1.0, 0.2, 0.0, 0.0, 1.0));
        let mean = filter.mean_pose();
        assert!(mean.x.is_finite());
        assert!(mean.yaw.is_finite());
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let mut filter = filter_with(100, Pose6::identity());
        let map = map_with_landmark(5.0, 0.0);
        let obsv = Observation {
            landmarks: vec![LandmarkObservation {
                label: LandmarkLabel::Trunk,
                bearing: 0.0,
                depth: 5.0,
            }],
            ..Default::default()
        };

        filter.update(&obsv, &map);
        filter.normalize().unwrap();

        let sum: f64 = filter.particles().iter().map(|p| p.weight).sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum {}", sum);
        assert!(filter.particles().iter().all(|p| p.weight >= 0.0));
    }

    #[test]
    fn test_collapse_detected_when_all_observations_miss() {
        let mut filter = filter_with(100, Pose6::identity());
        // Empty map: every correspondence misses.
        let map = OccupancyMap::new(&MapConfig::default()).unwrap();
        let obsv = Observation {
            landmarks: vec![
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: 0.0,
                    depth: 5.0,
                },
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: 0.5,
                    depth: 4.0,
                },
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: -0.5,
                    depth: 6.0,
                },
            ],
            ..Default::default()
        };

        filter.update(&obsv, &map);
        let err = filter.normalize().unwrap_err();
        assert!(matches!(err, SlamError::WeightCollapse(_)));
    }

    #[test]
    fn test_empty_observation_keeps_uniform_weights() {
        let mut filter = filter_with(50, Pose6::identity());
        let map = OccupancyMap::new(&MapConfig::default()).unwrap();

        filter.update(&Observation::default(), &map);
        filter.normalize().unwrap();

        let expected = 1.0 / 50.0;
        for p in filter.particles() {
            assert!((p.weight - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_resample_preserves_diagnostics() {
        let mut filter = filter_with(100, Pose6::identity());
        let map = map_with_landmark(5.0, 0.0);
        let obsv = Observation {
            landmarks: vec![LandmarkObservation {
                label: LandmarkLabel::Trunk,
                bearing: 0.0,
                depth: 5.0,
            }],
            ..Default::default()
        };

        filter.update(&obsv, &map);
        filter.normalize().unwrap();
        filter.resample();

        assert_eq!(filter.particles_before_resampling().len(), 100);
        assert_eq!(filter.num_particles(), 100);

        // Post-resample weights are uniform.
        for p in filter.particles() {
            assert!((p.weight - 0.01).abs() < 1e-9);
        }
    }

    #[test]
    fn test_convergence_with_landmarks() {
        let config = ParticleFilterConfig {
            number_particles: 300,
            sigma_xy: 0.5,
            ..Default::default()
        };
        let mut filter =
            ParticleFilter::new(&config, &FlagsConfig::default(), 42, &Pose6::identity());

        let mut map = OccupancyMap::new(&MapConfig::default()).unwrap();
        for (x, y) in [(5.0, 0.0), (0.0, 5.0), (4.0, 4.0)] {
            let pos = Point3::new(x, y, 0.0);
            map.insert(MapFeature::Semantic(SemanticFeature::new(
                (x * 10.0 + y) as u32 + 1,
                pos,
                Gaussian2::isotropic(pos, 0.2),
                LandmarkLabel::Trunk,
            )))
            .unwrap();
        }

        let obsv = Observation {
            landmarks: vec![
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: 0.0,
                    depth: 5.0,
                },
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: std::f32::consts::FRAC_PI_2,
                    depth: 5.0,
                },
                LandmarkObservation {
                    label: LandmarkLabel::Trunk,
                    bearing: std::f32::consts::FRAC_PI_4,
                    depth: (32.0f32).sqrt(),
                },
            ],
            ..Default::default()
        };

        let initial_spread = filter.xy_stdev();
        for _ in 0..20 {
            filter.motion_model(&Pose6::identity());
            filter.update(&obsv, &map);
            filter.normalize().unwrap();
            filter.resample();
        }

        assert!(
            filter.xy_stdev() < initial_spread / 3.0,
            "spread {} vs initial {}",
            filter.xy_stdev(),
            initial_spread
        );
        let mean = filter.mean_pose();
        assert!(mean.x.abs() < 0.1, "mean x {}", mean.x);
        assert!(mean.y.abs() < 0.1, "mean y {}", mean.y);
    }
}
