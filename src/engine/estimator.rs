//! Per-frame estimation pipeline.
//!
//! One `process` call per tick of synchronized inputs: extract features,
//! refine the odometry increment with ICP against the previous map
//! snapshot, localize with the particle filter against the current map,
//! then merge the observation into the map at the estimated pose.
//! Readers of the map only ever see frame-boundary snapshots because all
//! mutation happens inside this call.

use crate::config::SlamConfig;
use crate::core::types::{Point3, Pose6};
use crate::error::{Result, SlamError};
use crate::extraction::{
    Detection, DepthImage, GrayImage, LidarExtractor, RgbImage, VisualExtractor,
};
use crate::localization::{Localizer, Observation, Particle};
use crate::mapping::{LandmarkBank, MapperStats, MultiLayerMapper, OccupancyMap, persistence};

/// Consecutive weight collapses tolerated before the estimator gives up.
const MAX_COLLAPSE_STRIKES: u32 = 3;

/// The camera inputs of one frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame<'a> {
    pub gray: GrayImage<'a>,
    pub rgb: Option<RgbImage<'a>>,
    pub depth: DepthImage<'a>,
}

/// One tick of synchronized sensor inputs. Any subset may be absent.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Frame timestamp in seconds.
    pub timestamp: f64,
    /// Wheel odometry pose in its fixed parent frame.
    pub odometry: Pose6,
    /// LiDAR cloud in sensor frame.
    pub cloud: Option<&'a [Point3]>,
    /// Left image + aligned depth.
    pub camera: Option<CameraFrame<'a>>,
    /// Object detections on the left image.
    pub detections: &'a [Detection],
    /// GNSS pose in the local Cartesian frame.
    pub gnss: Option<Pose6>,
}

impl<'a> FrameInput<'a> {
    /// A frame carrying only odometry.
    pub fn odometry_only(timestamp: f64, odometry: Pose6) -> Self {
        Self {
            timestamp,
            odometry,
            cloud: None,
            camera: None,
            detections: &[],
            gnss: None,
        }
    }
}

/// Per-frame estimator output.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Robot pose in map frame.
    pub pose: Pose6,
    /// Post-resample particle set.
    pub particles: Vec<Particle>,
    /// Pre-resample particle set, for diagnostics.
    pub particles_before_resampling: Vec<Particle>,
    /// Particle filter wall time, milliseconds.
    pub pf_time_ms: f32,
    /// Whether ICP refined the odometry increment this frame.
    pub icp_refined: bool,
    /// Whether this frame's weight update collapsed (pose preserved).
    pub weight_collapsed: bool,
    /// Mapper counters.
    pub mapper_stats: MapperStats,
}

/// The online estimator.
pub struct Estimator {
    config: SlamConfig,
    lidar: LidarExtractor,
    visual: VisualExtractor,
    localizer: Localizer,
    mapper: MultiLayerMapper,
    map: OccupancyMap,
    /// Frame-boundary snapshot serving as the ICP target.
    previous_map: OccupancyMap,
    initialized: bool,
    collapse_strikes: u32,
    frames: u64,
}

impl Estimator {
    /// Build the estimator. Fails fast on configuration errors.
    pub fn new(config: &SlamConfig) -> Result<Self> {
        config.validate()?;
        let map = OccupancyMap::new(&config.map)?;

        Ok(Self {
            config: config.clone(),
            lidar: LidarExtractor::new(&config.lidar, config.seed),
            visual: VisualExtractor::new(&config.camera),
            localizer: Localizer::new(config),
            mapper: MultiLayerMapper::new(&config.camera),
            previous_map: map.clone(),
            map,
            initialized: false,
            collapse_strikes: 0,
            frames: 0,
        })
    }

    /// The current multi-layer map.
    pub fn map(&self) -> &OccupancyMap {
        &self.map
    }

    /// The landmark filter bank.
    pub fn bank(&self) -> &LandmarkBank {
        self.mapper.bank()
    }

    /// Latest pose estimate.
    pub fn pose(&self) -> Pose6 {
        self.localizer.pose()
    }

    /// Persist the map.
    pub fn save_map<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        persistence::save(&self.map, path)
    }

    /// Replace the map with a persisted one (relocalization runs).
    pub fn load_map<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        self.map = persistence::load(path)?;
        self.previous_map = self.map.clone();
        Ok(())
    }

    /// Process one frame.
    pub fn process(&mut self, frame: &FrameInput) -> Result<FrameOutput> {
        self.frames += 1;
        let obsv = self.gather_observation(frame);

        // First frame: cache odometry, seed the map at the origin, skip
        // the filter cycle.
        if !self.initialized {
            self.localizer.init(&Pose6::identity(), &frame.odometry);
            let stats = self.mapper.update(&Pose6::identity(), &obsv, &mut self.map);
            self.previous_map = self.map.clone();
            self.initialized = true;

            log::info!(
                "frame {} t={:.3}: initialized at origin, {} landmarks seeded",
                self.frames,
                frame.timestamp,
                stats.new_landmarks
            );
            return Ok(self.output(stats, false));
        }

        match self
            .localizer
            .process(&frame.odometry, &obsv, &self.previous_map, &self.map)
        {
            Ok(()) => {
                self.collapse_strikes = 0;
                let pose = self.localizer.pose();
                let stats = self.mapper.update(&pose, &obsv, &mut self.map);
                self.previous_map = self.map.clone();

                log::info!(
                    "frame {} t={:.3}: pose ({:.3}, {:.3}, {:.3} | {:.3}) pf {:.1} ms",
                    self.frames,
                    frame.timestamp,
                    pose.x,
                    pose.y,
                    pose.z,
                    pose.yaw,
                    self.localizer.last_pf_time_ms
                );
                Ok(self.output(stats, false))
            }
            Err(SlamError::WeightCollapse(sum)) => {
                self.collapse_strikes += 1;
                log::warn!(
                    "frame {} t={:.3}: weight collapse ({sum:e}), strike {}/{}",
                    self.frames,
                    frame.timestamp,
                    self.collapse_strikes,
                    MAX_COLLAPSE_STRIKES
                );

                if self.collapse_strikes >= MAX_COLLAPSE_STRIKES {
                    return Err(SlamError::EstimatorFailed(format!(
                        "{MAX_COLLAPSE_STRIKES} consecutive weight collapses"
                    )));
                }
                // Pose preserved; the map is left untouched this frame.
                Ok(self.output(MapperStats::default(), true))
            }
            Err(e) => Err(e),
        }
    }

    /// Run the enabled extractors over the frame inputs.
    fn gather_observation(&mut self, frame: &FrameInput) -> Observation {
        let flags = &self.config.flags;
        let mut obsv = Observation::default();

        if let Some(cloud) = frame.cloud {
            match self.lidar.process(cloud) {
                Ok(lidar_frame) => {
                    if flags.use_corners {
                        obsv.corners = lidar_frame.corners;
                    }
                    // Planars feed both the weight update and the ICP prior.
                    if flags.use_corners || flags.use_icp {
                        obsv.planars = lidar_frame.planars;
                    }
                    if flags.use_ground_plane {
                        obsv.ground = lidar_frame.ground;
                    }
                    if flags.use_vegetation_lines {
                        obsv.vegetation_lines = lidar_frame.vegetation_lines;
                    }
                }
                Err(e) => {
                    log::warn!("lidar stage skipped: {e}");
                }
            }
        }

        if let Some(camera) = &frame.camera {
            if flags.use_landmarks && !frame.detections.is_empty() {
                let (landmarks, dropped) =
                    self.visual.observations(&camera.depth, frame.detections);
                if dropped > 0 {
                    log::debug!("{dropped} detections without valid depth");
                }
                obsv.landmarks = landmarks;
            }
            if flags.use_image_features {
                obsv.surf_features =
                    self.visual
                        .extract_features(&camera.gray, camera.rgb.as_ref(), &camera.depth);
            }
        }

        if flags.use_gps {
            obsv.gps = frame.gnss;
        }

        obsv
    }

    fn output(&self, mapper_stats: MapperStats, weight_collapsed: bool) -> FrameOutput {
        FrameOutput {
            pose: self.localizer.pose(),
            particles: self.localizer.particles().to_vec(),
            particles_before_resampling: self.localizer.particles_before_resampling().to_vec(),
            pf_time_ms: self.localizer.last_pf_time_ms,
            icp_refined: self.localizer.last_icp_refined,
            weight_collapsed,
            mapper_stats,
        }
    }
}
