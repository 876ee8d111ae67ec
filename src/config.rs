//! Estimator configuration.
//!
//! One section per subsystem, loaded from YAML. Every field has a default
//! matching the reference sensor rig (16-ring LiDAR, stereo depth camera)
//! so partial files work; `validate()` runs once before the frame loop.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};

/// Full estimator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlamConfig {
    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub map: MapConfig,

    #[serde(default)]
    pub particle_filter: ParticleFilterConfig,

    #[serde(default)]
    pub lidar: LidarConfig,

    #[serde(default)]
    pub icp: IcpConfig,

    #[serde(default)]
    pub flags: FlagsConfig,

    /// Seed for RANSAC and particle noise. 0 selects a time-based seed.
    #[serde(default)]
    pub seed: u64,
}

impl SlamConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SlamError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    /// Parse from a YAML string and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlamConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter sanity; fatal before entering the frame loop.
    pub fn validate(&self) -> Result<()> {
        if self.camera.img_width == 0 || self.camera.img_height == 0 {
            return Err(SlamError::Config("camera image dimensions must be non-zero".into()));
        }
        if self.camera.fx <= 0.0 || self.camera.fy <= 0.0 {
            return Err(SlamError::Config("camera focal lengths must be positive".into()));
        }
        if self.camera.baseline <= 0.0 {
            return Err(SlamError::Config("camera baseline must be positive".into()));
        }
        if self.map.resolution <= 0.0 {
            return Err(SlamError::Config("map resolution must be positive".into()));
        }
        if self.map.width <= 0.0 || self.map.length <= 0.0 || self.map.height <= 0.0 {
            return Err(SlamError::Config("map extents must be positive".into()));
        }
        if self.particle_filter.number_particles == 0 {
            return Err(SlamError::Config("number_particles must be at least 1".into()));
        }
        if self.lidar.vertical_scans < 2 || self.lidar.horizontal_scans < 2 {
            return Err(SlamError::Config("lidar image dimensions too small".into()));
        }
        if self.lidar.ang_res_x <= 0.0 || self.lidar.ang_res_y <= 0.0 {
            return Err(SlamError::Config("lidar angular resolutions must be positive".into()));
        }
        if self.icp.max_iters == 0 {
            return Err(SlamError::Config("icp max_iters must be at least 1".into()));
        }
        Ok(())
    }
}

/// Stereo depth camera intrinsics and noise model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub img_width: u32,
    pub img_height: u32,
    /// Focal lengths in pixels.
    pub fx: f32,
    pub fy: f32,
    /// Principal point in pixels.
    pub cx: f32,
    pub cy: f32,
    /// Stereo baseline in meters.
    pub baseline: f32,
    /// Depth sensor fields of view in radians.
    pub depth_hfov: f32,
    pub depth_vfov: f32,
    /// Disparity noise multiplier for the depth stdev model
    /// sigma_d = depth² / (baseline · fx) · delta_d.
    pub delta_d: f32,
    /// Constant bearing stdev in radians.
    pub bearing_stdev: f32,
    /// Hessian response threshold for interest point detection.
    pub hessian_threshold: f32,
    /// Discard back-projected features beyond this range in meters.
    pub feature_max_range: f32,
    /// Discard back-projected features above this height in meters.
    pub feature_max_height: f32,
    /// Camera-to-base mounting pose (x, y, z, roll, pitch, yaw).
    pub cam_to_base: [f32; 6],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            img_width: 640,
            img_height: 480,
            fx: 615.0,
            fy: 615.0,
            cx: 320.0,
            cy: 240.0,
            baseline: 0.05,
            depth_hfov: 1.518,
            depth_vfov: 1.012,
            delta_d: 0.1,
            bearing_stdev: 0.035,
            hessian_threshold: 600.0,
            feature_max_range: 15.0,
            feature_max_height: 1.8,
            cam_to_base: [0.0; 6],
        }
    }
}

/// Occupancy map geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// World coordinates of the grid corner.
    pub origin_x: f32,
    pub origin_y: f32,
    pub origin_z: f32,
    /// Extents in meters along x, y and z.
    pub width: f32,
    pub length: f32,
    pub height: f32,
    /// Cell edge in meters.
    pub resolution: f32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            origin_x: -25.0,
            origin_y: -25.0,
            origin_z: -2.5,
            width: 50.0,
            length: 50.0,
            height: 5.0,
            resolution: 0.5,
        }
    }
}

/// Particle filter noise model and matching sigmas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    pub number_particles: usize,
    /// Translation noise from translation (m/m).
    pub srr: f32,
    /// Translation noise from rotation (m/rad).
    pub srt: f32,
    /// Rotation noise from translation (rad/m).
    pub str: f32,
    /// Rotation noise from rotation (rad/rad).
    pub stt: f32,
    /// Initial spread and fixed per-frame stdevs.
    pub sigma_xy: f32,
    pub sigma_z: f32,
    pub sigma_roll: f32,
    pub sigma_pitch: f32,
    pub sigma_yaw: f32,
    /// Matching sigmas per observation source.
    pub sigma_landmark_matching: f32,
    pub sigma_feature_matching: f32,
    pub sigma_corner_matching: f32,
    pub sigma_vegetation_lines_yaw: f32,
    pub sigma_gps: f32,
}

impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            number_particles: 500,
            srr: 0.1,
            srt: 0.02,
            str: 0.02,
            stt: 0.1,
            sigma_xy: 0.1,
            sigma_z: 0.02,
            sigma_roll: 0.01,
            sigma_pitch: 0.01,
            sigma_yaw: 0.05,
            sigma_landmark_matching: 0.2,
            sigma_feature_matching: 0.1,
            sigma_corner_matching: 0.1,
            sigma_vegetation_lines_yaw: 0.1,
            sigma_gps: 0.5,
        }
    }
}

/// Spinning LiDAR geometry and feature extraction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarConfig {
    /// Number of rings (range image rows).
    pub vertical_scans: usize,
    /// Azimuth bins per revolution (range image columns).
    pub horizontal_scans: usize,
    /// Horizontal angular resolution in radians.
    pub ang_res_x: f32,
    /// Vertical angular resolution in radians.
    pub ang_res_y: f32,
    /// Angle of the lowest ring below horizontal, in radians.
    pub vertical_angle_bottom: f32,
    /// Maximum inter-ring angle for ground candidates, in radians.
    pub ground_th: f32,
    /// Minimum BFS surface angle for segment membership, in radians.
    pub planes_th: f32,
    /// Smoothness threshold separating edges from surfaces.
    pub edge_threshold: f32,
    /// Maximum corners picked per sub-region.
    pub picked_num: usize,
    /// Segment validity: minimum points when spanning several rings.
    pub segment_valid_point_num: usize,
    /// Segment validity: minimum ring span for small segments.
    pub segment_valid_line_num: usize,
    /// Range gate in meters.
    pub min_range: f32,
    pub max_range: f32,
    /// Minimum cloud size to run the extractor at all.
    pub min_cloud_size: usize,
    /// Sensor-to-base mounting pose (x, y, z, roll, pitch, yaw).
    pub sensor_to_base: [f32; 6],
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            vertical_scans: 16,
            horizontal_scans: 1800,
            ang_res_x: 0.2_f32.to_radians(),
            ang_res_y: 2.0_f32.to_radians(),
            vertical_angle_bottom: 15.1_f32.to_radians(),
            ground_th: 10.0_f32.to_radians(),
            planes_th: 60.0_f32.to_radians(),
            edge_threshold: 0.1,
            picked_num: 20,
            segment_valid_point_num: 5,
            segment_valid_line_num: 3,
            min_range: 1.0,
            max_range: 50.0,
            min_cloud_size: 50,
            sensor_to_base: [0.0; 6],
        }
    }
}

/// ICP stop criteria and outlier policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    pub max_iters: u32,
    /// Convergence tolerance on the RMS error delta.
    pub tolerance: f32,
    /// Correspondence rejection distance in meters.
    pub distance_threshold: f32,
    pub reject_outliers: bool,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iters: 200,
            tolerance: 1e-4,
            distance_threshold: 0.5,
            reject_outliers: true,
        }
    }
}

/// Observation source toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagsConfig {
    pub use_gps: bool,
    pub use_landmarks: bool,
    pub use_corners: bool,
    pub use_icp: bool,
    pub use_vegetation_lines: bool,
    pub use_ground_plane: bool,
    pub use_image_features: bool,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            use_gps: false,
            use_landmarks: true,
            use_corners: true,
            use_icp: true,
            use_vegetation_lines: true,
            use_ground_plane: true,
            use_image_features: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SlamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = SlamConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = SlamConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.map.resolution, config.map.resolution);
        assert_eq!(parsed.particle_filter.number_particles, 500);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = SlamConfig::from_yaml("map:\n  resolution: 0.5\n").unwrap();
        assert_eq!(config.map.resolution, 0.5);
        assert_eq!(config.lidar.vertical_scans, 16);
        assert!(config.flags.use_corners);
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        let err = SlamConfig::from_yaml("map:\n  resolution: 0.0\n").unwrap_err();
        assert!(matches!(err, SlamError::Config(_)));
    }

    #[test]
    fn test_invalid_particle_count_rejected() {
        let err = SlamConfig::from_yaml("particle_filter:\n  number_particles: 0\n").unwrap_err();
        assert!(matches!(err, SlamError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = SlamConfig::from_yaml("map: [not a mapping").unwrap_err();
        assert!(matches!(err, SlamError::Config(_)));
    }
}
