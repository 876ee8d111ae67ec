//! Particle filter localization.

pub mod localizer;
pub mod motion_model;
pub mod particle_filter;

pub use localizer::Localizer;
pub use motion_model::MotionModel;
pub use particle_filter::{Particle, ParticleFilter};

use crate::core::types::Pose6;
use crate::features::{Corner, ImageFeature, LandmarkObservation, Line2, Planar, SemiPlane};

/// One frame's multi-sensor observation, all in robot frame.
#[derive(Debug, Default)]
pub struct Observation {
    /// Semantic landmark detections (bearing + depth).
    pub landmarks: Vec<LandmarkObservation>,
    /// LiDAR edge features.
    pub corners: Vec<Corner>,
    /// LiDAR surface features.
    pub planars: Vec<Planar>,
    /// Visual features with descriptors and 3D back-projections.
    pub surf_features: Vec<ImageFeature>,
    /// Fitted vegetation row lines.
    pub vegetation_lines: Vec<Line2>,
    /// Ground plane estimate.
    pub ground: Option<SemiPlane>,
    /// GNSS pose in the local Cartesian frame, when available.
    pub gps: Option<Pose6>,
}
