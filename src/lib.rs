//! Multi-layer SLAM for agricultural robots.
//!
//! An online estimator fusing wheel odometry, a 3D LiDAR point cloud, a
//! stereo depth camera with object detections (vine trunks) and optional
//! GNSS into a 6-DOF pose and a persistent multi-layer map.
//!
//! # Architecture
//!
//! The crate is organized into layers, foundation first:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │           (per-frame estimation pipeline)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │        localization/          matching/             │  ← Estimation
//! │   (particle filter, ICP refinement, SVD align)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │        mapping/               extraction/           │  ← Map & frontends
//! │  (voxel grid, EKF bank,   (range image, ground,     │
//! │   mapper, persistence)     corners, visual)         │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │          core/        features/       config/       │  ← Foundation
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Per-frame pipeline
//!
//! 1. LiDAR extractor: range image → ground plane → segmentation →
//!    vegetation rows → corner/planar features.
//! 2. Visual extractor: detections → (label, bearing, depth); interest
//!    points → descriptors → 3D back-projection.
//! 3. ICP against the previous map snapshot refines the odometry
//!    increment.
//! 4. Particle filter: motion model → multi-source weighting →
//!    normalization → SUS resampling.
//! 5. Multi-layer mapper merges the observation into the voxel grid and
//!    updates the per-landmark Kalman filters.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod features;
pub mod localization;
pub mod mapping;
pub mod matching;

pub use crate::config::SlamConfig;
pub use crate::core::types::{Gaussian2, Point3, Pose6, Transform3};
pub use crate::engine::{CameraFrame, Estimator, FrameInput, FrameOutput};
pub use crate::error::{Result, SlamError};
pub use crate::extraction::{
    Detection, DepthImage, GrayImage, LidarExtractor, RgbImage, VisualExtractor,
};
pub use crate::localization::{Localizer, Observation, Particle, ParticleFilter};
pub use crate::mapping::{LandmarkBank, MultiLayerMapper, OccupancyMap};
pub use crate::matching::{Icp, IcpResult, NearestSource, PointSet};
