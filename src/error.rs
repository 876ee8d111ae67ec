//! Error types for the SLAM core.
//!
//! Every fallible operation returns `Result<T, SlamError>`. Recoverable
//! kinds are logged and counted by the estimator; `Config` and
//! `EstimatorFailed` are fatal.

use thiserror::Error;

/// SLAM core error type.
#[derive(Error, Debug)]
pub enum SlamError {
    /// A coordinate falls outside the occupancy map extents.
    #[error("position ({0:.2}, {1:.2}, {2:.2}) outside map extents")]
    OutOfBounds(f32, f32, f32),

    /// The LiDAR cloud has too few points to process.
    #[error("point cloud too small: {got} points, need at least {min}")]
    EmptyCloud { got: usize, min: usize },

    /// RANSAC could not draw a valid non-coincident sample set.
    #[error("ransac found no valid sample set ({0} points)")]
    RansacNoFit(usize),

    /// ICP produced an iteration with zero correspondences or zero inliers.
    #[error("icp degenerate: {0}")]
    IcpDegenerate(&'static str),

    /// ICP refinement diverged from the initial guess beyond the guard
    /// thresholds (0.3 m translation, 0.35 rad rotation per axis).
    #[error("icp produced a huge jump: ({dx:.3}, {dy:.3}, {dz:.3}) m, ({droll:.3}, {dpitch:.3}, {dyaw:.3}) rad")]
    IcpHugeJump {
        dx: f32,
        dy: f32,
        dz: f32,
        droll: f32,
        dpitch: f32,
        dyaw: f32,
    },

    /// Particle weight sum fell below epsilon during normalization.
    #[error("particle weight sum collapsed: {0:e}")]
    WeightCollapse(f64),

    /// A detection has no valid depth reading inside its bounding box.
    #[error("no valid depth inside detection box")]
    DepthInvalid,

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The estimator cannot recover (consecutive weight collapses).
    #[error("estimator failed: {0}")]
    EstimatorFailed(String),

    /// Map or frame-stream I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed persisted map or frame stream.
    #[error("format error: {0}")]
    Format(String),
}

impl From<serde_json::Error> for SlamError {
    fn from(e: serde_json::Error) -> Self {
        SlamError::Format(e.to_string())
    }
}

impl From<serde_yaml::Error> for SlamError {
    fn from(e: serde_yaml::Error) -> Self {
        SlamError::Config(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlamError>;
