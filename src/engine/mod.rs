//! Frame orchestration.

pub mod estimator;

pub use estimator::{CameraFrame, Estimator, FrameInput, FrameOutput};
