//! Sensor frontends: LiDAR feature extraction and the visual pipeline.

pub mod corners;
pub mod ground;
pub mod lidar;
pub mod range_image;
pub mod ransac;
pub mod segmentation;
pub mod vegetation;
pub mod visual;

pub use lidar::{LidarExtractor, LidarFrame};
pub use range_image::RangeImage;
pub use segmentation::SegmentedCloud;
pub use visual::{Detection, DepthImage, GrayImage, RgbImage, VisualExtractor};
