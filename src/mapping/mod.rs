//! Multi-layer mapping: the voxel grid, the per-landmark filter bank,
//! correspondence-aware updates and persistence.

pub mod landmark_filter;
pub mod mapper;
pub mod occupancy;
pub mod persistence;

pub use landmark_filter::{LandmarkBank, LandmarkFilter, ObservationNoise};
pub use mapper::{MapperStats, MultiLayerMapper};
pub use occupancy::{Cell, OccupancyMap};
