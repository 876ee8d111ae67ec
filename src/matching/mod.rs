//! Scan matching: point-to-point ICP over pluggable NN sources.

pub mod icp;
pub mod nn;

pub use icp::{Icp, IcpResult};
pub use nn::{NearestSource, PointSet};
