//! Semantic landmark features located by the object detector.

use serde::{Deserialize, Serialize};

use crate::core::types::{Gaussian2, Point3};

/// Detector class for a semantic landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkLabel {
    /// Vine trunk. A static landmark.
    Trunk,
    /// Leaf canopy. A dynamic landmark.
    Leaf,
}

impl LandmarkLabel {
    /// Map a detector class id to a label. Unknown ids default to trunk.
    pub fn from_id(id: i32) -> Self {
        match id {
            1 => LandmarkLabel::Leaf,
            _ => LandmarkLabel::Trunk,
        }
    }

    /// Whether the landmark can move between observations.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, LandmarkLabel::Leaf)
    }
}

/// A semantic landmark in map frame with its xy uncertainty ellipse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticFeature {
    pub id: u32,
    pub pos: Point3,
    pub gauss: Gaussian2,
    pub label: LandmarkLabel,
    pub n_observations: u32,
}

impl SemanticFeature {
    pub fn new(id: u32, pos: Point3, gauss: Gaussian2, label: LandmarkLabel) -> Self {
        Self {
            id,
            pos,
            gauss,
            label,
            n_observations: 1,
        }
    }
}

/// A single range-bearing landmark observation in robot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkObservation {
    pub label: LandmarkLabel,
    /// Bearing in radians, positive to the left.
    pub bearing: f32,
    /// Range in meters.
    pub depth: f32,
}
