//! Feature types stored in the multi-layer map.
//!
//! Features share only an id and a 3D position; each kind keeps its own
//! list per map cell and operations switch on [`MapFeature`].

mod lidar;
mod semantic;
mod visual;

pub use lidar::{
    Corner, Line2, Plane, PlanePoint, Planar, SemiPlane, convex_hull_xy,
};
pub use semantic::{LandmarkLabel, LandmarkObservation, SemanticFeature};
pub use visual::{DESCRIPTOR_LEN, ImageFeature};

use crate::core::types::Point3;

/// Tagged union over the four storable feature kinds.
#[derive(Debug, Clone)]
pub enum MapFeature {
    Semantic(SemanticFeature),
    Visual(ImageFeature),
    Corner(Corner),
    Planar(Planar),
}

impl MapFeature {
    /// Position of the feature, regardless of kind.
    pub fn position(&self) -> &Point3 {
        match self {
            MapFeature::Semantic(f) => &f.pos,
            MapFeature::Visual(f) => &f.pos,
            MapFeature::Corner(f) => &f.pos,
            MapFeature::Planar(f) => &f.pos,
        }
    }

    /// Feature id, regardless of kind.
    pub fn id(&self) -> u32 {
        match self {
            MapFeature::Semantic(f) => f.id,
            MapFeature::Visual(f) => f.id,
            MapFeature::Corner(f) => f.id,
            MapFeature::Planar(f) => f.id,
        }
    }
}
