//! Nearest-neighbor sources for the ICP matcher.
//!
//! The matcher is parameterized over a source so it can target either the
//! live occupancy map's planar layer or a frozen point set held in a k-d
//! tree.

use kiddo::float::kdtree::KdTree;
use kiddo::SquaredEuclidean;

use crate::core::types::Point3;
use crate::mapping::OccupancyMap;

/// Anything that can answer "closest point to `query` within `max_dist`".
pub trait NearestSource {
    /// Returns the nearest point and its distance, or `None` when nothing
    /// lies within `max_dist`.
    fn nearest(&self, query: &Point3, max_dist: f32) -> Option<(Point3, f32)>;
}

/// The live map's planar layer as an ICP target.
impl NearestSource for OccupancyMap {
    fn nearest(&self, query: &Point3, max_dist: f32) -> Option<(Point3, f32)> {
        self.nearest_planar(query, max_dist)
            .map(|planar| (planar.pos, query.distance(&planar.pos)))
    }
}

/// A frozen point set indexed by a k-d tree.
pub struct PointSet {
    tree: KdTree<f32, u64, 3, 256, u32>,
    points: Vec<Point3>,
}

impl PointSet {
    /// Build the index over a point list.
    pub fn from_points(points: Vec<Point3>) -> Self {
        let mut tree: KdTree<f32, u64, 3, 256, u32> = KdTree::new();
        for (i, p) in points.iter().enumerate() {
            tree.add(&[p.x, p.y, p.z], i as u64);
        }
        Self { tree, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl NearestSource for PointSet {
    fn nearest(&self, query: &Point3, max_dist: f32) -> Option<(Point3, f32)> {
        if self.points.is_empty() {
            return None;
        }
        let nearest = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        let dist = nearest.distance.sqrt();
        (dist <= max_dist).then(|| (self.points[nearest.item as usize], dist))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::features::{MapFeature, Planar};
    use approx::assert_relative_eq;

    #[test]
    fn test_point_set_nearest() {
        let set = PointSet::from_points(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(5.0, 5.0, 0.0),
        ]);

        let (p, d) = set.nearest(&Point3::new(1.1, 0.0, 0.0), 1.0).unwrap();
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(d, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_point_set_respects_max_dist() {
        let set = PointSet::from_points(vec![Point3::new(10.0, 0.0, 0.0)]);
        assert!(set.nearest(&Point3::new(0.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn test_empty_point_set() {
        let set = PointSet::from_points(Vec::new());
        assert!(set.nearest(&Point3::new(0.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn test_map_as_source_uses_planar_layer() {
        let config = MapConfig::default();
        let mut map = OccupancyMap::new(&config).unwrap();
        map.insert(MapFeature::Planar(Planar::new(Point3::new(2.0, 1.0, 0.0), 0)))
            .unwrap();

        let (p, d) = map.nearest(&Point3::new(2.05, 1.0, 0.0), 0.5).unwrap();
        assert_relative_eq!(p.x, 2.0);
        assert!(d < 0.1);
    }
}
