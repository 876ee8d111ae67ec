//! Two-side vegetation row extraction.
//!
//! The segmented cloud is split at the mean y into the left and right
//! vine rows; each side is RANSAC-filtered and fitted with a 2D line.

use rand::rngs::StdRng;

use crate::core::types::Point3;
use crate::features::{Line2, PlanePoint, SemiPlane};

use super::ransac;

/// Result of the two-side split: up to two bounded side planes and their
/// fitted row lines, ordered (side A: y < ȳ, side B: y ≥ ȳ).
#[derive(Debug, Default)]
pub struct VegetationRows {
    pub side_planes: Vec<SemiPlane>,
    pub lines: Vec<Line2>,
}

/// Split the segmented points at the mean y, filter each side with plane
/// RANSAC and fit the row lines. A side that fails to fit is skipped.
pub fn extract_rows(
    points: &[PlanePoint],
    ransac_iters: usize,
    ransac_threshold: f32,
    rng: &mut StdRng,
) -> VegetationRows {
    let mut rows = VegetationRows::default();
    if points.is_empty() {
        return rows;
    }

    let y_mean = points.iter().map(|p| p.pos.y).sum::<f32>() / points.len() as f32;

    let mut side_a: Vec<Point3> = Vec::new();
    let mut side_b: Vec<Point3> = Vec::new();
    for p in points {
        if p.pos.y < y_mean {
            side_a.push(p.pos);
        } else {
            side_b.push(p.pos);
        }
    }

    for side in [side_a, side_b] {
        match ransac::fit_plane(&side, ransac_iters, ransac_threshold, rng) {
            Ok(plane) => {
                let line = Line2::fit(&plane.points);
                rows.side_planes.push(SemiPlane::from_plane(plane));
                rows.lines.push(line);
            }
            Err(e) => {
                log::warn!("vegetation side fit skipped: {e}");
            }
        }
    }

    rows
}
