//! Corner and planar picking by range smoothness.
//!
//! Each row of the segmented cloud is split into 6 sub-regions. Within a
//! sub-region, cells are ranked by the squared 11-point range residual;
//! the roughest cells above the edge threshold become corners, the
//! smoothest cells below it become planars. Picked cells suppress their
//! ±5 column neighbors unless a column discontinuity (gap > 10) breaks
//! the run.

use crate::config::LidarConfig;
use crate::features::{Corner, Planar};

use super::segmentation::SegmentedCloud;

#[derive(Debug, Clone, Copy)]
struct Smoothness {
    value: f32,
    idx: usize,
}

/// Extract corner and planar features from a segmented cloud.
pub fn extract_features(seg: &SegmentedCloud, config: &LidarConfig) -> (Vec<Corner>, Vec<Planar>) {
    let n = seg.len();
    if n < 11 {
        return (Vec::new(), Vec::new());
    }

    // Squared smoothness s(i) = (Σ r(i±1..5) − 10·r(i))².
    let mut smoothness = vec![Smoothness { value: 0.0, idx: 0 }; n];
    let mut picked = vec![false; n];
    for i in 5..n - 5 {
        let r = &seg.ranges;
        let diff = r[i - 5] + r[i - 4] + r[i - 3] + r[i - 2] + r[i - 1] + r[i + 1]
            + r[i + 2]
            + r[i + 3]
            + r[i + 4]
            + r[i + 5]
            - 10.0 * r[i];
        smoothness[i] = Smoothness {
            value: diff * diff,
            idx: i,
        };
    }

    let mut corners = Vec::new();
    let mut planars = Vec::new();

    for row in 0..config.vertical_scans {
        let start = seg.start_col[row];
        let end = seg.end_col[row];

        for k in 0..6isize {
            let sp = ((start * (6 - k) + end * k) / 6).max(5);
            let ep = ((start * (5 - k) + end * (k + 1)) / 6 - 1).min(n as isize - 6);
            if sp >= ep {
                continue;
            }
            let (sp, ep) = (sp as usize, ep as usize);

            smoothness[sp..=ep].sort_by(|a, b| {
                a.value
                    .partial_cmp(&b.value)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            // Edge features from the rough end.
            let mut picked_counter = 0;
            for l in (sp..=ep).rev() {
                let idx = smoothness[l].idx;
                if !picked[idx] && smoothness[l].value > config.edge_threshold {
                    picked_counter += 1;
                    if picked_counter > config.picked_num {
                        break;
                    }
                    corners.push(Corner::new(
                        seg.points[idx].pos,
                        seg.points[idx].which_plane,
                    ));
                    suppress_neighbors(&mut picked, seg, idx);
                }
            }

            // Surface features from the smooth end.
            let mut picked_counter = 0;
            for item in smoothness.iter().take(ep + 1).skip(sp) {
                let idx = item.idx;
                if !picked[idx] && item.value < config.edge_threshold {
                    picked_counter += 1;
                    if picked_counter > config.picked_num {
                        break;
                    }
                    planars.push(Planar::new(
                        seg.points[idx].pos,
                        seg.points[idx].which_plane,
                    ));
                    suppress_neighbors(&mut picked, seg, idx);
                }
            }
        }
    }

    (corners, planars)
}

/// Mark a picked cell and its ±5 neighbors, stopping a run early at a
/// column discontinuity (gap > 10 columns).
fn suppress_neighbors(picked: &mut [bool], seg: &SegmentedCloud, idx: usize) {
    picked[idx] = true;

    for m in 1..=5isize {
        let i = idx as isize + m;
        if i >= seg.col_idx.len() as isize {
            break;
        }
        let gap =
            (seg.col_idx[i as usize] as isize - seg.col_idx[(i - 1) as usize] as isize).abs();
        if gap > 10 {
            break;
        }
        picked[i as usize] = true;
    }
    for m in 1..=5isize {
        let i = idx as isize - m;
        if i < 0 {
            break;
        }
        let gap =
            (seg.col_idx[i as usize] as isize - seg.col_idx[(i + 1) as usize] as isize).abs();
        if gap > 10 {
            break;
        }
        picked[i as usize] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point3;
    use crate::features::PlanePoint;

    /// A single synthetic row: a smooth wall with a closer pole in the
    /// middle producing two sharp range discontinuities.
    fn synthetic_row(n: usize, pole: std::ops::Range<usize>) -> SegmentedCloud {
        let mut seg = SegmentedCloud {
            start_col: vec![0; 16],
            end_col: vec![0; 16],
            ..Default::default()
        };

        for i in 0..n {
            let range = if pole.contains(&i) { 8.0 } else { 10.0 };
            seg.points.push(PlanePoint::new(
                Point3::new(range, i as f32 * 0.01, 0.0),
                1,
            ));
            seg.col_idx.push(i);
            seg.ranges.push(range);
        }

        seg.start_col[0] = 4;
        seg.end_col[0] = n as isize - 6;
        for row in 1..16 {
            seg.start_col[row] = n as isize - 1 + 5;
            seg.end_col[row] = n as isize - 1 - 5;
        }
        seg
    }

    #[test]
    fn test_corners_found_at_discontinuity() {
        let config = LidarConfig::default();
        let seg = synthetic_row(120, 58..63);
        let (corners, _) = extract_features(&seg, &config);

        assert!(!corners.is_empty());
        // Every corner sits near the pole boundary (range transition zone).
        for c in &corners {
            let col = (c.pos.y / 0.01).round() as isize;
            assert!(
                (52..=68).contains(&col),
                "corner at col {} far from discontinuity",
                col
            );
        }
    }

    #[test]
    fn test_planars_found_on_smooth_wall() {
        let config = LidarConfig::default();
        let seg = synthetic_row(120, 58..63);
        let (_, planars) = extract_features(&seg, &config);

        assert!(!planars.is_empty());
        // Planars come from the smooth wall, away from the pole edges.
        for p in &planars {
            assert!(p.pos.x == 10.0 || p.pos.x == 8.0);
        }
    }

    #[test]
    fn test_corner_spacing_invariant() {
        let config = LidarConfig::default();
        let seg = synthetic_row(200, 95..105);
        let (corners, _) = extract_features(&seg, &config);

        let cols: Vec<isize> = corners
            .iter()
            .map(|c| (c.pos.y / 0.01).round() as isize)
            .collect();
        for (i, &a) in cols.iter().enumerate() {
            for &b in cols.iter().skip(i + 1) {
                let gap = (a - b).abs();
                assert!(gap >= 2 || gap > 10, "corners too close: {} and {}", a, b);
            }
        }
    }

    #[test]
    fn test_tiny_cloud_yields_nothing() {
        let config = LidarConfig::default();
        let seg = synthetic_row(8, 0..0);
        let (corners, planars) = extract_features(&seg, &config);
        assert!(corners.is_empty());
        assert!(planars.is_empty());
    }

    #[test]
    fn test_positions_carried_from_points() {
        let config = LidarConfig::default();
        let seg = synthetic_row(120, 58..63);
        let (corners, planars) = extract_features(&seg, &config);

        for c in &corners {
            assert!(seg.points.iter().any(|p| p.pos == c.pos));
        }
        for p in &planars {
            assert!(seg.points.iter().any(|q| q.pos == p.pos));
        }
    }
}
