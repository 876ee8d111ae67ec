//! BFS segmentation of non-ground range-image cells.
//!
//! Labels connected components by the surface angle between neighboring
//! returns; small fragments are marked invalid so corner extraction only
//! sees stable structure.

use std::collections::VecDeque;

use crate::config::LidarConfig;
use crate::features::PlanePoint;

use super::range_image::RangeImage;

/// Label assigned to rejected fragments.
pub const INVALID_SEGMENT: i32 = 999_999;

/// The segmented cloud in row-major order, with the per-row column spans
/// and flat range/column arrays used by the smoothness scorer.
#[derive(Debug, Default)]
pub struct SegmentedCloud {
    /// Segment members, ordered by row then column.
    pub points: Vec<PlanePoint>,
    /// Range-image column of each member.
    pub col_idx: Vec<usize>,
    /// Range of each member.
    pub ranges: Vec<f32>,
    /// Per-row span into the flat arrays, with ±5 smoothness margins.
    pub start_col: Vec<isize>,
    pub end_col: Vec<isize>,
}

impl SegmentedCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Segment the non-ground cells of a range image.
///
/// `ground_indexes` are (row, col) cells claimed by the ground plane;
/// they are excluded from segmentation.
pub fn segment(
    image: &RangeImage,
    ground_indexes: &[(usize, usize)],
    config: &LidarConfig,
) -> SegmentedCloud {
    let rows = config.vertical_scans;
    let cols = config.horizontal_scans;

    let mut labels = vec![0i32; rows * cols];
    for &(r, c) in ground_indexes {
        if r < rows && c < cols {
            labels[r * cols + c] = -1;
        }
    }

    let mut next_label = 1i32;
    for row in 0..rows {
        for col in 0..cols {
            if labels[row * cols + col] == 0 && image.is_valid(row, col) {
                label_component(image, &mut labels, row, col, &mut next_label, config);
            }
        }
    }

    collect(image, &labels, config)
}

/// Flood-fill one component starting at (row, col).
fn label_component(
    image: &RangeImage,
    labels: &mut [i32],
    row: usize,
    col: usize,
    next_label: &mut i32,
    config: &LidarConfig,
) {
    let rows = config.vertical_scans;
    let cols = config.horizontal_scans;
    let label = *next_label;

    const NEIGHBORS: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    let mut members: Vec<(usize, usize)> = Vec::new();
    let mut rows_touched = vec![false; rows];

    queue.push_back((row, col));
    members.push((row, col));
    labels[row * cols + col] = label;

    while let Some((r, c)) = queue.pop_front() {
        let d1 = image.range(r, c);

        for &(dr, dc) in &NEIGHBORS {
            let nr = r as isize + dr;
            if nr < 0 || nr >= rows as isize {
                continue;
            }
            // Columns wrap around the full revolution.
            let mut nc = c as isize + dc;
            if nc < 0 {
                nc = cols as isize - 1;
            }
            if nc >= cols as isize {
                nc = 0;
            }
            let (nr, nc) = (nr as usize, nc as usize);

            if labels[nr * cols + nc] != 0 {
                continue;
            }
            let d2 = image.range(nr, nc);
            if d2 < 0.0 {
                continue;
            }

            let dmax = d1.max(d2);
            let dmin = d1.min(d2);
            let alpha = if dr == 0 { config.ang_res_x } else { config.ang_res_y };

            let beta = (dmin * alpha.sin()).atan2(dmax - dmin * alpha.cos());
            if beta > config.planes_th {
                labels[nr * cols + nc] = label;
                rows_touched[nr] = true;
                queue.push_back((nr, nc));
                members.push((nr, nc));
            }
        }
    }

    let row_span = rows_touched.iter().filter(|&&t| t).count();
    let feasible = members.len() >= 30
        || (members.len() >= config.segment_valid_point_num
            && row_span >= config.segment_valid_line_num);

    if feasible {
        *next_label += 1;
    } else {
        for (r, c) in members {
            labels[r * cols + c] = INVALID_SEGMENT;
        }
    }
}

/// Gather valid segment members into the ordered output arrays.
fn collect(image: &RangeImage, labels: &[i32], config: &LidarConfig) -> SegmentedCloud {
    let rows = config.vertical_scans;
    let cols = config.horizontal_scans;
    let mut out = SegmentedCloud {
        start_col: vec![0; rows],
        end_col: vec![0; rows],
        ..Default::default()
    };

    let mut seg_size = 0isize;
    for row in 0..rows {
        out.start_col[row] = seg_size - 1 + 5;
        for col in 0..cols {
            let label = labels[row * cols + col];
            if label > 0 && label != INVALID_SEGMENT {
                out.points
                    .push(PlanePoint::new(*image.point(row, col), label as u32));
                out.col_idx.push(col);
                out.ranges.push(image.range(row, col));
                seg_size += 1;
            }
        }
        out.end_col[row] = seg_size - 1 - 5;
    }

    out
}
