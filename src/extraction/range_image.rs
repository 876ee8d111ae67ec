//! Virtual range-image projection of a spinning LiDAR cloud.

use crate::config::LidarConfig;
use crate::core::types::Point3;

/// A V×H range image. Each cell stores the range (-1 when empty) and the
/// original point. Scratch state is rebuilt per frame.
#[derive(Debug)]
pub struct RangeImage {
    pub rows: usize,
    pub cols: usize,
    ranges: Vec<f32>,
    points: Vec<Point3>,
}

impl RangeImage {
    /// Project a point cloud in sensor frame onto the virtual image.
    ///
    /// Points with range outside [min_range, max_range] or falling outside
    /// the image bounds are dropped. The range gate keeps both endpoints,
    /// so a return at exactly `min_range` survives.
    pub fn project(cloud: &[Point3], config: &LidarConfig) -> Self {
        let rows = config.vertical_scans;
        let cols = config.horizontal_scans;
        let mut image = Self {
            rows,
            cols,
            ranges: vec![-1.0; rows * cols],
            points: vec![Point3::default(); rows * cols],
        };

        for pt in cloud {
            let range = pt.norm();
            if range < config.min_range || range > config.max_range {
                continue;
            }

            let vertical_angle = pt.z.atan2((pt.x * pt.x + pt.y * pt.y).sqrt());
            let row = ((vertical_angle + config.vertical_angle_bottom) / config.ang_res_y).floor();
            if row < 0.0 || row >= rows as f32 {
                continue;
            }

            let horizon_angle = pt.x.atan2(pt.y);
            let mut col = (-((horizon_angle - std::f32::consts::FRAC_PI_2) / config.ang_res_x)
                .round()
                + cols as f32 / 2.0) as isize;
            if col >= cols as isize {
                col -= cols as isize;
            }
            if col < 0 || col >= cols as isize {
                continue;
            }

            let idx = row as usize * cols + col as usize;
            image.ranges[idx] = range;
            image.points[idx] = *pt;
        }

        image
    }

    /// Range at a cell, -1 when empty.
    #[inline]
    pub fn range(&self, row: usize, col: usize) -> f32 {
        self.ranges[row * self.cols + col]
    }

    /// Whether the cell holds a return.
    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.range(row, col) >= 0.0
    }

    /// The original point stored at a cell.
    #[inline]
    pub fn point(&self, row: usize, col: usize) -> &Point3 {
        &self.points[row * self.cols + col]
    }

    /// Number of cells holding a return.
    pub fn valid_count(&self) -> usize {
        self.ranges.iter().filter(|&&r| r >= 0.0).count()
    }
}
