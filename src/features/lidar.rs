//! LiDAR-derived features: corners, planars, planes and fitted lines.

use serde::{Deserialize, Serialize};

use crate::core::types::Point3;

/// An edge-like LiDAR point (locally high range smoothness).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corner {
    pub id: u32,
    pub pos: Point3,
    /// Segment label the corner was extracted from.
    pub which_plane: u32,
    /// Cluster id, when cluster assignment has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub which_cluster: Option<u32>,
    pub n_observations: u32,
    /// Map position this corner matched during the last update. Debug only.
    #[serde(skip)]
    pub correspondence: Option<Point3>,
}

impl Corner {
    pub fn new(pos: Point3, which_plane: u32) -> Self {
        Self {
            id: 0,
            pos,
            which_plane,
            which_cluster: None,
            n_observations: 0,
            correspondence: None,
        }
    }
}

/// A surface-like LiDAR point (locally low range smoothness).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Planar {
    pub id: u32,
    pub pos: Point3,
    pub which_plane: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub which_cluster: Option<u32>,
    pub n_observations: u32,
}

impl Planar {
    pub fn new(pos: Point3, which_plane: u32) -> Self {
        Self {
            id: 0,
            pos,
            which_plane,
            which_cluster: None,
            n_observations: 0,
        }
    }
}

/// A segmented cloud point prior to corner/planar extraction.
#[derive(Debug, Clone, Copy)]
pub struct PlanePoint {
    pub pos: Point3,
    /// BFS segment label.
    pub which_plane: u32,
}

impl PlanePoint {
    pub fn new(pos: Point3, which_plane: u32) -> Self {
        Self { pos, which_plane }
    }
}

/// A plane in hessian form a·x + b·y + c·z + d = 0 with its inlier set.
///
/// After fitting, (a, b, c) equals the unit normal and `normal.z >= 0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plane {
    pub id: u32,
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    /// Inlier points.
    pub points: Vec<Point3>,
    /// (row, col) range-image indices of the inliers, when projected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<(usize, usize)>,
    /// Unit normal, flipped so z >= 0.
    pub normal: [f32; 3],
}

impl Plane {
    /// Unsigned distance from a point to the plane.
    ///
    /// Assumes normalized hessian coefficients.
    pub fn point_distance(&self, p: &Point3) -> f32 {
        (self.a * p.x + self.b * p.y + self.c * p.z + self.d).abs()
    }

    /// Scale the hessian so that a² + b² + c² = 1.
    pub fn normalize(&mut self) {
        let norm = (self.a * self.a + self.b * self.b + self.c * self.c).sqrt();
        if norm > 1e-12 {
            self.a /= norm;
            self.b /= norm;
            self.c /= norm;
            self.d /= norm;
        }
    }
}

/// A plane bounded by the convex hull of its inliers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemiPlane {
    pub plane: Plane,
    /// Convex hull polygon on the xy plane, counter-clockwise.
    pub hull: Vec<Point3>,
}

impl SemiPlane {
    /// Bound a plane by the convex hull of its inlier points.
    pub fn from_plane(plane: Plane) -> Self {
        let hull = convex_hull_xy(&plane.points);
        Self { plane, hull }
    }

    /// Carry the bounded plane through a rigid transform: points and hull
    /// pointwise, the normal by rotation (kept pointing up), and d
    /// recomputed through a transformed support point.
    pub fn transformed(&self, tf: &crate::core::types::Transform3) -> SemiPlane {
        let mut out = self.clone();
        for p in &mut out.plane.points {
            *p = tf.transform(p);
        }
        for p in &mut out.hull {
            *p = tf.transform(p);
        }

        let mut normal = tf.rotate(&self.plane.normal);
        if normal[2] < 0.0 {
            normal = [-normal[0], -normal[1], -normal[2]];
        }
        out.plane.a = normal[0];
        out.plane.b = normal[1];
        out.plane.c = normal[2];
        out.plane.normal = normal;

        if let Some(p0) = out.plane.points.first() {
            out.plane.d = -(normal[0] * p0.x + normal[1] * p0.y + normal[2] * p0.z);
        }
        out
    }
}

/// Convex hull of a point set projected to xy (Andrew monotone chain).
pub fn convex_hull_xy(points: &[Point3]) -> Vec<Point3> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal)));

    let cross = |o: &Point3, a: &Point3, b: &Point3| -> f32 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };

    let mut lower: Vec<Point3> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0
        {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point3> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0
        {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// A 2D line y = m·x + b fitted to a point set on the xy plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Line2 {
    /// Slope.
    pub m: f32,
    /// Intercept.
    pub b: f32,
}

impl Line2 {
    pub fn new(m: f32, b: f32) -> Self {
        Self { m, b }
    }

    /// Least-squares fit on the xy projection of a point set.
    ///
    /// Returns the zero line for degenerate inputs.
    pub fn fit(points: &[Point3]) -> Self {
        let n = points.len() as f32;
        if points.is_empty() {
            return Self::default();
        }

        let mut sum_x = 0.0f32;
        let mut sum_x2 = 0.0f32;
        let mut sum_y = 0.0f32;
        let mut sum_xy = 0.0f32;
        for p in points {
            sum_x += p.x;
            sum_x2 += p.x * p.x;
            sum_y += p.y;
            sum_xy += p.x * p.y;
        }

        let denom = n * sum_x2 - sum_x * sum_x;
        if denom.abs() < 1e-9 {
            return Self::default();
        }

        let m = (n * sum_xy - sum_x * sum_y) / denom;
        let b = (sum_y - m * sum_x) / n;
        Self { m, b }
    }

    /// Perpendicular distance from a point to the line.
    pub fn dist(&self, p: &Point3) -> f32 {
        (self.m * p.x - p.y + self.b).abs() / (self.m * self.m + 1.0).sqrt()
    }

    /// Orientation of the line in radians.
    pub fn yaw(&self) -> f32 {
        self.m.atan()
    }

    /// Carry the line through a rigid transform on the xy plane by
    /// transforming two support points and refitting.
    pub fn transformed(&self, tf: &crate::core::types::Transform3) -> Line2 {
        let p0 = tf.transform(&Point3::new(0.0, self.b, 0.0));
        let p1 = tf.transform(&Point3::new(1.0, self.m + self.b, 0.0));

        let dx = p1.x - p0.x;
        if dx.abs() < 1e-6 {
            // Near-vertical after rotation; clamp to a steep slope.
            let m = if (p1.y - p0.y) >= 0.0 { 1e6 } else { -1e6 };
            return Line2::new(m, p0.y - m * p0.x);
        }
        let m = (p1.y - p0.y) / dx;
        Line2::new(m, p0.y - m * p0.x)
    }
}
