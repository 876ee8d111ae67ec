//! Per-landmark Kalman filters.
//!
//! One 2D filter per semantic landmark id, tracking the landmark's xy
//! position in map frame. Landmarks are static, so the predict step is
//! the identity; the correct step applies the standard EKF update with a
//! range-bearing observation model.
//!
//! The observation covariance follows the stereo disparity noise model:
//! sigma_d = depth² / (baseline · fx) · delta_d, with a constant bearing
//! stdev.

use std::collections::HashMap;

use nalgebra::{Matrix2, Vector2};

use crate::config::CameraConfig;
use crate::core::math::normalize_angle;
use crate::core::types::{Gaussian2, Point3, Pose6};

/// A single landmark filter: 2D state and covariance.
#[derive(Debug, Clone)]
pub struct LandmarkFilter {
    x: Vector2<f32>,
    p: Matrix2<f32>,
}

impl LandmarkFilter {
    /// Initialize from the first observation.
    ///
    /// The initial covariance maps the polar observation noise into map
    /// frame through the range-bearing Jacobian.
    pub fn new(robot: &Pose6, range: f32, bearing: f32, noise: &ObservationNoise) -> Self {
        let heading = robot.yaw + bearing;
        let x = Vector2::new(
            robot.x + range * heading.cos(),
            robot.y + range * heading.sin(),
        );

        let p = polar_to_cartesian_covariance(range, heading, noise);
        Self { x, p }
    }

    /// Run one predict + correct cycle with a new observation.
    ///
    /// `z` is (range, bearing) in robot frame.
    pub fn process(&mut self, robot: &Pose6, z: (f32, f32), noise: &ObservationNoise) {
        self.predict();
        self.correct(robot, z, noise);
    }

    /// Landmarks are static; prediction leaves state and covariance alone.
    fn predict(&mut self) {}

    fn correct(&mut self, robot: &Pose6, z: (f32, f32), noise: &ObservationNoise) {
        let dx = self.x[0] - robot.x;
        let dy = self.x[1] - robot.y;
        let q = dx * dx + dy * dy;
        let r = q.sqrt();
        if r < 1e-6 {
            return;
        }

        // Predicted observation and its Jacobian wrt the landmark state.
        let predicted_range = r;
        let predicted_bearing = normalize_angle(dy.atan2(dx) - robot.yaw);
        let h = Matrix2::new(dx / r, dy / r, -dy / q, dx / q);

        let obs_cov = Matrix2::new(
            noise.range_stdev * noise.range_stdev,
            0.0,
            0.0,
            noise.bearing_stdev * noise.bearing_stdev,
        );

        let s = h * self.p * h.transpose() + obs_cov;
        let Some(s_inv) = s.try_inverse() else {
            return;
        };
        let k = self.p * h.transpose() * s_inv;

        let innovation = Vector2::new(
            z.0 - predicted_range,
            normalize_angle(z.1 - predicted_bearing),
        );

        self.x += k * innovation;
        self.p = (Matrix2::identity() - k * h) * self.p;
    }

    /// Current landmark position estimate.
    pub fn state(&self) -> Point3 {
        Point3::new(self.x[0], self.x[1], 0.0)
    }

    /// Current uncertainty as a 2D Gaussian (covariance diagonalized for
    /// ellipse drawing).
    pub fn gaussian(&self) -> Gaussian2 {
        Gaussian2::from_covariance(
            self.state(),
            self.p[(0, 0)],
            self.p[(0, 1)],
            self.p[(1, 1)],
        )
    }

    /// Trace of the covariance; shrinks as observations accumulate.
    pub fn covariance_trace(&self) -> f32 {
        self.p.trace()
    }
}

/// Polar observation noise for one measurement.
#[derive(Debug, Clone, Copy)]
pub struct ObservationNoise {
    pub range_stdev: f32,
    pub bearing_stdev: f32,
}

impl ObservationNoise {
    /// Stereo disparity noise model for a depth reading.
    pub fn from_depth(cam: &CameraConfig, depth: f32) -> Self {
        Self {
            range_stdev: depth * depth / (cam.baseline * cam.fx) * cam.delta_d,
            bearing_stdev: cam.bearing_stdev,
        }
    }
}

/// Map polar (range, bearing-heading) noise into a cartesian covariance.
fn polar_to_cartesian_covariance(
    range: f32,
    heading: f32,
    noise: &ObservationNoise,
) -> Matrix2<f32> {
    let (sh, ch) = heading.sin_cos();
    // Jacobian of (r, θ) → (x, y).
    let g = Matrix2::new(ch, -range * sh, sh, range * ch);
    let polar = Matrix2::new(
        noise.range_stdev * noise.range_stdev,
        0.0,
        0.0,
        noise.bearing_stdev * noise.bearing_stdev,
    );
    g * polar * g.transpose()
}

/// The bank: one filter per landmark id, never destroyed.
#[derive(Debug, Clone, Default)]
pub struct LandmarkBank {
    filters: HashMap<u32, LandmarkFilter>,
}

impl LandmarkBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a filter exists for this landmark id.
    pub fn contains(&self, id: u32) -> bool {
        self.filters.contains_key(&id)
    }

    /// Number of tracked landmarks.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Create a filter for a newly observed landmark.
    pub fn register(
        &mut self,
        id: u32,
        robot: &Pose6,
        range: f32,
        bearing: f32,
        noise: &ObservationNoise,
    ) -> &LandmarkFilter {
        self.filters
            .entry(id)
            .or_insert_with(|| LandmarkFilter::new(robot, range, bearing, noise))
    }

    /// Update the filter for a known landmark; returns the refreshed
    /// state and Gaussian, or `None` when the id is unknown.
    pub fn observe(
        &mut self,
        id: u32,
        robot: &Pose6,
        range: f32,
        bearing: f32,
        noise: &ObservationNoise,
    ) -> Option<(Point3, Gaussian2)> {
        let filter = self.filters.get_mut(&id)?;
        filter.process(robot, (range, bearing), noise);
        Some((filter.state(), filter.gaussian()))
    }

    /// Snapshot accessor for exporters.
    pub fn get(&self, id: u32) -> Option<&LandmarkFilter> {
        self.filters.get(&id)
    }
}
