//! Odometry motion model for the particle filter.
//!
//! Applies the frame-to-frame odometry increment to a particle with
//! zero-mean Gaussian noise scaled by the motion magnitude: translation
//! noise grows with distance travelled and yaw change, yaw noise grows
//! with both as well, and z/roll/pitch carry fixed per-frame stdevs.

use rand::rngs::StdRng;

use crate::config::ParticleFilterConfig;
use crate::core::math::sample_gaussian;
use crate::core::types::Pose6;

/// Samples noisy increments from the configured noise model.
#[derive(Debug, Clone)]
pub struct MotionModel {
    config: ParticleFilterConfig,
}

impl MotionModel {
    pub fn new(config: &ParticleFilterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Apply the increment `delta` (in the particle's frame) with sampled
    /// noise. A vanishing increment leaves the pose untouched so a
    /// stationary robot does not diffuse.
    pub fn sample(&self, pose: &Pose6, delta: &Pose6, rng: &mut StdRng) -> Pose6 {
        let trans = (delta.x * delta.x + delta.y * delta.y).sqrt();
        if trans < 1e-6 && delta.yaw.abs() < 1e-6 && delta.z.abs() < 1e-6 {
            return *pose;
        }

        let c = &self.config;
        let sigma_xy = c.srr * trans + c.srt * delta.yaw.abs();
        let sigma_yaw = c.stt * delta.yaw.abs() + c.str * trans;

        let noisy = Pose6::new(
            delta.x + sample_gaussian(rng, sigma_xy),
            delta.y + sample_gaussian(rng, sigma_xy),
            delta.z + sample_gaussian(rng, c.sigma_z),
            delta.roll + sample_gaussian(rng, c.sigma_roll),
            delta.pitch + sample_gaussian(rng, c.sigma_pitch),
            delta.yaw + sample_gaussian(rng, sigma_yaw),
        );

        pose.compose(&noisy)
    }
}
