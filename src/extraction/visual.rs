//! Visual frontend: detection observations and image feature extraction.
//!
//! Two jobs feed the estimator from the stereo camera:
//! 1. Turn detector bounding boxes plus the aligned depth image into
//!    (label, bearing, depth) landmark observations.
//! 2. Detect blob-like interest points on the left image, describe them
//!    with a Haar-wavelet descriptor, and back-project them to 3D through
//!    the depth image.
//!
//! The detector is a determinant-of-Hessian blob detector over a
//! box-blurred image pyramid computed from an integral image.

use crate::config::CameraConfig;
use crate::core::types::{Point3, Pose6, Transform3};
use crate::error::{Result, SlamError};
use crate::features::{DESCRIPTOR_LEN, ImageFeature, LandmarkLabel, LandmarkObservation};

/// Valid depth window for detection observations, meters.
const DEPTH_RANGE: (f32, f32) = (0.01, 10.0);

/// Blur radii (in pixels) of the three detector scales.
const DETECTOR_SCALES: [usize; 3] = [2, 4, 6];

/// Half-width of the descriptor window; keypoints closer to the border
/// are dropped.
const DESCRIPTOR_MARGIN: usize = 12;

/// Borrowed 8-bit grayscale image, row-major.
#[derive(Debug, Clone, Copy)]
pub struct GrayImage<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
}

impl<'a> GrayImage<'a> {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Borrowed RGB8 image, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, Copy)]
pub struct RgbImage<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
}

impl<'a> RgbImage<'a> {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let i = (y * self.width + x) * 3;
        (self.data[i], self.data[i + 1], self.data[i + 2])
    }
}

/// Borrowed depth image: row-major f32 meters, NaN = invalid.
#[derive(Debug, Clone, Copy)]
pub struct DepthImage<'a> {
    pub data: &'a [f32],
    pub width: usize,
    pub height: usize,
}

impl<'a> DepthImage<'a> {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// An axis-aligned detector bounding box with its class label.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub label: i32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// The visual frontend.
#[derive(Debug, Clone)]
pub struct VisualExtractor {
    cam: CameraConfig,
    /// Camera optical frame → base frame, including the axis swap.
    cam_to_base: Transform3,
}

impl VisualExtractor {
    pub fn new(cam: &CameraConfig) -> Self {
        // Optical axes (x right, y down, z forward) → robot axes
        // (x forward, y left, z up).
        let axis = Pose6::new(
            0.0,
            0.0,
            0.0,
            -std::f32::consts::FRAC_PI_2,
            0.0,
            -std::f32::consts::FRAC_PI_2,
        )
        .transform();
        let mount = Pose6::new(
            cam.cam_to_base[0],
            cam.cam_to_base[1],
            cam.cam_to_base[2],
            cam.cam_to_base[3],
            cam.cam_to_base[4],
            cam.cam_to_base[5],
        )
        .transform();

        Self {
            cam: cam.clone(),
            cam_to_base: mount.compose(&axis),
        }
    }

    // ------------------------------------------------------------------
    // Detection observations
    // ------------------------------------------------------------------

    /// Convert all detections into landmark observations, dropping the
    /// invalid ones. Returns the observations and the dropped count.
    pub fn observations(
        &self,
        depth: &DepthImage,
        detections: &[Detection],
    ) -> (Vec<LandmarkObservation>, usize) {
        let mut out = Vec::with_capacity(detections.len());
        let mut dropped = 0;

        for det in detections {
            match self.observation_for(depth, det) {
                Ok(obs) => out.push(obs),
                Err(e) => {
                    dropped += 1;
                    log::debug!("detection dropped: {e}");
                }
            }
        }
        (out, dropped)
    }

    /// Bearing and depth of a single detection: the closest valid depth
    /// reading inside the box wins.
    pub fn observation_for(
        &self,
        depth: &DepthImage,
        det: &Detection,
    ) -> Result<LandmarkObservation> {
        let x_min = det.x_min.max(0.0) as usize;
        let y_min = det.y_min.max(0.0) as usize;
        let x_max = (det.x_max.min(depth.width as f32)) as usize;
        let y_max = (det.y_max.min(depth.height as f32)) as usize;

        if x_min >= x_max || y_min >= y_max {
            return Err(SlamError::DepthInvalid);
        }

        let mut best: Option<(f32, f32)> = None;
        for v in y_min..y_max {
            for u in x_min..x_max {
                let d = depth.at(u, v);
                if !d.is_finite() || d <= DEPTH_RANGE.0 || d >= DEPTH_RANGE.1 {
                    continue;
                }
                // Forward/lateral decomposition in robot convention:
                // x ahead, y positive to the left.
                let x = d;
                let y = -(u as f32 - self.cam.cx) * (x / self.cam.fx);
                let range = (x * x + y * y).sqrt();
                if best.map_or(true, |(r, _)| range < r) {
                    best = Some((range, y.atan2(x)));
                }
            }
        }

        let (range, bearing) = best.ok_or(SlamError::DepthInvalid)?;
        Ok(LandmarkObservation {
            label: LandmarkLabel::from_id(det.label),
            bearing,
            depth: range,
        })
    }

    // ------------------------------------------------------------------
    // Image features
    // ------------------------------------------------------------------

    /// Detect interest points, describe them, and back-project through
    /// the depth image. Features beyond the range/height gates are
    /// discarded.
    pub fn extract_features(
        &self,
        gray: &GrayImage,
        rgb: Option<&RgbImage>,
        depth: &DepthImage,
    ) -> Vec<ImageFeature> {
        let integral = IntegralImage::build(gray);
        let keypoints = self.detect(gray, &integral);

        let mut features = Vec::with_capacity(keypoints.len());
        for kp in keypoints {
            let d = depth.at(kp.u, kp.v);
            if !d.is_finite() {
                continue;
            }

            let pos = self.pixel_to_base(kp.u as f32, kp.v as f32, d);
            let dist = pos.norm();
            if dist >= self.cam.feature_max_range || pos.z >= self.cam.feature_max_height {
                continue;
            }

            let mut feature = ImageFeature::new(0, kp.u as u32, kp.v as u32, pos);
            feature.descriptor = describe(gray, kp.u, kp.v);
            feature.laplacian = kp.laplacian;
            if let Some(rgb) = rgb {
                let (r, g, b) = rgb.at(kp.u, kp.v);
                feature.r = r;
                feature.g = g;
                feature.b = b;
            }
            features.push(feature);
        }
        features
    }

    /// Back-project a pixel with a depth reading into base frame.
    pub fn pixel_to_base(&self, u: f32, v: f32, depth: f32) -> Point3 {
        let x_cam = (u - self.cam.cx) * (depth / self.cam.fx);
        let y_cam = (v - self.cam.cy) * (depth / self.cam.fy);
        let pt_cam = Point3::new(x_cam, y_cam, depth);
        self.cam_to_base.transform(&pt_cam)
    }

    /// Determinant-of-Hessian blob detection over three blur scales with
    /// 3×3 spatial non-maximum suppression per scale.
    fn detect(&self, gray: &GrayImage, integral: &IntegralImage) -> Vec<Keypoint> {
        let mut keypoints: Vec<Keypoint> = Vec::new();
        let margin = DESCRIPTOR_MARGIN.max(DETECTOR_SCALES[DETECTOR_SCALES.len() - 1] * 2 + 1);
        if gray.width <= 2 * margin || gray.height <= 2 * margin {
            return keypoints;
        }

        for &s in &DETECTOR_SCALES {
            let mut responses = vec![0.0f32; gray.width * gray.height];
            let mut laplacians = vec![0i8; gray.width * gray.height];

            for v in margin..gray.height - margin {
                for u in margin..gray.width - margin {
                    let (det, lap) = hessian_response(integral, u, v, s);
                    responses[v * gray.width + u] = det;
                    laplacians[v * gray.width + u] = lap;
                }
            }

            for v in margin..gray.height - margin {
                for u in margin..gray.width - margin {
                    let r = responses[v * gray.width + u];
                    if r < self.cam.hessian_threshold {
                        continue;
                    }
                    // 3×3 non-maximum suppression.
                    let mut is_max = true;
                    'nms: for dv in -1i32..=1 {
                        for du in -1i32..=1 {
                            if du == 0 && dv == 0 {
                                continue;
                            }
                            let idx = (v as i32 + dv) as usize * gray.width
                                + (u as i32 + du) as usize;
                            if responses[idx] > r {
                                is_max = false;
                                break 'nms;
                            }
                        }
                    }
                    if is_max {
                        keypoints.push(Keypoint {
                            u,
                            v,
                            response: r,
                            laplacian: laplacians[v * gray.width + u],
                        });
                    }
                }
            }
        }

        // Merge across scales: keep the strongest response per pixel
        // neighborhood.
        keypoints.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut kept: Vec<Keypoint> = Vec::new();
        for kp in keypoints {
            let close = kept.iter().any(|k| {
                let du = k.u as i32 - kp.u as i32;
                let dv = k.v as i32 - kp.v as i32;
                du * du + dv * dv <= 9
            });
            if !close {
                kept.push(kp);
            }
        }
        kept
    }
}

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    u: usize,
    v: usize,
    response: f32,
    laplacian: i8,
}

/// Summed-area table over a grayscale image.
struct IntegralImage {
    sums: Vec<u64>,
    width: usize,
}

impl IntegralImage {
    fn build(gray: &GrayImage) -> Self {
        let w = gray.width + 1;
        let h = gray.height + 1;
        let mut sums = vec![0u64; w * h];
        for y in 0..gray.height {
            for x in 0..gray.width {
                sums[(y + 1) * w + (x + 1)] = gray.at(x, y) as u64 + sums[y * w + (x + 1)]
                    + sums[(y + 1) * w + x]
                    - sums[y * w + x];
            }
        }
        Self { sums, width: w }
    }

    /// Sum over the inclusive pixel box [x0, x1] × [y0, y1].
    #[inline]
    fn box_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let w = self.width;
        self.sums[(y1 + 1) * w + (x1 + 1)] + self.sums[y0 * w + x0]
            - self.sums[y0 * w + (x1 + 1)]
            - self.sums[(y1 + 1) * w + x0]
    }

    /// Mean intensity of the (2r+1)² box centered at (x, y).
    #[inline]
    fn box_mean(&self, x: usize, y: usize, r: usize) -> f32 {
        let count = ((2 * r + 1) * (2 * r + 1)) as f32;
        self.box_sum(x - r, y - r, x + r, y + r) as f32 / count
    }
}

/// Hessian determinant and Laplacian sign at (u, v) for blur radius `s`.
fn hessian_response(integral: &IntegralImage, u: usize, v: usize, s: usize) -> (f32, i8) {
    let b = |du: i32, dv: i32| -> f32 {
        integral.box_mean(
            (u as i32 + du * s as i32) as usize,
            (v as i32 + dv * s as i32) as usize,
            s / 2 + 1,
        )
    };

    let center = b(0, 0);
    let lxx = b(-1, 0) - 2.0 * center + b(1, 0);
    let lyy = b(0, -1) - 2.0 * center + b(0, 1);
    let lxy = (b(-1, -1) + b(1, 1) - b(-1, 1) - b(1, -1)) / 4.0;

    let det = lxx * lyy - lxy * lxy;
    let lap = if lxx + lyy >= 0.0 { 1 } else { -1 };
    (det, lap)
}

/// Haar-wavelet descriptor: a 20×20 window split into 4×4 subregions of
/// 5×5 pixels; per subregion the sums (Σdx, Σ|dx|, Σdy, Σ|dy|), then L2
/// normalization.
fn describe(gray: &GrayImage, u: usize, v: usize) -> Vec<f32> {
    let mut descriptor = Vec::with_capacity(DESCRIPTOR_LEN);
    let x0 = u as i32 - 10;
    let y0 = v as i32 - 10;

    for sub_y in 0..4 {
        for sub_x in 0..4 {
            let mut sum_dx = 0.0f32;
            let mut sum_abs_dx = 0.0f32;
            let mut sum_dy = 0.0f32;
            let mut sum_abs_dy = 0.0f32;

            for py in 0..5 {
                for px in 0..5 {
                    let x = (x0 + sub_x * 5 + px) as usize;
                    let y = (y0 + sub_y * 5 + py) as usize;
                    if x == 0 || y == 0 || x + 1 >= gray.width || y + 1 >= gray.height {
                        continue;
                    }
                    let dx = gray.at(x + 1, y) as f32 - gray.at(x - 1, y) as f32;
                    let dy = gray.at(x, y + 1) as f32 - gray.at(x, y - 1) as f32;
                    sum_dx += dx;
                    sum_abs_dx += dx.abs();
                    sum_dy += dy;
                    sum_abs_dy += dy.abs();
                }
            }
            descriptor.extend_from_slice(&[sum_dx, sum_abs_dx, sum_dy, sum_abs_dy]);
        }
    }

    let norm: f32 = descriptor.iter().map(|d| d * d).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for d in &mut descriptor {
            *d /= norm;
        }
    }
    descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraConfig {
        CameraConfig::default()
    }

    /// A dark image with one bright square blob.
    fn blob_image(w: usize, h: usize, bx: usize, by: usize, size: usize) -> Vec<u8> {
        let mut data = vec![20u8; w * h];
        for y in by..by + size {
            for x in bx..bx + size {
                data[y * w + x] = 230;
            }
        }
        data
    }

    #[test]
    fn test_detector_finds_blob() {
        let (w, h) = (160, 120);
        let data = blob_image(w, h, 75, 55, 8);
        let gray = GrayImage {
            data: &data,
            width: w,
            height: h,
        };
        let depth_data = vec![5.0f32; w * h];
        let depth = DepthImage {
            data: &depth_data,
            width: w,
            height: h,
        };

        let mut cam = camera();
        cam.img_width = w as u32;
        cam.img_height = h as u32;
        cam.cx = w as f32 / 2.0;
        cam.cy = h as f32 / 2.0;
        let extractor = VisualExtractor::new(&cam);

        let features = extractor.extract_features(&gray, None, &depth);
        assert!(!features.is_empty(), "no features detected");

        // At least one keypoint on or near the blob.
        let near_blob = features
            .iter()
            .any(|f| (f.u as i32 - 79).abs() < 10 && (f.v as i32 - 59).abs() < 10);
        assert!(near_blob);
    }

    #[test]
    fn test_descriptor_shape_and_norm() {
        let (w, h) = (160, 120);
        let data = blob_image(w, h, 75, 55, 8);
        let gray = GrayImage {
            data: &data,
            width: w,
            height: h,
        };
        let descriptor = describe(&gray, 79, 59);
        assert_eq!(descriptor.len(), DESCRIPTOR_LEN);

        let norm: f32 = descriptor.iter().map(|d| d * d).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let (w, h) = (160, 120);
        let data = vec![128u8; w * h];
        let gray = GrayImage {
            data: &data,
            width: w,
            height: h,
        };
        let depth_data = vec![5.0f32; w * h];
        let depth = DepthImage {
            data: &depth_data,
            width: w,
            height: h,
        };

        let extractor = VisualExtractor::new(&camera());
        assert!(extractor.extract_features(&gray, None, &depth).is_empty());
    }

    #[test]
    fn test_pixel_to_base_center_pixel() {
        let cam = camera();
        let extractor = VisualExtractor::new(&cam);
        let p = extractor.pixel_to_base(cam.cx, cam.cy, 5.0);

        // Optical axis maps to straight ahead in base frame.
        assert_relative_eq!(p.x, 5.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-4);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_pixel_to_base_right_of_center_is_negative_y() {
        let cam = camera();
        let extractor = VisualExtractor::new(&cam);
        let p = extractor.pixel_to_base(cam.cx + 100.0, cam.cy, 5.0);
        assert!(p.y < 0.0, "right of center should map left-negative: {}", p.y);
    }

    #[test]
    fn test_observation_center_detection() {
        let cam = camera();
        let (w, h) = (cam.img_width as usize, cam.img_height as usize);
        let depth_data = vec![5.0f32; w * h];
        let depth = DepthImage {
            data: &depth_data,
            width: w,
            height: h,
        };
        let extractor = VisualExtractor::new(&cam);

        let det = Detection {
            label: 0,
            x_min: cam.cx - 5.0,
            y_min: cam.cy - 5.0,
            x_max: cam.cx + 5.0,
            y_max: cam.cy + 5.0,
        };
        let obs = extractor.observation_for(&depth, &det).unwrap();
        assert_eq!(obs.label, LandmarkLabel::Trunk);
        assert!(obs.bearing.abs() < 0.02, "bearing {}", obs.bearing);
        assert_relative_eq!(obs.depth, 5.0, epsilon = 0.05);
    }

    #[test]
    fn test_observation_box_outside_image() {
        let cam = camera();
        let (w, h) = (cam.img_width as usize, cam.img_height as usize);
        let depth_data = vec![5.0f32; w * h];
        let depth = DepthImage {
            data: &depth_data,
            width: w,
            height: h,
        };
        let extractor = VisualExtractor::new(&cam);

        let det = Detection {
            label: 0,
            x_min: 2000.0,
            y_min: 0.0,
            x_max: 2100.0,
            y_max: 50.0,
        };
        assert!(matches!(
            extractor.observation_for(&depth, &det),
            Err(SlamError::DepthInvalid)
        ));
    }

    #[test]
    fn test_observation_nan_depth_dropped() {
        let cam = camera();
        let (w, h) = (cam.img_width as usize, cam.img_height as usize);
        let depth_data = vec![f32::NAN; w * h];
        let depth = DepthImage {
            data: &depth_data,
            width: w,
            height: h,
        };
        let extractor = VisualExtractor::new(&cam);

        let det = Detection {
            label: 0,
            x_min: 100.0,
            y_min: 100.0,
            x_max: 120.0,
            y_max: 120.0,
        };
        let (obs, dropped) = extractor.observations(&depth, &[det]);
        assert!(obs.is_empty());
        assert_eq!(dropped, 1);
    }
}
