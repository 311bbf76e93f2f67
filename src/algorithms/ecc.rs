use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::AlignError;
use super::warp::{sample_bilinear, Sample, Transform};
use crate::utils::filters::{central_gradients, gaussian_blur};

/// Enhanced Correlation Coefficient (ECC) image alignment.
///
/// Estimates the transform that maps reference pixel coordinates onto the
/// moving image, so that `warp(moving, transform, reference.dim())` lines
/// the moving image up with the reference. The objective is the correlation
/// of zero-mean, unit-norm intensities, which makes it insensitive to gain
/// and offset differences between the two bands.
#[derive(Debug, Clone)]
pub struct EccAligner {
    motion_type: MotionType,
    criteria: ConvergenceCriteria,
    gaussian_filter_size: usize,
    source_bit_depth: u32,
    rescale_factor: Option<f64>,
    initial_transform: Transform,
}

/// Parametric family of the estimated transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionType {
    /// Shift only: `(dx, dy)`.
    Translation,
    /// Rotation and shift: `(theta, dx, dy)`.
    #[default]
    Euclidean,
    /// All six matrix entries.
    Affine,
}

impl MotionType {
    pub fn parameter_count(self) -> usize {
        match self {
            MotionType::Translation => 2,
            MotionType::Euclidean => 3,
            MotionType::Affine => 6,
        }
    }

    /// Derivative of the warped intensity with respect to each parameter at
    /// reference pixel `(x, y)`, given the warped image gradient.
    #[inline]
    fn jacobian_row(self, transform: &Transform, x: f64, y: f64, gx: f64, gy: f64, out: &mut [f64]) {
        match self {
            MotionType::Translation => {
                out[0] = gx;
                out[1] = gy;
            }
            MotionType::Euclidean => {
                let (sin, cos) = transform.rotation_radians().sin_cos();
                let hat_x = -(x * sin) - (y * cos);
                let hat_y = x * cos - y * sin;
                out[0] = gx * hat_x + gy * hat_y;
                out[1] = gx;
                out[2] = gy;
            }
            MotionType::Affine => {
                out[0] = gx * x;
                out[1] = gy * x;
                out[2] = gx * y;
                out[3] = gy * y;
                out[4] = gx;
                out[5] = gy;
            }
        }
    }

    fn update(self, transform: &Transform, delta: &DVector<f64>) -> Transform {
        let mut m = transform.matrix;
        match self {
            MotionType::Translation => {
                m[0][2] += delta[0];
                m[1][2] += delta[1];
            }
            MotionType::Euclidean => {
                let theta = transform.rotation_radians() + delta[0];
                let (sin, cos) = theta.sin_cos();
                m[0][0] = cos;
                m[0][1] = -sin;
                m[1][0] = sin;
                m[1][1] = cos;
                m[0][2] += delta[1];
                m[1][2] += delta[2];
            }
            MotionType::Affine => {
                m[0][0] += delta[0];
                m[1][0] += delta[1];
                m[0][1] += delta[2];
                m[1][1] += delta[3];
                m[0][2] += delta[4];
                m[1][2] += delta[5];
            }
        }
        Transform::new(m)
    }
}

impl fmt::Display for MotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionType::Translation => "translation",
            MotionType::Euclidean => "euclidean",
            MotionType::Affine => "affine",
        };
        f.write_str(name)
    }
}

impl FromStr for MotionType {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "translation" => Ok(MotionType::Translation),
            "euclidean" => Ok(MotionType::Euclidean),
            "affine" => Ok(MotionType::Affine),
            other => Err(AlignError::InvalidParameter(format!(
                "unknown motion type `{}` (expected translation, euclidean or affine)",
                other
            ))),
        }
    }
}

/// Bounds on the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    pub max_iterations: usize,
    /// Stop once the correlation changes by less than this between iterations.
    pub epsilon: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            epsilon: 1e-10,
        }
    }
}

impl ConvergenceCriteria {
    pub fn new(max_iterations: usize, epsilon: f64) -> Self {
        Self {
            max_iterations,
            epsilon,
        }
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        if self.max_iterations == 0 {
            return Err(AlignError::InvalidParameter(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(AlignError::InvalidParameter(format!(
                "epsilon must be a positive finite number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EccAlignment {
    pub transform: Transform,
    pub motion_type: MotionType,
    /// Correlation coefficient measured at the last iteration.
    pub correlation: f64,
    pub iterations: usize,
    /// `false` when the iteration budget ran out before the epsilon test passed.
    pub converged: bool,
    /// Correlation coefficient of every iteration, in order.
    pub correlation_trace: Vec<f64>,
}

impl Default for EccAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl EccAligner {
    pub fn new() -> Self {
        Self {
            motion_type: MotionType::Euclidean,
            criteria: ConvergenceCriteria::default(),
            gaussian_filter_size: 5,
            source_bit_depth: 16,
            rescale_factor: None,
            initial_transform: Transform::IDENTITY,
        }
    }

    pub fn with_motion_type(mut self, motion_type: MotionType) -> Self {
        self.motion_type = motion_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.criteria.max_iterations = max_iterations;
        self
    }

    pub fn with_termination_eps(mut self, eps: f64) -> Self {
        self.criteria.epsilon = eps;
        self
    }

    pub fn with_criteria(mut self, criteria: ConvergenceCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Smoothing kernel size applied before estimation; 0 disables it.
    pub fn with_gaussian_filter_size(mut self, size: usize) -> Self {
        self.gaussian_filter_size = size;
        self
    }

    /// Native bit depth of the inputs; samples are divided by
    /// `2^(depth - 8)` to reach the 8-bit working range.
    pub fn with_source_bit_depth(mut self, depth: u32) -> Self {
        self.source_bit_depth = depth;
        self
    }

    /// Explicit divisor for the 8-bit rescale, overriding the bit depth.
    pub fn with_rescale_factor(mut self, factor: f64) -> Self {
        self.rescale_factor = Some(factor);
        self
    }

    /// Starting point of the refinement (identity by default).
    pub fn with_initial_transform(mut self, transform: Transform) -> Self {
        self.initial_transform = transform;
        self
    }

    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    pub fn criteria(&self) -> ConvergenceCriteria {
        self.criteria
    }

    pub fn rescale_factor(&self) -> f64 {
        self.rescale_factor
            .unwrap_or_else(|| 2f64.powi(self.source_bit_depth.saturating_sub(8) as i32))
    }

    pub fn estimate<S1, S2, T>(
        &self,
        reference: &ArrayBase<S1, Ix2>,
        moving: &ArrayBase<S2, Ix2>,
    ) -> Result<EccAlignment, AlignError>
    where
        S1: Data<Elem = T>,
        S2: Data<Elem = T>,
        T: Sample,
    {
        if reference.dim() != moving.dim() {
            return Err(AlignError::ShapeMismatch {
                reference: reference.dim(),
                moving: moving.dim(),
            });
        }
        let (rows, cols) = reference.dim();
        if rows < 2 || cols < 2 {
            return Err(AlignError::InvalidParameter(format!(
                "images must be at least 2x2, got {}x{}",
                cols, rows
            )));
        }
        self.criteria.validate()?;
        let factor = self.rescale_factor();
        if !(factor.is_finite() && factor > 0.0) {
            return Err(AlignError::InvalidParameter(format!(
                "rescale factor must be positive, got {}",
                factor
            )));
        }
        self.initial_transform.check_invertible()?;

        let span = tracing::debug_span!(
            "ecc_estimate",
            motion = %self.motion_type,
            rows,
            cols,
            max_iterations = self.criteria.max_iterations,
        );
        let _enter = span.enter();

        let template = prepare(reference, factor, self.gaussian_filter_size);
        let image = prepare(moving, factor, self.gaussian_filter_size);
        let (grad_x, grad_y) = central_gradients(&image);

        let n = self.motion_type.parameter_count();
        let mut transform = self.initial_transform;
        let mut last_valid: Option<Transform> = None;
        let mut trace = Vec::with_capacity(self.criteria.max_iterations.min(1024));
        let mut jac_row = vec![0.0; n];
        let mut converged = false;

        for iteration in 0..self.criteria.max_iterations {
            let fail = |reason: &str| {
                tracing::warn!(iteration, reason, "ECC estimation failed");
                AlignError::convergence(reason, iteration, last_valid)
            };

            // warp image and gradients; invalid pixels stay out of every sum
            let mut count = 0usize;
            let mut tmp_sum = 0.0;
            let mut img_sum = 0.0;
            let mut warped = Array2::<f64>::zeros((rows, cols));
            let mut warped_gx = Array2::<f64>::zeros((rows, cols));
            let mut warped_gy = Array2::<f64>::zeros((rows, cols));
            let mut mask = Array2::from_elem((rows, cols), false);
            for r in 0..rows {
                for c in 0..cols {
                    let (x, y) = transform.map_point(c as f64, r as f64);
                    if let Some(value) = sample_bilinear(&image, x, y) {
                        warped[[r, c]] = value;
                        warped_gx[[r, c]] = sample_bilinear(&grad_x, x, y).unwrap_or(0.0);
                        warped_gy[[r, c]] = sample_bilinear(&grad_y, x, y).unwrap_or(0.0);
                        mask[[r, c]] = true;
                        count += 1;
                        tmp_sum += template[[r, c]];
                        img_sum += value;
                    }
                }
            }
            if count == 0 {
                return Err(fail("images no longer overlap"));
            }
            let tmp_mean = tmp_sum / count as f64;
            let img_mean = img_sum / count as f64;

            let mut hessian = DMatrix::<f64>::zeros(n, n);
            let mut image_projection = DVector::<f64>::zeros(n);
            let mut template_projection = DVector::<f64>::zeros(n);
            let mut correlation = 0.0;
            let mut tmp_sq = 0.0;
            let mut img_sq = 0.0;

            for r in 0..rows {
                for c in 0..cols {
                    if !mask[[r, c]] {
                        continue;
                    }
                    let tz = template[[r, c]] - tmp_mean;
                    let iz = warped[[r, c]] - img_mean;
                    correlation += tz * iz;
                    tmp_sq += tz * tz;
                    img_sq += iz * iz;

                    self.motion_type.jacobian_row(
                        &transform,
                        c as f64,
                        r as f64,
                        warped_gx[[r, c]],
                        warped_gy[[r, c]],
                        &mut jac_row,
                    );
                    for i in 0..n {
                        image_projection[i] += jac_row[i] * iz;
                        template_projection[i] += jac_row[i] * tz;
                        for j in i..n {
                            hessian[(i, j)] += jac_row[i] * jac_row[j];
                        }
                    }
                }
            }
            for i in 0..n {
                for j in 0..i {
                    hessian[(i, j)] = hessian[(j, i)];
                }
            }

            let tmp_norm = tmp_sq.sqrt();
            let img_norm = img_sq.sqrt();
            let rho = correlation / (img_norm * tmp_norm);
            if !rho.is_finite() {
                return Err(fail(
                    "correlation coefficient is undefined (flat or saturated input)",
                ));
            }
            trace.push(rho);
            tracing::trace!(iteration, rho, valid_pixels = count, "ECC iteration");

            let hessian_inv = hessian
                .try_inverse()
                .filter(|inv| inv.iter().all(|v| v.is_finite()))
                .ok_or_else(|| fail("singular Hessian"))?;

            let image_projection_hessian = &hessian_inv * &image_projection;
            let lambda_n = img_sq - image_projection.dot(&image_projection_hessian);
            let lambda_d = correlation - template_projection.dot(&image_projection_hessian);
            if !(lambda_d > 0.0) {
                return Err(fail(
                    "correlation would be minimized; images may be uncorrelated or non-overlapping",
                ));
            }
            let lambda = lambda_n / lambda_d;

            // J^T (lambda * t - i), expanded so no second pass is needed
            let error_projection = &template_projection * lambda - &image_projection;
            let delta = &hessian_inv * error_projection;
            if delta.iter().any(|v| !v.is_finite()) {
                return Err(fail("non-finite parameter update"));
            }

            transform = self.motion_type.update(&transform, &delta);
            last_valid = Some(transform);

            if trace.len() >= 2 {
                let previous = trace[trace.len() - 2];
                if (rho - previous).abs() < self.criteria.epsilon {
                    converged = true;
                    break;
                }
            }
        }

        let iterations = trace.len();
        let correlation = trace.last().copied().unwrap_or(f64::NAN);
        if converged {
            tracing::debug!(iterations, correlation, "ECC converged");
        } else {
            tracing::debug!(
                iterations,
                correlation,
                "ECC stopped at iteration limit before reaching epsilon"
            );
        }

        Ok(EccAlignment {
            transform,
            motion_type: self.motion_type,
            correlation,
            iterations,
            converged,
            correlation_trace: trace,
        })
    }
}

/// Rescales samples to the 8-bit working range: `floor(v / factor)`,
/// saturated to `0..=255`.
pub fn normalize_depth<S, T>(image: &ArrayBase<S, Ix2>, factor: f64) -> Array2<u8>
where
    S: Data<Elem = T>,
    T: Sample,
{
    image.mapv(|v| (v.to_f64() / factor).floor().clamp(0.0, 255.0) as u8)
}

fn prepare<S, T>(image: &ArrayBase<S, Ix2>, factor: f64, filter_size: usize) -> Array2<f64>
where
    S: Data<Elem = T>,
    T: Sample,
{
    let scaled = normalize_depth(image, factor).mapv(f64::from);
    gaussian_blur(&scaled, filter_size)
}

/// Estimates the transform aligning `moving` onto `reference` with the
/// default settings for everything but the motion model and criteria.
pub fn estimate<S1, S2, T>(
    reference: &ArrayBase<S1, Ix2>,
    moving: &ArrayBase<S2, Ix2>,
    motion_type: MotionType,
    max_iterations: usize,
    epsilon: f64,
) -> Result<Transform, AlignError>
where
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    T: Sample,
{
    EccAligner::new()
        .with_motion_type(motion_type)
        .with_criteria(ConvergenceCriteria::new(max_iterations, epsilon))
        .estimate(reference, moving)
        .map(|alignment| alignment.transform)
}
