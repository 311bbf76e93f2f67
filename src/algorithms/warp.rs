use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};

use super::error::AlignError;

/// Determinants below this magnitude are treated as singular.
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Pixel sample types accepted by the warp and the estimator.
///
/// Integer conversions round and saturate so a warped 16-bit image stays a
/// valid 16-bit image.
pub trait Sample: Copy + Default + Send + Sync {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! integer_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value.round().clamp(<$t>::MIN as f64, <$t>::MAX as f64) as $t
            }
        }
    )*};
}

integer_sample!(u8, u16, u32);

impl Sample for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// 2x3 affine transform mapping destination (reference) pixel coordinates
/// to source (moving) pixel coordinates.
///
/// Coordinates are `(x, y)` = `(column, row)`. A Euclidean transform has the
/// form `[[cos t, -sin t, dx], [sin t, cos t, dy]]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn new(matrix: [[f64; 3]; 2]) -> Self {
        Self { matrix }
    }

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self::new([[1.0, 0.0, dx], [0.0, 1.0, dy]])
    }

    /// Rotation by `theta` radians followed by a shift of `(dx, dy)`.
    pub fn euclidean(theta: f64, dx: f64, dy: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        Self::new([[cos, -sin, dx], [sin, cos, dy]])
    }

    /// Rotation of `angle_degrees` around `center`, in the image-processing
    /// sense: positive angles turn the picture counter-clockwise on screen.
    ///
    /// This describes the forward motion of the picture. Use
    /// [`Transform::inverse`] to obtain the matrix [`warp`] expects.
    pub fn rotation_about(center: (f64, f64), angle_degrees: f64) -> Self {
        let (beta, alpha) = angle_degrees.to_radians().sin_cos();
        let tx = (1.0 - alpha) * center.0 - beta * center.1;
        let ty = beta * center.0 + (1.0 - alpha) * center.1;
        Self::new([[alpha, beta, tx], [-beta, alpha, ty]])
    }

    #[inline]
    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().flatten().all(|v| v.is_finite())
    }

    pub fn inverse(&self) -> Result<Self, AlignError> {
        self.check_invertible()?;
        let [[a, b, c], [d, e, f]] = self.matrix;
        let inv_det = 1.0 / self.determinant();
        let (na, nb, nd, ne) = (e * inv_det, -b * inv_det, -d * inv_det, a * inv_det);
        Ok(Self::new([
            [na, nb, -(na * c + nb * f)],
            [nd, ne, -(nd * c + ne * f)],
        ]))
    }

    /// `self ∘ other`: maps a point through `other` first, then `self`.
    pub fn compose(&self, other: &Transform) -> Self {
        let a = &self.matrix;
        let b = &other.matrix;
        let mut out = [[0.0; 3]; 2];
        for (row, out_row) in out.iter_mut().enumerate() {
            for col in 0..3 {
                out_row[col] = a[row][0] * b[0][col] + a[row][1] * b[1][col];
            }
            out_row[2] += a[row][2];
        }
        Self::new(out)
    }

    pub fn rotation_radians(&self) -> f64 {
        self.matrix[1][0].atan2(self.matrix[0][0])
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation_radians().to_degrees()
    }

    /// Translation part `(dx, dy)` in pixels.
    pub fn offset(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    pub(crate) fn check_invertible(&self) -> Result<(), AlignError> {
        let determinant = self.determinant();
        if !self.is_finite() || !determinant.is_finite() || determinant.abs() < SINGULAR_DETERMINANT
        {
            return Err(AlignError::InvalidTransform { determinant });
        }
        Ok(())
    }
}

/// Bilinear sample at `(x, y)`, or `None` outside `[0, w-1] x [0, h-1]`.
#[inline]
pub(crate) fn sample_bilinear<S, T>(image: &ArrayBase<S, Ix2>, x: f64, y: f64) -> Option<f64>
where
    S: Data<Elem = T>,
    T: Sample,
{
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return None;
    }
    // written so NaN coordinates fall through to None
    if !(x >= 0.0 && y >= 0.0 && x <= (cols - 1) as f64 && y <= (rows - 1) as f64) {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(cols - 1);
    let y1 = (y0 + 1).min(rows - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image[[y0, x0]].to_f64();
    let p01 = image[[y0, x1]].to_f64();
    let p10 = image[[y1, x0]].to_f64();
    let p11 = image[[y1, x1]].to_f64();

    Some(
        p00 * (1.0 - fx) * (1.0 - fy)
            + p01 * fx * (1.0 - fy)
            + p10 * (1.0 - fx) * fy
            + p11 * fx * fy,
    )
}

/// Warps `image` into an `output_size` = `(rows, cols)` grid.
///
/// Output pixel `(x, y)` takes the bilinear sample of `image` at
/// `transform.map_point(x, y)`; the transform therefore goes from output
/// coordinates back to source coordinates, the same convention the ECC
/// estimator produces. Pixels that map outside the source are zero.
pub fn warp<S, T>(
    image: &ArrayBase<S, Ix2>,
    transform: &Transform,
    output_size: (usize, usize),
) -> Result<Array2<T>, AlignError>
where
    S: Data<Elem = T>,
    T: Sample,
{
    transform.check_invertible()?;
    tracing::trace!(
        rows = output_size.0,
        cols = output_size.1,
        rotation_degrees = transform.rotation_degrees(),
        "warping image"
    );

    Ok(Array2::from_shape_fn(output_size, |(row, col)| {
        let (x, y) = transform.map_point(col as f64, row as f64);
        sample_bilinear(image, x, y)
            .map(T::from_f64)
            .unwrap_or_default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(rows: usize, cols: usize) -> Array2<u16> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * 100 + c * 7) as u16)
    }

    #[test]
    fn test_identity_warp_is_exact() {
        let image = ramp(12, 17);
        let warped = warp(&image, &Transform::identity(), image.dim()).unwrap();
        assert_eq!(warped, image);
    }

    #[test]
    fn test_translation_moves_content_and_fills_zero() {
        let image = ramp(8, 8);
        // output (x, y) reads source (x + 2, y + 1)
        let warped = warp(&image, &Transform::translation(2.0, 1.0), (8, 8)).unwrap();
        assert_eq!(warped[[0, 0]], image[[1, 2]]);
        assert_eq!(warped[[6, 5]], image[[7, 7]]);
        assert_eq!(warped[[7, 0]], 0);
        assert_eq!(warped[[0, 6]], 0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let image = ndarray::arr2(&[[0.0f64, 10.0], [20.0, 30.0]]);
        let value = sample_bilinear(&image, 0.5, 0.5).unwrap();
        assert_abs_diff_eq!(value, 15.0, epsilon = 1e-12);
        assert!(sample_bilinear(&image, 1.5, 0.0).is_none());
        assert!(sample_bilinear(&image, f64::NAN, 0.0).is_none());
    }

    #[test]
    fn test_output_size_differs_from_input() {
        let image = ramp(10, 10);
        let warped = warp(&image, &Transform::identity(), (4, 6)).unwrap();
        assert_eq!(warped.dim(), (4, 6));
        assert_eq!(warped[[3, 5]], image[[3, 5]]);
    }

    #[test]
    fn test_singular_transform_rejected() {
        let image = ramp(4, 4);
        let flat = Transform::new([[1.0, 2.0, 0.0], [0.5, 1.0, 0.0]]);
        assert!(matches!(
            warp(&image, &flat, (4, 4)),
            Err(AlignError::InvalidTransform { .. })
        ));
        let broken = Transform::new([[f64::NAN, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert!(broken.inverse().is_err());
    }

    #[test]
    fn test_inverse_and_compose() {
        let t = Transform::euclidean(0.3, 4.0, -2.5);
        let round_trip = t.compose(&t.inverse().unwrap());
        for (row, expected) in round_trip.matrix.iter().zip(Transform::IDENTITY.matrix.iter()) {
            for (a, b) in row.iter().zip(expected.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
        assert_abs_diff_eq!(t.rotation_radians(), 0.3, epsilon = 1e-12);
        assert_eq!(t.offset(), (4.0, -2.5));
    }

    #[test]
    fn test_rotation_about_keeps_center_fixed() {
        let t = Transform::rotation_about((5.0, 3.0), 30.0);
        let (x, y) = t.map_point(5.0, 3.0);
        assert_abs_diff_eq!(x, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_integer_samples_saturate() {
        assert_eq!(u8::from_f64(300.4), 255);
        assert_eq!(u8::from_f64(-3.0), 0);
        assert_eq!(u16::from_f64(1234.6), 1235);
    }
}
