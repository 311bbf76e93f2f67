use anyhow::ensure;
use ndarray::Array2;

use crate::algorithms::{warp::sample_bilinear, Sample};

/// Number of samples taken along a profile when the caller has no preference.
pub const DEFAULT_PROFILE_SAMPLES: usize = 100;

/// Samples `image` along the segment from `start` to `end` (both `(x, y)`,
/// inclusive) with bilinear interpolation. Points outside the image yield
/// `NaN`.
pub fn line_profile<T: Sample>(
    image: &Array2<T>,
    start: (f64, f64),
    end: (f64, f64),
    samples: usize,
) -> crate::Result<Vec<f64>> {
    ensure!(samples >= 2, "a profile needs at least two samples, got {}", samples);

    let last = (samples - 1) as f64;
    Ok((0..samples)
        .map(|i| {
            let t = i as f64 / last;
            let x = start.0 + (end.0 - start.0) * t;
            let y = start.1 + (end.1 - start.1) * t;
            sample_bilinear(image, x, y).unwrap_or(f64::NAN)
        })
        .collect())
}
