//! Small separable filters used to prepare images for ECC.

use ndarray::Array2;

/// Mirror an index into `0..len` without repeating the edge sample
/// (`gfedcb|abcdefgh|gfedcba`).
#[inline]
pub fn reflect101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let period = 2 * (len - 1);
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

/// Sigma picked for a kernel size when none is given, `0.3*((k-1)*0.5 - 1) + 0.8`.
pub fn default_sigma(kernel_size: usize) -> f64 {
    0.3 * ((kernel_size as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

pub fn gaussian_kernel(kernel_size: usize, sigma: f64) -> Vec<f64> {
    let half = (kernel_size / 2) as f64;
    let weights: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let d = i as f64 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Gaussian smoothing with a square kernel. Even sizes are bumped to the
/// next odd size; sizes below 2 return the input unchanged.
pub fn gaussian_blur(image: &Array2<f64>, kernel_size: usize) -> Array2<f64> {
    if kernel_size < 2 {
        return image.clone();
    }
    let kernel_size = if kernel_size % 2 == 0 {
        kernel_size + 1
    } else {
        kernel_size
    };
    let kernel = gaussian_kernel(kernel_size, default_sigma(kernel_size));
    let half = (kernel_size / 2) as isize;
    let (rows, cols) = image.dim();

    let horizontal: Array2<f64> = Array2::from_shape_fn((rows, cols), |(r, c)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| *w * image[[r, reflect101(c as isize + k as isize - half, cols)]])
            .sum::<f64>()
    });

    Array2::<f64>::from_shape_fn((rows, cols), |(r, c)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| *w * horizontal[[reflect101(r as isize + k as isize - half, rows), c]])
            .sum::<f64>()
    })
}

/// Central-difference gradients `([-0.5, 0, 0.5])` along columns and rows.
pub fn central_gradients(image: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let (rows, cols) = image.dim();
    let grad_x = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let left = image[[r, reflect101(c as isize - 1, cols)]];
        let right = image[[r, reflect101(c as isize + 1, cols)]];
        0.5 * (right - left)
    });
    let grad_y = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let up = image[[reflect101(r as isize - 1, rows), c]];
        let down = image[[reflect101(r as isize + 1, rows), c]];
        0.5 * (down - up)
    });
    (grad_x, grad_y)
}
