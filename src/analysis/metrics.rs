use anyhow::ensure;
use ndarray::{s, Array2};

use crate::algorithms::{Sample, Transform};

/// Mean absolute difference of two images, ignoring a `margin` wide border
/// where a warp typically leaves zero fill.
pub fn mean_absolute_error<T: Sample>(a: &Array2<T>, b: &Array2<T>, margin: usize) -> crate::Result<f64> {
    ensure!(
        a.dim() == b.dim(),
        "cannot compare images of shape {:?} and {:?}",
        a.dim(),
        b.dim()
    );
    let (rows, cols) = a.dim();
    ensure!(
        rows > 2 * margin && cols > 2 * margin,
        "margin {} leaves nothing of a {}x{} image",
        margin,
        cols,
        rows
    );

    let region = s![margin..rows - margin, margin..cols - margin];
    let a = a.slice(region);
    let b = b.slice(region);
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x.to_f64() - y.to_f64()).abs())
        .sum();
    Ok(total / a.len() as f64)
}

pub fn calculate_translation_error(result: &Transform, ground_truth: (f64, f64)) -> f64 {
    let (dx, dy) = result.offset();
    ((dx - ground_truth.0).powi(2) + (dy - ground_truth.1).powi(2)).sqrt()
}

pub fn calculate_rotation_error(result: &Transform, ground_truth_degrees: f64) -> f64 {
    (result.rotation_degrees() - ground_truth_degrees).abs()
}
