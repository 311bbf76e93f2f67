#![allow(dead_code)]

use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use so2_camera::Transform;

/// Smooth synthetic scene: a sum of Gaussian blobs over a constant level.
pub struct Scene {
    blobs: Vec<(f64, f64, f64, f64)>,
    level: f64,
}

impl Scene {
    pub fn random(seed: u64, size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let extent = size as f64;
        let blobs = (0..24)
            .map(|_| {
                (
                    rng.gen_range(-8.0..extent + 8.0),
                    rng.gen_range(-8.0..extent + 8.0),
                    rng.gen_range(6.0..12.0),
                    rng.gen_range(4000.0..14000.0),
                )
            })
            .collect();
        Self {
            blobs,
            level: 8000.0,
        }
    }

    pub fn value(&self, x: f64, y: f64) -> f64 {
        self.level
            + self
                .blobs
                .iter()
                .map(|&(bx, by, sigma, amp)| {
                    let d2 = (x - bx).powi(2) + (y - by).powi(2);
                    amp * (-d2 / (2.0 * sigma * sigma)).exp()
                })
                .sum::<f64>()
    }

    /// Pixel `(x, y)` shows the scene at `transform.map_point(x, y)`.
    pub fn render(&self, shape: (usize, usize), transform: &Transform) -> Array2<u16> {
        Array2::from_shape_fn(shape, |(r, c)| {
            let (x, y) = transform.map_point(c as f64, r as f64);
            self.value(x, y).round().clamp(0.0, 65535.0) as u16
        })
    }
}

/// Largest distance between where `a` and `b` send a few sample points.
pub fn max_point_error(a: &Transform, b: &Transform, shape: (usize, usize)) -> f64 {
    let (rows, cols) = (shape.0 as f64, shape.1 as f64);
    let points = [
        (0.0, 0.0),
        (cols - 1.0, 0.0),
        (0.0, rows - 1.0),
        (cols - 1.0, rows - 1.0),
        (cols / 2.0, rows / 2.0),
    ];
    points
        .iter()
        .map(|&(x, y)| {
            let (ax, ay) = a.map_point(x, y);
            let (bx, by) = b.map_point(x, y);
            ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
        })
        .fold(0.0, f64::max)
}
