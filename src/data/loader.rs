use anyhow::{anyhow, bail, ensure, Context};
use image::DynamicImage;
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::utils::{array_to_gray16, gray16_to_array, gray8_to_array};

/// Single-channel camera frame at its native sample values.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pixels: Array2<u16>,
    /// Bits per sample of the file the frame came from (8 or 16).
    pub bit_depth: u32,
}

impl RawFrame {
    pub fn to_f64(&self) -> Array2<f64> {
        self.pixels.mapv(f64::from)
    }
}

pub fn load_frame<P: AsRef<Path>>(path: P) -> crate::Result<RawFrame> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("Image file does not exist: {}", path.display());
    }
    let image = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;

    let frame = match image {
        DynamicImage::ImageLuma8(gray) => RawFrame {
            pixels: gray8_to_array(&gray)?,
            bit_depth: 8,
        },
        DynamicImage::ImageLuma16(gray) => RawFrame {
            pixels: gray16_to_array(&gray)?,
            bit_depth: 16,
        },
        other => {
            tracing::debug!(
                path = %path.display(),
                color = ?other.color(),
                "converting multi-channel image to 16-bit luma"
            );
            RawFrame {
                pixels: gray16_to_array(&other.to_luma16())?,
                bit_depth: 16,
            }
        }
    };
    Ok(frame)
}

pub fn load_image_f64<P: AsRef<Path>>(path: P) -> crate::Result<Array2<f64>> {
    Ok(load_frame(path)?.to_f64())
}

/// Writes a 16-bit grayscale image; the format follows the file extension.
pub fn save_image_u16<P: AsRef<Path>>(path: P, pixels: &Array2<u16>) -> crate::Result<()> {
    let path = path.as_ref();
    array_to_gray16(pixels)?
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Files matching a glob pattern, sorted. An empty pattern matches nothing.
pub fn discover(pattern: &str) -> crate::Result<Vec<PathBuf>> {
    if pattern.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut paths = glob::glob(pattern)
        .with_context(|| format!("invalid glob pattern `{}`", pattern))?
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

/// Pixel-wise mean of several frames of equal shape.
pub fn mean_of_files(paths: &[PathBuf]) -> crate::Result<Array2<f64>> {
    let (first, rest) = paths
        .split_first()
        .ok_or_else(|| anyhow!("cannot average an empty list of frames"))?;

    let mut sum = load_image_f64(first)?;
    for path in rest {
        let frame = load_image_f64(path)?;
        ensure!(
            frame.dim() == sum.dim(),
            "frame {} has shape {:?}, expected {:?}",
            path.display(),
            frame.dim(),
            sum.dim()
        );
        sum += &frame;
    }
    sum /= paths.len() as f64;
    Ok(sum)
}

pub fn validate_image_size(image: &Array2<u16>, min_size: usize) -> crate::Result<()> {
    let (rows, cols) = image.dim();
    if cols < min_size || rows < min_size {
        return Err(anyhow!(
            "Image too small: {}x{}, minimum: {}x{}",
            cols,
            rows,
            min_size,
            min_size
        ));
    }
    Ok(())
}
