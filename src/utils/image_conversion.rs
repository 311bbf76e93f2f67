use anyhow::anyhow;
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Convert a 16-bit grayscale buffer to a `(rows, cols)` array
pub fn gray16_to_array(image: &Gray16Image) -> crate::Result<Array2<u16>> {
    let (width, height) = image.dimensions();
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        image.as_raw().clone(),
    )?)
}

/// Convert an 8-bit grayscale buffer to a 16-bit array, keeping sample values
pub fn gray8_to_array(image: &GrayImage) -> crate::Result<Array2<u16>> {
    let (width, height) = image.dimensions();
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        image.as_raw().iter().map(|&v| v as u16).collect(),
    )?)
}

/// Convert a `(rows, cols)` array back into a 16-bit grayscale buffer
pub fn array_to_gray16(array: &Array2<u16>) -> crate::Result<Gray16Image> {
    let (rows, cols) = array.dim();
    let data: Vec<u16> = array.iter().copied().collect();
    Gray16Image::from_raw(cols as u32, rows as u32, data)
        .ok_or_else(|| anyhow!("Failed to create 16-bit image from {}x{} array", cols, rows))
}
