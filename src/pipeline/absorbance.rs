//! Apparent absorbance of the aligned band pair and its calibration to
//! SO2 column density.

use anyhow::{bail, ensure};
use ndarray::{s, Array2};

use crate::config::{AbsorbanceConfig, Region};

/// Mean over `region`, clamped to the image.
pub fn region_mean(image: &Array2<f64>, region: &Region) -> crate::Result<f64> {
    let r = region.clamp_to(image.dim());
    if r.is_empty() {
        bail!("region {} lies outside the {:?} image", region, image.dim());
    }
    image
        .slice(s![r.top..r.bottom, r.left..r.right])
        .mean()
        .ok_or_else(|| anyhow::anyhow!("region {} is empty", region))
}

/// `A = -log10(on / bg_on) + log10(off / bg_off)` with the plume-free
/// field as background, or `A = -log10(on / off)` without background
/// correction. Unusable values are zeroed afterwards, see [`clean_absorbance`].
pub fn absorbance(
    onband: &Array2<f64>,
    offband: &Array2<f64>,
    config: &AbsorbanceConfig,
) -> crate::Result<Array2<f64>> {
    ensure!(
        onband.dim() == offband.dim(),
        "onband is {:?} but offband is {:?}",
        onband.dim(),
        offband.dim()
    );

    let mut a = if config.use_bg_correction {
        let bg_on = region_mean(onband, &config.plume_free_field)?;
        let bg_off = region_mean(offband, &config.plume_free_field)?;
        tracing::debug!(bg_on, bg_off, "plume-free background levels");
        ndarray::Zip::from(onband)
            .and(offband)
            .map_collect(|&on, &off| -(on / bg_on).log10() + (off / bg_off).log10())
    } else {
        ndarray::Zip::from(onband)
            .and(offband)
            .map_collect(|&on, &off| -(on / off).log10())
    };

    clean_absorbance(&mut a, config.max_absorbance, config.noise_floor);
    Ok(a)
}

/// Zeroes non-finite values, values above `max_absorbance` (areas without
/// overlap after warping) and values below `noise_floor`.
pub fn clean_absorbance(a: &mut Array2<f64>, max_absorbance: f64, noise_floor: f64) {
    a.mapv_inplace(|v| {
        if !v.is_finite() || v > max_absorbance || v < noise_floor {
            0.0
        } else {
            v
        }
    });
}

/// Column density in ppm·m, cropped to `roi`.
pub fn calibrate(a: &Array2<f64>, calib: f64, roi: &Region) -> crate::Result<Array2<f64>> {
    ensure!(calib.is_finite() && calib != 0.0, "calibration factor must be non-zero");
    let r = roi.clamp_to(a.dim());
    if r.is_empty() {
        bail!("roi {} is empty for a {:?} image", roi, a.dim());
    }
    Ok(a.slice(s![r.top..r.bottom, r.left..r.right]).mapv(|v| v / calib))
}
