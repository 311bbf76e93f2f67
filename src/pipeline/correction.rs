//! Dark-frame and vignette correction of raw band frames.

use anyhow::{bail, ensure, Context};
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::data::{discover, load_image_f64, mean_of_files};

/// Per-band correction frames: `(raw - dark) / vignette`.
#[derive(Debug, Clone)]
pub struct BandCorrection {
    pub band: &'static str,
    /// Mean dark frame; `None` when no dark frames were given.
    pub dark: Option<Array2<f64>>,
    /// Background normalised to a maximum of 1; `None` disables vignette
    /// correction.
    pub vignette: Option<Array2<f64>>,
}

impl BandCorrection {
    pub fn new(band: &'static str, dark: Option<Array2<f64>>, vignette: Option<Array2<f64>>) -> Self {
        Self {
            band,
            dark,
            vignette,
        }
    }

    /// Loads dark and background frames from glob patterns. Empty patterns
    /// or patterns without matches skip the corresponding step.
    pub fn from_globs(band: &'static str, dark_glob: &str, background_glob: &str) -> crate::Result<Self> {
        let dark_files = discover(dark_glob)?;
        let dark = if dark_files.is_empty() {
            tracing::warn!(band, pattern = dark_glob, "no dark frames, skipping dark subtraction");
            None
        } else {
            tracing::info!(band, count = dark_files.len(), "averaging dark frames");
            Some(mean_of_files(&dark_files).with_context(|| format!("dark frames of {} band", band))?)
        };

        let background_files = discover(background_glob)?;
        let vignette = if background_files.is_empty() {
            tracing::warn!(
                band,
                pattern = background_glob,
                "no background frames, skipping vignette correction"
            );
            None
        } else {
            tracing::info!(band, count = background_files.len(), "building vignette map");
            Some(scaled_background(&background_files, dark.as_ref())
                .with_context(|| format!("background frames of {} band", band))?)
        };

        Ok(Self::new(band, dark, vignette))
    }

    pub fn apply(&self, raw: &Array2<f64>) -> crate::Result<Array2<f64>> {
        let mut corrected = raw.clone();
        if let Some(dark) = &self.dark {
            ensure!(
                dark.dim() == raw.dim(),
                "{} band dark frame is {:?} but payload is {:?}",
                self.band,
                dark.dim(),
                raw.dim()
            );
            corrected -= dark;
        }
        if let Some(vignette) = &self.vignette {
            ensure!(
                vignette.dim() == raw.dim(),
                "{} band background is {:?} but payload is {:?}",
                self.band,
                vignette.dim(),
                raw.dim()
            );
            corrected /= vignette;
        }
        Ok(corrected)
    }

    pub fn load_and_apply(&self, path: &Path) -> crate::Result<Array2<f64>> {
        let raw = load_image_f64(path)?;
        self.apply(&raw)
            .with_context(|| format!("correcting {}", path.display()))
    }
}

/// Mean of the dark-subtracted background frames divided by its maximum.
pub fn scaled_background(paths: &[PathBuf], dark: Option<&Array2<f64>>) -> crate::Result<Array2<f64>> {
    let mut background = mean_of_files(paths)?;
    if let Some(dark) = dark {
        ensure!(
            dark.dim() == background.dim(),
            "dark frame is {:?} but background is {:?}",
            dark.dim(),
            background.dim()
        );
        // mean(b - d) == mean(b) - d
        background -= dark;
    }
    normalize_by_max(background)
}

pub fn normalize_by_max(mut frame: Array2<f64>) -> crate::Result<Array2<f64>> {
    let max = frame.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0 && max.is_finite()) {
        bail!("background maximum is {}, cannot normalise", max);
    }
    frame.mapv_inplace(|v| v / max);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_apply_dark_and_vignette() {
        let correction = BandCorrection::new(
            "on",
            Some(arr2(&[[10.0, 10.0], [10.0, 10.0]])),
            Some(arr2(&[[1.0, 0.5], [0.25, 1.0]])),
        );
        let raw = arr2(&[[110.0, 60.0], [35.0, 10.0]]);
        let corrected = correction.apply(&raw).unwrap();
        assert_eq!(corrected, arr2(&[[100.0, 100.0], [100.0, 0.0]]));
    }

    #[test]
    fn test_no_frames_is_identity() {
        let correction = BandCorrection::new("off", None, None);
        let raw = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(correction.apply(&raw).unwrap(), raw);
    }

    #[test]
    fn test_shape_mismatch() {
        let correction = BandCorrection::new("on", Some(Array2::zeros((3, 3))), None);
        assert!(correction.apply(&Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn test_normalize_by_max() {
        let scaled = normalize_by_max(arr2(&[[2.0, 4.0], [1.0, 8.0]])).unwrap();
        assert_abs_diff_eq!(scaled[[1, 1]], 1.0);
        assert_abs_diff_eq!(scaled[[1, 0]], 0.125);
        assert!(normalize_by_max(Array2::zeros((2, 2))).is_err());
        assert!(normalize_by_max(arr2(&[[-1.0, -2.0]])).is_err());
    }

    #[test]
    fn test_empty_globs_skip_steps() {
        let correction = BandCorrection::from_globs("on", "", "").unwrap();
        assert!(correction.dark.is_none());
        assert!(correction.vignette.is_none());
    }
}
