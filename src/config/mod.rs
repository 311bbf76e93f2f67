use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::algorithms::{ConvergenceCriteria, EccAligner, MotionType};
use crate::logging::LoggingConfig;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "so2cam.toml";

/// Complete processing configuration.
///
/// Built once at startup by [`Config::resolve`] (defaults, then config
/// file, then command line) and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub inputs: InputConfig,
    pub absorbance: AbsorbanceConfig,
    pub alignment: AlignmentConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Glob patterns locating the frames of each band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InputConfig {
    pub glob_dark_onband: String,
    pub glob_dark_offband: String,
    pub glob_files_onband: String,
    pub glob_files_offband: String,
    pub glob_bg_onband: String,
    pub glob_bg_offband: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsorbanceConfig {
    /// Normalise each band by its mean over `plume_free_field` before
    /// taking the ratio.
    pub use_bg_correction: bool,
    pub plume_free_field: Region,
    /// Area kept in the exported map.
    pub roi: Region,
    /// Absorbance per ppm·m.
    pub calib: f64,
    /// Larger absorbances come from non-overlapping warp borders and are zeroed.
    pub max_absorbance: f64,
    /// Smaller absorbances are treated as noise and zeroed.
    pub noise_floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    /// Fixed rotation and shift from the configuration.
    #[default]
    Manual,
    /// Per-pair ECC estimation.
    Ecc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub mode: AlignmentMode,
    /// Rotation between the two bands in degrees (manual mode).
    pub angle: f64,
    /// Horizontal offset between the two bands in pixels (manual mode).
    pub move_left: f64,
    /// Vertical offset between the two bands in pixels (manual mode).
    pub move_top: f64,
    pub motion_type: MotionType,
    pub max_iterations: usize,
    pub termination_eps: f64,
    pub gaussian_filter_size: usize,
    /// Bits per sample of the corrected frames handed to ECC.
    pub source_bit_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub outdir: PathBuf,
    pub save_figures: bool,
    pub save_arrays: bool,
    /// Figure title, drawn only when a font is configured.
    pub title: String,
    /// TrueType/OpenType font for the title and colour bar labels.
    pub font_path: Option<PathBuf>,
}

/// Rectangular pixel area `[top, bottom, left, right]`, bottom and right
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct Region {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Region {
    pub fn new(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bottom <= self.top || self.right <= self.left
    }

    /// The region clamped to an image of `(rows, cols)`.
    pub fn clamp_to(&self, (rows, cols): (usize, usize)) -> Region {
        Region {
            top: self.top.min(rows),
            bottom: self.bottom.min(rows),
            left: self.left.min(cols),
            right: self.right.min(cols),
        }
    }
}

impl From<[usize; 4]> for Region {
    fn from([top, bottom, left, right]: [usize; 4]) -> Self {
        Self::new(top, bottom, left, right)
    }
}

impl From<Region> for [usize; 4] {
    fn from(region: Region) -> Self {
        [region.top, region.bottom, region.left, region.right]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.top, self.bottom, self.left, self.right
        )
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    /// Accepts `[0, 940, 100, 1300]` as well as `0,940,100,1300`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
        let values = inner
            .split(',')
            .map(|v| v.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid region `{}`", s))?;
        let values: [usize; 4] = values
            .try_into()
            .map_err(|_| anyhow!("region `{}` must have four values: top, bottom, left, right", s))?;
        Ok(values.into())
    }
}

impl Default for AbsorbanceConfig {
    fn default() -> Self {
        Self {
            use_bg_correction: true,
            plume_free_field: Region::new(340, 620, 1088, 1300),
            roi: Region::new(0, 940, 100, 1300),
            calib: 0.171371 / 730.0,
            max_absorbance: 2000.0,
            noise_floor: 0.05,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        let criteria = ConvergenceCriteria::default();
        Self {
            mode: AlignmentMode::Manual,
            angle: -1.0,
            move_left: -1.0,
            move_top: -35.0,
            motion_type: MotionType::Euclidean,
            max_iterations: criteria.max_iterations,
            termination_eps: criteria.epsilon,
            gaussian_filter_size: 5,
            source_bit_depth: 16,
        }
    }
}

impl AlignmentConfig {
    pub fn aligner(&self) -> EccAligner {
        EccAligner::new()
            .with_motion_type(self.motion_type)
            .with_max_iterations(self.max_iterations)
            .with_termination_eps(self.termination_eps)
            .with_gaussian_filter_size(self.gaussian_filter_size)
            .with_source_bit_depth(self.source_bit_depth)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("out/"),
            save_figures: true,
            save_arrays: true,
            title: "SO2 path concentration (ppm m)".to_string(),
            font_path: None,
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub glob_dark_onband: Option<String>,
    pub glob_dark_offband: Option<String>,
    pub glob_files_onband: Option<String>,
    pub glob_files_offband: Option<String>,
    pub glob_bg_onband: Option<String>,
    pub glob_bg_offband: Option<String>,
    pub use_bg_correction: Option<bool>,
    pub roi: Option<Region>,
    pub plume_free_field: Option<Region>,
    pub calib: Option<f64>,
    pub outdir: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub alignment_mode: Option<AlignmentMode>,
    pub angle: Option<f64>,
    pub move_left: Option<f64>,
    pub move_top: Option<f64>,
    pub motion_type: Option<MotionType>,
    pub max_iterations: Option<usize>,
    pub termination_eps: Option<f64>,
    pub log_level: Option<String>,
}

fn set<T>(target: &mut T, value: &Option<T>)
where
    T: Clone,
{
    if let Some(value) = value {
        *target = value.clone();
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON config {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("invalid TOML config {}", path.display()))
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let path = path.as_ref();
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Defaults, overlaid by the config file, overlaid by `overrides`.
    ///
    /// Without an explicit `config_file` the [`DEFAULT_CONFIG_FILE`] is
    /// used when it exists; an explicit file that cannot be read is an error.
    pub fn resolve(config_file: Option<&Path>, overrides: &ConfigOverrides) -> crate::Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_overrides(overrides);

        if let Err(errors) = config.validate() {
            bail!("invalid configuration:\n  - {}", errors.join("\n  - "));
        }
        Ok(config)
    }

    fn apply_overrides(&mut self, o: &ConfigOverrides) {
        set(&mut self.inputs.glob_dark_onband, &o.glob_dark_onband);
        set(&mut self.inputs.glob_dark_offband, &o.glob_dark_offband);
        set(&mut self.inputs.glob_files_onband, &o.glob_files_onband);
        set(&mut self.inputs.glob_files_offband, &o.glob_files_offband);
        set(&mut self.inputs.glob_bg_onband, &o.glob_bg_onband);
        set(&mut self.inputs.glob_bg_offband, &o.glob_bg_offband);
        set(&mut self.absorbance.use_bg_correction, &o.use_bg_correction);
        set(&mut self.absorbance.roi, &o.roi);
        set(&mut self.absorbance.plume_free_field, &o.plume_free_field);
        set(&mut self.absorbance.calib, &o.calib);
        set(&mut self.output.outdir, &o.outdir);
        if o.font_path.is_some() {
            self.output.font_path = o.font_path.clone();
        }
        set(&mut self.alignment.mode, &o.alignment_mode);
        set(&mut self.alignment.angle, &o.angle);
        set(&mut self.alignment.move_left, &o.move_left);
        set(&mut self.alignment.move_top, &o.move_top);
        set(&mut self.alignment.motion_type, &o.motion_type);
        set(&mut self.alignment.max_iterations, &o.max_iterations);
        set(&mut self.alignment.termination_eps, &o.termination_eps);
        set(&mut self.logging.global_level, &o.log_level);
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(self.absorbance.calib.is_finite() && self.absorbance.calib != 0.0) {
            errors.push("calib must be a finite, non-zero number".to_string());
        }

        if self.absorbance.roi.is_empty() {
            errors.push(format!("roi {} is empty", self.absorbance.roi));
        }

        if self.absorbance.use_bg_correction && self.absorbance.plume_free_field.is_empty() {
            errors.push(format!(
                "plume_free_field {} is empty",
                self.absorbance.plume_free_field
            ));
        }

        if self.absorbance.noise_floor > self.absorbance.max_absorbance {
            errors.push("noise_floor must not exceed max_absorbance".to_string());
        }

        let criteria = ConvergenceCriteria::new(
            self.alignment.max_iterations,
            self.alignment.termination_eps,
        );
        if let Err(e) = criteria.validate() {
            errors.push(format!("alignment: {}", e));
        }

        if !(1..=32).contains(&self.alignment.source_bit_depth) {
            errors.push("source_bit_depth must be between 1 and 32".to_string());
        }

        if let Some(font) = &self.output.font_path {
            if self.output.save_figures && !font.is_file() {
                errors.push(format!("font_path {} is not a file", font.display()));
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// JSON for `.json` files, TOML for everything else.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.absorbance.roi, Region::new(0, 940, 100, 1300));
        assert_eq!(
            config.absorbance.plume_free_field,
            Region::new(340, 620, 1088, 1300)
        );
        assert!((config.absorbance.calib - 0.171371 / 730.0).abs() < 1e-15);
        assert_eq!(config.alignment.move_top, -35.0);
        assert_eq!(config.alignment.max_iterations, 200);
        assert_eq!(config.output.outdir, PathBuf::from("out/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_region_parsing() {
        assert_eq!(
            "[0, 940, 100, 1300]".parse::<Region>().unwrap(),
            Region::new(0, 940, 100, 1300)
        );
        assert_eq!("1,2,3,4".parse::<Region>().unwrap(), Region::new(1, 2, 3, 4));
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("a,b,c,d".parse::<Region>().is_err());
        assert_eq!(
            Region::new(0, 940, 100, 1300).clamp_to((500, 800)),
            Region::new(0, 500, 100, 800)
        );
    }

    #[test]
    fn test_toml_and_json_round_trip() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.alignment.mode = AlignmentMode::Ecc;
        config.inputs.glob_files_onband = "images/*_top.png".to_string();

        let toml_path = dir.path().join("config.toml");
        config.save_to_file(&toml_path, ConfigFormat::Toml).unwrap();
        assert_eq!(Config::load_from_file(&toml_path).unwrap(), config);

        let json_path = dir.path().join("config.json");
        config
            .save_to_file(&json_path, ConfigFormat::from_path(&json_path))
            .unwrap();
        assert_eq!(Config::load_from_file(&json_path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[alignment]\nangle = 2.5\nmode = \"ecc\"\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.alignment.angle, 2.5);
        assert_eq!(config.alignment.mode, AlignmentMode::Ecc);
        assert_eq!(config.alignment.move_top, -35.0);
        assert!(config.absorbance.use_bg_correction);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.toml");
        fs::write(&path, "[absorbance]\ncalib = 0.5\n[output]\noutdir = \"from-file\"\n").unwrap();

        let overrides = ConfigOverrides {
            outdir: Some(PathBuf::from("from-cli")),
            angle: Some(3.0),
            ..Default::default()
        };
        let config = Config::resolve(Some(&path), &overrides).unwrap();
        assert_eq!(config.absorbance.calib, 0.5);
        assert_eq!(config.output.outdir, PathBuf::from("from-cli"));
        assert_eq!(config.alignment.angle, 3.0);
    }

    #[test]
    fn test_log_level_override() {
        let overrides = ConfigOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let config = Config::resolve(None, &overrides).unwrap();
        assert_eq!(config.logging.global_level, "debug");
        assert_eq!(config.logging.pipeline_level, "info");

        let overrides = ConfigOverrides {
            log_level: Some("loud".to_string()),
            ..Default::default()
        };
        assert!(Config::resolve(None, &overrides).is_err());
    }

    #[test]
    fn test_font_override_must_exist() {
        let overrides = ConfigOverrides {
            font_path: Some(PathBuf::from("/no/such/font.ttf")),
            ..Default::default()
        };
        assert!(Config::resolve(None, &overrides).is_err());

        let mut config = Config::default();
        config.output.font_path = Some(PathBuf::from("/no/such/font.ttf"));
        config.output.save_figures = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::resolve(
            Some(Path::new("/no/such/config.toml")),
            &ConfigOverrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = Config::default();
        config.absorbance.calib = 0.0;
        config.absorbance.roi = Region::new(10, 5, 0, 10);
        config.alignment.max_iterations = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
