//! Persistence of calibrated maps: colour-mapped PNG figures and `.npy`
//! arrays readable by NumPy.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, bail, ensure, Context};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut};
use lazy_static::lazy_static;
use ndarray::Array2;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const COLORBAR_GAP: u32 = 8;
const COLORBAR_WIDTH: u32 = 16;
const TICK_LENGTH: u32 = 4;
const TICK_COUNT: usize = 5;
const TITLE_HEIGHT: u32 = 20;
const LABEL_WIDTH: u32 = 56;
const TEXT_SCALE: f32 = 13.0;
const INK: Rgb<u8> = Rgb([0, 0, 0]);

lazy_static! {
    static ref NPY_SHAPE_RE: Regex = Regex::new(r"'shape':\s*\((\d+),\s*(\d+),?\s*\)").unwrap();
}

/// Output name for a pair: the onband file stem without the `_top` marker.
pub fn output_stem(onband: &Path) -> String {
    onband
        .file_stem()
        .map(|s| s.to_string_lossy().replace("_top", ""))
        .unwrap_or_else(|| "frame".to_string())
}

/// Directories for figures and arrays below `outdir`.
pub fn output_dirs(outdir: &Path) -> (PathBuf, PathBuf) {
    (outdir.join("figures"), outdir.join("data"))
}

/// The "hot" colour map: black through red and yellow to white, `t` in `0..=1`.
pub fn hot_colormap(t: f64) -> Rgb<u8> {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let red = if t < 0.365079 {
        0.0416 + (1.0 - 0.0416) * t / 0.365079
    } else {
        1.0
    };
    let green = ((t - 0.365079) / (0.746032 - 0.365079)).clamp(0.0, 1.0);
    let blue = ((t - 0.746032) / (1.0 - 0.746032)).clamp(0.0, 1.0);
    Rgb([
        (red * 255.0).round() as u8,
        (green * 255.0).round() as u8,
        (blue * 255.0).round() as u8,
    ])
}

/// Font and title used to annotate figures.
pub struct FigureText {
    font: FontVec,
    title: String,
}

impl FigureText {
    pub fn new(font: FontVec, title: impl Into<String>) -> Self {
        Self {
            font,
            title: title.into(),
        }
    }

    /// Loads a TrueType/OpenType font from disk.
    pub fn load(font_path: &Path, title: impl Into<String>) -> crate::Result<Self> {
        let data = fs::read(font_path)
            .with_context(|| format!("failed to read font {}", font_path.display()))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow!("invalid font {}: {}", font_path.display(), e))?;
        Ok(Self::new(font, title))
    }
}

/// Pixel positions of the parts of a figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FigureLayout {
    pub width: u32,
    pub height: u32,
    /// First row of the map and the colour bar.
    pub map_top: u32,
    pub bar_left: u32,
    pub rows: u32,
}

impl FigureLayout {
    pub fn new(rows: usize, cols: usize, with_text: bool) -> Self {
        let (map_top, labels) = if with_text {
            (TITLE_HEIGHT, LABEL_WIDTH)
        } else {
            (0, 0)
        };
        let bar_left = cols as u32 + COLORBAR_GAP;
        Self {
            width: bar_left + COLORBAR_WIDTH + TICK_LENGTH + labels,
            height: rows as u32 + map_top,
            map_top,
            bar_left,
            rows: rows as u32,
        }
    }

    /// Figure row of colour bar position `t` (1 at the top).
    pub fn bar_row(&self, t: f64) -> u32 {
        let span = self.rows.saturating_sub(1) as f64;
        self.map_top + ((1.0 - t) * span).round() as u32
    }
}

fn tick_label(value: f64, span: f64) -> String {
    if span >= 10.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Renders `map` with the hot colour map scaled to its finite range, and a
/// vertical colour bar with tick marks on the right (maximum at the top).
/// With `text`, the title goes above the map and ticks get value labels.
pub fn render_figure(map: &Array2<f64>, text: Option<&FigureText>) -> crate::Result<RgbImage> {
    let (rows, cols) = map.dim();
    ensure!(rows > 0 && cols > 0, "cannot render an empty map");

    let (min, max) = map
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let (min, span) = if min.is_finite() && max > min {
        (min, max - min)
    } else {
        (0.0, 1.0)
    };

    let layout = FigureLayout::new(rows, cols, text.is_some());
    let mut figure = RgbImage::from_pixel(layout.width, layout.height, Rgb([255, 255, 255]));

    for ((r, c), v) in map.indexed_iter() {
        figure.put_pixel(c as u32, r as u32 + layout.map_top, hot_colormap((v - min) / span));
    }

    for y in 0..layout.rows {
        let t = if layout.rows > 1 {
            1.0 - y as f64 / (layout.rows - 1) as f64
        } else {
            1.0
        };
        let color = hot_colormap(t);
        for x in layout.bar_left..layout.bar_left + COLORBAR_WIDTH {
            figure.put_pixel(x, y + layout.map_top, color);
        }
    }

    let tick_left = (layout.bar_left + COLORBAR_WIDTH) as f32;
    let scale = PxScale::from(TEXT_SCALE);
    for i in 0..TICK_COUNT {
        let t = i as f64 / (TICK_COUNT - 1) as f64;
        let y = layout.bar_row(t) as f32;
        draw_line_segment_mut(
            &mut figure,
            (tick_left, y),
            (tick_left + TICK_LENGTH as f32 - 1.0, y),
            INK,
        );
        if let Some(text) = text {
            let label = tick_label(min + t * span, span);
            let label_y = (y - TEXT_SCALE / 2.0).max(0.0) as i32;
            draw_text_mut(
                &mut figure,
                INK,
                (tick_left + TICK_LENGTH as f32 + 2.0) as i32,
                label_y,
                scale,
                &text.font,
                &label,
            );
        }
    }

    if let Some(text) = text {
        draw_text_mut(&mut figure, INK, 2, 3, scale, &text.font, &text.title);
    }

    Ok(figure)
}

pub fn save_figure(path: &Path, map: &Array2<f64>, text: Option<&FigureText>) -> crate::Result<()> {
    let figure = render_figure(map, text)?;
    figure
        .save(path)
        .with_context(|| format!("failed to save figure {}", path.display()))
}

/// Writes `array` as a version 1.0 `.npy` file (`<f8`, C order).
pub fn write_npy(path: &Path, array: &Array2<f64>) -> crate::Result<()> {
    let (rows, cols) = array.dim();
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, cols
    );
    // magic + version + length field + header + '\n' is a multiple of 64
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');
    let header_len = u16::try_from(header.len()).context("npy header too long")?;

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for v in array.iter() {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a 2-D `<f8` C-order `.npy` file as written by [`write_npy`].
pub fn read_npy(path: &Path) -> crate::Result<Array2<f64>> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .with_context(|| format!("failed to read {}", path.display()))?;

    ensure!(bytes.len() >= 10 && bytes.starts_with(NPY_MAGIC), "{} is not an npy file", path.display());
    ensure!(bytes[6] == 1, "unsupported npy version {}.{}", bytes[6], bytes[7]);
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    ensure!(bytes.len() >= data_start, "truncated npy header");
    let header = std::str::from_utf8(&bytes[10..data_start]).context("npy header is not UTF-8")?;

    if !header.contains("'descr': '<f8'") || header.contains("'fortran_order': True") {
        bail!("only little-endian f8 arrays in C order are supported: {}", header.trim());
    }
    let caps = NPY_SHAPE_RE
        .captures(header)
        .with_context(|| format!("npy header without 2-D shape: {}", header.trim()))?;
    let rows: usize = caps[1].parse()?;
    let cols: usize = caps[2].parse()?;

    let data = &bytes[data_start..];
    ensure!(
        data.len() == rows * cols * 8,
        "npy data holds {} bytes, expected {}",
        data.len(),
        rows * cols * 8
    );
    let values: Vec<f64> = data
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Saves the requested outputs for one calibrated map and returns the
/// written paths.
pub fn save_outputs(
    outdir: &Path,
    stem: &str,
    map: &Array2<f64>,
    save_figures: bool,
    save_arrays: bool,
    text: Option<&FigureText>,
) -> crate::Result<Vec<PathBuf>> {
    let (figures_dir, data_dir) = output_dirs(outdir);
    let mut written = Vec::new();

    if save_figures {
        fs::create_dir_all(&figures_dir)
            .with_context(|| format!("failed to create {}", figures_dir.display()))?;
        let path = figures_dir.join(format!("{}.png", stem));
        save_figure(&path, map, text)?;
        written.push(path);
    }
    if save_arrays {
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join(format!("{}.npy", stem));
        write_npy(&path, map)?;
        written.push(path);
    }
    Ok(written)
}
