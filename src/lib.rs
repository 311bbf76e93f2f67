pub mod algorithms;
pub mod analysis;
pub mod config;
pub mod data;
pub mod logging;
pub mod pipeline;
pub mod utils;

pub use algorithms::*;
pub use analysis::*;
pub use data::*;

use instant::Instant;
use ndarray::{ArrayBase, Data, Ix2};
use std::path::Path;

/// Summary of a pairwise ECC estimation, as printed and exported by the CLI.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlignmentResult {
    pub transform: Transform,
    pub translation: (f64, f64),
    pub rotation_degrees: f64,
    pub correlation: f64,
    pub iterations: usize,
    pub converged: bool,
    pub processing_time_ms: f64,
    pub motion_type: MotionType,
}

impl AlignmentResult {
    pub fn from_alignment(alignment: &EccAlignment, processing_time_ms: f64) -> Self {
        Self {
            transform: alignment.transform,
            translation: alignment.transform.offset(),
            rotation_degrees: alignment.transform.rotation_degrees(),
            correlation: alignment.correlation,
            iterations: alignment.iterations,
            converged: alignment.converged,
            processing_time_ms,
            motion_type: alignment.motion_type,
        }
    }
}

/// Runs `aligner` and records how long the estimation took.
pub fn timed_estimate<S1, S2, T>(
    aligner: &EccAligner,
    reference: &ArrayBase<S1, Ix2>,
    moving: &ArrayBase<S2, Ix2>,
) -> Result<AlignmentResult>
where
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    T: Sample,
{
    let start = Instant::now();
    let alignment = aligner.estimate(reference, moving)?;
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    Ok(AlignmentResult::from_alignment(&alignment, elapsed))
}

/// Loaded pair of frames together with their estimated alignment.
#[derive(Debug, Clone)]
pub struct FileAlignment {
    pub reference: RawFrame,
    pub moving: RawFrame,
    pub bit_depth: u32,
    pub result: AlignmentResult,
}

/// Loads two image files and aligns `moving` onto `reference`.
///
/// Without an explicit `bit_depth` the deeper of the two files' native
/// depths decides the rescale factor, so 8-bit files are used as they are.
pub fn align_files(
    reference_path: &Path,
    moving_path: &Path,
    aligner: EccAligner,
    bit_depth: Option<u32>,
) -> Result<FileAlignment> {
    let reference = load_frame(reference_path)?;
    let moving = load_frame(moving_path)?;
    validate_image_size(&reference.pixels, 8)?;
    validate_image_size(&moving.pixels, 8)?;

    let bit_depth = bit_depth.unwrap_or_else(|| reference.bit_depth.max(moving.bit_depth));
    let aligner = aligner.with_source_bit_depth(bit_depth);
    tracing::info!(
        reference = %reference_path.display(),
        moving = %moving_path.display(),
        motion = %aligner.motion_type(),
        bit_depth,
        "aligning images"
    );
    let result = timed_estimate(&aligner, &reference.pixels, &moving.pixels)?;
    Ok(FileAlignment {
        reference,
        moving,
        bit_depth,
        result,
    })
}

pub type Result<T> = anyhow::Result<T>;
