//! Registration of the onband frame onto the offband frame.

use ndarray::Array2;

use crate::algorithms::{warp, EccAligner, Transform};
use crate::config::{AlignmentConfig, AlignmentMode};

/// Produces the destination-to-source transform that lines the onband
/// frame up with the offband frame.
pub trait BandAligner: Send + Sync {
    fn name(&self) -> &str;

    fn transform_for(&self, onband: &Array2<f64>, offband: &Array2<f64>) -> crate::Result<Transform>;

    /// Warps `onband` onto the offband grid; areas without overlap become 0.
    fn align(&self, onband: &Array2<f64>, offband: &Array2<f64>) -> crate::Result<Array2<f64>> {
        let transform = self.transform_for(onband, offband)?;
        Ok(warp(onband, &transform, offband.dim())?)
    }
}

/// Fixed rotation about the image centre followed by a fixed shift.
#[derive(Debug, Clone, Copy)]
pub struct ManualAligner {
    pub angle: f64,
    pub move_left: f64,
    pub move_top: f64,
}

impl ManualAligner {
    /// Forward motion of the onband picture for an image of `(rows, cols)`.
    pub fn forward_motion(&self, (rows, cols): (usize, usize)) -> Transform {
        let center = (cols as f64 / 2.0, rows as f64 / 2.0);
        Transform::translation(self.move_left, self.move_top)
            .compose(&Transform::rotation_about(center, self.angle))
    }
}

impl BandAligner for ManualAligner {
    fn name(&self) -> &str {
        "manual"
    }

    fn transform_for(&self, onband: &Array2<f64>, _offband: &Array2<f64>) -> crate::Result<Transform> {
        Ok(self.forward_motion(onband.dim()).inverse()?)
    }
}

/// Per-pair ECC estimation with the offband frame as reference.
#[derive(Debug, Clone)]
pub struct EccBandAligner {
    aligner: EccAligner,
}

impl EccBandAligner {
    pub fn new(aligner: EccAligner) -> Self {
        Self { aligner }
    }
}

impl BandAligner for EccBandAligner {
    fn name(&self) -> &str {
        "ecc"
    }

    fn transform_for(&self, onband: &Array2<f64>, offband: &Array2<f64>) -> crate::Result<Transform> {
        let alignment = self.aligner.estimate(offband, onband)?;
        let (dx, dy) = alignment.transform.offset();
        tracing::debug!(
            dx,
            dy,
            rotation_degrees = alignment.transform.rotation_degrees(),
            correlation = alignment.correlation,
            iterations = alignment.iterations,
            converged = alignment.converged,
            "estimated band alignment"
        );
        Ok(alignment.transform)
    }
}

pub fn aligner_from_config(config: &AlignmentConfig) -> Box<dyn BandAligner> {
    match config.mode {
        AlignmentMode::Manual => Box::new(ManualAligner {
            angle: config.angle,
            move_left: config.move_left,
            move_top: config.move_top,
        }),
        AlignmentMode::Ecc => Box::new(EccBandAligner::new(config.aligner())),
    }
}
