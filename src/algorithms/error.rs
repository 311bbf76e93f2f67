use thiserror::Error;

use super::warp::Transform;

/// Failures raised by the alignment core.
///
/// None of these leave partial output behind: a failed estimate returns no
/// transform and a failed warp returns no image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("image shapes differ: reference is {reference:?}, moving is {moving:?}")]
    ShapeMismatch {
        reference: (usize, usize),
        moving: (usize, usize),
    },

    #[error("ECC did not converge after {iterations} iterations: {reason}")]
    ConvergenceFailure {
        reason: String,
        iterations: usize,
        /// Last transform produced before the failure, if any step succeeded.
        last_estimate: Option<Transform>,
    },

    #[error("transform cannot be inverted (determinant {determinant})")]
    InvalidTransform { determinant: f64 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl AlignError {
    pub(crate) fn convergence(
        reason: impl Into<String>,
        iterations: usize,
        last_estimate: Option<Transform>,
    ) -> Self {
        Self::ConvergenceFailure {
            reason: reason.into(),
            iterations,
            last_estimate,
        }
    }
}
