//! Span carried through the processing of one frame pair.

use instant::Instant;
use tracing::{span, Level, Span};
use uuid::Uuid;

pub struct PairSpan {
    span: Span,
    start_time: Instant,
    index: usize,
}

impl PairSpan {
    pub fn new(index: usize, frame: &str, run_id: Uuid) -> Self {
        let pair_id = super::new_correlation_id();
        let span = span!(
            Level::INFO,
            "frame_pair",
            index,
            frame,
            run_id = %run_id,
            correlation_id = %pair_id
        );
        Self {
            span,
            start_time: Instant::now(),
            index,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn record_success(&self, outputs: usize) {
        tracing::info!(
            parent: &self.span,
            index = self.index,
            outputs,
            duration_ms = self.elapsed_ms(),
            "frame pair processed"
        );
    }

    pub fn record_failure(&self, error: &anyhow::Error) {
        tracing::error!(
            parent: &self.span,
            index = self.index,
            duration_ms = self.elapsed_ms(),
            error = %format!("{:#}", error),
            "frame pair failed"
        );
    }
}
