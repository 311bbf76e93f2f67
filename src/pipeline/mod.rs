//! SO2 camera processing: correction, band alignment, absorbance,
//! calibration and export of every onband/offband frame pair.

pub mod absorbance;
pub mod alignment;
pub mod correction;
pub mod output;

pub use absorbance::*;
pub use alignment::*;
pub use correction::*;
pub use output::*;

use anyhow::Context;
use instant::Instant;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::{AbsorbanceConfig, Config, OutputConfig};
use crate::data::discover;
use crate::logging::{new_correlation_id, PairSpan};

/// Onband and offband payload frames taken at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePair {
    pub onband: PathBuf,
    pub offband: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub processed: usize,
    pub failed: usize,
    pub outputs: Vec<PathBuf>,
    pub elapsed_ms: f64,
}

pub struct So2Pipeline {
    onband: BandCorrection,
    offband: BandCorrection,
    aligner: Box<dyn BandAligner>,
    absorbance: AbsorbanceConfig,
    output: OutputConfig,
    figure_text: Option<FigureText>,
    pairs: Vec<FramePair>,
    run_id: Uuid,
}

impl So2Pipeline {
    /// Discovers payload files and prepares the correction frames of both bands.
    pub fn new(config: &Config) -> crate::Result<Self> {
        let inputs = &config.inputs;
        let onband = BandCorrection::from_globs("onband", &inputs.glob_dark_onband, &inputs.glob_bg_onband)?;
        let offband =
            BandCorrection::from_globs("offband", &inputs.glob_dark_offband, &inputs.glob_bg_offband)?;

        let pairs = pair_files(
            discover(&inputs.glob_files_onband)?,
            discover(&inputs.glob_files_offband)?,
        );

        let figure_text = match &config.output.font_path {
            Some(font) if config.output.save_figures => {
                Some(FigureText::load(font, config.output.title.clone())?)
            }
            _ => None,
        };

        Ok(
            Self::with_parts(onband, offband, aligner_from_config(&config.alignment), config, pairs)
                .with_figure_text(figure_text),
        )
    }

    /// Pipeline over explicit pairs and correction frames.
    pub fn with_parts(
        onband: BandCorrection,
        offband: BandCorrection,
        aligner: Box<dyn BandAligner>,
        config: &Config,
        pairs: Vec<FramePair>,
    ) -> Self {
        Self {
            onband,
            offband,
            aligner,
            absorbance: config.absorbance.clone(),
            output: config.output.clone(),
            figure_text: None,
            pairs,
            run_id: new_correlation_id(),
        }
    }

    /// Annotates saved figures with a title and colour bar labels.
    pub fn with_figure_text(mut self, figure_text: Option<FigureText>) -> Self {
        self.figure_text = figure_text;
        self
    }

    pub fn pairs(&self) -> &[FramePair] {
        &self.pairs
    }

    /// Corrected, aligned and calibrated map of one pair.
    pub fn process_pair(&self, pair: &FramePair) -> crate::Result<Array2<f64>> {
        let onband = self.onband.load_and_apply(&pair.onband)?;
        let offband = self.offband.load_and_apply(&pair.offband)?;
        anyhow::ensure!(
            onband.dim() == offband.dim(),
            "onband frame is {:?} but offband frame is {:?}",
            onband.dim(),
            offband.dim()
        );

        let aligned = self
            .aligner
            .align(&onband, &offband)
            .with_context(|| format!("{} alignment", self.aligner.name()))?;
        let a = absorbance(&aligned, &offband, &self.absorbance)?;
        calibrate(&a, self.absorbance.calib, &self.absorbance.roi)
    }

    /// Processes and saves every pair. Failing pairs are logged and counted;
    /// they do not stop the others.
    pub fn run(&self) -> ProcessingSummary {
        let start = Instant::now();
        let run_span = tracing::info_span!("so2_pipeline", run_id = %self.run_id, pairs = self.pairs.len());
        let _enter = run_span.enter();
        tracing::info!(aligner = self.aligner.name(), outdir = %self.output.outdir.display(), "processing frame pairs");

        let results: Vec<crate::Result<Vec<PathBuf>>> = self
            .pairs
            .par_iter()
            .enumerate()
            .map(|(index, pair)| {
                let stem = output_stem(&pair.onband);
                let span = PairSpan::new(index, &stem, self.run_id);
                let _guard = span.span().enter();
                tracing::debug!(onband = %pair.onband.display(), offband = %pair.offband.display(), "processing");

                let result = self.process_pair(pair).and_then(|map| {
                    save_outputs(
                        &self.output.outdir,
                        &stem,
                        &map,
                        self.output.save_figures,
                        self.output.save_arrays,
                        self.figure_text.as_ref(),
                    )
                });
                match &result {
                    Ok(outputs) => span.record_success(outputs.len()),
                    Err(e) => span.record_failure(e),
                }
                result
            })
            .collect();

        let mut summary = ProcessingSummary::default();
        for result in results {
            match result {
                Ok(outputs) => {
                    summary.processed += 1;
                    summary.outputs.extend(outputs);
                }
                Err(_) => summary.failed += 1,
            }
        }
        summary.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "processing finished"
        );
        summary
    }
}

/// Zips the sorted onband and offband lists. Extra files of the longer
/// list are dropped with a warning.
pub fn pair_files(onband: Vec<PathBuf>, offband: Vec<PathBuf>) -> Vec<FramePair> {
    if onband.len() != offband.len() {
        tracing::warn!(
            onband = onband.len(),
            offband = offband.len(),
            "band file counts differ, extra files are ignored"
        );
    }
    onband
        .into_iter()
        .zip(offband)
        .map(|(onband, offband)| FramePair { onband, offband })
        .collect()
}

/// Convenience wrapper: build the pipeline from `config` and run it.
pub fn run_pipeline(config: &Config) -> crate::Result<ProcessingSummary> {
    let pipeline = So2Pipeline::new(config)?;
    if pipeline.pairs().is_empty() {
        tracing::warn!("no payload frame pairs found");
    }
    Ok(pipeline.run())
}
