use clap::{Args, Parser, Subcommand};
use so2_camera::config::{AlignmentMode, Config, ConfigFormat, ConfigOverrides, Region};
use so2_camera::logging::{init_logging, LoggingConfig};
use so2_camera::pipeline::run_pipeline;
use so2_camera::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "so2cam")]
#[command(about = "SO2 camera processing: band alignment, absorbance and calibration")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the translation and rotation between two images
    Align {
        /// Reference image
        reference: PathBuf,

        /// Image to align onto the reference
        moving: PathBuf,

        /// Motion model: translation, euclidean or affine
        #[arg(short, long, default_value = "euclidean")]
        motion: MotionType,

        #[arg(long, default_value = "200")]
        max_iterations: usize,

        #[arg(long, default_value = "1e-10")]
        epsilon: f64,

        /// Native bit depth of the input samples; taken from the files when omitted
        #[arg(long)]
        bit_depth: Option<u32>,

        /// Write the aligned moving image here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the estimation result as JSON here
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Convert onband/offband frame pairs into calibrated SO2 maps
    Eval(EvalArgs),

    /// Parse a timestamp out of a file name
    Timestamp {
        /// Regex with named groups year, month, day, hour, minute, second, millisecond
        #[arg(long, default_value = DEFAULT_TIMESTAMP_PATTERN)]
        pattern: String,

        text: String,
    },
}

#[derive(Args)]
struct EvalArgs {
    /// Config file (TOML or JSON); so2cam.toml is used when present
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Write the resolved configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    #[arg(long)]
    glob_dark_onband: Option<String>,
    #[arg(long)]
    glob_dark_offband: Option<String>,
    #[arg(long)]
    glob_files_onband: Option<String>,
    #[arg(long)]
    glob_files_offband: Option<String>,
    #[arg(long)]
    glob_bg_onband: Option<String>,
    #[arg(long)]
    glob_bg_offband: Option<String>,

    #[arg(long)]
    use_bg_correction: Option<bool>,

    /// Output crop as [top, bottom, left, right]
    #[arg(long)]
    roi: Option<Region>,

    /// Plume-free background area as [top, bottom, left, right]
    #[arg(long)]
    plume_free_field: Option<Region>,

    /// Absorbance per ppm·m
    #[arg(long)]
    calib: Option<f64>,

    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Font for the figure title and colour bar labels
    #[arg(long)]
    font: Option<PathBuf>,

    /// Band alignment: manual or ecc
    #[arg(long, value_parser = parse_alignment_mode)]
    alignment: Option<AlignmentMode>,

    /// Rotation between the two bands in degrees
    #[arg(long, allow_hyphen_values = true)]
    angle: Option<f64>,

    /// Horizontal offset between the two bands in pixels
    #[arg(long, allow_hyphen_values = true)]
    move_left: Option<f64>,

    /// Vertical offset between the two bands in pixels
    #[arg(long, allow_hyphen_values = true)]
    move_top: Option<f64>,

    #[arg(long)]
    motion: Option<MotionType>,

    #[arg(long)]
    max_iterations: Option<usize>,

    #[arg(long)]
    epsilon: Option<f64>,

    /// Global log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

impl EvalArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            glob_dark_onband: self.glob_dark_onband.clone(),
            glob_dark_offband: self.glob_dark_offband.clone(),
            glob_files_onband: self.glob_files_onband.clone(),
            glob_files_offband: self.glob_files_offband.clone(),
            glob_bg_onband: self.glob_bg_onband.clone(),
            glob_bg_offband: self.glob_bg_offband.clone(),
            use_bg_correction: self.use_bg_correction,
            roi: self.roi,
            plume_free_field: self.plume_free_field,
            calib: self.calib,
            outdir: self.outdir.clone(),
            font_path: self.font.clone(),
            alignment_mode: self.alignment,
            angle: self.angle,
            move_left: self.move_left,
            move_top: self.move_top,
            motion_type: self.motion,
            max_iterations: self.max_iterations,
            termination_eps: self.epsilon,
            log_level: self.log_level.clone(),
        }
    }
}

fn parse_alignment_mode(s: &str) -> std::result::Result<AlignmentMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "manual" => Ok(AlignmentMode::Manual),
        "ecc" => Ok(AlignmentMode::Ecc),
        other => Err(format!("unknown alignment mode `{}` (expected manual or ecc)", other)),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Align {
            reference,
            moving,
            motion,
            max_iterations,
            epsilon,
            bit_depth,
            output,
            json,
        } => {
            let _guard = init_logging(&LoggingConfig::default().with_verbosity(cli.verbose))?;
            let aligner = EccAligner::new()
                .with_motion_type(motion)
                .with_max_iterations(max_iterations)
                .with_termination_eps(epsilon);
            handle_align(reference, moving, aligner, bit_depth, output, json)?;
        }
        Commands::Eval(args) => {
            let config = Config::resolve(args.config_file.as_deref(), &args.overrides())?;
            if let Some(path) = args.save_config {
                config.save_to_file(&path, ConfigFormat::from_path(&path))?;
                println!("Configuration saved to {}", path.display());
                return Ok(());
            }
            let _guard = init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;
            handle_eval(&config)?;
        }
        Commands::Timestamp { pattern, text } => {
            let timestamp = parse_timestamp(&pattern, &text)?;
            println!("{}", timestamp.format("%Y-%m-%d %H:%M:%S%.3f"));
        }
    }

    Ok(())
}

fn handle_align(
    reference_path: PathBuf,
    moving_path: PathBuf,
    aligner: EccAligner,
    bit_depth: Option<u32>,
    output: Option<PathBuf>,
    json: Option<PathBuf>,
) -> anyhow::Result<()> {
    let FileAlignment {
        reference,
        moving,
        result,
        ..
    } = align_files(&reference_path, &moving_path, aligner, bit_depth)?;

    println!(
        "dx: {:.4}px, dy: {:.4}px, alpha: {:.4}°",
        result.translation.0, result.translation.1, result.rotation_degrees
    );
    println!(
        "correlation: {:.6}, iterations: {}{}, time: {:.1}ms",
        result.correlation,
        result.iterations,
        if result.converged { "" } else { " (iteration limit)" },
        result.processing_time_ms
    );

    if let Some(path) = output {
        let aligned: ndarray::Array2<u16> = warp(&moving.pixels, &result.transform, reference.pixels.dim())?;
        save_image_u16(&path, &aligned)?;
        println!("Aligned image saved to {}", path.display());
    }

    if let Some(path) = json {
        std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
        println!("Result saved to {}", path.display());
    }

    Ok(())
}

fn handle_eval(config: &Config) -> anyhow::Result<()> {
    let summary = run_pipeline(config)?;
    println!(
        "Processed {} frame pair(s), {} failed, {} file(s) written in {:.1}s",
        summary.processed,
        summary.failed,
        summary.outputs.len(),
        summary.elapsed_ms / 1000.0
    );
    if summary.failed > 0 {
        anyhow::bail!("{} frame pair(s) could not be processed", summary.failed);
    }
    Ok(())
}
