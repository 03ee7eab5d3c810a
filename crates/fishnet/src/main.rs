//! fishnet: semi-automated cell segmentation and per-cell quantification.
//!
//! Loads a z-by-channel stack of 16-bit planes, lets an operator box
//! nuclei and cytoplasm, stitches the masks into cells, and writes mean
//! intensities and particle counts per cell to the output directory.
//!
//! # Usage
//!
//! ```text
//! fishnet --channels dapi,cy5 --z-levels 2 z1_dapi.tif z1_cy5.tif z2_dapi.tif z2_cy5.tif
//! ```
//!
//! Planes are given z-major: every channel of the first z level, then
//! every channel of the second, and so on.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod operator;
mod segmenter;
mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use fishnet_pipeline::stack::normalize_to_u8;
use fishnet_pipeline::{ImageStack, Operator, PipelineConfig, PipelineContext, Plane, QuiltConfig};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use crate::operator::{BoxScript, ScriptedOperator, TerminalOperator};
use crate::segmenter::ThresholdSegmenter;
use crate::store::FileStore;

/// Semi-automated cell segmentation and per-cell quantification.
///
/// Box nuclei and cytoplasm on a projection of the stack, then measure
/// mean intensity and count particles in every cell.
#[derive(Parser, Debug)]
#[command(name = "fishnet", version)]
struct Cli {
    /// Plane images (PNG or TIFF), z-major.
    #[arg(required = true)]
    planes: Vec<PathBuf>,

    /// Channel names, comma-separated, in plane order.
    #[arg(long, value_delimiter = ',', required = true)]
    channels: Vec<String>,

    /// Number of z levels. Labelled "1", "2", ...
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    z_levels: usize,

    /// Output directory. Recreated on every run.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Directory of a previous run to load missing requirements from.
    #[arg(long)]
    resume_from: Option<PathBuf>,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Quilt tile edge in pixels.
    #[arg(long, default_value_t = QuiltConfig::DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Edge cell crops are resized to before quilting.
    #[arg(long, default_value_t = QuiltConfig::DEFAULT_CROP_SIZE)]
    crop_size: u32,

    /// Largest particle, as a fraction of tile area.
    #[arg(long, default_value_t = QuiltConfig::DEFAULT_MAX_AREA_FRACTION)]
    max_area_fraction: f64,

    /// Pixel area of the box-drawing canvas.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANVAS_PIXEL_AREA)]
    canvas_area: u64,

    /// Most particle candidates proposed per tile.
    #[arg(
        long,
        default_value_t = ThresholdSegmenter::DEFAULT_CANDIDATE_LIMIT,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
    )]
    candidate_limit: usize,

    /// Review the cell segmentation and allow retries.
    #[arg(long)]
    review: bool,

    /// JSON box script to replay instead of prompting.
    #[arg(long)]
    boxes: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Print diagnostics as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).context("parsing --config-json")?
    } else {
        PipelineConfig {
            canvas_pixel_area: cli.canvas_area,
            review_cell_segmentation: cli.review,
            quilt: QuiltConfig {
                block_size: cli.block_size,
                max_area_fraction: cli.max_area_fraction,
                crop_size: cli.crop_size,
            },
            ..PipelineConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Decode the planes into a z-major stack.
fn load_stack(paths: &[PathBuf], channels: &[String], z_levels: usize) -> anyhow::Result<ImageStack> {
    let planes = paths
        .iter()
        .map(|path| {
            let plane: Plane = image::open(path)
                .with_context(|| format!("reading {}", path.display()))?
                .into_luma16();
            Ok(plane)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let z_labels = (1..=z_levels).map(|z| z.to_string()).collect();
    Ok(ImageStack::new(z_labels, channels.to_vec(), planes)?)
}

fn recreate_dir(dir: &Path) -> anyhow::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).with_context(|| format!("clearing {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))
}

/// Refuse a resume directory that recreating `output` would delete.
///
/// Both paths are compared after resolving `.`, `..`, and symlinks, so
/// `out` and `./out` are the same directory.
fn check_resume_dir(output: &Path, resume: &Path) -> anyhow::Result<PathBuf> {
    let resume = resume
        .canonicalize()
        .with_context(|| format!("resolving --resume-from {}", resume.display()))?;
    if let Ok(output) = output.canonicalize()
        && resume.starts_with(&output)
    {
        bail!(
            "--resume-from {} lies inside --output-dir {}, which is recreated",
            resume.display(),
            output.display()
        );
    }
    Ok(resume)
}

fn operator_from_cli(cli: &Cli) -> anyhow::Result<Box<dyn Operator>> {
    let Some(ref path) = cli.boxes else {
        let stdin = std::io::stdin().lock();
        return Ok(Box::new(TerminalOperator::new(stdin, std::io::stderr())));
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let script: BoxScript =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Box::new(ScriptedOperator::new(script)))
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = config_from_cli(cli)?;
    let images = load_stack(&cli.planes, &cli.channels, cli.z_levels)?;
    info!(
        planes = cli.planes.len(),
        size = %images.dimensions(),
        "loaded stack"
    );

    let resume = cli
        .resume_from
        .as_deref()
        .map(|dir| check_resume_dir(&cli.output_dir, dir))
        .transpose()?;
    recreate_dir(&cli.output_dir)?;

    let mut store = FileStore::new(&cli.output_dir).with_backdrop(normalize_to_u8(&images.project_all()));
    if let Some(dir) = resume {
        store = store.with_substitutes(dir);
    }
    let mut operator = operator_from_cli(cli)?;
    let mut segmenter = ThresholdSegmenter::new().with_candidate_limit(cli.candidate_limit);

    let mut ctx = PipelineContext::new(config, images, &mut segmenter, operator.as_mut(), &mut store);
    let outcome = fishnet_pipeline::run(&mut ctx);

    let diagnostics = match &outcome {
        Ok(diagnostics) => diagnostics,
        Err(failure) => &failure.diagnostics,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(diagnostics)?);
    } else {
        println!("{}", diagnostics.report());
    }

    outcome?;
    info!(dir = %cli.output_dir.display(), "outputs written");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error installing logger: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let base = ["fishnet", "--channels", "dapi,cy5", "--z-levels", "1", "a.png", "b.png"];
        Cli::try_parse_from(base.iter().chain(args)).unwrap()
    }

    #[test]
    fn flags_build_the_config() {
        let parsed = cli(&["--block-size", "256", "--crop-size", "512", "--review"]);
        assert_eq!(parsed.channels, vec!["dapi".to_string(), "cy5".to_string()]);
        let config = config_from_cli(&parsed).unwrap();
        assert_eq!(config.quilt.block_size, 256);
        assert_eq!(config.quilt.crop_size, 512);
        assert!(config.review_cell_segmentation);
        assert_eq!(config.min_box_area, PipelineConfig::DEFAULT_MIN_BOX_AREA);
    }

    #[test]
    fn config_json_overrides_flags() {
        let parsed = cli(&[
            "--block-size",
            "256",
            "--config-json",
            r#"{"quilt": {"block_size": 128, "crop_size": 256}}"#,
        ]);
        let config = config_from_cli(&parsed).unwrap();
        assert_eq!(config.quilt.block_size, 128);
        assert!((config.quilt.max_area_fraction - QuiltConfig::DEFAULT_MAX_AREA_FRACTION).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let parsed = cli(&["--block-size", "300"]);
        assert!(config_from_cli(&parsed).is_err());
    }

    #[test]
    fn resume_dir_inside_output_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out");
        std::fs::create_dir_all(output.join("previous")).unwrap();
        let elsewhere = dir.path().join("previous");
        std::fs::create_dir_all(&elsewhere).unwrap();

        assert!(check_resume_dir(&output, &dir.path().join(".").join("out")).is_err());
        assert!(check_resume_dir(&output, &output.join("..").join("out")).is_err());
        assert!(check_resume_dir(&output, &output.join("previous")).is_err());
        assert_eq!(
            check_resume_dir(&output, &elsewhere).unwrap(),
            elsewhere.canonicalize().unwrap()
        );
        // a missing output directory cannot hold the resume directory
        assert!(check_resume_dir(&dir.path().join("fresh"), &elsewhere).is_ok());
        assert!(check_resume_dir(&output, &dir.path().join("missing")).is_err());
    }

    #[test]
    fn candidate_limit_must_be_positive() {
        let base = ["fishnet", "--channels", "dapi", "--z-levels", "1", "--candidate-limit", "0", "a.png"];
        assert!(Cli::try_parse_from(base).is_err());
        assert_eq!(cli(&["--candidate-limit", "8"]).candidate_limit, 8);
    }

    #[test]
    fn z_levels_must_be_positive() {
        let base = ["fishnet", "--channels", "dapi", "--z-levels", "0", "a.png"];
        assert!(Cli::try_parse_from(base).is_err());
    }

    #[test]
    fn planes_load_as_a_stack() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..2)
            .map(|i| {
                let path = dir.path().join(format!("p{i}.png"));
                image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_pixel(6, 4, image::Luma([1000 * (i + 1)]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect();
        let stack = load_stack(&paths, &["dapi".to_string()], 2).unwrap();
        assert_eq!(stack.z_labels(), ["1".to_string(), "2".to_string()]);
        assert_eq!(stack.plane(1, 0).unwrap().get_pixel(0, 0).0[0], 2000);

        assert!(load_stack(&paths, &["dapi".to_string()], 1).is_err());
    }
}
