use std::path::PathBuf;
use std::time::Instant;
use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rayon::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use doppler_digitiser::image_io::{get_image_files_in_dir, load_image};
use doppler_digitiser::output::{append_summary, ImageSummary};
use doppler_digitiser::{process_image, Config, ImageprocOps, TesseractCli, TextFilter};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Doppler ultrasound waveform digitiser")]
struct Args {
    /// Path to input file or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file (defaults are used when it does not exist)
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Tesseract executable (overwrites config)
    #[clap(short, long)]
    tesseract: Option<String>,

    /// Overlay text filter (overwrites config)
    #[clap(short = 'f', long)]
    text_filter: Option<TextFilterArg>,

    /// Process files one at a time
    #[clap(long)]
    sequential: bool,

    /// Enable debug mode (save stage JSON and annotated images, verbose logs)
    #[clap(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TextFilterArg {
    Hsv,
    Cylinder,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load configuration
    let config_path = PathBuf::from(&args.config);
    let mut config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
        Config::default()
    };

    // Override config with command-line arguments
    if let Some(input) = args.input.clone() {
        config.input_path = input;
    }

    if let Some(output) = args.output.clone() {
        config.output_base_dir = output;
    }

    if let Some(binary) = args.tesseract.clone() {
        config.tesseract_binary = binary;
    }

    if let Some(filter) = args.text_filter {
        config.text_filter = match filter {
            TextFilterArg::Hsv => TextFilter::Hsv,
            TextFilterArg::Cylinder => TextFilter::Cylinder,
        };
    }

    if args.sequential {
        config.use_parallel = false;
    }

    config.validate()?;
    config.validate_paths()?;

    let start_time = Instant::now();

    let ops = ImageprocOps;
    let recognizer = TesseractCli::new(&config.tesseract_binary).with_language(&config.tesseract_language);
    let output_base = PathBuf::from(&config.output_base_dir);
    std::fs::create_dir_all(&output_base)
        .with_context(|| format!("creating output directory {}", output_base.display()))?;

    let input_path = PathBuf::from(&config.input_path);
    let files = if input_path.is_file() {
        vec![input_path.clone()]
    } else if input_path.is_dir() {
        get_image_files_in_dir(&input_path)?
    } else {
        bail!("input path {} is neither a file nor a directory", input_path.display());
    };

    info!(count = files.len(), input = %input_path.display(), "processing screenshots");

    let run = |path: &PathBuf| -> Option<ImageSummary> {
        info!(file = %path.display(), "processing");
        let outcome = load_image(path)
            .and_then(|input_image| process_image(input_image, &ops, &recognizer, &config, args.debug));
        match outcome {
            Ok(summary) => {
                if !summary.flags.is_empty() {
                    warn!(file = %path.display(), flags = %summary.flags, "finished with flags");
                }
                Some(summary)
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "failed");
                None
            }
        }
    };

    let results: Vec<Option<ImageSummary>> = if config.use_parallel {
        files.par_iter().map(run).collect()
    } else {
        files.iter().map(run).collect()
    };

    let failures = results.iter().filter(|r| r.is_none()).count();
    let summaries: Vec<ImageSummary> = results.into_iter().flatten().collect();
    append_summary(&output_base, &summaries)?;

    let elapsed = start_time.elapsed();
    info!(
        processed = summaries.len(),
        failures,
        seconds = elapsed.as_secs_f64(),
        "processing completed"
    );

    if failures > 0 && summaries.is_empty() {
        bail!("all {} screenshots failed", failures);
    }

    Ok(())
}
