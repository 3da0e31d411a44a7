use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bgone::color::color_to_hex;
use bgone::{parse_color, Color, ForegroundColorSpec, ProcessOptions};

#[derive(Parser, Debug)]
#[command(
    name = "bgone",
    about = "Ultra-fast CLI tool for removing solid background colors from images",
    version,
    disable_version_flag = true
)]
struct Args {
    /// Input image path
    input: PathBuf,

    /// Output image path (optional, defaults to input file with a -bgone suffix)
    output: Option<PathBuf>,

    /// Foreground colors in hex format (e.g., f00, ff0000, #ff0000) or 'auto'
    /// for unknown. Multiple colors can be specified for color unmixing.
    /// In non-strict mode, this is optional.
    #[arg(short = 'f', long = "fg", num_args = 1.., value_name = "COLOR")]
    foreground_colors: Vec<String>,

    /// Background color in hex format (e.g., fff, ffffff, #ffffff).
    /// If not specified, the background color will be auto-detected.
    #[arg(short = 'b', long = "bg", value_name = "COLOR")]
    background_color: Option<String>,

    /// Strict mode: requires --fg and restricts unmixing to specified colors only.
    /// Without this flag, the tool can use any color for reconstruction.
    #[arg(short = 's', long = "strict")]
    strict: bool,

    /// Color similarity threshold (0.0-1.0).
    /// Pixels within this threshold of a foreground color will use that color.
    /// Default: 0.05 (5%)
    #[arg(short = 't', long = "threshold", value_name = "FLOAT")]
    threshold: Option<f32>,

    /// Crop the output to the bounding box of non-transparent pixels
    #[arg(long = "trim")]
    trim: bool,

    /// Print the detected background color as hex and exit
    #[arg(long = "detect")]
    detect: bool,

    /// Print version
    #[arg(short = 'v', short_alias = 'V', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let input_bytes = fs::read(&args.input)
        .with_context(|| format!("Failed to read input image: {}", args.input.display()))?;

    if args.detect {
        let detected = bgone::detect_background(&input_bytes)?;
        println!("{}", color_to_hex(detected));
        return Ok(());
    }

    // In strict mode, foreground colors are required
    if args.strict && args.foreground_colors.is_empty() {
        bail!("In strict mode, at least one foreground color must be specified with --fg");
    }

    if let Some(threshold) = args.threshold
        && !(0.0..=1.0).contains(&threshold)
    {
        bail!("Threshold must be between 0.0 and 1.0, got: {threshold}");
    }

    let foreground_colors = parse_foreground_specs(&args.foreground_colors)?;
    let background_color = determine_background_color(&args, &input_bytes)?;
    let output_path = determine_output_path(&args.input, args.output.as_deref())?;

    let progress = spinner("Removing background...")?;
    let options = ProcessOptions {
        input: input_bytes,
        background_color: Some(background_color),
        foreground_colors,
        strict_mode: args.strict,
        threshold: args.threshold,
        trim: args.trim,
    };
    let png = bgone::process(&options)?;
    progress.finish_and_clear();

    fs::write(&output_path, png)
        .with_context(|| format!("Failed to save output image: {}", output_path.display()))?;
    println!("✓ Saved to {}", output_path.display());

    Ok(())
}

/// Determine the output path for the processed image
///
/// If output is provided, use it as-is. Otherwise generate a filename based on
/// the input with a -bgone suffix and a .png extension (the output is always
/// PNG). If that file already exists, append -1, -2, etc. until an unused
/// name is found.
fn determine_output_path(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }

    let input_stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Invalid input filename")?;

    let parent = input.parent().unwrap_or_else(|| Path::new("."));

    let base_output = parent.join(format!("{input_stem}-bgone.png"));
    if !base_output.exists() {
        return Ok(base_output);
    }

    for i in 1..1000 {
        let numbered_output = parent.join(format!("{input_stem}-bgone-{i}.png"));
        if !numbered_output.exists() {
            return Ok(numbered_output);
        }
    }

    bail!("Could not generate unique output filename (tried up to -bgone-999)")
}

/// Parse and validate foreground color specifications from command line arguments
fn parse_foreground_specs(color_strings: &[String]) -> Result<Vec<ForegroundColorSpec>> {
    color_strings
        .iter()
        .enumerate()
        .map(|(i, spec_str)| {
            bgone::color::parse_foreground_spec(spec_str).with_context(|| {
                format!(
                    "Invalid foreground color specification #{}: {}",
                    i + 1,
                    spec_str
                )
            })
        })
        .collect()
}

/// Determine background color either from user input or auto-detection
fn determine_background_color(args: &Args, input_bytes: &[u8]) -> Result<Color> {
    if let Some(bg_str) = &args.background_color {
        parse_color(bg_str).context("Invalid background color")
    } else {
        let progress = spinner("Auto-detecting background color...")?;
        let detected = bgone::detect_background(input_bytes)?;
        progress.finish_and_clear();
        println!("✓ Auto-detected background color: {}", color_to_hex(detected));
        Ok(detected)
    }
}

/// Create a steady-tick spinner with the given message
fn spinner(message: &'static str) -> Result<ProgressBar> {
    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template(&format!("{{spinner:.green}} {message}"))?);
    progress.enable_steady_tick(Duration::from_millis(100));
    Ok(progress)
}
