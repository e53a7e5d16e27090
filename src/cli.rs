// ============================================================================
// gb7edit CLI — headless editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   gb7edit -i photo.png -o photo.gb7                     (format inferred from output ext)
//   gb7edit -i scan.gb7 --curve 0,255,255,0 -o inverted.png
//   gb7edit -i base.png -i overlay.gb7 --blend multiply --opacity 0.5 -o out.png
//   gb7edit -i photo.jpg --filter gaussian --resize 50% -o small.png
//   gb7edit -i photo.png --sample 10,20 --info
//   gb7edit -i photo.png --color-layer '#ff8000' --blend multiply -o tinted.png
//
// Every input becomes one layer of a single document, in import order (the
// first input is the top of the stack). Edits apply to the active layer,
// which is the last one imported.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{BlendMode, LayerId};
use crate::error::{EngineError, Result};
use crate::io::ExportFormat;
use crate::ops::adjustments::{Lut, LutChannel};
use crate::ops::colors::ColorReadout;
use crate::ops::filters::{FilterKind, Kernel, KernelPreset, MedianBorder};
use crate::ops::transform::{Interpolation, parse_resize_target};
use crate::project::Project;
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// gb7edit headless layer editor.
#[derive(Parser, Debug)]
#[command(
    name = "gb7edit",
    version,
    about = "Layered raster editor for PNG, JPEG and GB7 images",
    long_about = "Stack images as layers, apply filters, gradation curves, resizes and\n\
                  blend settings, then export a flattened PNG, JPEG or GB7 image or a\n\
                  layered .gbp project.\n\n\
                  Example:\n  \
                  gb7edit -i base.png -i overlay.gb7 --blend screen -o out.png\n  \
                  gb7edit -i scan.gb7 --curve 0,255,255,0 --channel rgb -o inverted.gb7"
)]
pub struct CliArgs {
    /// Input file(s): .png, .jpg, .gb7 or a .gbp project. Glob patterns accepted.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file. When omitted the result is written next to the first input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format: png, jpeg, gb7, gbp. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1-100). Defaults to the configured value.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Preset filter: identity, sharpen, gaussian, box-blur, prewitt-x,
    /// prewitt-y, laplacian, median.
    #[arg(long, value_name = "NAME", conflicts_with = "kernel")]
    pub filter: Option<String>,

    /// Custom convolution kernel, row-major, comma separated (9, 25, 49 ... values).
    #[arg(long, value_name = "a,b,c,...", allow_hyphen_values = true)]
    pub kernel: Option<String>,

    /// Median border handling: unfiltered or clamp.
    #[arg(long, value_name = "MODE")]
    pub median_border: Option<String>,

    /// Gradation curve through two control points.
    #[arg(long, value_name = "in1,out1,in2,out2")]
    pub curve: Option<String>,

    /// Channel the curve applies to: rgb, red, green, blue, alpha.
    #[arg(long, default_value = "rgb", value_name = "CHANNEL")]
    pub channel: String,

    /// Resize the active layer: "50%", "50%x25%" or "640x480".
    #[arg(long, value_name = "SIZE")]
    pub resize: Option<String>,

    /// Keep the aspect ratio when resizing.
    #[arg(long)]
    pub keep_aspect: bool,

    /// Resize interpolation: nearest or bilinear.
    #[arg(long, value_name = "MODE")]
    pub interp: Option<String>,

    /// Opacity of the active layer (0.0-1.0).
    #[arg(long, value_name = "0-1")]
    pub opacity: Option<f32>,

    /// Blend mode of the active layer: normal, multiply, screen, overlay.
    #[arg(long, value_name = "MODE")]
    pub blend: Option<String>,

    /// Offset of the active layer in pixels.
    #[arg(long, value_name = "x,y", allow_hyphen_values = true)]
    pub offset: Option<String>,

    /// Add a solid color layer (#rgb or #rrggbb) below the imported layers,
    /// after the edits. Repeatable.
    #[arg(long, value_name = "#rrggbb")]
    pub color_layer: Vec<String>,

    /// Show the active layer without its alpha channel (reversible in a project).
    #[arg(long, conflicts_with = "strip_alpha")]
    pub hide_alpha: bool,

    /// Remove the alpha channel of the active layer permanently.
    #[arg(long)]
    pub strip_alpha: bool,

    /// Print the color readout of the composite at x,y.
    #[arg(long, value_name = "x,y")]
    pub sample: Option<String>,

    /// Print the layer stack.
    #[arg(long)]
    pub info: bool,

    /// Settings file to use instead of the default location.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print log lines and timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code: `0` on success, `1` on any error.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    let mut settings = match &args.config {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    };
    if let Some(q) = args.quality {
        settings.jpeg_quality = q.clamp(1, 100);
    }
    if let Some(name) = &args.interp {
        match Interpolation::from_name(name) {
            Some(i) => settings.interpolation = i,
            None => {
                eprintln!("error: unknown interpolation '{}'", name);
                return ExitCode::FAILURE;
            }
        }
    }
    // every input and color layer must fit in the document
    settings.max_layers = settings.max_layers.max(inputs.len() + args.color_layer.len());

    match run_all(&args, &inputs, settings) {
        Ok(()) => {
            if args.verbose {
                println!("done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Processing pipeline
// ============================================================================

fn run_all(args: &CliArgs, inputs: &[PathBuf], settings: EditorSettings) -> Result<()> {
    let format = parse_format(args.format.as_deref(), args.output.as_deref())?;
    let mut project = Project::new(settings)?;

    // -- Step 1: Load ----------------------------------------------------
    for input in inputs {
        project.import_file(input)?;
        if args.verbose {
            println!("  {}", project.status());
        }
    }
    let active = project.canvas.active_id()?;

    // -- Step 2: Edit the active layer ------------------------------------
    apply_edits(args, &mut project, active)?;
    for hex in &args.color_layer {
        project.add_color_layer_hex(hex)?;
        report(args, &project);
    }

    // -- Step 3: Inspect -------------------------------------------------
    if args.info {
        print_layers(&project);
    }
    if let Some(text) = &args.sample {
        let (x, y) = parse_pair::<u32>(text, "--sample")?;
        let readout = project.readout(x, y)?;
        print_readout(&readout);
    }

    // -- Step 4: Save ----------------------------------------------------
    let inspect_only = args.info || args.sample.is_some();
    let wants_output = args.output.is_some() || args.format.is_some() || !inspect_only;
    if wants_output {
        let output = build_output_path(&inputs[0], args.output.as_deref(), format).ok_or_else(|| {
            EngineError::Range(format!(
                "cannot derive an output path from '{}'",
                inputs[0].display()
            ))
        })?;
        project.export(&output, format)?;
        println!("{}", project.status());
    }
    Ok(())
}

fn apply_edits(args: &CliArgs, project: &mut Project, id: LayerId) -> Result<()> {
    if let Some(kind) = parse_filter(args, project.settings.median_border)? {
        project.apply_filter(id, kind)?;
        report(args, project);
    }
    if let Some(text) = &args.curve {
        let lut = parse_curve(text)?;
        let channel = LutChannel::from_name(&args.channel)
            .ok_or_else(|| EngineError::Range(format!("unknown channel '{}'", args.channel)))?;
        project.apply_gradation(id, &lut, channel)?;
        report(args, project);
    }
    if let Some(text) = &args.resize {
        let target = parse_resize_target(text)
            .ok_or_else(|| EngineError::Range(format!("cannot parse resize target '{}'", text)))?;
        project.resize_layer(id, target, args.keep_aspect)?;
        report(args, project);
    }
    if args.hide_alpha {
        project.hide_alpha(id)?;
        report(args, project);
    }
    if args.strip_alpha {
        project.strip_alpha(id)?;
        report(args, project);
    }
    if let Some(opacity) = args.opacity {
        project.set_opacity(id, opacity)?;
        report(args, project);
    }
    if let Some(name) = &args.blend {
        let mode = BlendMode::from_name(name)
            .ok_or_else(|| EngineError::Range(format!("unknown blend mode '{}'", name)))?;
        project.set_blend_mode(id, mode)?;
        report(args, project);
    }
    if let Some(text) = &args.offset {
        let (x, y) = parse_pair::<i32>(text, "--offset")?;
        project.move_layer(id, x, y)?;
        report(args, project);
    }
    Ok(())
}

fn report(args: &CliArgs, project: &Project) {
    if args.verbose {
        println!("  {}", project.status());
    }
}

fn print_layers(project: &Project) {
    let active = project.canvas.active_layer;
    for (idx, layer) in project.canvas.layers.iter().enumerate() {
        println!(
            "{}{:>2} {:<24} {:>5}x{:<5} at ({}, {})  {:>3.0}% {:<8} {}{}",
            if Some(layer.id) == active { '*' } else { ' ' },
            idx,
            layer.name,
            layer.width(),
            layer.height(),
            layer.x,
            layer.y,
            layer.opacity * 100.0,
            layer.blend_mode.name(),
            layer.alpha.name(),
            if layer.visible { "" } else { " (hidden)" },
        );
    }
}

fn print_readout(readout: &ColorReadout) {
    println!("{}", readout);
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the export format from `--format` or the output extension.
/// Defaults to PNG when neither is given.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<ExportFormat> {
    if let Some(f) = format_arg {
        return ExportFormat::from_name(f)
            .ok_or_else(|| EngineError::UnsupportedFormat(f.to_string()));
    }
    match output {
        Some(out) => ExportFormat::from_path(out)
            .ok_or_else(|| EngineError::UnsupportedFormat(out.display().to_string())),
        None => Ok(ExportFormat::Png),
    }
}

/// Output path: `--output` when given, otherwise next to the input with the
/// format's extension (`_out` appended if that would overwrite the input).
fn build_output_path(input: &Path, output: Option<&Path>, format: ExportFormat) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

fn parse_filter(args: &CliArgs, default_border: MedianBorder) -> Result<Option<FilterKind>> {
    if let Some(text) = &args.kernel {
        let values = text
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Range(format!("bad kernel value: {}", e)))?;
        return Ok(Some(FilterKind::Convolution(Kernel::from_flat(&values)?)));
    }
    let Some(name) = &args.filter else { return Ok(None) };
    let border = match &args.median_border {
        Some(b) => MedianBorder::from_name(b)
            .ok_or_else(|| EngineError::Range(format!("unknown median border '{}'", b)))?,
        None => default_border,
    };
    let kind = match name.to_lowercase().as_str() {
        "median" => FilterKind::Median(border),
        "laplacian" => FilterKind::Laplacian,
        other => match KernelPreset::from_name(other) {
            Some(preset) => FilterKind::Convolution(preset.kernel()),
            None => return Err(EngineError::Range(format!("unknown filter '{}'", name))),
        },
    };
    Ok(Some(kind))
}

fn parse_curve(text: &str) -> Result<Lut> {
    let points = text
        .split(',')
        .map(|v| v.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Range(format!("bad curve value: {}", e)))?;
    match points.as_slice() {
        [in1, out1, in2, out2] => Lut::build(*in1, *out1, *in2, *out2),
        _ => Err(EngineError::Range(format!("--curve needs 4 values, got {}", points.len()))),
    }
}

fn parse_pair<T: std::str::FromStr>(text: &str, flag: &str) -> Result<(T, T)> {
    let (a, b) = text
        .split_once(',')
        .ok_or_else(|| EngineError::Range(format!("{} expects x,y", flag)))?;
    match (a.trim().parse::<T>(), b.trim().parse::<T>()) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        _ => Err(EngineError::Range(format!("{} expects x,y, got '{}'", flag, text))),
    }
}
