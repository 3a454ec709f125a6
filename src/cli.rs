use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use topoview::{ChartConfig, TopologyView, decode_stream};

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "topoview",
    about = "Replay a topology event stream and print the resulting laid-out chart as JSON."
)]
pub struct ReplayArgs {
    /// Path to the NDJSON event stream. Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Canvas width in pixels.
    #[arg(long = "width", default_value_t = 800.0)]
    width: f64,

    /// Canvas height in pixels.
    #[arg(long = "height", default_value_t = 600.0)]
    height: f64,

    /// JSON file overriding chart settings (margins, node ceiling, zoom bounds).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Pretty-print the chart JSON.
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pretty: bool,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,

    /// Log layout and viewport decisions to stderr.
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
}

pub fn run(cli: ReplayArgs) -> Result<()> {
    if cli.width <= 0.0 || cli.height <= 0.0 {
        bail!("--width and --height must be greater than zero");
    }

    let input_source = parse_input(cli.input.as_deref())?;
    let output_dest = parse_output(cli.output.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    let stream = load_stream(&input_source)?;
    let events = decode_stream(&stream);
    info!(events = events.len(), "replaying event stream");

    let mut view = TopologyView::new(config, cli.width, cli.height);
    for event in events {
        view.handle(event);
    }

    let chart = view.view();
    let mut bytes = if cli.pretty {
        serde_json::to_vec_pretty(&chart)?
    } else {
        serde_json::to_vec(&chart)?
    };
    bytes.push(b'\n');

    write_output(output_dest, &bytes, cli.quiet)
}

fn parse_input(input: Option<&str>) -> Result<InputSource> {
    match input {
        Some("-") | None => Ok(InputSource::Stdin),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(anyhow!("input file '{path_str}' does not exist"));
            }
            Ok(InputSource::File(path))
        }
    }
}

fn parse_output(output: Option<&str>) -> Result<OutputDestination> {
    match output {
        Some("-") | None => Ok(OutputDestination::Stdout),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(anyhow!(
                        "output directory '{}' does not exist",
                        parent.display()
                    ));
                }
            }
            Ok(OutputDestination::File(path))
        }
    }
}

/// A config file takes precedence over `TOPOVIEW_*` environment overrides.
fn load_config(path: Option<&Path>) -> Result<ChartConfig> {
    match path {
        Some(path) => ChartConfig::from_file(path),
        None => Ok(ChartConfig::from_env()),
    }
}

fn load_stream(source: &InputSource) -> Result<String> {
    match source {
        InputSource::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            if buffer.trim().is_empty() {
                Err(anyhow!("no events supplied on stdin"))
            } else {
                Ok(buffer)
            }
        }
        InputSource::File(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            if contents.trim().is_empty() {
                Err(anyhow!("input file '{}' was empty", path.display()))
            } else {
                Ok(contents)
            }
        }
    }
}

fn write_output(dest: OutputDestination, bytes: &[u8], quiet: bool) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Wrote chart -> {}", path.display());
            }
        }
    }
    Ok(())
}
