//! # Pluck Listener
//!
//! Listens to an input device, detects each plucked note and publishes its
//! name as `{"current_note": "<label>"}`, either as JSON lines on stdout or
//! into a JSON state file.
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use pluck_core::{Config, CpalSource, JsonLinesSink, NoteProcessor, NoteSink, StateFileSink};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Detect plucked notes from an audio input device
#[derive(Parser, Debug)]
#[command(name = "pluck-listener")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; omitted fields use the guitar defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exact name of the input device (default: host default input)
    #[arg(short, long)]
    device: Option<String>,

    /// Keep the latest note in this JSON file instead of printing to stdout
    #[arg(short, long)]
    state_file: Option<PathBuf>,

    /// Stop after this many seconds (default: run until interrupted)
    #[arg(long)]
    duration: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if cli.device.is_some() {
        config.capture.device_name = cli.device.clone();
    }

    let sink: Box<dyn NoteSink> = match &cli.state_file {
        Some(path) => {
            info!("Publishing notes to {}", path.display());
            Box::new(StateFileSink::new(path))
        }
        None => Box::new(JsonLinesSink::new(std::io::stdout())),
    };

    let run_for = cli.duration.map(run_duration).transpose()?;
    let source = CpalSource::new(config.capture.clone())?;
    let mut processor = NoteProcessor::new(config, source, sink)?;
    processor.start_capture()?;

    match run_for {
        Some(duration) => {
            thread::sleep(duration);
            processor.stop_capture()?;
        }
        None => loop {
            thread::sleep(Duration::from_millis(100));
        },
    }

    Ok(())
}

/// Converts `--duration` seconds, rejecting values a `Duration` cannot hold.
fn run_duration(secs: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(secs)
        .with_context(|| format!("Invalid --duration {secs}: expected a non-negative number of seconds"))
}
