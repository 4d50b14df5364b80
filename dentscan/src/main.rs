//! dentscan: photograph a vehicle, send it to the damage detection service,
//! and draw the returned detections over the photo.
//!
//! Without a subcommand this opens the GUI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod camera;
mod config;
mod controller;
mod error;
mod headless;
mod session;
mod ui;
mod util;

#[derive(Debug, Parser)]
#[command(name = "dentscan", version, about = "Vehicle damage detection overlay")]
struct Cli {
	/// Detection service URL (overrides the config file).
	#[arg(long, global = true)]
	endpoint: Option<String>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Open the interactive window (default).
	Gui,
	/// Classify one image file and write the overlay as PNG.
	Classify {
		image: PathBuf,
		/// Output PNG (default: `<stem>.overlay.png` next to the input).
		#[arg(long)]
		out: Option<PathBuf>,
	},
	/// Capture one camera frame, classify it and write the overlay as PNG.
	Camera {
		#[arg(long, value_enum, default_value_t = camera::Facing::Environment)]
		facing: camera::Facing,
		/// Time to let the stream settle before capturing.
		#[arg(long, default_value_t = 800)]
		warmup_ms: u64,
		#[arg(long, default_value = "capture.overlay.png")]
		out: PathBuf,
	},
}

fn main() -> Result<()> {
	// Structured logging. Use `RUST_LOG=debug` etc.
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let cli = Cli::parse();
	let mut cfg = config::Config::load_or_default();
	if let Some(endpoint) = cli.endpoint {
		cfg.endpoint = endpoint;
	}

	match cli.command.unwrap_or(Command::Gui) {
		Command::Gui => ui::run(cfg),
		Command::Classify { image, out } => headless::classify(&cfg, &image, out),
		Command::Camera { facing, warmup_ms, out } => {
			headless::camera(&cfg, facing, Duration::from_millis(warmup_ms), &out)
		}
	}
}
