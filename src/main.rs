// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthcam::{BackendConfig, LinuxBackend};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcam")]
#[command(about = "Capture video and motion samples from depth cameras")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List physical devices and their nodes
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the stream profiles a video node supports
    Profiles {
        /// Video device index (from 'depthcam list')
        #[arg(default_value = "0")]
        device: usize,
    },

    /// Stream video frames and report statistics
    Capture {
        /// Video device index (from 'depthcam list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        #[arg(long, default_value = "640")]
        width: u32,

        #[arg(long, default_value = "480")]
        height: u32,

        /// FourCC pixel format
        #[arg(short, long, default_value = "YUYV")]
        format: String,

        #[arg(long, default_value = "30")]
        fps: u32,

        /// Capture duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },

    /// Stream motion sensor samples
    Sensors {
        /// Sensor device index (from 'depthcam list')
        #[arg(short, long, default_value = "0")]
        device: usize,

        /// Sampling rate applied to every sensor
        #[arg(short, long, default_value = "200")]
        rate: u32,

        /// Capture duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        duration: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=depthcam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };
    let backend = LinuxBackend::new(config);

    match cli.command {
        Commands::List { json } => cli::list_devices(&backend, json),
        Commands::Profiles { device } => cli::list_profiles(&backend, device),
        Commands::Capture {
            device,
            width,
            height,
            format,
            fps,
            duration,
        } => cli::capture_video(&backend, device, width, height, &format, fps, duration),
        Commands::Sensors {
            device,
            rate,
            duration,
        } => cli::capture_sensors(&backend, device, rate, duration),
    }
}
