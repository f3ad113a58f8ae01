//! enso - DeepDream for video clips
//!
//! Usage:
//!   enso dream clip.mp4 -o dream.gif -w r2plus1d_34.safetensors
//!   enso dream clip.mp4 -o dream.gif -w model.safetensors --layer 2 --channel 6
//!   enso synth -o dream.gif --size 128 --epochs 64
//!   enso tensors model.safetensors

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;

mod commands;
mod error;

use commands::{dream, synth, tensors};

/// enso - dream over video clips with a frozen R(2+1)D network.
#[derive(Parser)]
#[command(name = "enso")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode (suppress per-epoch progress)
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Objective flags shared by the dreaming commands.
#[derive(clap::Args)]
struct ObjectiveArgs {
    /// Network stage to maximize (0 = stem, 1-4 = residual stages)
    #[arg(long, default_value = "2")]
    layer: usize,

    /// Weight of the stage objective
    #[arg(long, default_value = "1.0")]
    layer_weight: f32,

    /// Maximize only this channel of the chosen stage
    /// (default: whole-layer norm)
    #[arg(long)]
    channel: Option<usize>,

    /// Gradient-ascent iterations
    #[arg(long, default_value = "512")]
    epochs: usize,

    /// Learning rate applied to the std-normalized gradient
    #[arg(long, default_value = "0.08")]
    lr: f32,

    /// Total-variation regularization weight
    #[arg(long, default_value = "0.00001")]
    gamma: f32,

    /// Rayon thread count (default: all cores)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dream over the first clip of a video file
    Dream {
        /// Input video path
        #[arg(value_name = "VIDEO")]
        video: PathBuf,

        /// Output GIF path
        #[arg(short, long, value_name = "GIF")]
        out: PathBuf,

        /// SafeTensors weights for the r2plus1d_34 backbone
        #[arg(short, long, value_name = "FILE")]
        weights: PathBuf,

        /// Short-side frame size the clip is resized to
        #[arg(long, default_value = "112")]
        frame_size: usize,

        /// Frames per clip
        #[arg(long, default_value = "32")]
        clip_len: usize,

        #[command(flatten)]
        objective: ObjectiveArgs,
    },

    /// Dream from a synthetic noise clip and a random nano network
    Synth {
        /// Output GIF path
        #[arg(short, long, value_name = "GIF")]
        out: PathBuf,

        /// Square frame size of the synthetic clip
        #[arg(long, default_value = "128")]
        size: usize,

        /// Frames per clip
        #[arg(long, default_value = "32")]
        clip_len: usize,

        /// Seed for the clip and the network init
        #[arg(long, default_value = "0")]
        seed: u64,

        #[command(flatten)]
        objective: ObjectiveArgs,
    },

    /// List tensor names and shapes in a SafeTensors weights file
    Tensors {
        /// Path to a .safetensors file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Limit the number of tensors shown
        #[arg(long, default_value = "64")]
        limit: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dream {
            video,
            out,
            weights,
            frame_size,
            clip_len,
            objective,
        } => dream::run(&video, &out, &weights, frame_size, clip_len, &objective, cli.quiet),

        Commands::Synth {
            out,
            size,
            clip_len,
            seed,
            objective,
        } => synth::run(&out, size, clip_len, seed, &objective, cli.quiet),

        Commands::Tensors { file, limit } => tensors::run(&file, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    }
}
