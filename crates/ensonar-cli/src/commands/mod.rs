//! enso subcommands.

pub(crate) mod dream;
pub(crate) mod synth;
pub(crate) mod tensors;

use colored::Colorize;

use ensonar::dream::NUM_STAGES;
use ensonar::prelude::*;

use crate::error::{CliError, Result};
use crate::ObjectiveArgs;

/// Build and validate a dream configuration from CLI flags.
pub(crate) fn build_config(
    objective: &ObjectiveArgs,
    frame_size: usize,
    clip_len: usize,
    seed: Option<u64>,
) -> Result<DreamConfig> {
    if objective.layer >= NUM_STAGES {
        return Err(CliError::InvalidConfig(format!(
            "--layer {} out of range (stages 0..{})",
            objective.layer,
            NUM_STAGES - 1
        )));
    }

    let mut objectives = [LayerObjective::disabled(); NUM_STAGES];
    objectives[objective.layer] = LayerObjective {
        weight: objective.layer_weight,
        channel: objective.channel.unwrap_or(0),
    };

    let config = DreamConfig {
        epochs: objective.epochs,
        learning_rate: objective.lr,
        gamma: objective.gamma,
        frame_size,
        clip_len,
        mode: if objective.channel.is_some() {
            ObjectiveMode::Channel
        } else {
            ObjectiveMode::LayerNorm
        },
        objectives,
        seed,
    };
    config.validate()?;
    Ok(config)
}

/// Apply the --threads flag to the global rayon pool.
pub(crate) fn configure_threads(threads: Option<usize>) -> Result<()> {
    if let Some(n) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| CliError::InvalidConfig(format!("thread pool: {e}")))?;
        log::debug!("rayon pool fixed at {n} threads");
    }
    Ok(())
}

/// Run the loop over prepared frames and encode the result.
pub(crate) fn dream_and_write(
    model: VideoModel,
    config: DreamConfig,
    frames: &[RgbFrame],
    out: &std::path::Path,
    quiet: bool,
) -> Result<()> {
    log::info!(
        "dreaming {} epochs over a {}-frame clip ({} model parameters)",
        config.epochs,
        frames.len(),
        model.num_parameters()
    );

    let epochs = config.epochs;
    let mut dreamer = Dreamer::new(model, config, frames)?;
    dreamer.run_with(|stats| {
        if !quiet {
            eprintln!(
                "{} epoch {:>5}/{epochs}  loss {:>14.4}  tv {:>14.4}",
                "dream".cyan(),
                stats.epoch + 1,
                stats.loss,
                stats.tv
            );
        }
    });

    let dreamed = dreamer.finalize()?;
    GifSink::new().write(out, &dreamed)?;

    eprintln!(
        "{} wrote {} frames to {}",
        "done".green().bold(),
        dreamed.len(),
        out.display()
    );
    Ok(())
}
