//! `enso dream` - dream over the first clip of a video file.

use std::path::Path;

use ensonar::prelude::*;

use super::{build_config, configure_threads, dream_and_write};
use crate::error::{CliError, Result};
use crate::ObjectiveArgs;

#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    video: &Path,
    out: &Path,
    weights: &Path,
    frame_size: usize,
    clip_len: usize,
    objective: &ObjectiveArgs,
    quiet: bool,
) -> Result<()> {
    if !video.exists() {
        return Err(CliError::FileNotFound(video.to_path_buf()));
    }
    if !weights.exists() {
        return Err(CliError::FileNotFound(weights.to_path_buf()));
    }

    configure_threads(objective.threads)?;
    let config = build_config(objective, frame_size, clip_len, None)?;

    let frames = VideoDataset::open(video, clip_len)?.first_clip()?;
    log::info!(
        "decoded a {clip_len}-frame clip at {}x{}",
        frames[0].width(),
        frames[0].height()
    );

    let model = VideoModel::from_safetensors(VideoArchSpec::r2plus1d_34(), weights)?;

    dream_and_write(model, config, &frames, out, quiet)
}
