//! `enso synth` - dream from a synthetic noise clip.
//!
//! No weights file needed: a randomly initialized nano backbone stands
//! in for the pretrained network. Useful for demos and for checking a
//! full pipeline run end to end.

use std::path::Path;

use ensonar::prelude::*;

use super::{build_config, configure_threads, dream_and_write};
use crate::error::Result;
use crate::ObjectiveArgs;

pub(crate) fn run(
    out: &Path,
    size: usize,
    clip_len: usize,
    seed: u64,
    objective: &ObjectiveArgs,
    quiet: bool,
) -> Result<()> {
    configure_threads(objective.threads)?;
    let config = build_config(objective, size, clip_len, Some(seed))?;

    let frames = SyntheticClip::noise(size, size, clip_len, seed).frames();
    let model = VideoModel::new(VideoArchSpec::nano().with_seed(seed));

    dream_and_write(model, config, &frames, out, quiet)
}
