//! The activation-maximization loop.
//!
//! A dream run has three phases:
//!
//! 1. **initialize** -- one clip is converted, resized, normalized,
//!    given a batch dimension, and marked as the sole gradient leaf.
//! 2. **iterate** -- for a fixed number of epochs: forward through the
//!    frozen network, build the loss from weighted activation norms
//!    minus the total-variation penalty, backpropagate to the clip,
//!    normalize the gradient by its own standard deviation, take an
//!    ascent step, clamp back to the normalized [0, 1] range, and clear
//!    the tape.
//! 3. **finalize** -- denormalize and emit byte frames for encoding.
//!
//! There are no retries and no early exit; failures propagate, and
//! shape invariants are asserted fail-fast.

use serde::{Deserialize, Serialize};

use crate::autograd::{self, no_grad, Tensor};
use crate::error::{EnsonarError, Result};
use crate::models::VideoModel;
use crate::nn::Module;
use crate::transforms::{
    Compose, Denormalize, Normalize, Resize, ToTensor, Transform, KINETICS_MEAN, KINETICS_STD,
};
use crate::video::RgbFrame;

/// Epsilon added to the gradient standard deviation before dividing.
const GRAD_STD_EPS: f32 = 1e-12;

/// Number of network stages reported by the model (stem + four stages).
pub const NUM_STAGES: usize = 5;

/// Total-variation smoothness penalty over a clip batch.
///
/// Sum of absolute first-order differences along the time, height, and
/// width axes. Pure function of its input; lower is smoother.
#[derive(Debug, Default)]
pub struct TotalVariationLoss;

impl TotalVariationLoss {
    /// Create the penalty.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Module for TotalVariationLoss {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.total_variation()
    }
}

/// What to maximize in one network stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerObjective {
    /// Weight of this stage's activation norm in the loss.
    pub weight: f32,
    /// Channel to maximize when the mode is [`ObjectiveMode::Channel`].
    pub channel: usize,
}

impl LayerObjective {
    /// An objective that contributes nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            weight: 0.0,
            channel: 0,
        }
    }
}

/// Whether a stage objective maximizes the whole activation or a
/// single channel of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    /// L2 norm of the full stage activation.
    LayerNorm,
    /// L2 norm of one channel of the stage activation.
    Channel,
}

/// Immutable configuration of a dream run.
///
/// The objective table is fixed-size and ordered: index i configures
/// stage activation i (stem, then the four stages). It is validated
/// once at startup rather than trusted positionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamConfig {
    /// Number of gradient-ascent iterations.
    pub epochs: usize,
    /// Step size applied to the std-normalized gradient.
    pub learning_rate: f32,
    /// Weight of the total-variation penalty.
    pub gamma: f32,
    /// Short-side size the clip is resized to before dreaming.
    pub frame_size: usize,
    /// Frames per clip.
    pub clip_len: usize,
    /// Whole-layer or single-channel maximization.
    pub mode: ObjectiveMode,
    /// Per-stage objectives, stem first.
    pub objectives: [LayerObjective; NUM_STAGES],
    /// Seed for synthetic sources and random init, when used.
    pub seed: Option<u64>,
}

impl Default for DreamConfig {
    /// The configuration the dreamer ships with: maximize the full
    /// activation norm of stage 2, lightly TV-regularized. Channel 6 is
    /// recorded as that stage's channel because it responds to moving
    /// eye-like visuals when the mode is switched to `Channel`.
    fn default() -> Self {
        let mut objectives = [LayerObjective::disabled(); NUM_STAGES];
        objectives[2] = LayerObjective {
            weight: 1.0,
            channel: 6,
        };
        Self {
            epochs: 512,
            learning_rate: 0.08,
            gamma: 1e-5,
            frame_size: 112,
            clip_len: 32,
            mode: ObjectiveMode::LayerNorm,
            objectives,
            seed: None,
        }
    }
}

impl DreamConfig {
    /// Validate hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns [`EnsonarError::InvalidHyperparameter`] for non-positive
    /// epoch counts or learning rates, negative or non-finite gamma and
    /// weights, an all-zero objective table, or degenerate clip
    /// geometry.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(EnsonarError::invalid_hyperparameter(
                "epochs", self.epochs, ">= 1",
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(EnsonarError::invalid_hyperparameter(
                "learning_rate",
                self.learning_rate,
                "finite and > 0",
            ));
        }
        if !self.gamma.is_finite() || self.gamma < 0.0 {
            return Err(EnsonarError::invalid_hyperparameter(
                "gamma",
                self.gamma,
                "finite and >= 0",
            ));
        }
        if self.frame_size < 16 {
            return Err(EnsonarError::invalid_hyperparameter(
                "frame_size",
                self.frame_size,
                ">= 16 (the backbone halves it five times)",
            ));
        }
        if self.clip_len < 8 {
            return Err(EnsonarError::invalid_hyperparameter(
                "clip_len",
                self.clip_len,
                ">= 8 (the backbone halves it three times)",
            ));
        }
        for (i, objective) in self.objectives.iter().enumerate() {
            if !objective.weight.is_finite() || objective.weight < 0.0 {
                return Err(EnsonarError::invalid_hyperparameter(
                    &format!("objectives[{i}].weight"),
                    objective.weight,
                    "finite and >= 0",
                ));
            }
        }
        if self.objectives.iter().all(|o| o.weight == 0.0) {
            return Err(EnsonarError::invalid_hyperparameter(
                "objectives",
                "all zero",
                "at least one stage weight > 0",
            ));
        }
        Ok(())
    }
}

/// Progress report for one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    /// Zero-based epoch index.
    pub epoch: usize,
    /// Loss as maximized (activation terms plus the TV term).
    pub loss: f32,
    /// Total-variation term as it enters the loss
    /// (`-gamma * total_variation(clip)`).
    pub tv: f32,
}

/// The optimization loop: owns the clip exclusively and mutates it in
/// place across epochs.
pub struct Dreamer {
    model: VideoModel,
    config: DreamConfig,
    clip: Tensor,
}

impl std::fmt::Debug for Dreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dreamer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dreamer {
    /// Initialize a dream: convert, resize, and normalize the clip,
    /// add the batch dimension, and mark it as the gradient leaf.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a frame count different from
    /// `clip_len`, or (in channel mode) a channel index out of range
    /// for an enabled stage.
    pub fn new(model: VideoModel, config: DreamConfig, frames: &[RgbFrame]) -> Result<Self> {
        config.validate()?;

        if config.mode == ObjectiveMode::Channel {
            let widths = model.stage_channels();
            for (i, objective) in config.objectives.iter().enumerate() {
                if objective.weight > 0.0 && objective.channel >= widths[i] {
                    return Err(EnsonarError::invalid_hyperparameter(
                        &format!("objectives[{i}].channel"),
                        objective.channel,
                        &format!("< {} (stage {i} width)", widths[i]),
                    ));
                }
            }
        }

        if frames.len() != config.clip_len {
            return Err(EnsonarError::dimension_mismatch(
                "clip frames",
                &[config.clip_len],
                &[frames.len()],
            ));
        }

        let clip = ToTensor::new().convert(frames)?;
        let pipeline = Compose::new(vec![
            Box::new(Resize::new(config.frame_size)),
            Box::new(Normalize::kinetics()),
        ]);
        let clip = pipeline.apply(clip)?;

        assert_eq!(clip.shape()[0], 3);
        assert_eq!(clip.shape()[1], config.clip_len);

        let shape = clip.shape().to_vec();
        let batched = [vec![1], shape].concat();
        let clip = clip.reshaped(&batched).requires_grad();

        Ok(Self {
            model,
            config,
            clip,
        })
    }

    /// The configuration this dreamer runs with.
    #[must_use]
    pub fn config(&self) -> &DreamConfig {
        &self.config
    }

    /// The working clip batch, (1, 3, T, H, W), normalized.
    #[must_use]
    pub fn clip(&self) -> &Tensor {
        &self.clip
    }

    /// Run one gradient-ascent iteration.
    pub fn step(&mut self, epoch: usize) -> EpochStats {
        let activations = self.model.forward_stages(&self.clip);

        let mut loss: Option<Tensor> = None;
        for (activation, objective) in activations.iter().zip(self.config.objectives.iter()) {
            if objective.weight == 0.0 {
                continue;
            }
            let norm = match self.config.mode {
                ObjectiveMode::LayerNorm => activation.norm(),
                ObjectiveMode::Channel => activation.channel(objective.channel).norm(),
            };
            let term = norm.mul_scalar(objective.weight);
            loss = Some(match loss {
                Some(acc) => acc.add(&term),
                None => term,
            });
        }
        let loss = loss.expect("validated config enables at least one stage");

        let tv_term = TotalVariationLoss::new()
            .forward(&self.clip)
            .mul_scalar(-self.config.gamma);
        let total = loss.add(&tv_term);

        total.backward();

        let grad =
            autograd::get_grad(self.clip.id()).expect("backward populates the clip gradient");
        let scale = self.config.learning_rate / (grad.std() + GRAD_STD_EPS);
        for (x, g) in self.clip.data_mut().iter_mut().zip(grad.data()) {
            *x += scale * g;
        }

        clamp_to_normalized_range(&mut self.clip);

        let stats = EpochStats {
            epoch,
            loss: total.item(),
            tv: tv_term.item(),
        };

        // Gradient reset: the tape and every gradient buffer go away
        // before the next forward pass.
        autograd::clear_graph();

        stats
    }

    /// Run the configured number of epochs.
    pub fn run(&mut self) -> Vec<EpochStats> {
        let mut stats = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            stats.push(self.step(epoch));
        }
        stats
    }

    /// Run the configured number of epochs, reporting each to an
    /// observer.
    pub fn run_with<F: FnMut(&EpochStats)>(&mut self, mut observer: F) {
        for epoch in 0..self.config.epochs {
            let stats = self.step(epoch);
            observer(&stats);
        }
    }

    /// Drop the batch dimension, denormalize, and emit byte frames.
    ///
    /// # Errors
    ///
    /// Propagates transform failures.
    pub fn finalize(self) -> Result<Vec<RgbFrame>> {
        let Self { clip, config, .. } = self;
        let clip_len = config.clip_len;

        let frames = no_grad(move || -> Result<Vec<RgbFrame>> {
            let shape = clip.shape().to_vec();
            assert_eq!(shape[0], 1, "clip batch dimension must be 1");
            let clip = clip.detach().reshaped(&shape[1..]);

            let clip = Denormalize::kinetics().apply(clip)?;
            let shape = clip.shape().to_vec();
            let (t_len, height, width) = (shape[1], shape[2], shape[3]);
            assert_eq!(t_len, clip_len);

            let plane = height * width;
            let data = clip.data();
            let mut frames = Vec::with_capacity(t_len);
            for t in 0..t_len {
                let mut bytes = Vec::with_capacity(plane * 3);
                for h in 0..height {
                    for w in 0..width {
                        for c in 0..3 {
                            let v = data[(c * t_len + t) * plane + h * width + w].clamp(0.0, 1.0);
                            bytes.push((v * 255.0) as u8);
                        }
                    }
                }
                frames.push(RgbFrame::new(width, height, bytes)?);
            }
            Ok(frames)
        })?;

        assert_eq!(frames.len(), clip_len);
        Ok(frames)
    }
}

/// Clamp each channel of the normalized clip to the range that maps
/// back to raw pixel values in [0, 1].
fn clamp_to_normalized_range(clip: &mut Tensor) {
    let shape = clip.shape().to_vec();
    assert_eq!(shape.len(), 5);
    assert_eq!(shape[1], 3);
    let plane: usize = shape[2..].iter().product();

    let data = clip.data_mut();
    for c in 0..3 {
        let lo = (0.0 - KINETICS_MEAN[c]) / KINETICS_STD[c];
        let hi = (1.0 - KINETICS_MEAN[c]) / KINETICS_STD[c];
        for v in &mut data[c * plane..(c + 1) * plane] {
            *v = v.clamp(lo, hi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VideoArchSpec;
    use crate::video::SyntheticClip;

    fn nano_model() -> VideoModel {
        VideoModel::new(VideoArchSpec::nano().with_seed(0))
    }

    fn small_config() -> DreamConfig {
        let mut config = DreamConfig::default();
        config.epochs = 1;
        config.frame_size = 16;
        config.clip_len = 8;
        config
    }

    fn small_frames() -> Vec<crate::video::RgbFrame> {
        SyntheticClip::noise(16, 16, 8, 42).frames()
    }

    #[test]
    fn test_config_default_enables_stage_two() {
        let config = DreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.objectives[2].weight, 1.0);
        assert_eq!(config.objectives[2].channel, 6);
        assert!(config.objectives[0].weight == 0.0);
        assert_eq!(config.mode, ObjectiveMode::LayerNorm);
    }

    #[test]
    fn test_config_rejects_bad_hyperparameters() {
        let mut config = DreamConfig::default();
        config.epochs = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            EnsonarError::InvalidHyperparameter { .. }
        ));

        let mut config = DreamConfig::default();
        config.learning_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = DreamConfig::default();
        config.gamma = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = DreamConfig::default();
        config.objectives = [LayerObjective::disabled(); NUM_STAGES];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = DreamConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DreamConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.epochs, config.epochs);
        assert_eq!(back.objectives[2].weight, config.objectives[2].weight);
        assert_eq!(back.mode, config.mode);
    }

    #[test]
    fn test_channel_mode_validates_against_model() {
        let mut config = small_config();
        config.mode = ObjectiveMode::Channel;
        config.objectives[2].channel = 999;

        let err = Dreamer::new(nano_model(), config, &small_frames()).unwrap_err();
        assert!(matches!(err, EnsonarError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_new_rejects_wrong_frame_count() {
        let err = Dreamer::new(nano_model(), small_config(), &small_frames()[..4]).unwrap_err();
        assert!(matches!(err, EnsonarError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_initialize_builds_normalized_batched_clip() {
        let dreamer = Dreamer::new(nano_model(), small_config(), &small_frames()).unwrap();
        assert_eq!(dreamer.clip().shape(), &[1, 3, 8, 16, 16]);
        assert!(dreamer.clip().requires_grad_enabled());
    }

    #[test]
    fn test_step_clears_gradient_buffer() {
        let mut dreamer = Dreamer::new(nano_model(), small_config(), &small_frames()).unwrap();
        let clip_id = dreamer.clip().id();

        let stats = dreamer.step(0);
        assert!(stats.loss.is_finite());
        assert!(stats.tv <= 0.0);
        assert!(autograd::get_grad(clip_id).is_none());
    }

    #[test]
    fn test_step_keeps_clip_in_raw_unit_range() {
        let mut config = small_config();
        // A huge step so clamping is guaranteed to engage.
        config.learning_rate = 50.0;
        let mut dreamer = Dreamer::new(nano_model(), config, &small_frames()).unwrap();
        dreamer.step(0);

        let shape = dreamer.clip().shape().to_vec();
        let plane: usize = shape[2..].iter().product();
        for (i, &v) in dreamer.clip().data().iter().enumerate() {
            let c = (i / plane) % 3;
            let raw = v * KINETICS_STD[c] + KINETICS_MEAN[c];
            assert!(
                (-1e-4..=1.0 + 1e-4).contains(&raw),
                "denormalized value {raw} outside [0, 1]"
            );
        }
    }

    #[test]
    fn test_step_preserves_clip_shape() {
        let mut dreamer = Dreamer::new(nano_model(), small_config(), &small_frames()).unwrap();
        let before = dreamer.clip().shape().to_vec();
        dreamer.step(0);
        assert_eq!(dreamer.clip().shape(), &before[..]);
    }

    #[test]
    fn test_channel_mode_runs() {
        let mut config = small_config();
        config.mode = ObjectiveMode::Channel;
        config.objectives[2].channel = 3;
        let mut dreamer = Dreamer::new(nano_model(), config, &small_frames()).unwrap();
        let stats = dreamer.step(0);
        assert!(stats.loss.is_finite());
    }

    #[test]
    fn test_run_with_reports_every_epoch() {
        let mut config = small_config();
        config.epochs = 3;
        let mut dreamer = Dreamer::new(nano_model(), config, &small_frames()).unwrap();

        let mut seen = Vec::new();
        dreamer.run_with(|stats| seen.push(stats.epoch));
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_finalize_emits_byte_frames() {
        let mut dreamer = Dreamer::new(nano_model(), small_config(), &small_frames()).unwrap();
        dreamer.run();
        let frames = dreamer.finalize().unwrap();

        assert_eq!(frames.len(), 8);
        for frame in &frames {
            assert_eq!(frame.width(), 16);
            assert_eq!(frame.height(), 16);
            assert_eq!(frame.data().len(), 16 * 16 * 3);
        }
    }

    #[test]
    fn test_total_variation_loss_module() {
        let tv = TotalVariationLoss::new();
        let constant = Tensor::from_vec(vec![0.3; 2 * 3 * 4 * 4], &[1, 2, 3, 4, 4]);
        assert_eq!(tv.forward(&constant).item(), 0.0);
    }
}
