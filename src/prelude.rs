//! Convenience re-exports for common Ensonar usage.
//!
//! ```
//! use ensonar::prelude::*;
//!
//! let config = DreamConfig::default();
//! assert!(config.validate().is_ok());
//! ```

pub use crate::autograd::Tensor;
pub use crate::dream::{
    DreamConfig, Dreamer, EpochStats, LayerObjective, ObjectiveMode, TotalVariationLoss,
};
pub use crate::error::{EnsonarError, Result};
pub use crate::gif::GifSink;
pub use crate::models::{R2Plus1d, VideoArchSpec, VideoModel};
pub use crate::nn::Module;
pub use crate::transforms::{
    Compose, Denormalize, Normalize, Resize, ToTensor, Transform, KINETICS_MEAN, KINETICS_STD,
};
pub use crate::video::{
    FfmpegDecoder, FrameSource, InMemorySource, RgbFrame, SyntheticClip, VideoDataset,
};
