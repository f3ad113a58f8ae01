//! Ensonar: DeepDream-style activation maximization for video clips.
//!
//! Ensonar loads a short video clip, runs it through a frozen R(2+1)D
//! action-recognition network, and iteratively perturbs the clip by
//! gradient ascent so that chosen internal activations grow, regularized
//! by a total-variation smoothness penalty. The dreamed clip is written
//! out as a looping animated GIF.
//!
//! # Quick Start
//!
//! ```
//! use ensonar::prelude::*;
//!
//! // A deterministic synthetic clip (no video file needed).
//! let frames = SyntheticClip::noise(32, 32, 8, 7).frames();
//!
//! // A tiny randomly initialized network and a one-epoch dream.
//! let model = VideoModel::new(VideoArchSpec::nano().with_seed(7));
//! let mut config = DreamConfig::default();
//! config.epochs = 1;
//! config.frame_size = 16;
//! config.clip_len = 8;
//!
//! let mut dreamer = Dreamer::new(model, config, &frames).unwrap();
//! dreamer.run();
//! let dreamed = dreamer.finalize().unwrap();
//! assert_eq!(dreamed.len(), 8);
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tape-based reverse-mode automatic differentiation
//! - [`nn`]: Network building blocks (Conv3d, BatchNorm3d, ReLU, init)
//! - [`models`]: The R(2+1)D video network and its architecture presets
//! - [`serialization`]: SafeTensors weight load/save
//! - [`video`]: Frame sources (ffmpeg decode, synthetic) and clip datasets
//! - [`transforms`]: Clip tensor transforms (ToTensor, Resize, Normalize)
//! - [`dream`]: The activation-maximization loop and its configuration
//! - [`gif`]: Animated GIF output encoder

pub mod autograd;
pub mod dream;
pub mod error;
pub mod gif;
pub mod models;
pub mod nn;
pub mod prelude;
pub mod serialization;
pub mod transforms;
pub mod video;

pub use error::{EnsonarError, Result};
