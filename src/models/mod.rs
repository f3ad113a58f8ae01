//! Video network architectures.
//!
//! One family lives here: the R(2+1)D action-recognition backbone that
//! the dreamer maximizes activations of. The classifier head is
//! intentionally absent -- dreaming only ever consumes the stem and
//! stage activations, and the weights loader ignores head tensors in
//! pretrained checkpoints.

mod r2plus1d;

pub use r2plus1d::{R2Plus1d, VideoArchSpec, VideoModel};
