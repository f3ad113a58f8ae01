//! Weight serialization.
//!
//! Network weights travel in the SafeTensors format:
//! ```text
//! [8-byte header: u64 metadata length (little-endian)]
//! [JSON metadata: tensor names, dtypes, shapes, data_offsets]
//! [Raw tensor data: F32 values in little-endian]
//! ```
//!
//! Compatible with the `HuggingFace` ecosystem, so pretrained video
//! checkpoints exported elsewhere load directly.

pub mod safetensors;

pub use safetensors::{load_safetensors, save_safetensors, SafeTensorsMetadata, TensorMetadata};

use std::collections::BTreeMap;

/// In-memory tensor store: canonical name to (data, shape).
///
/// `BTreeMap` keeps iteration (and therefore on-disk layout)
/// deterministic.
pub type TensorMap = BTreeMap<String, (Vec<f32>, Vec<usize>)>;
