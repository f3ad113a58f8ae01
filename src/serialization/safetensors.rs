//! `SafeTensors` format implementation for network weights.
//!
//! Only the F32 dtype is supported: the dreamer's network is f32
//! end-to-end, and a checkpoint carrying anything else is rejected
//! rather than silently converted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::TensorMap;
use crate::error::{EnsonarError, Result};

/// Metadata for a single tensor in `SafeTensors` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorMetadata {
    /// Data type of the tensor (only "F32" is accepted).
    pub dtype: String,
    /// Shape of the tensor.
    pub shape: Vec<usize>,
    /// Data offsets `[start, end]` in the raw data section.
    pub data_offsets: [usize; 2],
}

/// Complete `SafeTensors` metadata: tensor name to metadata, sorted.
pub type SafeTensorsMetadata = std::collections::BTreeMap<String, TensorMetadata>;

/// Save a tensor store to `SafeTensors` format.
///
/// # Errors
///
/// Returns an error if JSON serialization or file writing fails.
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &TensorMap) -> Result<()> {
    let mut metadata = SafeTensorsMetadata::new();
    let mut raw_data = Vec::new();
    let mut current_offset = 0;

    for (name, (data, shape)) in tensors {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "tensor {name} data length {} doesn't match shape {shape:?}",
            data.len()
        );

        let start_offset = current_offset;
        let end_offset = current_offset + data.len() * 4;

        metadata.insert(
            name.clone(),
            TensorMetadata {
                dtype: "F32".to_string(),
                shape: shape.clone(),
                data_offsets: [start_offset, end_offset],
            },
        );

        for &value in data {
            raw_data.extend_from_slice(&value.to_le_bytes());
        }
        current_offset = end_offset;
    }

    let metadata_json = serde_json::to_string(&metadata)
        .map_err(|e| EnsonarError::format(format!("JSON serialization failed: {e}")))?;
    let metadata_bytes = metadata_json.as_bytes();

    let mut output = Vec::with_capacity(8 + metadata_bytes.len() + raw_data.len());
    output.extend_from_slice(&(metadata_bytes.len() as u64).to_le_bytes());
    output.extend_from_slice(metadata_bytes);
    output.extend_from_slice(&raw_data);

    fs::write(path, output)?;
    Ok(())
}

/// Load a `SafeTensors` file into a tensor store.
///
/// Entries under the `__metadata__` key are skipped (user metadata).
///
/// # Errors
///
/// Returns [`EnsonarError::FormatError`] for truncated files, malformed
/// JSON, unsupported dtypes, or out-of-range offsets.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<TensorMap> {
    let bytes = fs::read(path)?;
    if bytes.len() < 8 {
        return Err(EnsonarError::format("file shorter than the 8-byte header"));
    }

    let header_len = u64::from_le_bytes(
        bytes[0..8]
            .try_into()
            .expect("slice of length 8 converts to [u8; 8]"),
    ) as usize;
    let data_start = 8 + header_len;
    if bytes.len() < data_start {
        return Err(EnsonarError::format(format!(
            "metadata length {header_len} exceeds file size {}",
            bytes.len()
        )));
    }

    let header: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&bytes[8..data_start])
            .map_err(|e| EnsonarError::format(format!("malformed JSON metadata: {e}")))?;

    let payload = &bytes[data_start..];
    let mut tensors = TensorMap::new();

    for (name, value) in header {
        if name == "__metadata__" {
            continue;
        }
        let meta: TensorMetadata = serde_json::from_value(value)
            .map_err(|e| EnsonarError::format(format!("bad metadata for tensor {name}: {e}")))?;
        if meta.dtype != "F32" {
            return Err(EnsonarError::format(format!(
                "tensor {name} has unsupported dtype {} (only F32 is supported)",
                meta.dtype
            )));
        }

        let [start, end] = meta.data_offsets;
        let numel: usize = meta.shape.iter().product();
        if end < start || end > payload.len() || end - start != numel * 4 {
            return Err(EnsonarError::format(format!(
                "tensor {name} offsets [{start}, {end}] inconsistent with shape {:?}",
                meta.shape
            )));
        }

        let data: Vec<f32> = payload[start..end]
            .chunks_exact(4)
            .map(|chunk| {
                f32::from_le_bytes(chunk.try_into().expect("chunks_exact(4) yields [u8; 4]"))
            })
            .collect();
        tensors.insert(name, (data, meta.shape));
    }

    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_store() -> TensorMap {
        let mut store = TensorMap::new();
        store.insert(
            "stem.conv_s.weight".to_string(),
            (vec![0.5, -1.5, 2.0, 0.0], vec![1, 1, 1, 2, 2]),
        );
        store.insert("stem.bn_s.weight".to_string(), (vec![1.0, 2.0], vec![2]));
        store
    }

    #[test]
    fn test_roundtrip_preserves_names_shapes_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let store = sample_store();
        save_safetensors(&path, &store).unwrap();
        let loaded = load_safetensors(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        for (name, (data, shape)) in &store {
            let (ld, ls) = loaded.get(name).expect("tensor present");
            assert_eq!(ld, data);
            assert_eq!(ls, shape);
        }
    }

    #[test]
    fn test_truncated_file_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.safetensors");
        fs::write(&path, [1, 2, 3]).unwrap();

        let err = load_safetensors(&path).unwrap_err();
        assert!(matches!(err, EnsonarError::FormatError { .. }));
    }

    #[test]
    fn test_header_overrun_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overrun.safetensors");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(1_000_000u64).to_le_bytes());
        bytes.extend_from_slice(b"{}");
        fs::write(&path, bytes).unwrap();

        let err = load_safetensors(&path).unwrap_err();
        assert!(matches!(err, EnsonarError::FormatError { .. }));
    }

    #[test]
    fn test_unsupported_dtype_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f16.safetensors");
        let header = r#"{"x":{"dtype":"F16","shape":[2],"data_offsets":[0,4]}}"#;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        fs::write(&path, bytes).unwrap();

        let err = load_safetensors(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported dtype"));
    }

    #[test]
    fn test_user_metadata_section_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.safetensors");
        let header =
            r#"{"__metadata__":{"format":"pt"},"x":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let loaded = load_safetensors(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["x"].0, vec![1.0]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_safetensors("/nonexistent/weights.safetensors").unwrap_err();
        assert!(matches!(err, EnsonarError::Io(_)));
    }
}
