//! Clip tensor transforms.
//!
//! The decode side produces `(T, H, W, C)` byte frames; the network
//! wants normalized `(C, T, H, W)` f32 clips. [`ToTensor`] performs the
//! scale and axis move in one step, and the remaining transforms
//! compose over clip tensors. [`Denormalize`] is the exact inverse of
//! [`Normalize`], used by the finalize stage.

use crate::autograd::Tensor;
use crate::error::{EnsonarError, Result};
use crate::video::RgbFrame;

/// Per-channel mean of the Kinetics pretraining statistics.
pub const KINETICS_MEAN: [f32; 3] = [0.432_16, 0.394_666, 0.376_45];

/// Per-channel std of the Kinetics pretraining statistics.
pub const KINETICS_STD: [f32; 3] = [0.228_03, 0.221_45, 0.216_989];

/// A transform over `(C, T, H, W)` clip tensors.
pub trait Transform {
    /// Apply the transform, consuming the clip.
    fn apply(&self, clip: Tensor) -> Result<Tensor>;
}

/// Apply a sequence of transforms in order.
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    /// Build a pipeline from a list of steps.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }
}

impl Transform for Compose {
    fn apply(&self, clip: Tensor) -> Result<Tensor> {
        let mut clip = clip;
        for step in &self.steps {
            clip = step.apply(clip)?;
        }
        Ok(clip)
    }
}

/// Decoded byte frames to a `(C, T, H, W)` f32 clip in [0, 1].
#[derive(Debug, Default)]
pub struct ToTensor;

impl ToTensor {
    /// Create the converter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Convert frames into a clip tensor.
    ///
    /// # Errors
    ///
    /// Fails on an empty frame list or mixed frame dimensions.
    pub fn convert(&self, frames: &[RgbFrame]) -> Result<Tensor> {
        let first = frames
            .first()
            .ok_or_else(|| EnsonarError::Other("cannot build a clip from zero frames".into()))?;
        let (width, height) = (first.width(), first.height());
        if !frames
            .iter()
            .all(|f| f.width() == width && f.height() == height)
        {
            return Err(EnsonarError::Other(
                "clip frames must share dimensions".into(),
            ));
        }

        let t_len = frames.len();
        let plane = height * width;
        let mut data = vec![0.0f32; 3 * t_len * plane];

        for (t, frame) in frames.iter().enumerate() {
            let bytes = frame.data();
            for h in 0..height {
                for w in 0..width {
                    let src = (h * width + w) * 3;
                    for c in 0..3 {
                        data[(c * t_len + t) * plane + h * width + w] =
                            f32::from(bytes[src + c]) / 255.0;
                    }
                }
            }
        }

        Ok(Tensor::from_vec(data, &[3, t_len, height, width]))
    }
}

/// Bilinear resize so the short side equals `size`, preserving aspect.
#[derive(Debug)]
pub struct Resize {
    size: usize,
}

impl Resize {
    /// Create a resize targeting the given short-side extent.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    fn target(&self, height: usize, width: usize) -> (usize, usize) {
        if height <= width {
            let out_w = ((width * self.size) as f32 / height as f32).round() as usize;
            (self.size, out_w.max(1))
        } else {
            let out_h = ((height * self.size) as f32 / width as f32).round() as usize;
            (out_h.max(1), self.size)
        }
    }
}

impl Transform for Resize {
    fn apply(&self, clip: Tensor) -> Result<Tensor> {
        if clip.ndim() != 4 {
            return Err(EnsonarError::DimensionMismatch {
                expected: "a (C, T, H, W) clip".to_string(),
                actual: format!("{:?}", clip.shape()),
            });
        }
        let shape = clip.shape();
        let (channels, t_len, in_h, in_w) = (shape[0], shape[1], shape[2], shape[3]);
        let (out_h, out_w) = self.target(in_h, in_w);
        if (out_h, out_w) == (in_h, in_w) {
            return Ok(clip);
        }

        let scale_h = in_h as f32 / out_h as f32;
        let scale_w = in_w as f32 / out_w as f32;
        let src = clip.data();
        let mut data = vec![0.0f32; channels * t_len * out_h * out_w];

        for c in 0..channels {
            for t in 0..t_len {
                let src_base = (c * t_len + t) * in_h * in_w;
                let dst_base = (c * t_len + t) * out_h * out_w;
                for oh in 0..out_h {
                    let sy = ((oh as f32 + 0.5) * scale_h - 0.5).clamp(0.0, in_h as f32 - 1.0);
                    let y0 = sy.floor() as usize;
                    let y1 = (y0 + 1).min(in_h - 1);
                    let fy = sy - y0 as f32;
                    for ow in 0..out_w {
                        let sx = ((ow as f32 + 0.5) * scale_w - 0.5).clamp(0.0, in_w as f32 - 1.0);
                        let x0 = sx.floor() as usize;
                        let x1 = (x0 + 1).min(in_w - 1);
                        let fx = sx - x0 as f32;

                        let top = src[src_base + y0 * in_w + x0] * (1.0 - fx)
                            + src[src_base + y0 * in_w + x1] * fx;
                        let bottom = src[src_base + y1 * in_w + x0] * (1.0 - fx)
                            + src[src_base + y1 * in_w + x1] * fx;
                        data[dst_base + oh * out_w + ow] = top * (1.0 - fy) + bottom * fy;
                    }
                }
            }
        }

        Ok(Tensor::from_vec(data, &[channels, t_len, out_h, out_w]))
    }
}

/// Per-channel standardization: `x = (x - mean) / std`.
#[derive(Debug)]
pub struct Normalize {
    mean: [f32; 3],
    std: [f32; 3],
}

impl Normalize {
    /// Create a normalizer with explicit statistics.
    #[must_use]
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    /// The Kinetics pretraining statistics.
    #[must_use]
    pub fn kinetics() -> Self {
        Self::new(KINETICS_MEAN, KINETICS_STD)
    }
}

impl Transform for Normalize {
    fn apply(&self, clip: Tensor) -> Result<Tensor> {
        per_channel_map(clip, |c, x| (x - self.mean[c]) / self.std[c])
    }
}

/// Exact inverse of [`Normalize`]: `x = x * std + mean`.
#[derive(Debug)]
pub struct Denormalize {
    mean: [f32; 3],
    std: [f32; 3],
}

impl Denormalize {
    /// Create a denormalizer with explicit statistics.
    #[must_use]
    pub fn new(mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { mean, std }
    }

    /// The Kinetics pretraining statistics.
    #[must_use]
    pub fn kinetics() -> Self {
        Self::new(KINETICS_MEAN, KINETICS_STD)
    }
}

impl Transform for Denormalize {
    fn apply(&self, clip: Tensor) -> Result<Tensor> {
        per_channel_map(clip, |c, x| x * self.std[c] + self.mean[c])
    }
}

fn per_channel_map(clip: Tensor, f: impl Fn(usize, f32) -> f32) -> Result<Tensor> {
    if clip.ndim() != 4 || clip.shape()[0] != 3 {
        return Err(EnsonarError::DimensionMismatch {
            expected: "a (3, T, H, W) clip".to_string(),
            actual: format!("{:?}", clip.shape()),
        });
    }
    let shape = clip.shape().to_vec();
    let plane: usize = shape[1..].iter().product();
    let data: Vec<f32> = clip
        .data()
        .iter()
        .enumerate()
        .map(|(i, &x)| f(i / plane, x))
        .collect();
    Ok(Tensor::from_vec(data, &shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::SyntheticClip;

    #[test]
    fn test_to_tensor_shape_and_range() {
        let frames = SyntheticClip::noise(6, 4, 5, 3).frames();
        let clip = ToTensor::new().convert(&frames).unwrap();
        assert_eq!(clip.shape(), &[3, 5, 4, 6]);
        assert!(clip.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_to_tensor_moves_axes() {
        // One 1x2 frame: pixels (10, 20, 30) and (40, 50, 60).
        let frame = RgbFrame::new(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let clip = ToTensor::new().convert(&[frame]).unwrap();
        // Channel-major layout: R plane then G plane then B plane.
        let expected: Vec<f32> = [10.0, 40.0, 20.0, 50.0, 30.0, 60.0]
            .iter()
            .map(|v| v / 255.0)
            .collect();
        assert_eq!(clip.data(), &expected[..]);
    }

    #[test]
    fn test_to_tensor_rejects_empty_and_mixed() {
        assert!(ToTensor::new().convert(&[]).is_err());

        let a = RgbFrame::new(2, 2, vec![0; 12]).unwrap();
        let b = RgbFrame::new(1, 1, vec![0; 3]).unwrap();
        assert!(ToTensor::new().convert(&[a, b]).is_err());
    }

    #[test]
    fn test_resize_short_side() {
        let clip = Tensor::zeros(&[3, 2, 64, 128]);
        let resized = Resize::new(32).apply(clip).unwrap();
        assert_eq!(resized.shape(), &[3, 2, 32, 64]);

        let clip = Tensor::zeros(&[3, 2, 128, 64]);
        let resized = Resize::new(32).apply(clip).unwrap();
        assert_eq!(resized.shape(), &[3, 2, 64, 32]);
    }

    #[test]
    fn test_resize_identity_when_already_sized() {
        let clip = Tensor::ones(&[3, 1, 32, 32]);
        let resized = Resize::new(32).apply(clip.clone()).unwrap();
        assert_eq!(resized.shape(), clip.shape());
        assert_eq!(resized.data(), clip.data());
    }

    #[test]
    fn test_resize_preserves_constant_values() {
        let clip = Tensor::from_vec(vec![0.5; 3 * 1 * 16 * 16], &[3, 1, 16, 16]);
        let resized = Resize::new(8).apply(clip).unwrap();
        assert!(resized.data().iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_normalize_denormalize_roundtrip() {
        let frames = SyntheticClip::noise(8, 8, 2, 1).frames();
        let clip = ToTensor::new().convert(&frames).unwrap();
        let original = clip.data().to_vec();

        let normalized = Normalize::kinetics().apply(clip).unwrap();
        let restored = Denormalize::kinetics().apply(normalized).unwrap();

        for (a, b) in restored.data().iter().zip(&original) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_normalize_known_value() {
        let clip = Tensor::from_vec(
            vec![
                KINETICS_MEAN[0],
                KINETICS_MEAN[0],
                KINETICS_MEAN[1],
                KINETICS_MEAN[1],
                KINETICS_MEAN[2],
                KINETICS_MEAN[2],
            ],
            &[3, 1, 1, 2],
        );
        let normalized = Normalize::kinetics().apply(clip).unwrap();
        assert!(normalized.data().iter().all(|&v| v.abs() < 1e-5));
    }

    #[test]
    fn test_compose_pipeline() {
        let frames = SyntheticClip::noise(16, 16, 2, 5).frames();
        let clip = ToTensor::new().convert(&frames).unwrap();

        let pipeline = Compose::new(vec![
            Box::new(Resize::new(8)),
            Box::new(Normalize::kinetics()),
        ]);
        let out = pipeline.apply(clip).unwrap();
        assert_eq!(out.shape(), &[3, 2, 8, 8]);
    }

    #[test]
    fn test_normalize_rejects_wrong_layout() {
        let clip = Tensor::zeros(&[1, 3, 2, 2, 2]);
        assert!(Normalize::kinetics().apply(clip).is_err());
    }
}
