//! Inference-mode batch normalization for video activations.
//!
//! The pretrained network is never trained here, so batch statistics
//! are never recomputed: each `BatchNorm3d` applies the affine map
//! derived from its stored running mean/variance and gamma/beta. That
//! collapses the layer into a per-channel scale and shift, which is
//! also exactly what its input gradient needs.

use std::sync::Arc;

use super::init::{constant, zeros};
use super::module::Module;
use crate::autograd::grad_fn::ChannelAffineBackward;
use crate::autograd::ops::track_unary;
use crate::autograd::Tensor;
use crate::error::Result;
use crate::serialization::TensorMap;

/// Batch normalization over the channel axis of (N, C, T, H, W) input,
/// inference mode only.
///
/// ```text
/// y = (x - running_mean) / sqrt(running_var + eps) * gamma + beta
/// ```
pub struct BatchNorm3d {
    num_features: usize,
    eps: f32,
    /// Learnable scale (gamma), shape [C] -- frozen here
    weight: Tensor,
    /// Learnable shift (beta), shape [C] -- frozen here
    bias: Tensor,
    /// Running mean, shape [C]
    running_mean: Tensor,
    /// Running variance, shape [C]
    running_var: Tensor,
}

impl BatchNorm3d {
    /// Create a `BatchNorm3d` with identity statistics
    /// (gamma 1, beta 0, mean 0, var 1).
    #[must_use]
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            eps: 1e-5,
            weight: constant(&[num_features], 1.0),
            bias: zeros(&[num_features]),
            running_mean: zeros(&[num_features]),
            running_var: constant(&[num_features], 1.0),
        }
    }

    /// Number of channels this layer normalizes.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Per-channel (scale, shift) of the collapsed affine map.
    fn affine(&self) -> (Vec<f32>, Vec<f32>) {
        let mut scale = Vec::with_capacity(self.num_features);
        let mut shift = Vec::with_capacity(self.num_features);
        for c in 0..self.num_features {
            let s = self.weight.data()[c] / (self.running_var.data()[c] + self.eps).sqrt();
            scale.push(s);
            shift.push(self.bias.data()[c] - self.running_mean.data()[c] * s);
        }
        (scale, shift)
    }

    /// Copy this layer's parameters and statistics into `store`.
    pub fn collect_state(&self, prefix: &str, store: &mut TensorMap) {
        for (suffix, tensor) in [
            ("weight", &self.weight),
            ("bias", &self.bias),
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ] {
            store.insert(
                format!("{prefix}.{suffix}"),
                (tensor.data().to_vec(), tensor.shape().to_vec()),
            );
        }
    }

    /// Load this layer's parameters and statistics from `store`.
    ///
    /// # Errors
    ///
    /// Missing tensors or shape mismatches are errors.
    pub fn load_state(&mut self, prefix: &str, store: &TensorMap) -> Result<()> {
        let expected = [self.num_features];
        self.weight = super::conv::load_tensor(store, &format!("{prefix}.weight"), &expected)?;
        self.bias = super::conv::load_tensor(store, &format!("{prefix}.bias"), &expected)?;
        self.running_mean =
            super::conv::load_tensor(store, &format!("{prefix}.running_mean"), &expected)?;
        self.running_var =
            super::conv::load_tensor(store, &format!("{prefix}.running_var"), &expected)?;
        Ok(())
    }
}

impl Module for BatchNorm3d {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            5,
            "BatchNorm3d expects 5D input [N, C, T, H, W], got {}D",
            input.ndim()
        );
        let shape = input.shape();
        assert_eq!(
            shape[1], self.num_features,
            "Expected {} channels, got {}",
            self.num_features, shape[1]
        );

        let (scale, shift) = self.affine();
        let plane: usize = shape[2..].iter().product();
        let channels = self.num_features;

        let data: Vec<f32> = input
            .data()
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let c = (i / plane) % channels;
                x * scale[c] + shift[c]
            })
            .collect();

        let result = Tensor::from_vec(data, shape);
        track_unary(
            input,
            result,
            Arc::new(ChannelAffineBackward {
                scale,
                input_shape: shape.to_vec(),
            }),
        )
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }
}

impl std::fmt::Debug for BatchNorm3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchNorm3d")
            .field("num_features", &self.num_features)
            .field("eps", &self.eps)
            .finish_non_exhaustive()
    }
}
