//! 3-D convolution over video clips.
//!
//! Follows the PyTorch layout: input `(N, C_in, T, H, W)`, weight
//! `(C_out, C_in, Kt, Kh, Kw)`. The forward pass is parallelized over
//! output channels with rayon; the backward pass propagates gradients
//! to the input only, since every convolution in this crate carries
//! frozen pretrained (or frozen random) weights.

use std::sync::Arc;

use rayon::prelude::*;

use super::init::{kaiming_uniform, zeros};
use super::module::Module;
use crate::autograd::grad_fn::Conv3dBackward;
use crate::autograd::ops::track_unary;
use crate::autograd::Tensor;
use crate::error::{EnsonarError, Result};
use crate::serialization::TensorMap;

/// 3-D convolution layer.
///
/// # Shape
///
/// - Input: `(N, C_in, T, H, W)`
/// - Output: `(N, C_out, T_out, H_out, W_out)` where each output extent
///   is `(in + 2 * padding - kernel) / stride + 1`
///
/// # Example
///
/// ```
/// use ensonar::nn::{Conv3d, Module};
/// use ensonar::autograd::Tensor;
///
/// // The spatial half of an R(2+1)D stem: 1x7x7 kernel, 1x2x2 stride.
/// let conv = Conv3d::with_options(3, 45, (1, 7, 7), (1, 2, 2), (0, 3, 3), false, Some(0));
/// let x = Tensor::zeros(&[1, 3, 8, 32, 32]);
/// let y = conv.forward(&x);
/// assert_eq!(y.shape(), &[1, 45, 8, 16, 16]);
/// ```
pub struct Conv3d {
    /// Weight tensor, shape: [`out_channels`, `in_channels`, kt, kh, kw]
    weight: Tensor,
    /// Bias tensor, shape: [`out_channels`], or None
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    kernel: (usize, usize, usize),
    stride: (usize, usize, usize),
    padding: (usize, usize, usize),
}

impl Conv3d {
    /// Create a Conv3d with stride 1, no padding, and a bias.
    #[must_use]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize, usize),
        seed: Option<u64>,
    ) -> Self {
        Self::with_options(in_channels, out_channels, kernel, (1, 1, 1), (0, 0, 0), true, seed)
    }

    /// Create a Conv3d with explicit stride, padding, and bias choice.
    ///
    /// Weights start Kaiming-initialized; pretrained values are loaded
    /// over them via [`Conv3d::load_state`].
    #[must_use]
    pub fn with_options(
        in_channels: usize,
        out_channels: usize,
        kernel: (usize, usize, usize),
        stride: (usize, usize, usize),
        padding: (usize, usize, usize),
        bias: bool,
        seed: Option<u64>,
    ) -> Self {
        let (kt, kh, kw) = kernel;
        let fan_in = in_channels * kt * kh * kw;
        let weight = kaiming_uniform(&[out_channels, in_channels, kt, kh, kw], fan_in, seed);
        let bias_tensor = if bias { Some(zeros(&[out_channels])) } else { None };

        Self {
            weight,
            bias: bias_tensor,
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        }
    }

    /// Number of input channels.
    #[must_use]
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Number of output channels.
    #[must_use]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Kernel extents as (t, h, w).
    #[must_use]
    pub fn kernel(&self) -> (usize, usize, usize) {
        self.kernel
    }

    /// Copy this layer's parameters into `store` under `prefix`.
    pub fn collect_state(&self, prefix: &str, store: &mut TensorMap) {
        store.insert(
            format!("{prefix}.weight"),
            (self.weight.data().to_vec(), self.weight.shape().to_vec()),
        );
        if let Some(bias) = &self.bias {
            store.insert(
                format!("{prefix}.bias"),
                (bias.data().to_vec(), bias.shape().to_vec()),
            );
        }
    }

    /// Load this layer's parameters from `store` under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`EnsonarError::MissingTensor`] if a required tensor is
    /// absent and [`EnsonarError::DimensionMismatch`] on shape clashes.
    pub fn load_state(&mut self, prefix: &str, store: &TensorMap) -> Result<()> {
        self.weight = load_tensor(store, &format!("{prefix}.weight"), self.weight.shape())?;
        if let Some(bias) = &mut self.bias {
            *bias = load_tensor(store, &format!("{prefix}.bias"), bias.shape())?;
        }
        Ok(())
    }
}

/// Fetch a named tensor from a store, validating its shape.
pub(crate) fn load_tensor(store: &TensorMap, name: &str, expected: &[usize]) -> Result<Tensor> {
    let (data, shape) = store
        .get(name)
        .ok_or_else(|| EnsonarError::MissingTensor {
            name: name.to_string(),
        })?;
    if shape != expected {
        return Err(EnsonarError::dimension_mismatch(name, expected, shape));
    }
    Ok(Tensor::new(data, shape))
}

impl Module for Conv3d {
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.ndim(),
            5,
            "Conv3d expects 5D input [N, C, T, H, W], got {}D",
            input.ndim()
        );

        let shape = input.shape();
        let (batch, in_c, in_t, in_h, in_w) = (shape[0], shape[1], shape[2], shape[3], shape[4]);
        assert_eq!(
            in_c, self.in_channels,
            "Expected {} input channels, got {}",
            self.in_channels, in_c
        );

        let (kt, kh, kw) = self.kernel;
        let (st, sh, sw) = self.stride;
        let (pt, ph, pw) = self.padding;
        assert!(
            in_t + 2 * pt >= kt && in_h + 2 * ph >= kh && in_w + 2 * pw >= kw,
            "Conv3d kernel {:?} too large for padded input {:?}",
            self.kernel,
            shape
        );

        let out_t = (in_t + 2 * pt - kt) / st + 1;
        let out_h = (in_h + 2 * ph - kh) / sh + 1;
        let out_w = (in_w + 2 * pw - kw) / sw + 1;
        let plane = out_t * out_h * out_w;

        let input_data = input.data();
        let weight_data = self.weight.data();
        let mut output = vec![0.0f32; batch * self.out_channels * plane];

        for n in 0..batch {
            let base = n * self.out_channels * plane;
            output[base..base + self.out_channels * plane]
                .par_chunks_mut(plane)
                .enumerate()
                .for_each(|(oc, chunk)| {
                    let bias = self.bias.as_ref().map_or(0.0, |b| b.data()[oc]);
                    for ot in 0..out_t {
                        for oh in 0..out_h {
                            for ow in 0..out_w {
                                let mut sum = bias;
                                for ic in 0..in_c {
                                    for dt in 0..kt {
                                        let it = ot * st + dt;
                                        if it < pt || it >= in_t + pt {
                                            continue;
                                        }
                                        let it = it - pt;
                                        for dh in 0..kh {
                                            let ih = oh * sh + dh;
                                            if ih < ph || ih >= in_h + ph {
                                                continue;
                                            }
                                            let ih = ih - ph;
                                            for dw in 0..kw {
                                                let iw = ow * sw + dw;
                                                if iw < pw || iw >= in_w + pw {
                                                    continue;
                                                }
                                                let iw = iw - pw;
                                                let x_idx = (((n * in_c + ic) * in_t + it) * in_h
                                                    + ih)
                                                    * in_w
                                                    + iw;
                                                let w_idx = (((oc * in_c + ic) * kt + dt) * kh
                                                    + dh)
                                                    * kw
                                                    + dw;
                                                sum += input_data[x_idx] * weight_data[w_idx];
                                            }
                                        }
                                    }
                                }
                                chunk[(ot * out_h + oh) * out_w + ow] = sum;
                            }
                        }
                    }
                });
        }

        let result = Tensor::from_vec(
            output,
            &[batch, self.out_channels, out_t, out_h, out_w],
        );
        track_unary(
            input,
            result,
            Arc::new(Conv3dBackward {
                weight: self.weight.detach(),
                input_shape: shape.to_vec(),
                stride: self.stride,
                padding: self.padding,
            }),
        )
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }
}

impl std::fmt::Debug for Conv3d {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conv3d")
            .field("in_channels", &self.in_channels)
            .field("out_channels", &self.out_channels)
            .field("kernel", &self.kernel)
            .field("stride", &self.stride)
            .field("padding", &self.padding)
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}
