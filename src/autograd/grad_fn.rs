//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define how
//! gradients flow backward through it. The set of operations here is
//! exactly what the dream loop needs: the element-wise and reduction
//! ops composing the loss, plus the input-gradient paths of the frozen
//! network layers (3-D convolution and inference-mode batch norm).

use super::tensor::Tensor;

/// Trait for functions that compute gradients during the backward pass.
///
/// Each differentiable operation creates a `GradFn` implementation that
/// captures the context needed for gradient computation.
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// # Arguments
    ///
    /// * `grad_output` - Gradient flowing back from downstream operations
    ///
    /// # Returns
    ///
    /// One gradient per input tensor, in forward-pass input order.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

/// Gradient for element-wise addition of same-shape tensors: z = x + y.
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), grad_output.clone()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// Gradient for scalar multiplication: z = s * x.
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let data: Vec<f32> = grad_output.data().iter().map(|&g| g * self.scalar).collect();
        vec![Tensor::from_vec(data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

/// Gradient for full reduction: z = sum(x).
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::from_vec(vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// Gradient for ReLU: z = max(0, x).
pub(crate) struct ReluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for ReluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
            .collect();
        vec![Tensor::from_vec(data, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "ReluBackward"
    }
}

/// Gradient for the L2 norm: z = sqrt(sum(x^2)).
///
/// dz/dx = x / z; at z = 0 the subgradient 0 is used.
pub(crate) struct NormBackward {
    pub(crate) x: Tensor,
    pub(crate) norm: f32,
}

impl GradFn for NormBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let data: Vec<f32> = if self.norm == 0.0 {
            vec![0.0; self.x.numel()]
        } else {
            self.x.data().iter().map(|&x| g * x / self.norm).collect()
        };
        vec![Tensor::from_vec(data, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "NormBackward"
    }
}

/// Gradient for selecting one channel of a 5-D (N, C, T, H, W) tensor.
///
/// The selected channel receives the incoming gradient; every other
/// channel gets zero.
pub(crate) struct ChannelSelectBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) channel: usize,
}

impl GradFn for ChannelSelectBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (batch, channels) = (self.input_shape[0], self.input_shape[1]);
        let plane: usize = self.input_shape[2..].iter().product();
        let mut data = vec![0.0f32; batch * channels * plane];

        for n in 0..batch {
            let src = &grad_output.data()[n * plane..(n + 1) * plane];
            let dst_base = n * channels * plane + self.channel * plane;
            data[dst_base..dst_base + plane].copy_from_slice(src);
        }
        vec![Tensor::from_vec(data, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ChannelSelectBackward"
    }
}

/// Gradient for 3-D total variation over a 5-D (N, C, T, H, W) tensor.
///
/// The forward pass sums |x[i] - x[j]| over adjacent pairs along the
/// time, height, and width axes; the backward pass routes the sign of
/// each difference to the pair, with sign(0) = 0.
pub(crate) struct TotalVariationBackward {
    pub(crate) x: Tensor,
}

impl GradFn for TotalVariationBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let shape = self.x.shape();
        let (batch, channels, t_len, h_len, w_len) =
            (shape[0], shape[1], shape[2], shape[3], shape[4]);
        let x = self.x.data();
        let mut dx = vec![0.0f32; x.len()];

        let idx = |n: usize, c: usize, t: usize, h: usize, w: usize| -> usize {
            (((n * channels + c) * t_len + t) * h_len + h) * w_len + w
        };

        let mut route = |a: usize, b: usize| {
            let s = (x[a] - x[b]).signum();
            let s = if x[a] == x[b] { 0.0 } else { s };
            dx[a] += g * s;
            dx[b] -= g * s;
        };

        for n in 0..batch {
            for c in 0..channels {
                for t in 0..t_len {
                    for h in 0..h_len {
                        for w in 0..w_len {
                            if t + 1 < t_len {
                                route(idx(n, c, t, h, w), idx(n, c, t + 1, h, w));
                            }
                            if h + 1 < h_len {
                                route(idx(n, c, t, h, w), idx(n, c, t, h + 1, w));
                            }
                            if w + 1 < w_len {
                                route(idx(n, c, t, h, w), idx(n, c, t, h, w + 1));
                            }
                        }
                    }
                }
            }
        }

        vec![Tensor::from_vec(dx, shape)]
    }

    fn name(&self) -> &'static str {
        "TotalVariationBackward"
    }
}

/// Input gradient of a 3-D convolution with frozen weights.
///
/// The network is never trained here, so only the gradient with respect
/// to the input clip flows backward; weight and bias gradients are not
/// computed.
pub(crate) struct Conv3dBackward {
    pub(crate) weight: Tensor,
    pub(crate) input_shape: Vec<usize>,
    pub(crate) stride: (usize, usize, usize),
    pub(crate) padding: (usize, usize, usize),
}

impl GradFn for Conv3dBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let in_shape = &self.input_shape;
        let (batch, in_c, in_t, in_h, in_w) =
            (in_shape[0], in_shape[1], in_shape[2], in_shape[3], in_shape[4]);
        let out_shape = grad_output.shape();
        let (out_c, out_t, out_h, out_w) =
            (out_shape[1], out_shape[2], out_shape[3], out_shape[4]);
        let w_shape = self.weight.shape();
        let (k_t, k_h, k_w) = (w_shape[2], w_shape[3], w_shape[4]);
        let (s_t, s_h, s_w) = self.stride;
        let (p_t, p_h, p_w) = self.padding;

        let dy = grad_output.data();
        let weight = self.weight.data();
        let mut dx = vec![0.0f32; batch * in_c * in_t * in_h * in_w];

        for n in 0..batch {
            for oc in 0..out_c {
                for ot in 0..out_t {
                    for oh in 0..out_h {
                        for ow in 0..out_w {
                            let g = dy[(((n * out_c + oc) * out_t + ot) * out_h + oh) * out_w + ow];
                            if g == 0.0 {
                                continue;
                            }
                            for ic in 0..in_c {
                                for kt in 0..k_t {
                                    let it = ot * s_t + kt;
                                    if it < p_t || it >= in_t + p_t {
                                        continue;
                                    }
                                    let it = it - p_t;
                                    for kh in 0..k_h {
                                        let ih = oh * s_h + kh;
                                        if ih < p_h || ih >= in_h + p_h {
                                            continue;
                                        }
                                        let ih = ih - p_h;
                                        for kw in 0..k_w {
                                            let iw = ow * s_w + kw;
                                            if iw < p_w || iw >= in_w + p_w {
                                                continue;
                                            }
                                            let iw = iw - p_w;
                                            let w_idx = (((oc * in_c + ic) * k_t + kt) * k_h + kh)
                                                * k_w
                                                + kw;
                                            let x_idx = (((n * in_c + ic) * in_t + it) * in_h + ih)
                                                * in_w
                                                + iw;
                                            dx[x_idx] += g * weight[w_idx];
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        vec![Tensor::from_vec(dx, in_shape)]
    }

    fn name(&self) -> &'static str {
        "Conv3dBackward"
    }
}

/// Input gradient of a per-channel affine map: y[c] = scale[c] * x[c] + shift[c].
///
/// This is the backward of inference-mode batch normalization, whose
/// running statistics and affine parameters are constants.
pub(crate) struct ChannelAffineBackward {
    pub(crate) scale: Vec<f32>,
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ChannelAffineBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let channels = self.input_shape[1];
        let plane: usize = self.input_shape[2..].iter().product();
        let data: Vec<f32> = grad_output
            .data()
            .iter()
            .enumerate()
            .map(|(i, &g)| {
                let c = (i / plane) % channels;
                g * self.scale[c]
            })
            .collect();
        vec![Tensor::from_vec(data, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ChannelAffineBackward"
    }
}
