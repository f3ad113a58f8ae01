//! Differentiable operations for tensors.
//!
//! Each operation computes its forward result and, when gradient
//! tracking is enabled, records a `GradFn` to the computation graph.
//! The set is intentionally small: the dream loss is composed from
//! weighted activation norms, an optional channel selection, and the
//! total-variation penalty.

use std::sync::Arc;

use super::grad_fn::{
    AddBackward, ChannelSelectBackward, GradFn, MulScalarBackward, NormBackward, ReluBackward,
    SumBackward, TotalVariationBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

/// Record a single-input operation to the graph if tracking applies.
pub(crate) fn track_unary(input: &Tensor, mut result: Tensor, grad_fn: Arc<dyn GradFn>) -> Tensor {
    if is_grad_enabled() && input.requires_grad_enabled() {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register(input.clone());
            graph.record(result.id(), grad_fn, vec![input.id()]);
        });
    }
    result
}

/// Record a two-input operation to the graph if tracking applies.
fn track_binary(x: &Tensor, y: &Tensor, mut result: Tensor, grad_fn: Arc<dyn GradFn>) -> Tensor {
    if is_grad_enabled() && (x.requires_grad_enabled() || y.requires_grad_enabled()) {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register(x.clone());
            graph.register(y.clone());
            graph.record(result.id(), grad_fn, vec![x.id(), y.id()]);
        });
    }
    result
}

impl Tensor {
    /// Element-wise addition of same-shape tensors: z = self + other.
    ///
    /// # Panics
    ///
    /// Panics on shape mismatch (no broadcasting).
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape(),
            other.shape(),
            "add requires matching shapes, got {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a + b)
            .collect();
        let result = Tensor::from_vec(data, self.shape());
        track_binary(self, other, result, Arc::new(AddBackward))
    }

    /// Scalar multiplication: z = self * scalar.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a * scalar).collect();
        let result = Tensor::from_vec(data, self.shape());
        track_unary(self, result, Arc::new(MulScalarBackward { scalar }))
    }

    /// Sum of all elements: z = sum(self), shape [1].
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let total: f32 = self.data().iter().sum();
        let result = Tensor::new(&[total], &[1]);
        track_unary(
            self,
            result,
            Arc::new(SumBackward {
                input_shape: self.shape().to_vec(),
            }),
        )
    }

    /// ReLU activation: z = max(0, self).
    #[must_use]
    pub fn relu(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.max(0.0)).collect();
        let result = Tensor::from_vec(data, self.shape());
        track_unary(self, result, Arc::new(ReluBackward { x: self.clone() }))
    }

    /// L2 norm over all elements: z = sqrt(sum(self^2)), shape [1].
    #[must_use]
    pub fn norm(&self) -> Tensor {
        let sum_sq: f32 = self.data().iter().map(|&a| a * a).sum();
        let norm = sum_sq.sqrt();
        let result = Tensor::new(&[norm], &[1]);
        track_unary(
            self,
            result,
            Arc::new(NormBackward {
                x: self.clone(),
                norm,
            }),
        )
    }

    /// Select a single channel of a 5-D (N, C, T, H, W) tensor.
    ///
    /// Returns a (N, 1, T, H, W) tensor.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 5-D or the channel is out of range.
    #[must_use]
    pub fn channel(&self, channel: usize) -> Tensor {
        assert_eq!(
            self.ndim(),
            5,
            "channel() expects a 5-D (N, C, T, H, W) tensor, got {}D",
            self.ndim()
        );
        let shape = self.shape();
        let (batch, channels) = (shape[0], shape[1]);
        assert!(
            channel < channels,
            "channel {channel} out of range for {channels} channels"
        );
        let plane: usize = shape[2..].iter().product();

        let mut data = vec![0.0f32; batch * plane];
        for n in 0..batch {
            let src_base = n * channels * plane + channel * plane;
            data[n * plane..(n + 1) * plane]
                .copy_from_slice(&self.data()[src_base..src_base + plane]);
        }
        let result = Tensor::from_vec(data, &[batch, 1, shape[2], shape[3], shape[4]]);
        track_unary(
            self,
            result,
            Arc::new(ChannelSelectBackward {
                input_shape: shape.to_vec(),
                channel,
            }),
        )
    }

    /// 3-D total variation of a 5-D (N, C, T, H, W) tensor, shape [1].
    ///
    /// Sum of absolute first-order differences along the time, height,
    /// and width axes. Zero for a constant clip; never negative.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 5-D.
    #[must_use]
    pub fn total_variation(&self) -> Tensor {
        assert_eq!(
            self.ndim(),
            5,
            "total_variation() expects a 5-D (N, C, T, H, W) tensor, got {}D",
            self.ndim()
        );
        let shape = self.shape();
        let (batch, channels, t_len, h_len, w_len) =
            (shape[0], shape[1], shape[2], shape[3], shape[4]);
        let x = self.data();

        let idx = |n: usize, c: usize, t: usize, h: usize, w: usize| -> usize {
            (((n * channels + c) * t_len + t) * h_len + h) * w_len + w
        };

        let mut total = 0.0f32;
        for n in 0..batch {
            for c in 0..channels {
                for t in 0..t_len {
                    for h in 0..h_len {
                        for w in 0..w_len {
                            let here = x[idx(n, c, t, h, w)];
                            if t + 1 < t_len {
                                total += (here - x[idx(n, c, t + 1, h, w)]).abs();
                            }
                            if h + 1 < h_len {
                                total += (here - x[idx(n, c, t, h + 1, w)]).abs();
                            }
                            if w + 1 < w_len {
                                total += (here - x[idx(n, c, t, h, w + 1)]).abs();
                            }
                        }
                    }
                }
            }
        }

        let result = Tensor::new(&[total], &[1]);
        track_unary(
            self,
            result,
            Arc::new(TotalVariationBackward { x: self.clone() }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad, no_grad};

    /// Numerical gradient via central differences.
    fn numerical_gradient<F>(f: F, x: &Tensor, eps: f32) -> Tensor
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let mut grad_data = vec![0.0; x.numel()];

        for i in 0..x.numel() {
            let mut x_plus = x.data().to_vec();
            let mut x_minus = x.data().to_vec();
            x_plus[i] += eps;
            x_minus[i] -= eps;

            let y_plus = no_grad(|| f(&Tensor::new(&x_plus, x.shape())).item());
            let y_minus = no_grad(|| f(&Tensor::new(&x_minus, x.shape())).item());

            grad_data[i] = (y_plus - y_minus) / (2.0 * eps);
        }

        Tensor::new(&grad_data, x.shape())
    }

    /// Compare the analytical gradient of `f` at `x` against central
    /// differences.
    fn check_gradient<F>(f: F, x: &Tensor, eps: f32, tol: f32)
    where
        F: Fn(&Tensor) -> Tensor,
    {
        clear_graph();

        let x_grad = x.clone().requires_grad();
        let x_id = x_grad.id();
        let y = f(&x_grad);
        y.backward();

        let analytical = get_grad(x_id).expect("no gradient computed");
        let numerical = numerical_gradient(&f, x, eps);

        let max_diff: f32 = analytical
            .data()
            .iter()
            .zip(numerical.data().iter())
            .map(|(a, n)| (a - n).abs())
            .fold(0.0, f32::max);

        assert!(
            max_diff < tol,
            "gradient mismatch: max diff {max_diff} exceeds {tol}"
        );
        clear_graph();
    }

    #[test]
    fn test_sum_gradient() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0], &[3]).requires_grad();
        let x_id = x.id();
        x.sum().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert_eq!(grad.data(), &[1.0, 1.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_add_gradient() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0], &[2]).requires_grad();
        let y = Tensor::new(&[4.0, 5.0], &[2]);
        let x_id = x.id();
        x.add(&y).sum().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert_eq!(grad.data(), &[1.0, 1.0]);
        clear_graph();
    }

    #[test]
    #[should_panic(expected = "matching shapes")]
    fn test_add_shape_mismatch_panics() {
        let x = Tensor::new(&[1.0, 2.0], &[2]);
        let y = Tensor::new(&[1.0, 2.0, 3.0], &[3]);
        let _ = x.add(&y);
    }

    #[test]
    fn test_mul_scalar_gradient() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0, 3.0], &[3]).requires_grad();
        let x_id = x.id();
        x.mul_scalar(2.5).sum().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert_eq!(grad.data(), &[2.5, 2.5, 2.5]);
        clear_graph();
    }

    #[test]
    fn test_relu_forward_and_gradient() {
        clear_graph();
        let x = Tensor::new(&[-1.0, 0.5, 2.0], &[3]).requires_grad();
        let x_id = x.id();
        let y = x.relu();
        assert_eq!(y.data(), &[0.0, 0.5, 2.0]);
        y.sum().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert_eq!(grad.data(), &[0.0, 1.0, 1.0]);
        clear_graph();
    }

    #[test]
    fn test_norm_forward() {
        let x = Tensor::new(&[3.0, 4.0], &[2]);
        assert!((x.norm().item() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_norm_gradient_numerical() {
        let x = Tensor::new(&[0.6, -1.2, 0.3, 2.0], &[4]);
        check_gradient(|t| t.norm(), &x, 1e-3, 1e-2);
    }

    #[test]
    fn test_norm_of_zeros_has_zero_gradient() {
        clear_graph();
        let x = Tensor::zeros(&[4]).requires_grad();
        let x_id = x.id();
        x.norm().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert!(grad.data().iter().all(|&g| g == 0.0));
        clear_graph();
    }

    #[test]
    fn test_channel_forward() {
        // Two channels of a (1, 2, 1, 2, 2) tensor.
        let x = Tensor::new(
            &[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
            &[1, 2, 1, 2, 2],
        );
        let c1 = x.channel(1);
        assert_eq!(c1.shape(), &[1, 1, 1, 2, 2]);
        assert_eq!(c1.data(), &[10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_channel_gradient_routes_to_selected_channel() {
        clear_graph();
        let x = Tensor::new(
            &[1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
            &[1, 2, 1, 2, 2],
        )
        .requires_grad();
        let x_id = x.id();
        x.channel(0).sum().backward();
        let grad = get_grad(x_id).expect("gradient");
        assert_eq!(grad.data(), &[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        clear_graph();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_channel_out_of_range_panics() {
        let x = Tensor::zeros(&[1, 2, 1, 2, 2]);
        let _ = x.channel(5);
    }

    #[test]
    fn test_total_variation_constant_clip_is_zero() {
        let x = Tensor::from_vec(vec![0.25; 2 * 3 * 4 * 4], &[1, 2, 3, 4, 4]);
        assert_eq!(x.total_variation().item(), 0.0);
    }

    #[test]
    fn test_total_variation_known_value() {
        // Single (1, 1, 1, 1, 3) row: |1-3| + |3-6| = 5.
        let x = Tensor::new(&[1.0, 3.0, 6.0], &[1, 1, 1, 1, 3]);
        assert_eq!(x.total_variation().item(), 5.0);
    }

    #[test]
    fn test_total_variation_gradient_numerical() {
        // Values spaced so no adjacent pair ties within the probe eps.
        let x = Tensor::new(
            &[0.9, 0.1, 0.5, 0.3, 0.7, 0.2, 0.8, 0.4],
            &[1, 1, 2, 2, 2],
        );
        check_gradient(|t| t.total_variation(), &x, 1e-3, 1e-2);
    }

    #[test]
    fn test_no_grad_skips_recording() {
        clear_graph();
        let x = Tensor::new(&[1.0, 2.0], &[2]).requires_grad();
        let y = no_grad(|| x.mul_scalar(2.0));
        assert!(!y.requires_grad_enabled());
        clear_graph();
    }

    #[test]
    fn test_chained_loss_composition() {
        // The exact composition the dream loop builds:
        // loss = w * norm(x) + (-gamma) * tv(x)
        clear_graph();
        let x = Tensor::new(
            &[0.9, 0.1, 0.5, 0.3, 0.7, 0.2, 0.8, 0.4],
            &[1, 1, 2, 2, 2],
        );
        check_gradient(
            |t| {
                let act = t.norm().mul_scalar(0.7);
                let tv = t.total_variation().mul_scalar(-0.1);
                act.add(&tv)
            },
            &x,
            1e-3,
            1e-2,
        );
    }
}
