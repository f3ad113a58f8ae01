//! The `Module` trait: the forward-pass interface of network layers.

use crate::autograd::Tensor;

/// Interface for network layers and composites.
///
/// Modules in this crate are frozen: `forward` never updates
/// parameters, and parameters are plain leaves that don't request
/// gradients.
pub trait Module {
    /// Compute the forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All parameter tensors of this module, in a stable order.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Total number of parameter elements.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
