//! Activation layers.

use super::module::Module;
use crate::autograd::Tensor;

/// Rectified linear unit: y = max(0, x).
#[derive(Debug, Default)]
pub struct ReLU;

impl ReLU {
    /// Create a new `ReLU` layer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.relu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_module() {
        let relu = ReLU::new();
        let x = Tensor::new(&[-1.0, 0.0, 2.5], &[3]);
        let y = relu.forward(&x);
        assert_eq!(y.data(), &[0.0, 0.0, 2.5]);
    }
}
