//! Computation graph for automatic differentiation.
//!
//! Operations are recorded to a tape during the forward pass; the
//! backward pass walks the tape in reverse and accumulates gradients
//! into the leaf tensors that asked for them. The dream loop clears the
//! graph after every iteration, which is what resets the clip's
//! gradient buffer between epochs.

use std::collections::HashMap;
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
struct TapeEntry {
    /// ID of the output tensor
    output_id: TensorId,

    /// Function to compute gradients
    grad_fn: Arc<dyn GradFn>,

    /// IDs of input tensors, in forward-pass order
    input_ids: Vec<TensorId>,
}

/// Tape-based computation graph.
///
/// Each thread has its own graph (thread-local storage in the parent
/// module); the dream loop is single-threaded, so there is exactly one
/// tape per run.
#[allow(missing_debug_implementations)]
pub struct ComputationGraph {
    /// Recorded operations, in forward order
    tape: Vec<TapeEntry>,

    /// Leaf tensors that requested gradients, by ID
    leaves: HashMap<TensorId, Tensor>,
}

impl ComputationGraph {
    /// Create a new empty computation graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            leaves: HashMap::new(),
        }
    }

    /// Clear all recorded operations and gradient buffers.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.leaves.clear();
    }

    /// Register a leaf tensor whose gradient should be kept.
    ///
    /// Tensors that don't require gradients are ignored; intermediate
    /// (non-leaf) results never accumulate gradients of their own.
    pub fn register(&mut self, tensor: Tensor) {
        if tensor.requires_grad_enabled() && tensor.is_leaf() {
            self.leaves.entry(tensor.id()).or_insert(tensor);
        }
    }

    /// Record an operation to the tape.
    pub fn record(
        &mut self,
        output_id: TensorId,
        grad_fn: Arc<dyn GradFn>,
        input_ids: Vec<TensorId>,
    ) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    /// Compute gradients via backpropagation.
    ///
    /// Starting from `grad_output` at `output_id`, walks the tape in
    /// reverse, invoking each operation's [`GradFn`] and accumulating
    /// gradients for tensors used more than once. Registered leaves
    /// receive their final gradient at the end.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let grad_out = match grads.get(&entry.output_id) {
                Some(g) => g.clone(),
                None => continue,
            };

            let input_grads = entry.grad_fn.backward(&grad_out);
            assert_eq!(
                input_grads.len(),
                entry.input_ids.len(),
                "{} returned {} gradients for {} inputs",
                entry.grad_fn.name(),
                input_grads.len(),
                entry.input_ids.len()
            );

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                grads
                    .entry(*input_id)
                    .and_modify(|existing| {
                        let summed: Vec<f32> = existing
                            .data()
                            .iter()
                            .zip(input_grad.data().iter())
                            .map(|(a, b)| a + b)
                            .collect();
                        *existing = Tensor::from_vec(summed, existing.shape());
                    })
                    .or_insert(input_grad);
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.leaves.get_mut(&id) {
                tensor.accumulate_grad(grad);
            }
        }
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    /// Check if the tape is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Get the accumulated gradient for a leaf tensor (after backward).
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.leaves.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Clear the gradient buffer of a specific leaf tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.leaves.get_mut(&id) {
            tensor.zero_grad_();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}
