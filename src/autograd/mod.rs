//! Reverse-mode automatic differentiation for the dream loop.
//!
//! A tape-based (define-by-run) engine: operations are recorded to a
//! thread-local tape during the forward pass and replayed in reverse to
//! compute gradients. In this crate only the clip tensor is a gradient
//! leaf -- the network's parameters are frozen -- so the tape carries
//! exactly one optimization target per iteration.
//!
//! # Example
//!
//! ```
//! use ensonar::autograd::{self, Tensor};
//!
//! let x = Tensor::new(&[3.0, 4.0], &[2]).requires_grad();
//! let x_id = x.id();
//!
//! let loss = x.norm();
//! loss.backward();
//!
//! let grad = autograd::get_grad(x_id).unwrap();
//! assert!((grad.data()[0] - 0.6).abs() < 1e-6);
//!
//! autograd::clear_graph();
//! assert!(autograd::get_grad(x_id).is_none());
//! ```

pub(crate) mod grad_fn;
mod graph;
pub(crate) mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::RefCell;

thread_local! {
    /// Computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Flag to disable gradient tracking (for inference and finalize).
    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Execute a closure without gradient tracking.
///
/// Used by the finalize stage and by numerical-gradient probes in tests.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

/// Get a reference to the thread-local computation graph.
pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Clear the tape and all gradient buffers.
///
/// The dream loop calls this at the end of every iteration; it is the
/// gradient reset that guarantees no accumulation across epochs.
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Get the accumulated gradient for a leaf tensor by ID.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Clear the gradient buffer of a specific leaf tensor.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}
