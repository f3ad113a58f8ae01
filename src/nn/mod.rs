//! Network building blocks for the frozen video model.
//!
//! The module is organized around the [`Module`] trait, which defines
//! the forward-pass interface for all layers:
//!
//! - **Layers**: [`Conv3d`]
//! - **Normalization**: [`BatchNorm3d`] (inference mode)
//! - **Activations**: [`ReLU`]
//! - **Init**: [`kaiming_uniform`], [`kaiming_normal`]
//!
//! Every layer here is used in inference mode with frozen parameters;
//! the backward pass only propagates gradients to the layer *input*,
//! which is all activation maximization needs.
//!
//! # Example
//!
//! ```
//! use ensonar::nn::{Conv3d, Module};
//! use ensonar::autograd::Tensor;
//!
//! let conv = Conv3d::new(3, 8, (3, 3, 3), Some(42));
//! let x = Tensor::zeros(&[1, 3, 8, 16, 16]);
//! let y = conv.forward(&x);
//! assert_eq!(y.shape(), &[1, 8, 6, 14, 14]);
//! ```

mod activation;
mod conv;
pub mod init;
mod module;
mod normalization;

pub use activation::ReLU;
pub use conv::Conv3d;
pub use init::{kaiming_normal, kaiming_uniform};
pub use module::Module;
pub use normalization::BatchNorm3d;
