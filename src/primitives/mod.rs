//! Tensor Primitives
//!
//! Device selection, activations, losses, metrics and dense normalization.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection and loss functions (NLL, BCE)
//! - [`activations`]: Activation functions (sigmoid, log-softmax, relu, dropout)
//! - [`normalize`]: Dense adjacency normalization
//! - [`metrics`]: Classification accuracy

mod tensor_ops;
mod activations;
mod normalize;
mod metrics;

// Re-export all primitives at module level
pub use tensor_ops::*;
pub use activations::*;
pub use normalize::*;
pub use metrics::*;
