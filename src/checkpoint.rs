//! Autodiff backends for training.
//!
//! In burn, recomputing activations on the backward pass is a property of the autodiff backend
//! rather than of individual modules. Running a model on [`CheckpointedBackend`] lets the backend
//! drop compute-bound intermediate activations (such as the scan rounds of
//! [`MambaBlock`](crate::mamba_block::MambaBlock)) after the forward pass and recompute them
//! when the gradients are requested.

use burn::backend::Autodiff;
use burn::backend::autodiff::checkpoint::strategy::BalancedCheckpointing;

/// Keeps every activation needed by the backward pass.
pub type TrainingBackend<B> = Autodiff<B>;

/// Recomputes compute-bound activations during the backward pass, trading compute for memory.
pub type CheckpointedBackend<B> = Autodiff<B, BalancedCheckpointing>;
