//! Criterion (loss function) collaborators.

use candle_core::Tensor;

use crate::error::Result;

/// Maps class scores and integer targets to a scalar loss tensor.
///
/// The returned tensor must keep the autograd graph so the optimizer can
/// backpropagate through it.
pub trait Criterion {
    /// Compute the loss for `scores` `[batch, classes]` against `targets`
    /// `[batch]` (u32 class indices).
    ///
    /// # Errors
    ///
    /// Returns an error if the shapes are incompatible.
    fn loss(&self, scores: &Tensor, targets: &Tensor) -> Result<Tensor>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Softmax cross-entropy averaged over the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl Criterion for CrossEntropy {
    fn loss(&self, scores: &Tensor, targets: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::loss::cross_entropy(scores, targets)?)
    }

    fn name(&self) -> &'static str {
        "cross_entropy"
    }
}
