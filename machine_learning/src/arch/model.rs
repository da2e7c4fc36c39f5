use ndarray::ArrayView2;

use crate::{arch::loss::LossFn, error::Result, optimization::Optimizer};

/// Validation totals of a batch, summable across batches and ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Evaluation {
    /// Sum of the per sample losses.
    pub loss_sum: f32,
    pub correct: usize,
    pub total: usize,
}

/// A trainable model backed by flat parameter and gradient buffers.
pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    fn grad(&self) -> &[f32];

    fn grad_mut(&mut self) -> &mut [f32];

    /// Computes the gradient of the loss over a batch, overwriting the gradient buffer.
    ///
    /// # Arguments
    /// * `loss_fn` - The loss function.
    /// * `x` - The batch of inputs, one sample per row.
    /// * `labels` - The class of each sample.
    ///
    /// # Returns
    /// The mean loss of the batch.
    fn compute_grad<L: LossFn>(
        &mut self,
        loss_fn: &L,
        x: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<f32>;

    /// Runs a forward pass only, leaving the gradient buffer untouched.
    ///
    /// # Returns
    /// The loss sum, correct predictions and sample count of the batch.
    fn evaluate<L: LossFn>(
        &mut self,
        loss_fn: &L,
        x: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<Evaluation>;

    /// Moves the parameters along the current gradient.
    fn apply_grad<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()>;
}
