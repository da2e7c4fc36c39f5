use ndarray::{Array1, Array2, ArrayView2};

use crate::{MlErr, Result};

/// A loss over a batch of predictions, one sample per row.
pub trait LossFn {
    /// Returns the loss of each sample of the batch.
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32>;

    /// Returns the gradient of the mean batch loss with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;

    /// Returns the mean loss of the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        self.sample_losses(y_pred, y).mean().unwrap_or_default()
    }
}

/// Encodes class labels as rows of a one-hot matrix.
///
/// # Arguments
/// * `labels` - The class of each sample.
/// * `classes` - The amount of classes, the width of the matrix.
///
/// # Returns
/// The encoded labels or an error if a label is not a valid class.
pub fn one_hot(labels: &[usize], classes: usize) -> Result<Array2<f32>> {
    let mut y = Array2::zeros((labels.len(), classes));

    for (i, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(MlErr::InvalidInput(format!(
                "label {label} is out of range for {classes} classes"
            )));
        }

        y[[i, label]] = 1.;
    }

    Ok(y)
}
