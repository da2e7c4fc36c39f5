use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::LossFn;

/// Mean squared error loss function.
#[derive(Default, Clone, Copy)]
pub struct Mse;

impl LossFn for Mse {
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32> {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(y_pred.nrows()))
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }
}
