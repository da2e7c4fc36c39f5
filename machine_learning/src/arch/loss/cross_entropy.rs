use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::LossFn;

/// Softmax followed by negative log likelihood, computed from raw logits.
#[derive(Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut probs = logits.to_owned();

        for mut row in probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &z| m.max(z));
            row.mapv_inplace(|z| (z - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        probs
    }
}

impl LossFn for CrossEntropy {
    fn sample_losses(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array1<f32> {
        y_pred
            .axis_iter(Axis(0))
            .zip(y.axis_iter(Axis(0)))
            .map(|(logits, target)| {
                let max = logits.fold(f32::NEG_INFINITY, |m, &z| m.max(z));
                let log_sum = logits.fold(0., |acc, &z| acc + (z - max).exp()).ln() + max;

                logits
                    .iter()
                    .zip(target)
                    .map(|(&z, &t)| t * (log_sum - z))
                    .sum::<f32>()
            })
            .collect()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        (Self::softmax(y_pred) - &y) / n
    }
}
