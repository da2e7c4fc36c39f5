use ndarray::{ArrayView2, Axis};
use rand::Rng;

use super::{
    Evaluation, Model,
    activations::ActFn,
    layers::Layer,
    loss::{LossFn, one_hot},
};
use crate::{MlErr, Result, optimization::Optimizer};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// Parameters and gradients live in two flat buffers, each layer owning a contiguous slice in
/// layer order.
#[derive(Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl Sequential {
    /// Creates a new `Sequential` with every parameter set to zero.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance, or an error if there are no layers or the output of a layer
    /// does not match the input of the next one.
    pub fn new<I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();
        if layers.is_empty() {
            return Err(MlErr::InvalidInput("a sequential needs at least one layer".into()));
        }

        for pair in layers.windows(2) {
            let (out, next_in) = (pair[0].dim().1, pair[1].dim().0);
            if out != next_in {
                return Err(MlErr::SizeMismatch {
                    what: "layer inputs",
                    got: next_in,
                    expected: out,
                });
            }
        }

        let size = layers.iter().map(Layer::size).sum();
        Ok(Self {
            layers,
            params: vec![0.; size],
            grad: vec![0.; size],
        })
    }

    /// Builds a classifier with one hidden layer, `features -> hidden (relu) -> classes`.
    ///
    /// The last layer outputs raw logits.
    pub fn classifier<R: Rng>(
        features: usize,
        hidden: usize,
        classes: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if features == 0 || hidden == 0 || classes < 2 {
            return Err(MlErr::InvalidInput(format!(
                "cannot build a {features} -> {hidden} -> {classes} classifier"
            )));
        }

        let mut model = Self::new([
            Layer::dense((features, hidden), Some(ActFn::relu())),
            Layer::dense((hidden, classes), None),
        ])?;

        model.init_params(rng)?;
        Ok(model)
    }

    /// Re-initializes every layer's parameters with Xavier uniform weights and zero biases.
    pub fn init_params<R: Rng>(&mut self, rng: &mut R) -> Result<()> {
        let mut rest = self.params.as_mut_slice();

        for layer in &self.layers {
            let (params, tail) = rest.split_at_mut(layer.size());
            layer.init_params(params, rng)?;
            rest = tail;
        }

        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Iterates over each layer together with its slice of the parameters.
    pub fn layer_params(&self) -> impl Iterator<Item = (&Layer, &[f32])> {
        let mut offset = 0;

        self.layers.iter().map(move |layer| {
            let params = &self.params[offset..offset + layer.size()];
            offset += layer.size();
            (layer, params)
        })
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.dim().1)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward<'x>(&'x mut self, x: ArrayView2<'x, f32>) -> Result<ArrayView2<'x, f32>> {
        let Self { layers, params, .. } = self;
        Self::forward_layers(layers, params, x)
    }

    fn forward_layers<'x>(
        layers: &'x mut [Layer],
        params: &[f32],
        mut x: ArrayView2<'x, f32>,
    ) -> Result<ArrayView2<'x, f32>> {
        let mut offset = 0;

        for layer in layers.iter_mut() {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x)?;
            offset += size;
        }

        Ok(x)
    }

    fn targets(&self, x: &ArrayView2<f32>, labels: &[usize]) -> Result<ndarray::Array2<f32>> {
        if x.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "batch labels",
                got: labels.len(),
                expected: x.nrows(),
            });
        }

        one_hot(labels, self.output_dim())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn grad(&self) -> &[f32] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    fn compute_grad<L: LossFn>(
        &mut self,
        loss_fn: &L,
        x: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<f32> {
        let y = self.targets(&x, labels)?;
        let Self {
            layers,
            params,
            grad,
        } = self;

        let y_pred = Self::forward_layers(layers, params, x)?;
        let loss = loss_fn.loss(y_pred, y.view());
        let mut d_last = loss_fn.loss_prime(y_pred, y.view());

        let mut d = d_last.view_mut();
        let mut end = params.len();

        for layer in layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(loss)
    }

    fn evaluate<L: LossFn>(
        &mut self,
        loss_fn: &L,
        x: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<Evaluation> {
        let y = self.targets(&x, labels)?;
        let y_pred = self.forward(x)?;

        let loss_sum = loss_fn.sample_losses(y_pred, y.view()).sum();
        let correct = y_pred
            .axis_iter(Axis(0))
            .zip(labels)
            .filter(|(row, label)| argmax(row.iter().copied()) == Some(**label))
            .count();

        Ok(Evaluation {
            loss_sum,
            correct,
            total: labels.len(),
        })
    }

    fn apply_grad<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)
    }
}

/// Index of the largest value, the first one on ties.
fn argmax<I: Iterator<Item = f32>>(values: I) -> Option<usize> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::loss::{CrossEntropy, Mse},
        optimization::{Adam, GradientDescent},
    };

    #[test]
    fn mismatched_layers_are_rejected() {
        let layers = [Layer::dense((2, 3), None), Layer::dense((4, 1), None)];
        assert!(matches!(
            Sequential::new(layers),
            Err(MlErr::SizeMismatch {
                got: 4,
                expected: 3,
                ..
            })
        ));

        assert!(Sequential::new([]).is_err());
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = Sequential::new([
            Layer::dense((3, 4), Some(ActFn::sigmoid(1.))),
            Layer::dense((4, 3), None),
        ])
        .unwrap();
        model.init_params(&mut rng).unwrap();

        let x = array![[0.5_f32, -1.0, 2.0], [1.5, 0.2, -0.3]];
        let labels = [2, 0];
        model.compute_grad(&CrossEntropy, x.view(), &labels).unwrap();
        let analytic = model.grad().to_vec();

        let h = 1e-2;
        for i in (0..model.size()).step_by(3) {
            let original = model.params()[i];

            model.params_mut()[i] = original + h;
            let plus = model.compute_grad(&CrossEntropy, x.view(), &labels).unwrap();
            model.params_mut()[i] = original - h;
            let minus = model.compute_grad(&CrossEntropy, x.view(), &labels).unwrap();
            model.params_mut()[i] = original;

            let numeric = (plus - minus) / (2. * h);
            assert!(
                (numeric - analytic[i]).abs() < 2e-3,
                "param {i}: {numeric} vs {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn learns_the_and_gate() {
        let mut model = Sequential::new([
            Layer::dense((2, 3), Some(ActFn::sigmoid(1.))),
            Layer::dense((3, 2), None),
        ])
        .unwrap();
        model.init_params(&mut StdRng::seed_from_u64(3)).unwrap();

        let x = array![[0.0_f32, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let labels = [0, 0, 0, 1];
        let mut optimizer = Adam::new(model.size(), 0.05);

        for _ in 0..500 {
            model.compute_grad(&CrossEntropy, x.view(), &labels).unwrap();
            model.apply_grad(&mut optimizer).unwrap();
        }

        let eval = model.evaluate(&CrossEntropy, x.view(), &labels).unwrap();
        assert_eq!(eval.correct, 4);
        assert_eq!(eval.total, 4);
        assert!(eval.loss_sum < 0.5);
    }

    #[test]
    fn evaluate_leaves_gradient_untouched() {
        let mut model = Sequential::classifier(2, 4, 2, &mut StdRng::seed_from_u64(0)).unwrap();
        let x = array![[1.0_f32, 2.0]];

        model.compute_grad(&Mse, x.view(), &[1]).unwrap();
        let grad = model.grad().to_vec();
        model.evaluate(&Mse, x.view(), &[0]).unwrap();

        assert_eq!(model.grad(), grad.as_slice());

        let mut gd = GradientDescent::new(0.1);
        let before = model.params().to_vec();
        model.apply_grad(&mut gd).unwrap();
        assert_ne!(model.params(), before.as_slice());
    }

    #[test]
    fn labels_must_match_batch() {
        let mut model = Sequential::classifier(2, 4, 3, &mut StdRng::seed_from_u64(0)).unwrap();
        let x = array![[1.0_f32, 2.0], [0.0, 0.0]];

        assert!(model.evaluate(&CrossEntropy, x.view(), &[1]).is_err());
        assert!(model.compute_grad(&CrossEntropy, x.view(), &[1, 3]).is_err());
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax([1.0, 3.0, 3.0, 0.0].into_iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);
    }
}
