//! In-memory labelled datasets and the per-rank view of them.

mod sampler;
mod synthetic;

use std::num::NonZeroUsize;

use ndarray::{Array2, ArrayView2, Axis};

pub use sampler::DistributedSampler;
pub use synthetic::Blobs;

use crate::{MlErr, Result};

/// Feature rows with one class label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Vec<usize>,
    classes: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The samples, one per row.
    /// * `y` - The class of each sample.
    /// * `classes` - The amount of classes, every label must be below it.
    ///
    /// # Returns
    /// The dataset or an error if rows and labels disagree or a label is out of range.
    pub fn new(x: Array2<f32>, y: Vec<usize>, classes: usize) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                what: "dataset labels",
                got: y.len(),
                expected: x.nrows(),
            });
        }

        if let Some(&label) = y.iter().find(|&&label| label >= classes) {
            return Err(MlErr::InvalidInput(format!(
                "label {label} is out of range for {classes} classes"
            )));
        }

        Ok(Self { x, y, classes })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn features(&self) -> usize {
        self.x.ncols()
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.y
    }

    /// Copies the given samples into a new batch.
    pub fn gather(&self, indices: &[usize]) -> (Array2<f32>, Vec<usize>) {
        let x = self.x.select(Axis(0), indices);
        let y = indices.iter().map(|&i| self.y[i]).collect();
        (x, y)
    }

    /// Splits `indices` into consecutive batches of at most `batch_size` samples.
    ///
    /// # Arguments
    /// * `indices` - The samples to visit, in order, usually a sampler's shard.
    /// * `batch_size` - The maximum batch size, the last batch may be smaller.
    pub fn batches<'a>(
        &'a self,
        indices: &'a [usize],
        batch_size: NonZeroUsize,
    ) -> impl Iterator<Item = (Array2<f32>, Vec<usize>)> + 'a {
        indices
            .chunks(batch_size.get())
            .map(move |chunk| self.gather(chunk))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn dataset() -> Dataset {
        let x = array![[0.0_f32, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        Dataset::new(x, vec![0, 1, 0, 1, 2], 3).unwrap()
    }

    #[test]
    fn rejects_inconsistent_labels() {
        let x = Array2::zeros((2, 3));
        assert!(Dataset::new(x.clone(), vec![0], 2).is_err());
        assert!(Dataset::new(x, vec![0, 2], 2).is_err());
    }

    #[test]
    fn batches_follow_the_given_order() {
        let data = dataset();
        let indices = [4, 0, 3];
        let batches: Vec<_> = data
            .batches(&indices, NonZeroUsize::new(2).unwrap())
            .collect();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, array![[4.0_f32, 4.0], [0.0, 0.0]]);
        assert_eq!(batches[0].1, vec![2, 0]);
        assert_eq!(batches[1].1, vec![1]);
    }
}
