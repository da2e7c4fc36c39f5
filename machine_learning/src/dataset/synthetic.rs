use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::Dataset;
use crate::{MlErr, Result};

/// Half width of the box the cluster centers are drawn from.
const CENTER_RANGE: f32 = 5.0;

/// Isotropic Gaussian clusters, one per class, around centers drawn once.
///
/// Sampling the same `Blobs` twice gives train and test sets of the same distribution.
#[derive(Debug, Clone)]
pub struct Blobs {
    centers: Array2<f32>,
    noise: Normal<f32>,
}

impl Blobs {
    /// Draws the cluster centers.
    ///
    /// # Arguments
    /// * `classes` - The amount of clusters.
    /// * `features` - The dimension of every sample.
    /// * `spread` - The standard deviation of each cluster.
    /// * `rng` - The source of randomness.
    pub fn new<R: Rng>(classes: usize, features: usize, spread: f32, rng: &mut R) -> Result<Self> {
        if classes < 2 || features == 0 {
            return Err(MlErr::InvalidInput(format!(
                "blobs need at least 2 classes and 1 feature, got {classes} and {features}"
            )));
        }

        if !(spread.is_finite() && spread > 0.) {
            return Err(MlErr::InvalidInput(format!(
                "spread must be positive and finite, got {spread}"
            )));
        }

        let noise = Normal::new(0.0, spread)
            .map_err(|e| MlErr::InvalidInput(format!("invalid spread {spread}: {e}")))?;
        let centers = Array2::from_shape_fn((classes, features), |_| {
            rng.random_range(-CENTER_RANGE..CENTER_RANGE)
        });

        Ok(Self { centers, noise })
    }

    pub fn classes(&self) -> usize {
        self.centers.nrows()
    }

    pub fn features(&self) -> usize {
        self.centers.ncols()
    }

    /// Draws `len` samples, cycling through the classes so they stay balanced.
    pub fn sample<R: Rng>(&self, len: usize, rng: &mut R) -> Result<Dataset> {
        if len == 0 {
            return Err(MlErr::EmptyDataset);
        }

        let classes = self.classes();
        let y: Vec<usize> = (0..len).map(|i| i % classes).collect();
        let x = Array2::from_shape_fn((len, self.features()), |(i, j)| {
            self.centers[[y[i], j]] + self.noise.sample(&mut *rng)
        });

        Dataset::new(x, y, classes)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn samples_are_balanced_and_seeded() {
        let blobs = Blobs::new(4, 3, 0.5, &mut StdRng::seed_from_u64(9)).unwrap();
        let a = blobs.sample(100, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = blobs.sample(100, &mut StdRng::seed_from_u64(1)).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.features(), 3);
        for class in 0..4 {
            assert_eq!(a.labels().iter().filter(|&&l| l == class).count(), 25);
        }
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);

        assert!(Blobs::new(1, 3, 0.5, &mut rng).is_err());
        assert!(Blobs::new(3, 0, 0.5, &mut rng).is_err());
        assert!(Blobs::new(3, 2, -1.0, &mut rng).is_err());
        assert!(Blobs::new(3, 2, 0.0, &mut rng).is_err());
        assert!(Blobs::new(3, 2, f32::NAN, &mut rng).is_err());
        assert!(matches!(
            Blobs::new(3, 2, 1.0, &mut rng).unwrap().sample(0, &mut rng),
            Err(MlErr::EmptyDataset)
        ));
    }
}
