use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{MlErr, Result};

/// Picks the samples one rank visits during an epoch.
///
/// Indices are split into contiguous shards whose sizes differ by at most one, so every
/// sample is visited by exactly one rank. With shuffling enabled the full index list is
/// permuted first, seeded with `seed + epoch` so all ranks agree on the permutation.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: usize,
}

impl DistributedSampler {
    /// Creates a new `DistributedSampler`.
    ///
    /// # Arguments
    /// * `len` - The size of the dataset.
    /// * `num_replicas` - The amount of ranks sharing the dataset.
    /// * `rank` - This rank.
    /// * `shuffle` - Whether to permute the samples every epoch.
    /// * `seed` - The base seed of the permutation, it must be the same on every rank.
    pub fn new(
        len: usize,
        num_replicas: usize,
        rank: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if rank >= num_replicas {
            return Err(MlErr::InvalidInput(format!(
                "rank {rank} is out of range for {num_replicas} replicas"
            )));
        }

        Ok(Self {
            len,
            num_replicas,
            rank,
            shuffle,
            seed,
            epoch: 0,
        })
    }

    /// Sets the epoch used to seed the next permutation.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    /// The amount of samples of this rank's shard.
    pub fn shard_len(&self) -> usize {
        let (base, rem) = (self.len / self.num_replicas, self.len % self.num_replicas);
        base + usize::from(self.rank < rem)
    }

    /// The size of the largest shard, the same on every rank.
    pub fn max_shard_len(&self) -> usize {
        self.len.div_ceil(self.num_replicas)
    }

    /// Returns this rank's indices for the current epoch.
    pub fn indices(&self) -> Vec<usize> {
        let mut all = self.permutation();
        let (start, end) = self.shard_bounds();
        all.drain(start..end).collect()
    }

    /// Returns this rank's indices padded to `max_shard_len`.
    ///
    /// Short shards are completed with samples taken from the start of the epoch's
    /// permutation, so every rank runs the same amount of batches.
    pub fn padded_indices(&self) -> Vec<usize> {
        let all = self.permutation();
        let (start, end) = self.shard_bounds();
        let missing = self.max_shard_len() - (end - start);

        let mut shard = all[start..end].to_vec();
        shard.extend(all.iter().cycle().take(missing));
        shard
    }

    fn permutation(&self) -> Vec<usize> {
        let mut all: Vec<usize> = (0..self.len).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
            all.shuffle(&mut rng);
        }

        all
    }

    fn shard_bounds(&self) -> (usize, usize) {
        let (base, rem) = (self.len / self.num_replicas, self.len % self.num_replicas);
        let start = self.rank * base + self.rank.min(rem);
        (start, start + self.shard_len())
    }
}
