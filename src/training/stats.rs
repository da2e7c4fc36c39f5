use distributed::CommunicationContext;
use machine_learning::arch::Evaluation;
use serde::Serialize;

use crate::Result;

/// Counts travel as two limbs of this many bits. Summing a limb over up to 4096 ranks stays
/// below 2^24, where every integer is still exact in an `f32`.
const LIMB_BITS: u32 = 12;
const LIMB_MASK: usize = (1 << LIMB_BITS) - 1;

fn split_count(count: usize) -> [f32; 2] {
    [(count >> LIMB_BITS) as f32, (count & LIMB_MASK) as f32]
}

fn join_count([high, low]: [f32; 2]) -> usize {
    ((high as usize) << LIMB_BITS) + low as usize
}

/// Running totals of one rank's training pass.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub loss_sum: f32,
    pub batches: usize,
    pub samples: usize,
}

impl TrainStats {
    #[inline]
    pub fn add_batch(&mut self, loss: f32, samples: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.samples += samples;
    }

    /// Mean of the batch losses, zero when no batch ran.
    pub fn mean_loss(&self) -> f32 {
        if self.batches == 0 {
            return 0.;
        }

        self.loss_sum / self.batches as f32
    }
}

/// Validation totals, summed over batches and then over ranks.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ValStats {
    /// Sum of the per sample losses.
    pub loss_sum: f32,
    pub correct: usize,
    pub total: usize,
}

impl ValStats {
    pub fn add(&mut self, eval: Evaluation) {
        self.loss_sum += eval.loss_sum;
        self.correct += eval.correct;
        self.total += eval.total;
    }

    /// The buffer exchanged between ranks: the loss sum, then `correct` and `total` split in
    /// limbs so their element-wise sums stay exact.
    pub fn to_wire(self) -> [f32; 5] {
        let [correct_high, correct_low] = split_count(self.correct);
        let [total_high, total_low] = split_count(self.total);
        [self.loss_sum, correct_high, correct_low, total_high, total_low]
    }

    pub fn from_wire(wire: [f32; 5]) -> Self {
        let [loss_sum, correct_high, correct_low, total_high, total_low] = wire;
        Self {
            loss_sum,
            correct: join_count([correct_high, correct_low]),
            total: join_count([total_high, total_low]),
        }
    }

    /// Sums the statistics of every rank with a single all-reduce.
    ///
    /// # Arguments
    /// * `ctx` - The process group, every rank must call this together.
    ///
    /// # Returns
    /// The group wide statistics, identical on every rank.
    pub async fn all_reduce<C: CommunicationContext>(self, ctx: &mut C) -> Result<Self> {
        let mut wire = self.to_wire();
        ctx.all_reduce_sum(&mut wire).await?;
        Ok(Self::from_wire(wire))
    }

    /// Mean per sample loss, zero when nothing was evaluated.
    pub fn avg_loss(&self) -> f32 {
        if self.total == 0 {
            return 0.;
        }

        self.loss_sum / self.total as f32
    }

    /// Percentage of correct predictions in `[0, 100]`, zero when nothing was evaluated.
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.;
        }

        100. * self.correct as f32 / self.total as f32
    }
}

/// What an epoch produced, as seen by the rank that ran it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    /// This rank's mean batch loss.
    pub train_loss: f32,
    /// Group wide mean per sample validation loss.
    pub val_loss: f32,
    pub accuracy: f32,
    /// Learning rate after the epoch's schedule step.
    pub lr: f32,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use distributed::{Backend, SoloContext};

    use super::*;

    #[test]
    fn empty_passes_report_zero() {
        assert_eq!(TrainStats::default().mean_loss(), 0.);
        assert_eq!(ValStats::default().avg_loss(), 0.);
        assert_eq!(ValStats::default().accuracy(), 0.);
    }

    #[test]
    fn validation_totals_accumulate() {
        let mut stats = ValStats::default();
        stats.add(Evaluation {
            loss_sum: 3.,
            correct: 2,
            total: 4,
        });
        stats.add(Evaluation {
            loss_sum: 1.,
            correct: 4,
            total: 4,
        });

        assert_eq!(stats.avg_loss(), 0.5);
        assert_eq!(stats.accuracy(), 75.);
        assert_eq!(ValStats::from_wire(stats.to_wire()), stats);
    }

    #[test]
    fn train_loss_is_a_batch_mean() {
        let mut stats = TrainStats::default();
        stats.add_batch(1., 64);
        stats.add_batch(2., 10);

        assert_eq!(stats.mean_loss(), 1.5);
        assert_eq!(stats.samples, 74);
    }

    #[test]
    fn summed_counts_stay_exact_past_f32_integers() {
        let big = (1 << 24) + 1;
        let ranks = [
            ValStats {
                loss_sum: 1.,
                correct: big,
                total: big + 2,
            },
            ValStats {
                loss_sum: 2.,
                correct: 3,
                total: big,
            },
            ValStats {
                loss_sum: 3.,
                correct: big - 1,
                total: 7,
            },
        ];

        // The coordinator's reduction: an element-wise f32 sum in rank order.
        let mut sum = [0f32; 5];
        for stats in ranks {
            sum.iter_mut().zip(stats.to_wire()).for_each(|(acc, x)| *acc += x);
        }

        let reduced = ValStats::from_wire(sum);
        assert_eq!(reduced.correct, 2 * big + 2);
        assert_eq!(reduced.total, 2 * big + 9);
        assert_eq!(reduced.loss_sum, 6.);
    }

    #[tokio::test]
    async fn single_rank_reduction_is_identity() {
        let mut ctx = SoloContext::new(Backend::Cpu);
        let stats = ValStats {
            loss_sum: 2.5,
            correct: 7,
            total: 9,
        };

        assert_eq!(stats.all_reduce(&mut ctx).await.unwrap(), stats);
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = EpochSummary {
            epoch: 1,
            train_loss: 0.5,
            val_loss: 0.25,
            accuracy: 90.,
            lr: 0.001,
            elapsed_secs: 1.5,
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["epoch"], 1);
        assert_eq!(json["accuracy"], 90.0);
    }
}
