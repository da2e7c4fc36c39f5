use std::{path::PathBuf, time::Instant};

use distributed::CommunicationContext;
use log::{debug, info};
use machine_learning::{
    arch::{Model, Sequential, loss::CrossEntropy},
    dataset::{Dataset, DistributedSampler},
    optimization::{Adam, Optimizer, StepLr},
    persistence,
};
use rand::{SeedableRng, rngs::StdRng};

use super::{EpochSummary, ScalarWriter, TrainStats, ValStats};
use crate::{Result, config::RunConfig, replica::Replica};

/// Epochs between learning rate decays.
const LR_STEP_SIZE: usize = 5;
const LR_GAMMA: f32 = 0.1;

/// Where the epoch loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    TrainingPass { epoch: usize },
    ValidationPass { epoch: usize },
    RateUpdate { epoch: usize },
    Done,
}

/// What a finished run leaves behind.
pub struct RunReport {
    pub summaries: Vec<EpochSummary>,
    /// Every phase the loop went through, in order.
    pub phases: Vec<Phase>,
    /// The trained model, unwrapped from its replica.
    pub model: Sequential,
    /// The model file, only on the rank that wrote it.
    pub saved: Option<PathBuf>,
}

/// Drives the epochs of one rank.
pub struct Trainer<'a> {
    config: &'a RunConfig,
    rank: usize,
    world_size: usize,
    replica: Replica<Sequential>,
    optimizer: Adam,
    schedule: StepLr,
    train_set: Dataset,
    test_set: Dataset,
    train_sampler: DistributedSampler,
    test_sampler: DistributedSampler,
    scalars: Option<ScalarWriter>,
    phases: Vec<Phase>,
}

impl<'a> Trainer<'a> {
    /// Builds the model and every piece of per rank training state.
    ///
    /// Every rank must call this together, the initial parameters are broadcast from rank 0.
    ///
    /// # Arguments
    /// * `ctx` - The process group.
    /// * `config` - The run's configuration.
    /// * `train_set` - The full training set, each rank only visits its shard.
    /// * `test_set` - The full test set.
    pub async fn new<C: CommunicationContext>(
        ctx: &mut C,
        config: &'a RunConfig,
        train_set: Dataset,
        test_set: Dataset,
    ) -> Result<Self> {
        let (rank, world_size) = (ctx.rank(), ctx.world_size());

        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = Sequential::classifier(
            train_set.features(),
            config.hidden.get(),
            train_set.classes(),
            &mut rng,
        )?;
        let params = model.size();
        let replica = Replica::new(model, ctx).await?;

        let train_sampler =
            DistributedSampler::new(train_set.len(), world_size, rank, true, config.seed)?;
        let test_sampler =
            DistributedSampler::new(test_set.len(), world_size, rank, false, config.seed)?;

        let scalars = match rank {
            0 => Some(ScalarWriter::create(&config.log_dir)?),
            _ => None,
        };

        if rank == 0 {
            info!(
                params = params, world_size = world_size;
                "model ready, {} -> {} -> {}",
                train_set.features(),
                config.hidden,
                train_set.classes()
            );
        }

        Ok(Self {
            config,
            rank,
            world_size,
            replica,
            optimizer: Adam::new(params, config.lr),
            schedule: StepLr::new(config.lr, LR_STEP_SIZE, LR_GAMMA),
            train_set,
            test_set,
            train_sampler,
            test_sampler,
            scalars,
            phases: vec![Phase::Idle],
        })
    }

    fn enter(&mut self, phase: Phase) {
        debug!(rank = self.rank; "entering {phase:?}");
        self.phases.push(phase);
    }

    /// Runs every epoch, then saves the model on rank 0 if asked to.
    ///
    /// # Arguments
    /// * `ctx` - The process group, left open for the caller to close.
    ///
    /// # Returns
    /// The run's report, or the first error any phase hit.
    pub async fn run<C: CommunicationContext>(mut self, ctx: &mut C) -> Result<RunReport> {
        let start = Instant::now();
        let epochs = self.config.epochs.get();
        let mut summaries = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            let epoch_start = Instant::now();

            let train = self.train_epoch(ctx, epoch).await?;
            let val = self.validate(ctx, epoch).await?;

            self.enter(Phase::RateUpdate { epoch });
            let lr = self.schedule.step();
            self.optimizer.set_learning_rate(lr);

            let summary = EpochSummary {
                epoch,
                train_loss: train.mean_loss(),
                val_loss: val.avg_loss(),
                accuracy: val.accuracy(),
                lr,
                elapsed_secs: epoch_start.elapsed().as_secs_f64(),
            };

            if let Some(scalars) = &mut self.scalars {
                scalars.add_scalar("Loss/Test", summary.val_loss, epoch)?;
                scalars.add_scalar("Accuracy/Test", summary.accuracy, epoch)?;
                scalars.add_scalar("Learning_Rate", lr, epoch)?;
                scalars.add_summary(&summary)?;
            }

            summaries.push(summary);
        }

        self.enter(Phase::Done);
        let total = start.elapsed().as_secs_f64();

        let mut saved = None;
        if self.rank == 0 {
            info!("training completed in {total:.2}s");
            info!("average time per epoch {:.2}s", total / epochs as f64);

            if self.config.save_model {
                persistence::save_model(self.replica.module(), &self.config.model_path)?;
                info!("model saved as {}", self.config.model_path.display());
                saved = Some(self.config.model_path.clone());
            }
        }

        if let Some(scalars) = &mut self.scalars {
            scalars.flush()?;
        }

        Ok(RunReport {
            summaries,
            phases: self.phases,
            model: self.replica.into_inner(),
            saved,
        })
    }

    async fn train_epoch<C: CommunicationContext>(
        &mut self,
        ctx: &mut C,
        epoch: usize,
    ) -> Result<TrainStats> {
        self.enter(Phase::TrainingPass { epoch });
        self.train_sampler.set_epoch(epoch);

        // Padded so every rank averages the same amount of gradients.
        let indices = self.train_sampler.padded_indices();
        let batch_size = self.config.batch_size;
        let num_batches = indices.len().div_ceil(batch_size.get());
        let log_interval = self.config.log_interval.get();

        let start = Instant::now();
        let mut stats = TrainStats::default();

        for (batch, (x, labels)) in self.train_set.batches(&indices, batch_size).enumerate() {
            let loss = self
                .replica
                .backward(ctx, &CrossEntropy, x.view(), &labels)
                .await?;
            self.replica.step(&mut self.optimizer)?;
            stats.add_batch(loss, labels.len());

            if self.rank == 0 && batch % log_interval == 0 {
                info!(
                    epoch = epoch, batch = batch;
                    "epoch {epoch}, batch {batch}/{num_batches}, loss {loss:.6}"
                );

                if let Some(scalars) = &mut self.scalars {
                    scalars.add_scalar("Loss/Train", loss, (epoch - 1) * num_batches + batch)?;
                }
            }
        }

        if self.rank == 0 {
            info!(
                epoch = epoch, samples = stats.samples;
                "epoch {epoch} completed in {:.2}s, avg loss {:.6}",
                start.elapsed().as_secs_f64(),
                stats.mean_loss()
            );
        }

        Ok(stats)
    }

    async fn validate<C: CommunicationContext>(
        &mut self,
        ctx: &mut C,
        epoch: usize,
    ) -> Result<ValStats> {
        self.enter(Phase::ValidationPass { epoch });

        let indices = self.test_sampler.indices();
        let model = self.replica.module_mut();
        let mut stats = ValStats::default();

        for (x, labels) in self.test_set.batches(&indices, self.config.batch_size) {
            stats.add(model.evaluate(&CrossEntropy, x.view(), &labels)?);
        }

        if self.world_size > 1 {
            stats = stats.all_reduce(ctx).await?;
        }

        if self.rank == 0 {
            info!(
                epoch = epoch, correct = stats.correct, total = stats.total;
                "test loss {:.6}, accuracy {:.2}%",
                stats.avg_loss(),
                stats.accuracy()
            );
        }

        Ok(stats)
    }
}
