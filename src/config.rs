use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use clap::Parser;
use distributed::{BackendPreference, DEFAULT_INIT_TIMEOUT};

use crate::{Result, TrainErr};

/// Distributed data-parallel training of a feed-forward classifier.
///
/// Start one process per rank; the rank layout is read from the launcher's environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "hpc-train", version)]
pub struct Args {
    /// Number of epochs to train.
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Input batch size for training, per rank.
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Initial learning rate.
    #[arg(long, default_value_t = 0.001)]
    pub lr: f32,

    /// Save the trained model.
    #[arg(long)]
    pub save_model: bool,

    /// Directory for scalar metrics.
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,

    /// Where the trained model is written when `--save-model` is set.
    #[arg(long, default_value = "distributed_model.safetensors")]
    pub model_path: PathBuf,

    /// Directory holding the train and test datasets, created on first use.
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Seed for data generation, initialization and shuffling.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Samples in the generated training set.
    #[arg(long, default_value_t = 5000)]
    pub train_samples: usize,

    /// Samples in the generated test set.
    #[arg(long, default_value_t = 1000)]
    pub test_samples: usize,

    /// Dimension of every generated sample.
    #[arg(long, default_value_t = 32)]
    pub features: usize,

    /// Amount of classes of the generated datasets.
    #[arg(long, default_value_t = 10)]
    pub classes: usize,

    /// Width of the hidden layer.
    #[arg(long, default_value_t = 128)]
    pub hidden: usize,

    /// Log the training loss every this many batches.
    #[arg(long, default_value_t = 100)]
    pub log_interval: usize,

    /// Communication backend: auto, cpu or accelerator.
    #[arg(long, default_value = "auto")]
    pub backend: BackendPreference,

    /// Seconds to wait for every rank to join.
    #[arg(long, default_value_t = DEFAULT_INIT_TIMEOUT.as_secs())]
    pub init_timeout_secs: u64,
}

/// Validated settings of a training run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub lr: f32,
    pub save_model: bool,
    pub log_dir: PathBuf,
    pub model_path: PathBuf,
    pub data_dir: PathBuf,
    pub seed: u64,
    pub train_samples: NonZeroUsize,
    pub test_samples: NonZeroUsize,
    pub features: NonZeroUsize,
    pub classes: usize,
    pub hidden: NonZeroUsize,
    pub log_interval: NonZeroUsize,
    pub backend: BackendPreference,
    pub init_timeout: Duration,
}

impl TryFrom<Args> for RunConfig {
    type Error = TrainErr;

    fn try_from(args: Args) -> Result<Self> {
        if !args.lr.is_finite() || args.lr <= 0. {
            return Err(TrainErr::Config(format!(
                "learning rate must be positive, got {}",
                args.lr
            )));
        }

        if args.classes < 2 {
            return Err(TrainErr::Config(format!(
                "a classifier needs at least 2 classes, got {}",
                args.classes
            )));
        }

        Ok(Self {
            epochs: non_zero("epochs", args.epochs)?,
            batch_size: non_zero("batch size", args.batch_size)?,
            lr: args.lr,
            save_model: args.save_model,
            log_dir: args.log_dir,
            model_path: args.model_path,
            data_dir: args.data_dir,
            seed: args.seed,
            train_samples: non_zero("train samples", args.train_samples)?,
            test_samples: non_zero("test samples", args.test_samples)?,
            features: non_zero("features", args.features)?,
            classes: args.classes,
            hidden: non_zero("hidden width", args.hidden)?,
            log_interval: non_zero("log interval", args.log_interval)?,
            backend: args.backend,
            init_timeout: Duration::from_secs(args.init_timeout_secs),
        })
    }
}

fn non_zero(what: &str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value).ok_or_else(|| TrainErr::Config(format!("{what} must be at least 1")))
}
