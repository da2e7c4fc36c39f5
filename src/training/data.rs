use std::path::Path;

use distributed::CommunicationContext;
use log::info;
use machine_learning::{
    dataset::{Blobs, Dataset},
    persistence,
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{Result, TrainErr, config::RunConfig};

pub const TRAIN_FILE: &str = "train.safetensors";
pub const TEST_FILE: &str = "test.safetensors";

/// Standard deviation of every generated cluster.
const SPREAD: f32 = 1.5;

/// Makes the train and test datasets available to every rank.
///
/// Rank 0 generates the files in the data directory when they are missing; the rest of the
/// group waits on a barrier before reading, so nobody sees a partial file.
///
/// # Arguments
/// * `ctx` - The process group, every rank must call this together.
/// * `config` - The run's configuration.
///
/// # Returns
/// The train and test datasets.
pub async fn prepare_data<C: CommunicationContext>(
    ctx: &mut C,
    config: &RunConfig,
) -> Result<(Dataset, Dataset)> {
    let train_path = config.data_dir.join(TRAIN_FILE);
    let test_path = config.data_dir.join(TEST_FILE);

    if ctx.rank() == 0 && !(train_path.exists() && test_path.exists()) {
        generate(config, &train_path, &test_path)?;
    }

    if ctx.world_size() > 1 {
        ctx.barrier().await?;
    }

    let train = persistence::load_dataset(&train_path)?;
    let test = persistence::load_dataset(&test_path)?;

    if train.features() != test.features() || train.classes() != test.classes() {
        return Err(TrainErr::Config(format!(
            "train and test sets in {} disagree on their shape",
            config.data_dir.display()
        )));
    }

    Ok((train, test))
}

fn generate(config: &RunConfig, train_path: &Path, test_path: &Path) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let blobs = Blobs::new(config.classes, config.features.get(), SPREAD, &mut rng)?;

    let train = blobs.sample(config.train_samples.get(), &mut rng)?;
    persistence::save_dataset(&train, train_path)?;

    let test = blobs.sample(config.test_samples.get(), &mut rng)?;
    persistence::save_dataset(&test, test_path)?;

    info!(
        train = train.len(), test = test.len(), classes = blobs.classes();
        "generated datasets in {}",
        config.data_dir.display()
    );
    Ok(())
}
