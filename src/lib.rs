//! Data-parallel training of a feed-forward classifier across the ranks of a cluster job.
//!
//! A run resolves its rank from the launcher's environment, joins the process group, trains
//! its replica on a shard of the data and leaves the group.

pub mod config;
mod error;
pub mod replica;
pub mod training;

use distributed::{EnvSnapshot, SystemDevices, init_context, resolve, select_backend};
use log::info;

pub use config::{Args, RunConfig};
pub use error::{Result, TrainErr};
pub use training::{RunReport, train};

/// Runs a whole training job for this process.
///
/// # Arguments
/// * `config` - The validated command line.
/// * `env` - The environment the launcher started this process with.
///
/// # Returns
/// The run's report, or the first error that stopped it.
pub async fn run(config: &RunConfig, env: &EnvSnapshot) -> Result<RunReport> {
    let bootstrap = resolve(env);
    let devices = SystemDevices::from_env(env);
    let placement = select_backend(&bootstrap.identity, &devices, config.backend)?;

    let ctx = init_context(
        bootstrap.identity,
        &bootstrap.coordinator,
        placement.backend,
        config.init_timeout,
    )
    .await?;

    if bootstrap.identity.is_coordinator() {
        info!(
            world_size = bootstrap.identity.world_size();
            "starting distributed training with {:?}",
            config
        );
    }

    train(ctx, config).await
}
