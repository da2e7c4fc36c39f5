//! The epoch loop: training pass, validation pass and learning rate update, once per epoch.

mod data;
mod scalars;
mod stats;
mod trainer;

use distributed::CommunicationContext;

pub use data::{TEST_FILE, TRAIN_FILE, prepare_data};
pub use scalars::{EPOCHS_FILE, SCALARS_FILE, ScalarWriter};
pub use stats::{EpochSummary, TrainStats, ValStats};
pub use trainer::{Phase, RunReport, Trainer};

use crate::{Result, config::RunConfig};

/// Trains on an already joined process group and leaves it.
///
/// The context is consumed exactly once: a finished run closes the group, a failed one aborts
/// it so ranks blocked in a collective fail instead of waiting for this one.
///
/// # Arguments
/// * `ctx` - This rank's process group membership.
/// * `config` - The run's configuration.
///
/// # Returns
/// The run's report.
pub async fn train<C: CommunicationContext>(mut ctx: C, config: &RunConfig) -> Result<RunReport> {
    match train_in(&mut ctx, config).await {
        Ok(report) => {
            ctx.close().await?;
            Ok(report)
        }
        Err(e) => {
            ctx.abort(&e.to_string()).await;
            Err(e)
        }
    }
}

async fn train_in<C: CommunicationContext>(ctx: &mut C, config: &RunConfig) -> Result<RunReport> {
    let (train_set, test_set) = prepare_data(ctx, config).await?;
    let trainer = Trainer::new(ctx, config, train_set, test_set).await?;
    trainer.run(ctx).await
}
