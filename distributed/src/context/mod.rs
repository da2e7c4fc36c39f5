//! Collective operations shared by every rank of a process group.
//!
//! Every rank must call the same collectives in the same order; a rank that skips one
//! leaves the others blocked until the connection drops.

mod any;
mod solo;
mod tcp;

use std::time::Duration;

use log::info;

pub use any::AnyContext;
pub use solo::SoloContext;
pub use tcp::TcpContext;

use crate::{Backend, CoordinatorAddr, RankIdentity, Result};

/// How long ranks wait for the whole group to come up.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A process group membership.
///
/// Buffers handed to the collectives must have the same length on every rank.
#[allow(unused)]
#[trait_variant::make(CommunicationContext: Send)]
pub trait LocalCommunicationContext {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn backend(&self) -> Backend;

    /// Blocks until every rank of the group has entered the barrier.
    async fn barrier(&mut self) -> Result<()>;

    /// Replaces `buf` with the element-wise sum of every rank's `buf`.
    ///
    /// # Arguments
    /// * `buf` - This rank's contribution, overwritten with the reduced values.
    ///
    /// # Returns
    /// `DistError::LengthMismatch` if a rank contributed a buffer of a different length.
    async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Overwrites `buf` on every rank with the contents of `buf` on `root`.
    ///
    /// # Arguments
    /// * `buf` - Source on `root`, destination everywhere else.
    /// * `root` - The rank that owns the data.
    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()>;

    /// Leaves the group, consuming the context so it can only happen once.
    async fn close(self) -> Result<()>;

    /// Leaves the group after a local failure, telling the other ranks why.
    ///
    /// Unlike `close` this does not wait for anyone: ranks blocked in a collective fail with
    /// `DistError::Peer` instead of waiting for a message that never comes. Delivery is best
    /// effort.
    ///
    /// # Arguments
    /// * `reason` - What went wrong on this rank.
    async fn abort(self, reason: &str);
}

/// Joins the process group described by `identity`.
///
/// A group of one never touches the network.
///
/// # Arguments
/// * `identity` - This process's rank identity.
/// * `coordinator` - Where rank 0 listens.
/// * `backend` - The backend selected for this rank, every rank must agree on it.
/// * `timeout` - How long to wait for the rest of the group.
///
/// # Returns
/// The joined context, or an error if the group could not be formed in time.
pub async fn init_context(
    identity: RankIdentity,
    coordinator: &CoordinatorAddr,
    backend: Backend,
    timeout: Duration,
) -> Result<AnyContext> {
    if !identity.is_distributed() {
        info!("single process run, collectives are local");
        return Ok(AnyContext::Solo(SoloContext::new(backend)));
    }

    let ctx = TcpContext::connect(identity, coordinator, backend, timeout).await?;
    info!(
        rank = identity.rank(), world_size = identity.world_size();
        "joined process group at {coordinator} using {backend} backend"
    );

    Ok(AnyContext::Tcp(ctx))
}
