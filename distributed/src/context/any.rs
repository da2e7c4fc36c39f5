use super::{CommunicationContext, SoloContext, TcpContext};
use crate::{Backend, Result};

/// The context picked at runtime by `init_context`.
pub enum AnyContext {
    Solo(SoloContext),
    Tcp(TcpContext),
}

impl CommunicationContext for AnyContext {
    fn rank(&self) -> usize {
        match self {
            AnyContext::Solo(ctx) => ctx.rank(),
            AnyContext::Tcp(ctx) => ctx.rank(),
        }
    }

    fn world_size(&self) -> usize {
        match self {
            AnyContext::Solo(ctx) => ctx.world_size(),
            AnyContext::Tcp(ctx) => ctx.world_size(),
        }
    }

    fn backend(&self) -> Backend {
        match self {
            AnyContext::Solo(ctx) => ctx.backend(),
            AnyContext::Tcp(ctx) => ctx.backend(),
        }
    }

    async fn barrier(&mut self) -> Result<()> {
        match self {
            AnyContext::Solo(ctx) => ctx.barrier().await,
            AnyContext::Tcp(ctx) => ctx.barrier().await,
        }
    }

    async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> Result<()> {
        match self {
            AnyContext::Solo(ctx) => ctx.all_reduce_sum(buf).await,
            AnyContext::Tcp(ctx) => ctx.all_reduce_sum(buf).await,
        }
    }

    async fn broadcast(&mut self, buf: &mut [f32], root: usize) -> Result<()> {
        match self {
            AnyContext::Solo(ctx) => ctx.broadcast(buf, root).await,
            AnyContext::Tcp(ctx) => ctx.broadcast(buf, root).await,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            AnyContext::Solo(ctx) => ctx.close().await,
            AnyContext::Tcp(ctx) => ctx.close().await,
        }
    }

    async fn abort(self, reason: &str) {
        match self {
            AnyContext::Solo(ctx) => ctx.abort(reason).await,
            AnyContext::Tcp(ctx) => ctx.abort(reason).await,
        }
    }
}
