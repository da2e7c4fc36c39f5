use super::CommunicationContext;
use crate::{Backend, DistError, Result};

/// The context of a single process run, every collective is the identity.
#[derive(Debug, Clone, Copy)]
pub struct SoloContext {
    backend: Backend,
}

impl SoloContext {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

impl CommunicationContext for SoloContext {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    async fn barrier(&mut self) -> Result<()> {
        Ok(())
    }

    async fn all_reduce_sum(&mut self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    async fn broadcast(&mut self, _buf: &mut [f32], root: usize) -> Result<()> {
        if root != 0 {
            return Err(DistError::InvalidRoot {
                root,
                world_size: 1,
            });
        }

        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }

    async fn abort(self, _reason: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collectives_leave_buffers_untouched() {
        let mut ctx = SoloContext::new(Backend::Cpu);
        let mut buf = [1.0, 2.5, -3.0];

        ctx.all_reduce_sum(&mut buf).await.unwrap();
        ctx.broadcast(&mut buf, 0).await.unwrap();
        ctx.barrier().await.unwrap();

        assert_eq!(buf, [1.0, 2.5, -3.0]);
        assert_eq!(ctx.rank(), 0);
        assert_eq!(ctx.world_size(), 1);
        ctx.close().await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_from_missing_rank_fails() {
        let mut ctx = SoloContext::new(Backend::Cpu);
        let err = ctx.broadcast(&mut [0.0], 1).await.unwrap_err();

        assert!(matches!(
            err,
            DistError::InvalidRoot {
                root: 1,
                world_size: 1
            }
        ));
    }
}
