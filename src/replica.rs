//! One rank's copy of the model.

use distributed::CommunicationContext;
use log::debug;
use machine_learning::{
    arch::{Model, loss::LossFn},
    optimization::Optimizer,
};
use ndarray::ArrayView2;

use crate::Result;

/// A model that is either trained alone or kept in sync with the replicas of other ranks.
pub enum Replica<M> {
    Local(M),
    Distributed(DataParallel<M>),
}

/// Keeps a model identical across ranks by averaging every gradient before it is applied.
pub struct DataParallel<M> {
    module: M,
    world_size: usize,
}

impl<M: Model + Send> DataParallel<M> {
    /// Wraps `module`, overwriting its parameters with rank 0's.
    ///
    /// # Arguments
    /// * `module` - This rank's model.
    /// * `ctx` - The process group, every rank must call this together.
    ///
    /// # Returns
    /// The wrapped model, or an error if the broadcast failed.
    pub async fn new<C: CommunicationContext>(mut module: M, ctx: &mut C) -> Result<Self> {
        ctx.broadcast(module.params_mut(), 0).await?;
        debug!(params = module.size(); "initial parameters received from rank 0");

        Ok(Self {
            module,
            world_size: ctx.world_size(),
        })
    }

    /// Replaces the local gradient with the mean of every rank's gradient.
    async fn average_grad<C: CommunicationContext>(&mut self, ctx: &mut C) -> Result<()> {
        let grad = self.module.grad_mut();
        ctx.all_reduce_sum(grad).await?;

        let scale = 1. / self.world_size as f32;
        grad.iter_mut().for_each(|g| *g *= scale);
        Ok(())
    }
}

impl<M: Model + Send> Replica<M> {
    /// Wraps `module` for the process group, only going distributed when there is more than
    /// one rank.
    pub async fn new<C: CommunicationContext>(module: M, ctx: &mut C) -> Result<Self> {
        if ctx.world_size() > 1 {
            Ok(Replica::Distributed(DataParallel::new(module, ctx).await?))
        } else {
            Ok(Replica::Local(module))
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Replica::Distributed(_))
    }

    /// The unwrapped model.
    pub fn module(&self) -> &M {
        match self {
            Replica::Local(module) => module,
            Replica::Distributed(dp) => &dp.module,
        }
    }

    pub fn module_mut(&mut self) -> &mut M {
        match self {
            Replica::Local(module) => module,
            Replica::Distributed(dp) => &mut dp.module,
        }
    }

    pub fn into_inner(self) -> M {
        match self {
            Replica::Local(module) => module,
            Replica::Distributed(dp) => dp.module,
        }
    }

    /// Runs a forward and backward pass, leaving the gradient to apply in the model.
    ///
    /// # Arguments
    /// * `ctx` - The process group, used to average the gradient when distributed.
    /// * `loss_fn` - The loss to minimize.
    /// * `x` - The batch's samples.
    /// * `labels` - The batch's classes.
    ///
    /// # Returns
    /// This rank's batch loss.
    pub async fn backward<C, L>(
        &mut self,
        ctx: &mut C,
        loss_fn: &L,
        x: ArrayView2<'_, f32>,
        labels: &[usize],
    ) -> Result<f32>
    where
        C: CommunicationContext,
        L: LossFn,
    {
        let loss = self.module_mut().compute_grad(loss_fn, x, labels)?;

        if let Replica::Distributed(dp) = self {
            dp.average_grad(ctx).await?;
        }

        Ok(loss)
    }

    /// Applies the gradient of the last `backward` call.
    pub fn step<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        Ok(self.module_mut().apply_grad(optimizer)?)
    }
}

#[cfg(test)]
mod tests {
    use distributed::{Backend, SoloContext};
    use machine_learning::{
        arch::{Sequential, loss::CrossEntropy},
        optimization::GradientDescent,
    };
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[tokio::test]
    async fn single_rank_stays_local() {
        let mut ctx = SoloContext::new(Backend::Cpu);
        let model = Sequential::classifier(2, 3, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        let params = model.params().to_vec();

        let mut replica = Replica::new(model, &mut ctx).await.unwrap();
        assert!(!replica.is_distributed());

        let x = array![[1.0_f32, -1.0], [0.5, 2.0]];
        replica
            .backward(&mut ctx, &CrossEntropy, x.view(), &[0, 1])
            .await
            .unwrap();
        replica.step(&mut GradientDescent::new(0.1)).unwrap();

        assert_ne!(replica.module().params(), params.as_slice());
        assert_eq!(replica.into_inner().size(), params.len());
    }
}
