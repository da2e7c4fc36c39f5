/// Decays the learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f32,
    step_size: usize,
    gamma: f32,
    epoch: usize,
}

impl StepLr {
    pub fn new(base_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            epoch: 0,
        }
    }

    /// The learning rate after `epoch` calls to `step`.
    pub fn lr_at(&self, epoch: usize) -> f32 {
        let decays = (epoch / self.step_size) as i32;
        self.base_lr * self.gamma.powi(decays)
    }

    pub fn current_lr(&self) -> f32 {
        self.lr_at(self.epoch)
    }

    /// Ends an epoch, returning the learning rate to use for the next one.
    pub fn step(&mut self) -> f32 {
        self.epoch += 1;
        self.current_lr()
    }
}
