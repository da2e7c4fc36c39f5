use crate::{MlErr, Result};

/// An update rule turning a gradient into a parameter step.
pub trait Optimizer {
    /// Applies one step to `params` using `grad`.
    ///
    /// # Returns
    /// An error if `grad` and `params` differ in length, or differ from the optimizer's state.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);
}

pub(super) fn check_lengths(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    Ok(())
}
