mod adam;
mod gradient_descent;
mod optimizer;
mod step_lr;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
pub use step_lr::StepLr;
