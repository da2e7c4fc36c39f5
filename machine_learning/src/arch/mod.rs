pub mod activations;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Evaluation, Model};
pub use sequential::Sequential;
