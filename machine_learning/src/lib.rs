pub mod arch;
pub mod dataset;
pub mod error;
pub mod optimization;
pub mod persistence;

pub use error::{MlErr, Result};
