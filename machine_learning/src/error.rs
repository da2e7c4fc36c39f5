use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidInput(String),
    EmptyDataset,
    Safetensors(SafeTensorError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidInput(reason) => write!(f, "Invalid input: {reason}"),
            MlErr::EmptyDataset => write!(f, "The dataset has no samples"),
            MlErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Safetensors(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(e: SafeTensorError) -> Self {
        MlErr::Safetensors(e)
    }
}

impl From<io::Error> for MlErr {
    fn from(e: io::Error) -> Self {
        MlErr::Io(e)
    }
}
