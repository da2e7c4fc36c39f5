use std::{error::Error, fmt, io};

use distributed::DistError;
use machine_learning::MlErr;

/// The training driver's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Anything that can stop a training run.
#[derive(Debug)]
pub enum TrainErr {
    Dist(DistError),
    Ml(MlErr),
    /// A command line value that parsed but makes no sense.
    Config(String),
    Io(io::Error),
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Dist(e) => write!(f, "process group error: {e}"),
            TrainErr::Ml(e) => write!(f, "model error: {e}"),
            TrainErr::Config(reason) => write!(f, "invalid configuration: {reason}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Dist(e) => Some(e),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            TrainErr::Config(_) => None,
        }
    }
}

impl From<DistError> for TrainErr {
    fn from(e: DistError) -> Self {
        TrainErr::Dist(e)
    }
}

impl From<MlErr> for TrainErr {
    fn from(e: MlErr) -> Self {
        TrainErr::Ml(e)
    }
}

impl From<io::Error> for TrainErr {
    fn from(e: io::Error) -> Self {
        TrainErr::Io(e)
    }
}
