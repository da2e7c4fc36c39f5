use std::{error::Error, fmt, io, time::Duration};

/// The distributed module's result type.
pub type Result<T> = std::result::Result<T, DistError>;

/// Failures while placing a rank or running collective operations.
#[derive(Debug)]
pub enum DistError {
    Io(io::Error),
    /// Not every rank joined the group before the initialization deadline.
    InitTimeout {
        coordinator: String,
        after: Duration,
    },
    /// A rank announced itself with data that does not agree with the group.
    Handshake(String),
    /// A rank contributed a buffer of a different length than the local one.
    LengthMismatch {
        op: &'static str,
        rank: usize,
        got: usize,
        expected: usize,
    },
    InvalidRoot {
        root: usize,
        world_size: usize,
    },
    DeviceUnavailable {
        local_rank: usize,
        available: usize,
    },
    /// A rank sent a message that does not belong to the running collective.
    Protocol {
        rank: usize,
        expected: &'static str,
        got: &'static str,
    },
    /// A rank reported a failure of its own.
    Peer {
        rank: usize,
        reason: String,
    },
}

impl fmt::Display for DistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistError::Io(e) => write!(f, "io error: {e}"),
            DistError::InitTimeout { coordinator, after } => write!(
                f,
                "process group at {coordinator} was not complete after {}s",
                after.as_secs()
            ),
            DistError::Handshake(reason) => write!(f, "handshake failed: {reason}"),
            DistError::LengthMismatch {
                op,
                rank,
                got,
                expected,
            } => write!(
                f,
                "{op}: rank {rank} sent {got} values, expected {expected}"
            ),
            DistError::InvalidRoot { root, world_size } => {
                write!(f, "root rank {root} is out of range for world size {world_size}")
            }
            DistError::DeviceUnavailable {
                local_rank,
                available,
            } => write!(
                f,
                "local rank {local_rank} has no device to bind, {available} accelerator(s) visible"
            ),
            DistError::Protocol {
                rank,
                expected,
                got,
            } => write!(f, "rank {rank}: expected {expected}, got {got}"),
            DistError::Peer { rank, reason } => write!(f, "rank {rank} failed: {reason}"),
        }
    }
}

impl Error for DistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DistError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DistError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
