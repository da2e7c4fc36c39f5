//! Process-group plumbing for data-parallel training.
//!
//! * [`bootstrap`] turns launcher environment variables into a rank identity and a
//!   coordinator address.
//! * [`device`] picks the device and the communication backend for a rank.
//! * [`context`] holds the collective operations every rank calls in lockstep.

pub mod bootstrap;
pub mod context;
pub mod device;
mod env;
mod error;
pub mod hostlist;

pub use bootstrap::{Bootstrap, CoordinatorAddr, Launcher, RankIdentity, resolve};
pub use context::{
    AnyContext, CommunicationContext, DEFAULT_INIT_TIMEOUT, SoloContext, TcpContext, init_context,
};
pub use device::{
    Backend, BackendPreference, Device, DeviceInventory, Placement, SystemDevices, select_backend,
};
pub use env::EnvSnapshot;
pub use error::{DistError, Result};
