use std::{fmt, fs, path::PathBuf, str::FromStr};

use log::info;

use crate::{DistError, EnvSnapshot, RankIdentity, Result};

const VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// The communication backend shared by every rank of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Collectives tuned for accelerator resident buffers.
    Accelerator,
    /// Host memory collectives.
    Cpu,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Accelerator => "accelerator",
            Backend::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a rank runs its computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Accelerator { ordinal: usize },
}

/// The user's backend choice, `Auto` lets the available hardware decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    #[default]
    Auto,
    Cpu,
    Accelerator,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "accelerator" | "gpu" => Ok(Self::Accelerator),
            other => Err(format!(
                "unknown backend {other:?}, expected one of auto, cpu, accelerator"
            )),
        }
    }
}

/// Device and backend selected for a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub device: Device,
    pub backend: Backend,
}

/// Reports how many accelerators this process may use.
pub trait DeviceInventory {
    fn accelerator_count(&self) -> usize;
}

/// A fixed device count.
impl DeviceInventory for usize {
    fn accelerator_count(&self) -> usize {
        *self
    }
}

/// Counts `nvidia<N>` device nodes, restricted by `CUDA_VISIBLE_DEVICES`.
#[derive(Debug, Clone)]
pub struct SystemDevices {
    dev_dir: PathBuf,
    visible: Option<String>,
}

impl SystemDevices {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        Self::with_dev_dir("/dev", env)
    }

    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>, env: &EnvSnapshot) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            visible: env.get(VISIBLE_DEVICES).map(str::to_string),
        }
    }

    fn device_nodes(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dev_dir) else {
            return 0;
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("nvidia"))
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .count()
    }
}

impl DeviceInventory for SystemDevices {
    fn accelerator_count(&self) -> usize {
        let present = self.device_nodes();

        match self.visible.as_deref().map(str::trim) {
            None => present,
            Some("") | Some("-1") => 0,
            Some(list) => list.split(',').count().min(present),
        }
    }
}

/// Picks the device and backend of a rank, binding it to its local rank's accelerator when
/// there is one.
///
/// # Arguments
/// * `identity` - The rank identity, its local rank selects the device ordinal.
/// * `devices` - Source of the accelerator count.
/// * `preference` - The requested backend.
///
/// # Errors
/// `DistError::DeviceUnavailable` when an accelerator is required or available but the
/// local rank has no device of its own.
pub fn select_backend<P: DeviceInventory>(
    identity: &RankIdentity,
    devices: &P,
    preference: BackendPreference,
) -> Result<Placement> {
    let available = devices.accelerator_count();
    let local_rank = identity.local_rank();

    let wants_accelerator = match preference {
        BackendPreference::Cpu => false,
        BackendPreference::Auto => available > 0,
        BackendPreference::Accelerator => true,
    };

    let placement = if !wants_accelerator {
        Placement {
            device: Device::Cpu,
            backend: Backend::Cpu,
        }
    } else if local_rank < available {
        Placement {
            device: Device::Accelerator {
                ordinal: local_rank,
            },
            backend: Backend::Accelerator,
        }
    } else {
        return Err(DistError::DeviceUnavailable {
            local_rank,
            available,
        });
    };

    match placement.device {
        Device::Accelerator { ordinal } => info!(
            rank = identity.rank(), ordinal = ordinal;
            "using {} backend with accelerator {ordinal}", placement.backend
        ),
        Device::Cpu => info!(
            rank = identity.rank();
            "using {} backend (no accelerator)", placement.backend
        ),
    }

    Ok(placement)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn identity(rank: usize, world: usize, local: usize) -> RankIdentity {
        RankIdentity::new(rank, NonZeroUsize::new(world).unwrap(), local).unwrap()
    }

    #[test]
    fn no_accelerator_means_cpu() {
        let placement = select_backend(&identity(0, 1, 0), &0usize, BackendPreference::Auto).unwrap();

        assert_eq!(placement.device, Device::Cpu);
        assert_eq!(placement.backend, Backend::Cpu);
    }

    #[test]
    fn accelerator_is_bound_to_local_rank() {
        let placement = select_backend(&identity(5, 8, 1), &4usize, BackendPreference::Auto).unwrap();

        assert_eq!(placement.device, Device::Accelerator { ordinal: 1 });
        assert_eq!(placement.backend, Backend::Accelerator);
    }

    #[test]
    fn cpu_preference_ignores_accelerators() {
        let placement = select_backend(&identity(0, 2, 0), &2usize, BackendPreference::Cpu).unwrap();
        assert_eq!(placement.backend, Backend::Cpu);
    }

    #[test]
    fn missing_device_for_local_rank_is_an_error() {
        let err = select_backend(&identity(3, 4, 3), &2usize, BackendPreference::Auto).unwrap_err();
        assert!(matches!(
            err,
            DistError::DeviceUnavailable {
                local_rank: 3,
                available: 2
            }
        ));

        let err = select_backend(&identity(0, 1, 0), &0usize, BackendPreference::Accelerator);
        assert!(err.is_err());
    }

    #[test]
    fn preference_parsing() {
        assert_eq!("AUTO".parse::<BackendPreference>(), Ok(BackendPreference::Auto));
        assert_eq!("gpu".parse::<BackendPreference>(), Ok(BackendPreference::Accelerator));
        assert!("nccl".parse::<BackendPreference>().is_err());
    }

    #[test]
    fn system_devices_count_device_nodes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["nvidia0", "nvidia1", "nvidiactl", "nvidia-uvm", "null"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let devices = SystemDevices::with_dev_dir(dir.path(), &EnvSnapshot::default());
        assert_eq!(devices.accelerator_count(), 2);

        let env = EnvSnapshot::from_pairs([(VISIBLE_DEVICES, "1")]);
        let devices = SystemDevices::with_dev_dir(dir.path(), &env);
        assert_eq!(devices.accelerator_count(), 1);

        let env = EnvSnapshot::from_pairs([(VISIBLE_DEVICES, "")]);
        let devices = SystemDevices::with_dev_dir(dir.path(), &env);
        assert_eq!(devices.accelerator_count(), 0);
    }

    #[test]
    fn missing_dev_dir_has_no_accelerators() {
        let devices = SystemDevices::with_dev_dir("/nonexistent/dev", &EnvSnapshot::default());
        assert_eq!(devices.accelerator_count(), 0);
    }
}
