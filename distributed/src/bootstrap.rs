//! Rank discovery from process launcher environments.
//!
//! Resolution never fails: a launcher whose variables are missing or malformed is skipped
//! with a warning and the next one is tried, down to a single process run.

use std::{fmt, num::NonZeroUsize};

use log::{info, warn};

use crate::{EnvSnapshot, hostlist};

pub const DEFAULT_PORT: u16 = 12355;
pub const LOCALHOST: &str = "localhost";

const SLURM_RANK: &str = "SLURM_PROCID";
const SLURM_SIZE: &str = "SLURM_NTASKS";
const SLURM_LOCAL_RANK: &str = "SLURM_LOCALID";
const SLURM_NODELIST: &str = "SLURM_STEP_NODELIST";

const OMPI_RANK: &str = "OMPI_COMM_WORLD_RANK";
const OMPI_SIZE: &str = "OMPI_COMM_WORLD_SIZE";
const OMPI_LOCAL_RANK: &str = "OMPI_COMM_WORLD_LOCAL_RANK";

const MASTER_ADDR: &str = "MASTER_ADDR";
const MASTER_PORT: &str = "MASTER_PORT";

/// A process's position inside the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankIdentity {
    rank: usize,
    world_size: NonZeroUsize,
    local_rank: usize,
}

impl RankIdentity {
    /// Creates a new identity.
    ///
    /// # Returns
    /// `None` if `rank` or `local_rank` fall outside `[0, world_size)`.
    pub fn new(rank: usize, world_size: NonZeroUsize, local_rank: usize) -> Option<Self> {
        (rank < world_size.get() && local_rank < world_size.get()).then_some(Self {
            rank,
            world_size,
            local_rank,
        })
    }

    /// The identity of a process running on its own.
    pub fn standalone() -> Self {
        Self {
            rank: 0,
            world_size: NonZeroUsize::MIN,
            local_rank: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size.get()
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    /// Whether this process is rank 0, the one in charge of logging and persistence.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    pub fn is_distributed(&self) -> bool {
        self.world_size.get() > 1
    }
}

/// Host and port every rank uses to reach rank 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for CoordinatorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The launcher convention the identity was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    Slurm,
    OpenMpi,
    Standalone,
}

impl fmt::Display for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Launcher::Slurm => "slurm",
            Launcher::OpenMpi => "openmpi",
            Launcher::Standalone => "standalone",
        };

        f.write_str(name)
    }
}

/// The outcome of resolving the launcher environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub identity: RankIdentity,
    pub coordinator: CoordinatorAddr,
    pub launcher: Launcher,
}

/// Resolves rank, world size, local rank and coordinator address.
///
/// Priority: Slurm job step, then OpenMPI, then a single process run.
///
/// # Arguments
/// * `env` - The environment to read launcher variables from.
///
/// # Returns
/// The resolved bootstrap information, never an error.
pub fn resolve(env: &EnvSnapshot) -> Bootstrap {
    let bootstrap = resolve_slurm(env)
        .or_else(|| resolve_openmpi(env))
        .unwrap_or_else(standalone);

    info!(
        rank = bootstrap.identity.rank(),
        world_size = bootstrap.identity.world_size(),
        local_rank = bootstrap.identity.local_rank();
        "resolved rank identity from {} environment, coordinator at {}",
        bootstrap.launcher,
        bootstrap.coordinator
    );

    bootstrap
}

fn resolve_slurm(env: &EnvSnapshot) -> Option<Bootstrap> {
    if !env.contains(SLURM_RANK) {
        return None;
    }

    let identity = read_identity(env, SLURM_RANK, SLURM_SIZE, SLURM_LOCAL_RANK)?;

    let host = match env.get(SLURM_NODELIST) {
        Some(list) => hostlist::first_host(list).or_else(|| {
            warn!("{SLURM_NODELIST}={list:?} is not a valid host list, using the local hostname");
            None
        }),
        None => None,
    }
    .unwrap_or_else(|| local_hostname(env));

    Some(Bootstrap {
        identity,
        coordinator: CoordinatorAddr {
            host,
            port: read_port(env),
        },
        launcher: Launcher::Slurm,
    })
}

fn resolve_openmpi(env: &EnvSnapshot) -> Option<Bootstrap> {
    if !env.contains(OMPI_RANK) {
        return None;
    }

    let identity = read_identity(env, OMPI_RANK, OMPI_SIZE, OMPI_LOCAL_RANK)?;
    let host = env
        .get(MASTER_ADDR)
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .unwrap_or(LOCALHOST)
        .to_string();

    Some(Bootstrap {
        identity,
        coordinator: CoordinatorAddr {
            host,
            port: read_port(env),
        },
        launcher: Launcher::OpenMpi,
    })
}

fn standalone() -> Bootstrap {
    Bootstrap {
        identity: RankIdentity::standalone(),
        coordinator: CoordinatorAddr {
            host: LOCALHOST.to_string(),
            port: DEFAULT_PORT,
        },
        launcher: Launcher::Standalone,
    }
}

fn read_identity(
    env: &EnvSnapshot,
    rank_var: &str,
    size_var: &str,
    local_var: &str,
) -> Option<RankIdentity> {
    let rank = read_usize(env, rank_var)?;
    let world_size = read_usize(env, size_var)?;
    let local_rank = read_usize(env, local_var)?;

    let Some(world_size) = NonZeroUsize::new(world_size) else {
        warn!("{size_var} is 0, ignoring this launcher");
        return None;
    };

    let identity = RankIdentity::new(rank, world_size, local_rank);
    if identity.is_none() {
        warn!(
            "{rank_var}={rank} or {local_var}={local_rank} is out of range for {size_var}={world_size}, ignoring this launcher"
        );
    }

    identity
}

fn read_usize(env: &EnvSnapshot, var: &str) -> Option<usize> {
    let Some(raw) = env.get(var) else {
        warn!("{var} is not set, ignoring this launcher");
        return None;
    };

    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warn!("{var}={raw:?} is not a non-negative integer, ignoring this launcher");
    }

    parsed
}

fn read_port(env: &EnvSnapshot) -> u16 {
    let Some(raw) = env.get(MASTER_PORT) else {
        return DEFAULT_PORT;
    };

    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => port,
        _ => {
            warn!("{MASTER_PORT}={raw:?} is not a valid port, using {DEFAULT_PORT}");
            DEFAULT_PORT
        }
    }
}

fn local_hostname(env: &EnvSnapshot) -> String {
    env.hostname().unwrap_or(LOCALHOST).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slurm(rank: &str, size: &str, local: &str) -> Vec<(&'static str, String)> {
        vec![
            (SLURM_RANK, rank.to_string()),
            (SLURM_SIZE, size.to_string()),
            (SLURM_LOCAL_RANK, local.to_string()),
        ]
    }

    fn ompi(rank: &str, size: &str, local: &str) -> Vec<(&'static str, String)> {
        vec![
            (OMPI_RANK, rank.to_string()),
            (OMPI_SIZE, size.to_string()),
            (OMPI_LOCAL_RANK, local.to_string()),
        ]
    }

    #[test]
    fn empty_environment_is_standalone() {
        let boot = resolve(&EnvSnapshot::default());

        assert_eq!(boot.launcher, Launcher::Standalone);
        assert_eq!(boot.identity.rank(), 0);
        assert_eq!(boot.identity.world_size(), 1);
        assert_eq!(boot.identity.local_rank(), 0);
        assert_eq!(boot.coordinator.to_string(), "localhost:12355");
    }

    #[test]
    fn slurm_uses_first_node_of_the_step() {
        let mut vars = slurm("5", "8", "1");
        vars.push((SLURM_NODELIST, "gpu[03-04],login".into()));
        vars.push((MASTER_PORT, "29500".into()));
        let env = EnvSnapshot::from_pairs(vars).with_hostname("gpu04");

        let boot = resolve(&env);

        assert_eq!(boot.launcher, Launcher::Slurm);
        assert_eq!(boot.identity, RankIdentity::new(5, NonZeroUsize::new(8).unwrap(), 1).unwrap());
        assert_eq!(boot.coordinator.host, "gpu03");
        assert_eq!(boot.coordinator.port, 29500);
    }

    #[test]
    fn slurm_without_nodelist_uses_hostname() {
        let env = EnvSnapshot::from_pairs(slurm("0", "2", "0")).with_hostname("cn17");
        let boot = resolve(&env);

        assert_eq!(boot.coordinator.host, "cn17");
        assert_eq!(boot.coordinator.port, DEFAULT_PORT);
    }

    #[test]
    fn slurm_with_broken_nodelist_uses_hostname() {
        let mut vars = slurm("1", "2", "1");
        vars.push((SLURM_NODELIST, "gpu[01-".into()));
        let env = EnvSnapshot::from_pairs(vars).with_hostname("cn17");

        assert_eq!(resolve(&env).coordinator.host, "cn17");
    }

    #[test]
    fn slurm_takes_priority_over_openmpi() {
        let mut vars = slurm("1", "2", "0");
        vars.extend(ompi("3", "4", "3"));
        let boot = resolve(&EnvSnapshot::from_pairs(vars));

        assert_eq!(boot.launcher, Launcher::Slurm);
        assert_eq!(boot.identity.rank(), 1);
    }

    #[test]
    fn malformed_slurm_falls_back_to_openmpi() {
        let mut vars = slurm("x", "2", "0");
        vars.extend(ompi("3", "4", "1"));
        vars.push((MASTER_ADDR, "head-node".into()));
        let boot = resolve(&EnvSnapshot::from_pairs(vars));

        assert_eq!(boot.launcher, Launcher::OpenMpi);
        assert_eq!(boot.identity.rank(), 3);
        assert_eq!(boot.identity.world_size(), 4);
        assert_eq!(boot.identity.local_rank(), 1);
        assert_eq!(boot.coordinator.host, "head-node");
    }

    #[test]
    fn openmpi_defaults_to_localhost() {
        let boot = resolve(&EnvSnapshot::from_pairs(ompi("0", "2", "0")));

        assert_eq!(boot.coordinator.host, LOCALHOST);
        assert_eq!(boot.coordinator.port, DEFAULT_PORT);
    }

    #[test]
    fn out_of_range_rank_falls_back_to_standalone() {
        let boot = resolve(&EnvSnapshot::from_pairs(slurm("4", "4", "0")));
        assert_eq!(boot.launcher, Launcher::Standalone);

        let boot = resolve(&EnvSnapshot::from_pairs(ompi("0", "0", "0")));
        assert_eq!(boot.launcher, Launcher::Standalone);

        let mut vars = slurm("0", "2", "0");
        vars.retain(|(k, _)| *k != SLURM_SIZE);
        assert_eq!(resolve(&EnvSnapshot::from_pairs(vars)).launcher, Launcher::Standalone);
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut vars = ompi("0", "2", "0");
        vars.push((MASTER_PORT, "99999".into()));
        assert_eq!(resolve(&EnvSnapshot::from_pairs(vars)).coordinator.port, DEFAULT_PORT);
    }

    #[test]
    fn rank_is_always_in_range() {
        let cases = [
            slurm("0", "1", "0"),
            slurm("7", "8", "3"),
            slurm("8", "8", "0"),
            slurm("-1", "8", "0"),
            ompi("2", "3", "2"),
            ompi("3", "3", "0"),
            ompi("", "3", "0"),
        ];

        for vars in cases {
            let env = EnvSnapshot::from_pairs(vars).with_hostname("host");
            let first = resolve(&env);
            assert!(first.identity.rank() < first.identity.world_size());
            assert_eq!(first, resolve(&env));
        }
    }
}
