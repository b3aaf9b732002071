// Host-level configuration and the per-host singleton registry.
//
// A HostContext owns the one instance of each core subsystem a host shares
// among its workers: the BlockPool, the Multiplexer, the memory Manager, and
// the net::Group. Nothing here is a process-global; callers construct a
// HostContext explicitly and pass `Arc<HostContext>` down to workers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::block::BlockPool;
use crate::io::{AllocationStrategy, DiskManager};
use crate::mem::Manager;
use crate::net::Group;
use crate::stream::Multiplexer;
use crate::Result;

/// Process launch configuration, read from the environment variables defined
/// in the external interfaces section: `THRILL_RANK`, `THRILL_HOSTLIST`,
/// `THRILL_WORKERS_PER_HOST`, `THRILL_LOCAL`, `THRILL_RAM`, `THRILL_DISKS`.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// This host's rank in `[0, num_hosts)`. `None` means single-process test
    /// mode with `local_hosts` simulated hosts connected by in-process pipes.
    pub rank: Option<usize>,
    /// `host:port` endpoints, one per host. Its length defines `num_hosts`.
    pub hostlist: Vec<String>,
    /// Workers per host (`W`).
    pub workers_per_host: usize,
    /// Number of simulated hosts when running in test mode.
    pub local_hosts: usize,
    /// Soft memory limit in bytes for the BlockPool (`M_soft`).
    pub ram_soft_limit: u64,
    /// Hard memory limit in bytes for the BlockPool (`M_hard`).
    pub ram_hard_limit: u64,
    /// Disk configuration string, e.g. `"/data/disk0,/data/disk1"`.
    pub disks: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            rank: None,
            hostlist: Vec::new(),
            workers_per_host: num_cpus::get(),
            local_hosts: 1,
            ram_soft_limit: 1 << 30,
            ram_hard_limit: 2 << 30,
            disks: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Build a config from the process environment. Fails only on
    /// configuration errors (e.g. `THRILL_RANK` set without `THRILL_HOSTLIST`).
    pub fn from_env() -> Result<Self> {
        let mut config = HostConfig::default();

        if let Ok(w) = std::env::var("THRILL_WORKERS_PER_HOST") {
            config.workers_per_host = w.parse().map_err(|_| {
                crate::ThrillError::Configuration(format!(
                    "THRILL_WORKERS_PER_HOST is not a number: {w}"
                ))
            })?;
        }

        if let Ok(local) = std::env::var("THRILL_LOCAL") {
            config.local_hosts = local.parse().map_err(|_| {
                crate::ThrillError::Configuration(format!("THRILL_LOCAL is not a number: {local}"))
            })?;
        }

        if let Ok(ram) = std::env::var("THRILL_RAM") {
            let bytes: u64 = ram.parse().map_err(|_| {
                crate::ThrillError::Configuration(format!("THRILL_RAM is not a number: {ram}"))
            })?;
            config.ram_soft_limit = bytes;
            config.ram_hard_limit = bytes.saturating_mul(2);
        }

        if let Ok(disks) = std::env::var("THRILL_DISKS") {
            config.disks = disks
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        match std::env::var("THRILL_RANK") {
            Ok(rank_str) => {
                let rank: usize = rank_str.parse().map_err(|_| {
                    crate::ThrillError::Configuration(format!(
                        "THRILL_RANK is not a number: {rank_str}"
                    ))
                })?;
                let hostlist_str = std::env::var("THRILL_HOSTLIST").map_err(|_| {
                    crate::ThrillError::Configuration(
                        "THRILL_HOSTLIST is required when THRILL_RANK is set".into(),
                    )
                })?;
                let hostlist = parse_hostlist(&hostlist_str);
                if rank >= hostlist.len() {
                    return Err(crate::ThrillError::Configuration(format!(
                        "THRILL_RANK {rank} out of range for hostlist of size {}",
                        hostlist.len()
                    )));
                }
                config.rank = Some(rank);
                config.hostlist = hostlist;
            }
            Err(_) => {
                config.rank = None;
            }
        }

        Ok(config)
    }

    /// Number of hosts: hostlist length in distributed mode, `local_hosts` in
    /// test mode.
    pub fn num_hosts(&self) -> usize {
        if self.rank.is_some() {
            self.hostlist.len()
        } else {
            self.local_hosts
        }
    }
}

fn parse_hostlist(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Owns the lifetime of the per-host singleton subsystems. One instance per
/// host process (or per simulated host in test mode); workers hold clones of
/// the `Arc`s inside.
pub struct HostContext {
    pub config: HostConfig,
    pub block_pool: Arc<BlockPool>,
    pub memory: Arc<Manager>,
    pub group: Arc<Group>,
    pub multiplexer: Arc<Multiplexer>,
}

impl HostContext {
    /// Builds the per-host subsystems from `config`. When `config.disks` is
    /// non-empty, the BlockPool is backed by a `DiskManager` so blocks can
    /// actually page out to external memory under pressure (spec §4.9);
    /// otherwise it falls back to the no-disk in-memory-only pool.
    pub fn new(config: HostConfig, group: Arc<Group>) -> Result<Self> {
        let memory = Arc::new(Manager::new(config.ram_soft_limit, config.ram_hard_limit));
        let block_pool = if config.disks.is_empty() {
            BlockPool::new(
                config.ram_soft_limit,
                config.ram_hard_limit,
                Arc::clone(&memory),
            )
        } else {
            let paths: Vec<PathBuf> = config.disks.iter().map(PathBuf::from).collect();
            let disks = Arc::new(DiskManager::new(&paths, AllocationStrategy::Striping)?);
            BlockPool::with_disks(
                config.ram_soft_limit,
                config.ram_hard_limit,
                Arc::clone(&memory),
                disks,
            )
        };
        let multiplexer = Multiplexer::new(Arc::clone(&group), Arc::clone(&block_pool), config.workers_per_host);

        Ok(HostContext {
            config,
            block_pool,
            memory,
            group,
            multiplexer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_limits() {
        let config = HostConfig::default();
        assert!(config.ram_hard_limit >= config.ram_soft_limit);
        assert_eq!(config.local_hosts, 1);
    }

    #[test]
    fn parse_hostlist_accepts_commas_and_whitespace() {
        let parsed = parse_hostlist("host0:1000, host1:1000\nhost2:1000");
        assert_eq!(parsed, vec!["host0:1000", "host1:1000", "host2:1000"]);
    }
}
