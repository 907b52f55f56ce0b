//! ZFS command-line integration.
//!
//! `runner` isolates process execution behind [`CommandRunner`] so every
//! wrapper can be driven by real processes, a dry-run logger, or a scripted
//! test double. `zpool`, `zfs`, `zstream` and `host` build the argument
//! vectors, and `parse` turns their machine-readable output into records.

pub mod host;
pub mod model;
pub mod parse;
pub mod runner;
pub mod zfs;
pub mod zpool;
pub mod zstream;

use std::sync::Arc;
use zadmin_common::config::ToolsConfig;

pub use host::Host;
pub use model::{DiffChange, DiffEntry, ImportablePool, PoolSummary, SnapshotInfo};
pub use runner::{
    CommandOutput, CommandRunner, DryRunRunner, Invocation, ScriptedRunner, SystemRunner,
};
pub use zfs::{SendRequest, Zfs};
pub use zpool::{ImportOptions, Zpool};
pub use zstream::Zstream;

/// All external tool wrappers sharing one runner
#[derive(Clone)]
pub struct Toolbox {
    runner: Arc<dyn CommandRunner>,
    zpool: Zpool,
    zfs: Zfs,
    zstream: Zstream,
    host: Host,
}

impl Toolbox {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self {
            zpool: Zpool::new(runner.clone(), &tools.zpool),
            zfs: Zfs::new(runner.clone(), &tools.zfs),
            zstream: Zstream::new(runner.clone(), &tools.zstream),
            host: Host::new(runner.clone(), tools),
            runner,
        }
    }

    pub const fn zpool(&self) -> &Zpool {
        &self.zpool
    }

    pub const fn zfs(&self) -> &Zfs {
        &self.zfs
    }

    pub const fn zstream(&self) -> &Zstream {
        &self.zstream
    }

    pub const fn host(&self) -> &Host {
        &self.host
    }

    /// Whether mutating commands are only logged
    pub fn is_dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }
}
