//! Records parsed from `zpool`/`zfs` output

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A pool reported by `zpool import` that can be imported
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportablePool {
    pub name: String,
    pub id: Option<u64>,
    pub state: String,
}

/// One row of `zpool list -Hp`. Capacity columns are `None` when the
/// pool cannot report them (UNAVAIL, FAULTED).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub size: Option<u64>,
    pub alloc: Option<u64>,
    pub free: Option<u64>,
    pub health: String,
}

/// One row of `zfs list -Hp -t snapshot`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub used: u64,
    pub referenced: u64,
    /// Creation time in unix seconds
    pub creation: i64,
}

/// Kind of change reported by `zfs diff`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffChange {
    Added,
    Removed,
    Modified,
    Renamed,
}

impl DiffChange {
    /// Parse the single-character marker `zfs diff` prints
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "+" => Some(Self::Added),
            "-" => Some(Self::Removed),
            "M" => Some(Self::Modified),
            "R" => Some(Self::Renamed),
            _ => None,
        }
    }

    pub const fn marker(self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Modified => 'M',
            Self::Renamed => 'R',
        }
    }
}

/// One line of `zfs diff -H`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub change: DiffChange,
    pub path: PathBuf,
    /// New path, for renames
    pub renamed_to: Option<PathBuf>,
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.change.marker(), self.path.display())?;
        if let Some(to) = &self.renamed_to {
            write!(f, " -> {}", to.display())?;
        }
        Ok(())
    }
}
