//! Parsers for the machine-readable output of `zpool` and `zfs`.
//!
//! The `-H` (tab separated, no header) and `-p` (exact numbers) flags are
//! used wherever the tools offer them.

use crate::model::{DiffChange, DiffEntry, ImportablePool, PoolSummary, SnapshotInfo};
use std::path::PathBuf;
use std::str::FromStr;
use zadmin_common::{Error, Result};

fn field<T: FromStr>(command: &str, line: &str, name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::parse(command, format!("bad {name} {value:?} in line {line:?}")))
}

/// Like [`field`], but `-` (value not available) yields `None`
fn optional_field<T: FromStr>(command: &str, line: &str, name: &str, value: &str) -> Result<Option<T>> {
    if value.trim() == "-" {
        Ok(None)
    } else {
        field(command, line, name, value).map(Some)
    }
}

fn columns<'a>(command: &str, line: &'a str, expected: usize) -> Result<Vec<&'a str>> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() == expected {
        Ok(cols)
    } else {
        Err(Error::parse(
            command,
            format!("expected {expected} columns, got {} in line {line:?}", cols.len()),
        ))
    }
}

/// Parse the pool stanzas printed by a bare `zpool import`
pub fn parse_importable_pools(output: &str) -> Vec<ImportablePool> {
    let mut pools: Vec<ImportablePool> = Vec::new();
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "pool" => pools.push(ImportablePool {
                name: value.to_string(),
                id: None,
                state: String::new(),
            }),
            "id" => {
                if let Some(pool) = pools.last_mut() {
                    pool.id = value.parse().ok();
                }
            }
            "state" => {
                if let Some(pool) = pools.last_mut() {
                    pool.state = value.to_string();
                }
            }
            _ => {}
        }
    }
    pools
}

/// Parse `zpool list -Hp -o name,size,alloc,free,health`
pub fn parse_pool_list(output: &str) -> Result<Vec<PoolSummary>> {
    const CMD: &str = "zpool list";
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let cols = columns(CMD, line, 5)?;
            Ok(PoolSummary {
                name: cols[0].to_string(),
                size: optional_field(CMD, line, "size", cols[1])?,
                alloc: optional_field(CMD, line, "alloc", cols[2])?,
                free: optional_field(CMD, line, "free", cols[3])?,
                health: cols[4].to_string(),
            })
        })
        .collect()
}

/// Parse `zfs list -Hp -t snapshot -o name,used,refer,creation`
pub fn parse_snapshot_list(output: &str) -> Result<Vec<SnapshotInfo>> {
    const CMD: &str = "zfs list";
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let cols = columns(CMD, line, 4)?;
            Ok(SnapshotInfo {
                name: cols[0].to_string(),
                used: field(CMD, line, "used", cols[1])?,
                referenced: field(CMD, line, "refer", cols[2])?,
                creation: field(CMD, line, "creation", cols[3])?,
            })
        })
        .collect()
}

/// Parse `zfs diff -H`
pub fn parse_diff(output: &str) -> Result<Vec<DiffEntry>> {
    const CMD: &str = "zfs diff";
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut cols = line.split('\t');
            let marker = cols.next().unwrap_or_default();
            let change = DiffChange::from_marker(marker).ok_or_else(|| {
                Error::parse(CMD, format!("unknown change {marker:?} in line {line:?}"))
            })?;
            let path = cols
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| Error::parse(CMD, format!("missing path in line {line:?}")))?;
            let renamed_to = cols.next().map(PathBuf::from);
            if change == DiffChange::Renamed && renamed_to.is_none() {
                return Err(Error::parse(CMD, format!("rename without target: {line:?}")));
            }
            Ok(DiffEntry {
                change,
                path,
                renamed_to,
            })
        })
        .collect()
}

/// Parse a `yes`/`no` property value
pub fn parse_yes_no(value: &str) -> bool {
    value.trim() == "yes"
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMPORT_OUTPUT: &str = "   pool: zroot
     id: 15764324651937219785
  state: DEGRADED
 status: One or more devices are missing from the system.
 action: The pool can be imported despite missing or damaged devices.
 config:

        zroot                     DEGRADED
          mirror-0                DEGRADED
            nvme0n1p2             ONLINE
            sdb2                  UNAVAIL

   pool: backup
     id: 902
  state: ONLINE
 action: The pool can be imported using its name or numeric identifier.
 config:

        backup      ONLINE
          sdc       ONLINE
";

    #[test]
    fn test_parse_importable_pools() {
        let pools = parse_importable_pools(IMPORT_OUTPUT);
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].name, "zroot");
        assert_eq!(pools[0].id, Some(15_764_324_651_937_219_785));
        assert_eq!(pools[0].state, "DEGRADED");
        assert_eq!(pools[1].name, "backup");
        assert_eq!(pools[1].state, "ONLINE");

        assert!(parse_importable_pools("").is_empty());
        assert!(parse_importable_pools("no pools available to import\n").is_empty());
    }

    #[test]
    fn test_parse_pool_list() {
        let pools =
            parse_pool_list("zroot\t498216206336\t120259084288\t377957122048\tONLINE\n").unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "zroot");
        assert_eq!(pools[0].alloc, Some(120_259_084_288));
        assert_eq!(pools[0].health, "ONLINE");

        let damaged = parse_pool_list(
            "zroot\t498216206336\t120259084288\t377957122048\tONLINE\nbackup\t-\t-\t-\tUNAVAIL\n",
        )
        .unwrap();
        assert_eq!(damaged.len(), 2);
        assert_eq!(damaged[1].name, "backup");
        assert_eq!(damaged[1].size, None);
        assert_eq!(damaged[1].free, None);
        assert_eq!(damaged[1].health, "UNAVAIL");

        assert!(parse_pool_list("").unwrap().is_empty());
        assert!(parse_pool_list("zroot\t1G\t0\t1\tONLINE").is_err());
        assert!(parse_pool_list("zroot\tONLINE").is_err());
    }

    #[test]
    fn test_parse_snapshot_list() {
        let out = "zroot/home@a\t1024\t4096\t1700000000\nzroot/home@b\t0\t4096\t1700003600\n";
        let snaps = parse_snapshot_list(out).unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[1].name, "zroot/home@b");
        assert_eq!(snaps[0].used, 1024);
        assert_eq!(snaps[1].creation, 1_700_003_600);
    }

    #[test]
    fn test_parse_diff() {
        let out = "M\t/mnt/home/\n+\t/mnt/home/new.txt\nR\t/mnt/home/a\t/mnt/home/b\n-\t/mnt/home/old\n";
        let entries = parse_diff(out).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].change, DiffChange::Modified);
        assert_eq!(entries[1].change, DiffChange::Added);
        assert_eq!(entries[2].renamed_to, Some(PathBuf::from("/mnt/home/b")));
        assert_eq!(entries[2].to_string(), "R\t/mnt/home/a -> /mnt/home/b");
        assert_eq!(entries[3].change, DiffChange::Removed);

        assert!(parse_diff("").unwrap().is_empty());
        assert!(parse_diff("X\t/a").is_err());
        assert!(parse_diff("R\t/a").is_err());
    }

    #[test]
    fn test_parse_yes_no() {
        assert!(parse_yes_no("yes\n"));
        assert!(!parse_yes_no("no"));
        assert!(!parse_yes_no("-"));
    }
}
