//! Table and JSON rendering for command results

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use zadmin_tasks::{AshiftStatus, RecoveryReport, TuneOutcome};
use zadmin_zfs::{DiffEntry, ImportablePool, PoolSummary, SnapshotInfo};

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes as a human-readable size string.
pub fn format_size(bytes: u64) -> String {
    const TIB: u64 = 1024 * 1024 * 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= TIB {
        format!("{:.1} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn format_capacity(bytes: Option<u64>) -> String {
    bytes.map_or_else(|| "-".to_string(), format_size)
}

fn format_time(unix: i64) -> String {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .map_or_else(|| unix.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

pub fn print_importable(pools: &[ImportablePool]) {
    if pools.is_empty() {
        println!("No importable pools found.");
        return;
    }
    println!("{:<20} {:<22} {:<12}", "POOL", "ID", "STATE");
    println!("{}", "-".repeat(56));
    for pool in pools {
        let id = pool.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        println!("{:<20} {:<22} {:<12}", pool.name, id, pool.state);
    }
}

pub fn print_pools(pools: &[PoolSummary]) {
    if pools.is_empty() {
        println!("No pools imported.");
        return;
    }
    println!(
        "{:<20} {:>12} {:>12} {:>12} {:<10}",
        "NAME", "SIZE", "ALLOC", "FREE", "HEALTH"
    );
    println!("{}", "-".repeat(70));
    for pool in pools {
        println!(
            "{:<20} {:>12} {:>12} {:>12} {:<10}",
            pool.name,
            format_capacity(pool.size),
            format_capacity(pool.alloc),
            format_capacity(pool.free),
            pool.health
        );
    }
}

pub fn print_snapshots(snapshots: &[SnapshotInfo]) {
    if snapshots.is_empty() {
        println!("No snapshots found.");
        return;
    }
    println!(
        "{:<50} {:>10} {:>10} {:<20}",
        "NAME", "USED", "REFER", "CREATED"
    );
    println!("{}", "-".repeat(93));
    for snap in snapshots {
        println!(
            "{:<50} {:>10} {:>10} {:<20}",
            snap.name,
            format_size(snap.used),
            format_size(snap.referenced),
            format_time(snap.creation)
        );
    }
}

pub fn print_diff(entries: &[DiffEntry]) {
    if entries.is_empty() {
        println!("No changes.");
    }
    for entry in entries {
        println!("{entry}");
    }
}

pub fn print_recovery(report: &RecoveryReport) {
    println!("Recovery finished");
    println!("=================");
    for stage in &report.completed {
        println!("[✓] {stage}");
    }
    for stage in &report.skipped {
        println!("[ ] {stage} (skipped)");
    }
}

pub fn print_ashift_status(status: &AshiftStatus) {
    println!("Pool:    {}", status.pool);
    match status.current.sector_size() {
        Some(bytes) => println!("ashift:  {} ({} byte sectors)", status.current, bytes),
        None => println!("ashift:  {} (auto-detect)", status.current),
    }
    println!(
        "Target:  {} ({})",
        status.target,
        if status.tuned { "tuned" } else { "not tuned" }
    );
    match status.saved {
        Some(saved) => println!("Saved:   {saved} (run `zadmin ssd restore` to revert)"),
        None => println!("Saved:   -"),
    }
}

pub fn print_outcome(pool: &str, outcome: &TuneOutcome) {
    match outcome {
        TuneOutcome::Changed { from, to } => println!("{pool}: ashift {from} -> {to}"),
        TuneOutcome::Unchanged { value } => println!("{pool}: ashift already {value}"),
    }
}
