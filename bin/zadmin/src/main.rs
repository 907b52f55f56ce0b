//! zadmin - ZFS administration CLI
//!
//! Usage:
//!   zadmin recover --name=zroot --mountpoint=/mnt --boot-device /dev/nvme0n1p1
//!   zadmin pool detect
//!   zadmin snapshot create zroot/home -r
//!   zadmin snapshot send zroot/home@b --from a --compress=zstd
//!   zadmin ssd patch

mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zadmin_common::config::DEFAULT_CONFIG_PATH;
use zadmin_common::{Ashift, Compression, Config, DatasetName, PoolName, SnapshotName};
use zadmin_tasks::{
    AshiftTuner, MountTarget, RecoveryPlan, SendOptions, SnapshotManager, dataset, pool,
    recovery,
};
use zadmin_zfs::{CommandRunner, DryRunRunner, ImportOptions, SystemRunner, Toolbox};

#[derive(Parser, Debug)]
#[command(name = "zadmin")]
#[command(about = "ZFS administration toolkit")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print mutating commands instead of running them
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "ZADMIN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a damaged pool, repair the bootloader from a chroot, export again
    Recover(RecoverArgs),
    /// Pool operations
    Pool {
        #[command(subcommand)]
        action: PoolCommands,
    },
    /// Dataset mounting
    Dataset {
        #[command(subcommand)]
        action: DatasetCommands,
    },
    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommands,
    },
    /// SSD ashift tuning
    Ssd(SsdArgs),
}

#[derive(clap::Args, Debug)]
struct RecoverArgs {
    /// Pool to recover
    #[arg(long)]
    name: Option<PoolName>,

    /// Alternate root the pool is imported under
    #[arg(long)]
    mountpoint: Option<PathBuf>,

    /// Set ashift after import (12 when given without a value)
    #[arg(long, num_args = 0..=1, default_missing_value = "12")]
    fix_ashift: Option<Ashift>,

    /// Dataset that must be mounted before the chroot (repeatable)
    #[arg(long = "dataset")]
    datasets: Vec<DatasetName>,

    /// Partition mounted on <mountpoint>/boot
    #[arg(long)]
    boot_device: Option<String>,

    /// Package reinstalled inside the chroot
    #[arg(long)]
    package: Option<String>,

    /// Discard the last transactions if the pool cannot be opened
    #[arg(long)]
    rewind: bool,

    #[arg(long)]
    skip_import: bool,

    #[arg(long)]
    skip_mount: bool,

    #[arg(long)]
    skip_chroot: bool,

    #[arg(long)]
    skip_unmount: bool,

    #[arg(long)]
    skip_export: bool,
}

#[derive(Subcommand, Debug)]
enum PoolCommands {
    /// List pools that can be imported
    Detect,
    /// List imported pools
    List,
    /// Show pool status
    Status {
        /// Pool name (all pools when omitted)
        pool: Option<PoolName>,
    },
    /// Show pool command history
    History {
        pool: PoolName,
        /// Include internal events
        #[arg(short, long)]
        long: bool,
    },
    /// Import a pool
    Import {
        pool: PoolName,
        /// Alternate root
        #[arg(long)]
        mountpoint: Option<PathBuf>,
        #[arg(short, long)]
        force: bool,
        /// Do not mount datasets
        #[arg(long)]
        no_mount: bool,
        #[arg(long)]
        readonly: bool,
        #[arg(long)]
        rewind: bool,
    },
    /// Export a pool
    Export {
        pool: PoolName,
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DatasetCommands {
    /// Mount a dataset (all datasets when omitted)
    Mount { dataset: Option<DatasetName> },
    /// Unmount a dataset (all datasets when omitted)
    Unmount {
        dataset: Option<DatasetName>,
        #[arg(short, long)]
        force: bool,
    },
    /// Show whether a dataset is mounted
    Status { dataset: DatasetName },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommands {
    /// List snapshots
    List {
        /// Dataset (all snapshots when omitted)
        dataset: Option<DatasetName>,
        /// Include descendant datasets
        #[arg(short, long)]
        recursive: bool,
    },
    /// Create a snapshot
    Create {
        dataset: DatasetName,
        /// Snapshot name (generated from the date when omitted)
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Write a send stream to a file
    Send {
        snapshot: SnapshotName,
        /// Base snapshot for an incremental stream
        #[arg(long)]
        from: Option<String>,
        /// Include intermediate snapshots (-I)
        #[arg(long, requires = "from")]
        intermediates: bool,
        /// Replication stream including descendants (-R)
        #[arg(short = 'R', long)]
        replicate: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// none, gzip, xz or zstd
        #[arg(long)]
        compress: Option<Compression>,
        /// Overwrite an existing output file
        #[arg(short, long)]
        force: bool,
    },
    /// Destroy a snapshot
    Delete {
        snapshot: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Decode a send stream file
    Dump {
        file: PathBuf,
        /// Compression of the file (guessed from the extension when omitted)
        #[arg(long)]
        compress: Option<Compression>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show changes between snapshots
    Diff {
        from: SnapshotName,
        /// Later snapshot (the live dataset when omitted)
        to: Option<String>,
    },
    /// Show snapshot history of a dataset
    History { dataset: DatasetName },
}

#[derive(clap::Args, Debug)]
struct SsdArgs {
    /// Pool to tune
    #[arg(long)]
    name: Option<PoolName>,

    /// ashift to apply
    #[arg(long)]
    target: Option<Ashift>,

    /// File holding the replaced value
    #[arg(long)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    action: SsdCommands,
}

#[derive(Subcommand, Debug)]
enum SsdCommands {
    /// Show the current ashift
    Check,
    /// Save the current ashift and apply the target
    Patch {
        /// Replace an existing saved value
        #[arg(short, long)]
        force: bool,
    },
    /// Re-apply the saved ashift
    Restore,
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    let level = if args.debug {
        "debug".to_string()
    } else {
        args.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Exit code of a failed command; failures outside the toolkit map to 255
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<zadmin_common::Error>()
        .map_or(255, zadmin_common::Error::exit_code)
}

fn toolbox(config: &Config, dry_run: bool) -> Toolbox {
    let system: Arc<dyn CommandRunner> = Arc::new(SystemRunner::from_config(&config.runner));
    let runner: Arc<dyn CommandRunner> = if dry_run {
        Arc::new(DryRunRunner::new(system))
    } else {
        system
    };
    Toolbox::new(runner, &config.tools)
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;
    debug!("Loaded configuration from {}", args.config.display());
    let tools = toolbox(&config, args.dry_run);
    let json = args.json;

    match args.command {
        Commands::Recover(recover) => handle_recover(&tools, &config, recover, json).await,
        Commands::Pool { action } => handle_pool(&tools, action, json).await,
        Commands::Dataset { action } => handle_dataset(&tools, action, json).await,
        Commands::Snapshot { action } => handle_snapshot(&tools, &config, action, json).await,
        Commands::Ssd(ssd) => handle_ssd(&tools, &config, ssd, json).await,
    }
}

async fn handle_recover(
    tools: &Toolbox,
    config: &Config,
    args: RecoverArgs,
    json: bool,
) -> Result<()> {
    let mut plan = RecoveryPlan::from_config(&config.recovery);
    if let Some(pool) = args.name {
        // Configured datasets are moved onto the requested pool
        plan.datasets = plan
            .datasets
            .iter()
            .map(|ds| rebase_dataset(ds, &pool))
            .collect::<zadmin_common::Result<_>>()?;
        plan.pool = pool;
    }
    if let Some(mountpoint) = args.mountpoint {
        plan.altroot = mountpoint;
    }
    if !args.datasets.is_empty() {
        plan.datasets = args.datasets;
    }
    if args.boot_device.is_some() {
        plan.boot_device = args.boot_device;
    }
    if let Some(package) = args.package {
        plan.package = package;
    }
    plan.fix_ashift = args.fix_ashift;
    plan.rewind = args.rewind;
    plan.import = !args.skip_import;
    plan.mount = !args.skip_mount;
    plan.chroot = !args.skip_chroot;
    plan.unmount = !args.skip_unmount;
    plan.export = !args.skip_export;

    let report = recovery::run_recovery(tools, &plan).await?;
    if json {
        output::print_json(&report)
    } else {
        output::print_recovery(&report);
        Ok(())
    }
}

fn rebase_dataset(dataset: &DatasetName, pool: &PoolName) -> zadmin_common::Result<DatasetName> {
    match dataset.as_str().split_once('/') {
        Some((_, rest)) => DatasetName::new(format!("{pool}/{rest}")),
        None => Ok(DatasetName::from(pool.clone())),
    }
}

async fn handle_pool(tools: &Toolbox, action: PoolCommands, json: bool) -> Result<()> {
    match action {
        PoolCommands::Detect => {
            let pools = pool::detect(tools).await?;
            if json {
                return output::print_json(&pools);
            }
            output::print_importable(&pools);
        }
        PoolCommands::List => {
            let pools = pool::list(tools).await?;
            if json {
                return output::print_json(&pools);
            }
            output::print_pools(&pools);
        }
        PoolCommands::Status { pool } => {
            print!("{}", pool::status(tools, pool.as_ref()).await?);
        }
        PoolCommands::History { pool, long } => {
            print!("{}", pool::history(tools, &pool, long).await?);
        }
        PoolCommands::Import {
            pool,
            mountpoint,
            force,
            no_mount,
            readonly,
            rewind,
        } => {
            let options = ImportOptions {
                force,
                no_mount,
                altroot: mountpoint,
                readonly,
                rewind,
            };
            if pool::import(tools, &pool, &options).await? {
                println!("Imported pool {pool}");
            } else {
                println!("Pool {pool} is already imported");
            }
        }
        PoolCommands::Export { pool, force } => {
            if pool::export(tools, &pool, force).await? {
                println!("Exported pool {pool}");
            } else {
                println!("Pool {pool} is not imported");
            }
        }
    }
    Ok(())
}

async fn handle_dataset(tools: &Toolbox, action: DatasetCommands, json: bool) -> Result<()> {
    match action {
        DatasetCommands::Mount { dataset } => {
            let target = MountTarget::from_option(dataset);
            dataset::mount(tools, &target).await?;
            println!("Mounted {target}");
        }
        DatasetCommands::Unmount { dataset, force } => {
            let target = MountTarget::from_option(dataset);
            dataset::unmount(tools, &target, force).await?;
            println!("Unmounted {target}");
        }
        DatasetCommands::Status { dataset: name } => {
            let mounted = dataset::is_mounted(tools, &name).await?;
            if json {
                return output::print_json(
                    &serde_json::json!({ "dataset": name.as_str(), "mounted": mounted }),
                );
            }
            println!(
                "{name}: {}",
                if mounted { "mounted" } else { "not mounted" }
            );
        }
    }
    Ok(())
}

async fn handle_snapshot(
    tools: &Toolbox,
    config: &Config,
    action: SnapshotCommands,
    json: bool,
) -> Result<()> {
    let manager = SnapshotManager::new(tools, &config.snapshot);
    match action {
        SnapshotCommands::List { dataset, recursive } => {
            let snapshots = manager.list(dataset.as_ref(), recursive).await?;
            if json {
                return output::print_json(&snapshots);
            }
            output::print_snapshots(&snapshots);
        }
        SnapshotCommands::Create {
            dataset,
            name,
            recursive,
        } => {
            let snapshot = manager.create(&dataset, name.as_deref(), recursive).await?;
            println!("Created snapshot {snapshot}");
        }
        SnapshotCommands::Send {
            snapshot,
            from,
            intermediates,
            replicate,
            output,
            compress,
            force,
        } => {
            let options = SendOptions {
                from,
                intermediates,
                replicate,
                output,
                compression: compress,
                force,
            };
            let path = manager.send(&snapshot, &options).await?;
            println!("Wrote {} to {}", snapshot, path.display());
        }
        SnapshotCommands::Delete {
            snapshot,
            recursive,
        } => {
            let snapshot = manager.delete(&snapshot, recursive).await?;
            println!("Deleted snapshot {snapshot}");
        }
        SnapshotCommands::Dump {
            file,
            compress,
            verbose,
        } => {
            print!("{}", manager.dump(&file, compress, verbose).await?);
        }
        SnapshotCommands::Diff { from, to } => {
            let entries = manager.diff(&from, to.as_deref()).await?;
            if json {
                return output::print_json(&entries);
            }
            output::print_diff(&entries);
        }
        SnapshotCommands::History { dataset } => {
            let lines = manager.history(&dataset).await?;
            if json {
                return output::print_json(&lines);
            }
            if lines.is_empty() {
                println!("No snapshot history for {dataset}.");
            }
            for line in lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

async fn handle_ssd(tools: &Toolbox, config: &Config, args: SsdArgs, json: bool) -> Result<()> {
    let mut ssd = config.ssd.clone();
    if let Some(pool) = args.name {
        ssd.pool = pool;
    }
    if let Some(target) = args.target {
        ssd.target_ashift = target;
    }
    if let Some(state_file) = args.state_file {
        ssd.state_file = state_file;
    }
    let tuner = AshiftTuner::from_config(tools, &ssd);

    let outcome = match args.action {
        SsdCommands::Check => {
            let status = tuner.check().await?;
            if json {
                return output::print_json(&status);
            }
            output::print_ashift_status(&status);
            return Ok(());
        }
        SsdCommands::Patch { force } => tuner.patch(force).await?,
        SsdCommands::Restore => tuner.restore().await?,
    };
    if json {
        output::print_json(&outcome)
    } else {
        output::print_outcome(ssd.pool.as_str(), &outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_recover_flags() {
        let args = Args::try_parse_from([
            "zadmin",
            "-n",
            "recover",
            "--name=rpool",
            "--mountpoint=/target",
            "--fix-ashift",
            "--skip-export",
        ])
        .unwrap();
        assert!(args.dry_run);
        let Commands::Recover(recover) = args.command else {
            panic!("expected recover");
        };
        assert_eq!(recover.name.unwrap().as_str(), "rpool");
        assert_eq!(recover.fix_ashift, Some(Ashift::SSD));
        assert!(recover.skip_export);
        assert!(!recover.skip_import);
    }

    #[test]
    fn test_parse_snapshot_send() {
        let args = Args::try_parse_from([
            "zadmin",
            "snapshot",
            "send",
            "zroot/home@b",
            "--from",
            "a",
            "--compress=zstd",
            "-R",
        ])
        .unwrap();
        let Commands::Snapshot {
            action:
                SnapshotCommands::Send {
                    snapshot,
                    compress,
                    replicate,
                    ..
                },
        } = args.command
        else {
            panic!("expected snapshot send");
        };
        assert_eq!(snapshot.snapshot(), "b");
        assert_eq!(compress, Some(Compression::Zstd));
        assert!(replicate);
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(Args::try_parse_from(["zadmin", "pool", "export", "mirror"]).is_err());
        assert!(Args::try_parse_from(["zadmin", "snapshot", "diff", "zroot/home"]).is_err());
        assert!(Args::try_parse_from(["zadmin", "ssd", "--target", "20", "check"]).is_err());
    }

    #[test]
    fn test_rebase_dataset() {
        let pool = PoolName::new("rpool").unwrap();
        let ds = DatasetName::new("zroot/ROOT/default").unwrap();
        assert_eq!(rebase_dataset(&ds, &pool).unwrap().as_str(), "rpool/ROOT/default");
        let root = DatasetName::new("zroot").unwrap();
        assert_eq!(rebase_dataset(&root, &pool).unwrap().as_str(), "rpool");
    }

    #[test]
    fn test_exit_code_mapping() {
        let err = anyhow::Error::from(zadmin_common::Error::NotMounted("zroot".into()));
        assert_eq!(exit_code(&err), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 255);
    }
}
