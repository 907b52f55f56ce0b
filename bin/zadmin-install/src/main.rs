//! zadmin installation tool
//!
//! Usage:
//!   zadmin-install install
//!   zadmin-install update --source-dir target/release
//!   zadmin-install uninstall --purge
//!   zadmin-install status

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zadmin_common::Config;
use zadmin_common::config::DEFAULT_CONFIG_PATH;
use zadmin_tasks::{InstallAction, InstallReport, Installer};

#[derive(Parser, Debug)]
#[command(name = "zadmin-install")]
#[command(about = "Install, update or remove the zadmin tools")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print changes instead of making them
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "ZADMIN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory holding the built binaries (defaults to this program's directory)
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    /// Installation directory
    #[arg(long, global = true)]
    install_dir: Option<PathBuf>,

    /// Skip the root check
    #[arg(long, global = true)]
    allow_non_root: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy the binaries and write a default configuration
    Install,
    /// Replace binaries that changed
    Update,
    /// Remove the binaries
    Uninstall {
        /// Remove the configuration file too
        #[arg(long)]
        purge: bool,
    },
    /// Show what is installed
    Status,
}

fn main() {
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

    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<zadmin_common::Error>()
            .map_or(255, zadmin_common::Error::exit_code);
        std::process::exit(code);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load(&args.config)?.install;
    if let Some(dir) = args.install_dir {
        config.install_dir = dir;
    }
    // Keep the installed config where the tools will look for it
    config.config_path = args.config;

    let installer = match args.source_dir {
        Some(dir) => Installer::new(config, dir),
        None => Installer::from_current_exe(config)?,
    }
    .dry_run(args.dry_run)
    .allow_non_root(args.allow_non_root);

    let report = match args.command {
        Commands::Install => installer.install()?,
        Commands::Update => installer.update()?,
        Commands::Uninstall { purge } => installer.uninstall(purge)?,
        Commands::Status => installer.status(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if args.dry_run {
        info!("Dry run: nothing was changed");
    }
    Ok(())
}

fn print_report(report: &InstallReport) {
    for (path, action) in &report.entries {
        let mark = match action {
            InstallAction::Missing => "[ ]",
            _ => "[✓]",
        };
        println!("{mark} {} - {action}", path.display());
    }
}
