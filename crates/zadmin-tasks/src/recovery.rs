//! Degraded-pool recovery.
//!
//! Imports the pool under an alternate root, optionally rewrites `ashift`,
//! mounts the datasets the system needs, reinstalls the bootloader package
//! from inside a chroot, then unmounts and exports again. Each stage can be
//! switched off; the workflow stops at the first failing stage.

use crate::dataset;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};
use zadmin_common::config::RecoveryConfig;
use zadmin_common::{Ashift, DatasetName, Error, PoolName, Result};
use zadmin_zfs::{ImportOptions, Toolbox};

/// Stages of the recovery workflow, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Import,
    Ashift,
    Mount,
    Chroot,
    Unmount,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Import => "import",
            Self::Ashift => "ashift",
            Self::Mount => "mount",
            Self::Chroot => "chroot",
            Self::Unmount => "unmount",
            Self::Export => "export",
        };
        f.write_str(s)
    }
}

/// What the recovery run should do
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub pool: PoolName,
    pub altroot: PathBuf,
    /// Rewrite `ashift` after import
    pub fix_ashift: Option<Ashift>,
    /// Datasets that must be mounted before chrooting
    pub datasets: Vec<DatasetName>,
    /// Partition mounted on `<altroot>/boot`
    pub boot_device: Option<String>,
    /// Package reinstalled inside the chroot
    pub package: String,
    /// Pass `-F` to `zpool import`
    pub rewind: bool,
    pub import: bool,
    pub mount: bool,
    pub chroot: bool,
    pub unmount: bool,
    pub export: bool,
}

impl RecoveryPlan {
    /// Plan with every stage enabled
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            pool: config.pool.clone(),
            altroot: config.altroot.clone(),
            fix_ashift: None,
            datasets: config.datasets.clone(),
            boot_device: config.boot_device.clone(),
            package: config.package.clone(),
            rewind: false,
            import: true,
            mount: true,
            chroot: true,
            unmount: true,
            export: true,
        }
    }

    fn boot_dir(&self) -> PathBuf {
        self.altroot.join("boot")
    }

    fn validate(&self) -> Result<()> {
        if self.chroot && self.package.trim().is_empty() {
            return Err(Error::invalid_argument("no package given for the chroot repair"));
        }
        if let Some(ds) = self.datasets.iter().find(|ds| ds.pool() != self.pool) {
            return Err(Error::invalid_argument(format!(
                "dataset {ds} does not belong to pool {}",
                self.pool
            )));
        }
        Ok(())
    }
}

/// Stages completed and skipped by a recovery run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub completed: Vec<Stage>,
    pub skipped: Vec<Stage>,
}

impl RecoveryReport {
    fn gate(&mut self, enabled: bool, stage: Stage) -> bool {
        if !enabled {
            info!("Skipping {} stage", stage);
            self.skipped.push(stage);
        }
        enabled
    }
}

/// Run the recovery workflow
pub async fn run_recovery(tools: &Toolbox, plan: &RecoveryPlan) -> Result<RecoveryReport> {
    plan.validate()?;
    let mut report = RecoveryReport::default();
    info!(
        "Recovering pool {} under {}",
        plan.pool,
        plan.altroot.display()
    );

    if report.gate(plan.import, Stage::Import) {
        if tools.zpool().is_imported(&plan.pool).await? {
            info!("Pool {} is already imported", plan.pool);
            report.skipped.push(Stage::Import);
        } else {
            let options = ImportOptions {
                force: true,
                no_mount: true,
                altroot: Some(plan.altroot.clone()),
                readonly: false,
                rewind: plan.rewind,
            };
            tools.zpool().import(&plan.pool, &options).await?;
            report.completed.push(Stage::Import);
        }
    }

    if let Some(ashift) = plan.fix_ashift {
        tools.zpool().set_ashift(&plan.pool, ashift).await?;
        report.completed.push(Stage::Ashift);
    }

    let mut boot_mounted = false;
    if report.gate(plan.mount, Stage::Mount) {
        mount_datasets(tools, plan).await?;
        if let Some(device) = &plan.boot_device {
            let boot = plan.boot_dir();
            tools.host().mkdir_p(&boot).await?;
            tools.host().mount(device, &boot).await?;
            boot_mounted = true;
        }
        report.completed.push(Stage::Mount);
    }

    if report.gate(plan.chroot, Stage::Chroot) {
        tools
            .host()
            .chroot(
                &plan.altroot,
                &["pacman", "-S", "--noconfirm", plan.package.as_str()],
            )
            .await?;
        info!("Reinstalled {} inside {}", plan.package, plan.altroot.display());
        report.completed.push(Stage::Chroot);
    }

    if report.gate(plan.unmount, Stage::Unmount) {
        if boot_mounted {
            tools.host().umount(&plan.boot_dir()).await?;
        }
        tools.zfs().unmount_all(false).await?;
        report.completed.push(Stage::Unmount);
    }

    if report.gate(plan.export, Stage::Export) {
        tools.zpool().export(&plan.pool, false).await?;
        report.completed.push(Stage::Export);
    }

    info!("Recovery of {} finished", plan.pool);
    Ok(report)
}

async fn mount_datasets(tools: &Toolbox, plan: &RecoveryPlan) -> Result<()> {
    // The pool is not really imported during a dry run, so its datasets
    // cannot be queried.
    if tools.is_dry_run() {
        for dataset in &plan.datasets {
            tools.zfs().mount(dataset).await?;
        }
        return tools.zfs().mount_all().await;
    }

    for dataset in &plan.datasets {
        if dataset::mounted_before_mount(tools, dataset).await? {
            info!("{} already mounted", dataset);
        } else {
            tools.zfs().mount(dataset).await?;
        }
    }
    tools.zfs().mount_all().await?;

    for dataset in &plan.datasets {
        let mounted = tools.zfs().is_mounted(dataset).await.unwrap_or_else(|e| {
            warn!("Cannot read mount state of {}: {}", dataset, e);
            false
        });
        if !mounted {
            warn!("Expected dataset {} is not mounted", dataset);
            return Err(Error::NotMounted(dataset.to_string()));
        }
    }
    Ok(())
}
