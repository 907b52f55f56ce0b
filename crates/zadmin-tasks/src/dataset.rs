//! Dataset mounting

use std::fmt;
use tracing::info;
use zadmin_common::{DatasetName, Error, Result};
use zadmin_zfs::Toolbox;

/// A single dataset, or every dataset with `canmount=on`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountTarget {
    All,
    Dataset(DatasetName),
}

impl MountTarget {
    /// `None` means all datasets
    pub fn from_option(dataset: Option<DatasetName>) -> Self {
        dataset.map_or(Self::All, Self::Dataset)
    }
}

impl fmt::Display for MountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all datasets"),
            Self::Dataset(ds) => write!(f, "{ds}"),
        }
    }
}

pub async fn mount(tools: &Toolbox, target: &MountTarget) -> Result<()> {
    match target {
        MountTarget::All => tools.zfs().mount_all().await?,
        MountTarget::Dataset(ds) => {
            if !tools.is_dry_run() && mounted_before_mount(tools, ds).await? {
                info!("{} is already mounted", ds);
                return Ok(());
            }
            tools.zfs().mount(ds).await?;
        }
    }
    info!("Mounted {}", target);
    Ok(())
}

pub async fn unmount(tools: &Toolbox, target: &MountTarget, force: bool) -> Result<()> {
    match target {
        MountTarget::All => tools.zfs().unmount_all(force).await?,
        MountTarget::Dataset(ds) => {
            if !tools.is_dry_run() && !mounted_before_unmount(tools, ds).await? {
                info!("{} is not mounted", ds);
                return Ok(());
            }
            tools.zfs().unmount(ds, force).await?;
        }
    }
    info!("Unmounted {}", target);
    Ok(())
}

pub async fn is_mounted(tools: &Toolbox, dataset: &DatasetName) -> Result<bool> {
    tools.zfs().is_mounted(dataset).await
}

/// Mount state read ahead of mounting; a dataset that cannot be queried
/// cannot be mounted either.
pub(crate) async fn mounted_before_mount(tools: &Toolbox, dataset: &DatasetName) -> Result<bool> {
    tools
        .zfs()
        .is_mounted(dataset)
        .await
        .map_err(|e| Error::MountFailed {
            target: dataset.to_string(),
            reason: e.reason(),
        })
}

async fn mounted_before_unmount(tools: &Toolbox, dataset: &DatasetName) -> Result<bool> {
    tools
        .zfs()
        .is_mounted(dataset)
        .await
        .map_err(|e| Error::UnmountFailed {
            target: dataset.to_string(),
            reason: e.reason(),
        })
}
