//! Pool manager: detection, status, history, import and export

use tracing::info;
use zadmin_common::{PoolName, Result};
use zadmin_zfs::{ImportOptions, ImportablePool, PoolSummary, Toolbox};

/// Pools that could be imported from attached devices
pub async fn detect(tools: &Toolbox) -> Result<Vec<ImportablePool>> {
    let pools = tools.zpool().detect().await?;
    if pools.is_empty() {
        info!("No importable pools found");
    }
    Ok(pools)
}

/// Imported pools with capacity and health
pub async fn list(tools: &Toolbox) -> Result<Vec<PoolSummary>> {
    tools.zpool().list().await
}

/// `zpool status -v` for one pool or all pools
pub async fn status(tools: &Toolbox, pool: Option<&PoolName>) -> Result<String> {
    tools.zpool().status(pool).await
}

pub async fn history(tools: &Toolbox, pool: &PoolName, long: bool) -> Result<String> {
    tools.zpool().history(pool, long).await
}

/// Import unless the pool is already imported. Returns whether an import ran.
pub async fn import(tools: &Toolbox, pool: &PoolName, options: &ImportOptions) -> Result<bool> {
    if tools.zpool().is_imported(pool).await? {
        info!("Pool {} is already imported", pool);
        return Ok(false);
    }
    tools.zpool().import(pool, options).await?;
    Ok(true)
}

/// Export if imported. Returns whether an export ran.
pub async fn export(tools: &Toolbox, pool: &PoolName, force: bool) -> Result<bool> {
    if !tools.is_dry_run() && !tools.zpool().is_imported(pool).await? {
        info!("Pool {} is not imported", pool);
        return Ok(false);
    }
    tools.zpool().export(pool, force).await?;
    Ok(true)
}
