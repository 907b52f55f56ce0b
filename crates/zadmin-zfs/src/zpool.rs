//! `zpool` wrapper

use crate::model::{ImportablePool, PoolSummary};
use crate::parse;
use crate::runner::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use zadmin_common::{Ashift, Error, PoolName, Result};

/// Flags for `zpool import`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// `-f`: import even if the pool looks active on another host
    pub force: bool,
    /// `-N`: do not mount any datasets
    pub no_mount: bool,
    /// `-R`: alternate root
    pub altroot: Option<PathBuf>,
    /// `-o readonly=on`
    pub readonly: bool,
    /// `-F`: discard the last transactions if the pool cannot be opened
    pub rewind: bool,
}

#[derive(Clone)]
pub struct Zpool {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
}

impl Zpool {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: &Path) -> Self {
        Self {
            runner,
            binary: binary.to_path_buf(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    /// Import `pool`
    pub async fn import(&self, pool: &PoolName, options: &ImportOptions) -> Result<()> {
        let mut inv = self
            .command()
            .arg("import")
            .flag_if(options.force, "-f")
            .flag_if(options.no_mount, "-N")
            .flag_if(options.rewind, "-F");
        if let Some(altroot) = &options.altroot {
            inv = inv.arg("-R").arg(altroot.display().to_string());
        }
        if options.readonly {
            inv = inv.args(["-o", "readonly=on"]);
        }
        let inv = inv.arg(pool.as_str());

        info!("Importing pool {}", pool);
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::ImportFailed {
                pool: pool.to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    /// Export `pool`
    pub async fn export(&self, pool: &PoolName, force: bool) -> Result<()> {
        let inv = self
            .command()
            .arg("export")
            .flag_if(force, "-f")
            .arg(pool.as_str());
        info!("Exporting pool {}", pool);
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::ExportFailed {
                pool: pool.to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    /// Pools visible on attached devices but not imported
    pub async fn detect(&self) -> Result<Vec<ImportablePool>> {
        let inv = self.command().arg("import").query();
        let output = self.runner.run(&inv).await?;
        // Nothing to import is reported on stderr, with status 1 on some releases
        if !output.success() && output.stderr.contains("no pools available") {
            return Ok(Vec::new());
        }
        let output = output.check(&inv)?;
        Ok(parse::parse_importable_pools(&output.stdout))
    }

    /// Human-readable `zpool status -v`
    pub async fn status(&self, pool: Option<&PoolName>) -> Result<String> {
        let mut inv = self.command().args(["status", "-v"]).query();
        if let Some(pool) = pool {
            inv = inv.arg(pool.as_str());
        }
        Ok(self.runner.run_checked(&inv).await?.stdout)
    }

    /// Command history recorded in the pool
    pub async fn history(&self, pool: &PoolName, long: bool) -> Result<String> {
        let inv = self
            .command()
            .arg("history")
            .flag_if(long, "-l")
            .arg(pool.as_str())
            .query();
        Ok(self.runner.run_checked(&inv).await?.stdout)
    }

    /// Imported pools
    pub async fn list(&self) -> Result<Vec<PoolSummary>> {
        let inv = self
            .command()
            .args(["list", "-Hp", "-o", "name,size,alloc,free,health"])
            .query();
        let output = self.runner.run_checked(&inv).await?;
        parse::parse_pool_list(&output.stdout)
    }

    /// Whether `pool` is currently imported
    pub async fn is_imported(&self, pool: &PoolName) -> Result<bool> {
        let inv = self
            .command()
            .args(["list", "-H", "-o", "name", pool.as_str()])
            .query();
        let output = self.runner.run(&inv).await?;
        debug!(pool = %pool, imported = output.success(), "Checked pool");
        Ok(output.success())
    }

    /// Read a pool property value
    pub async fn get_property(&self, pool: &PoolName, property: &str) -> Result<String> {
        let inv = self
            .command()
            .args(["get", "-Hp", "-o", "value", property, pool.as_str()])
            .query();
        let output = self.runner.run(&inv).await?;
        if !output.success() && output.stderr.contains("no such pool") {
            return Err(Error::PoolNotFound(pool.to_string()));
        }
        Ok(output.check(&inv)?.stdout.trim().to_string())
    }

    /// Set a pool property
    pub async fn set_property(&self, pool: &PoolName, property: &str, value: &str) -> Result<()> {
        let inv = self
            .command()
            .arg("set")
            .arg(format!("{property}={value}"))
            .arg(pool.as_str());
        info!("Setting {}={} on pool {}", property, value, pool);
        self.runner.run_checked(&inv).await?;
        Ok(())
    }

    /// Current `ashift` of `pool`
    pub async fn ashift(&self, pool: &PoolName) -> Result<Ashift> {
        let value = self.get_property(pool, "ashift").await?;
        value.parse().map_err(|_| {
            Error::parse("zpool get ashift", format!("not an ashift value: {value:?}"))
        })
    }

    pub async fn set_ashift(&self, pool: &PoolName, ashift: Ashift) -> Result<()> {
        self.set_property(pool, "ashift", &ashift.to_string()).await
    }
}
