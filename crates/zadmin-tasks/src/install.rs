//! Installation of the zadmin binaries and default configuration

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zadmin_common::config::InstallConfig;
use zadmin_common::{Config, Error, Result};

/// What happened to one installed file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallAction {
    Installed,
    Updated,
    Unchanged,
    Removed,
    /// Left in place (config without `--purge`)
    Kept,
    /// Nothing to do because the file does not exist
    Missing,
    Present,
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "installed",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
            Self::Kept => "kept",
            Self::Missing => "not installed",
            Self::Present => "present",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub entries: Vec<(PathBuf, InstallAction)>,
}

impl InstallReport {
    fn push(&mut self, path: PathBuf, action: InstallAction) {
        info!("{}: {}", path.display(), action);
        self.entries.push((path, action));
    }

    /// Files with the given action
    pub fn with_action(&self, action: InstallAction) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(move |(_, a)| *a == action)
            .map(|(p, _)| p.as_path())
    }
}

pub struct Installer {
    config: InstallConfig,
    source_dir: PathBuf,
    dry_run: bool,
    allow_non_root: bool,
}

impl Installer {
    pub fn new(config: InstallConfig, source_dir: PathBuf) -> Self {
        Self {
            config,
            source_dir,
            dry_run: false,
            allow_non_root: false,
        }
    }

    /// Installer copying from the directory of the running executable
    pub fn from_current_exe(config: InstallConfig) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| Error::NotFound(format!("directory of {}", exe.display())))?;
        Ok(Self::new(config, dir.to_path_buf()))
    }

    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub const fn allow_non_root(mut self, allow: bool) -> Self {
        self.allow_non_root = allow;
        self
    }

    fn target(&self, binary: &str) -> PathBuf {
        self.config.install_dir.join(binary)
    }

    /// Source and target of every binary. Fails before anything is copied
    /// if a source is missing.
    fn binaries(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        self.config
            .binaries
            .iter()
            .map(|binary| {
                let source = self.source_dir.join(binary);
                if source.is_file() {
                    Ok((source, self.target(binary)))
                } else {
                    Err(Error::NotFound(source.display().to_string()))
                }
            })
            .collect()
    }

    /// Copy every binary and write a default config file if none exists
    pub fn install(&self) -> Result<InstallReport> {
        self.require_root()?;
        let binaries = self.binaries()?;
        let mut report = InstallReport::default();
        for (source, target) in binaries {
            let action = if target.exists() {
                InstallAction::Updated
            } else {
                InstallAction::Installed
            };
            self.copy_binary(&source, &target)?;
            report.push(target, action);
        }
        self.write_default_config(&mut report)?;
        Ok(report)
    }

    /// Replace only binaries whose contents changed
    pub fn update(&self) -> Result<InstallReport> {
        self.require_root()?;
        let binaries = self.binaries()?;
        let mut report = InstallReport::default();
        for (source, target) in binaries {
            let action = if !target.exists() {
                InstallAction::Installed
            } else if std::fs::read(&source)? == std::fs::read(&target)? {
                InstallAction::Unchanged
            } else {
                InstallAction::Updated
            };
            if action != InstallAction::Unchanged {
                self.copy_binary(&source, &target)?;
            }
            report.push(target, action);
        }
        Ok(report)
    }

    /// Remove the installed binaries; the config file only with `purge`
    pub fn uninstall(&self, purge: bool) -> Result<InstallReport> {
        self.require_root()?;
        let mut report = InstallReport::default();
        for binary in &self.config.binaries {
            let target = self.target(binary);
            let action = self.remove(&target)?;
            report.push(target, action);
        }

        let config_path = self.config.config_path.clone();
        let action = if purge {
            self.remove(&config_path)?
        } else if config_path.exists() {
            InstallAction::Kept
        } else {
            InstallAction::Missing
        };
        report.push(config_path, action);
        Ok(report)
    }

    /// Installed state of every binary and the config file
    pub fn status(&self) -> InstallReport {
        let mut entries: Vec<PathBuf> = self
            .config
            .binaries
            .iter()
            .map(|b| self.target(b))
            .collect();
        entries.push(self.config.config_path.clone());

        InstallReport {
            entries: entries
                .into_iter()
                .map(|path| {
                    let action = if path.exists() {
                        InstallAction::Present
                    } else {
                        InstallAction::Missing
                    };
                    (path, action)
                })
                .collect(),
        }
    }

    fn copy_binary(&self, source: &Path, target: &Path) -> Result<()> {
        if self.dry_run {
            info!("would copy {} to {}", source.display(), target.display());
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.install_dir)?;

        // Copy beside the target and rename over it, so a running binary
        // can be replaced.
        let staging = target.with_extension("new");
        std::fs::copy(source, &staging)?;
        set_executable(&staging)?;
        std::fs::rename(&staging, target)?;
        debug!("Copied {} to {}", source.display(), target.display());
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<InstallAction> {
        if !path.exists() {
            return Ok(InstallAction::Missing);
        }
        if self.dry_run {
            info!("would remove {}", path.display());
        } else {
            std::fs::remove_file(path)?;
        }
        Ok(InstallAction::Removed)
    }

    fn write_default_config(&self, report: &mut InstallReport) -> Result<()> {
        let path = &self.config.config_path;
        if path.exists() {
            report.push(path.clone(), InstallAction::Kept);
            return Ok(());
        }
        let config = Config {
            install: self.config.clone(),
            ..Default::default()
        };
        let content = config.to_toml()?;
        if self.dry_run {
            info!("would write default config to {}", path.display());
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        report.push(path.clone(), InstallAction::Installed);
        Ok(())
    }

    fn require_root(&self) -> Result<()> {
        if self.allow_non_root || self.dry_run || is_root() {
            Ok(())
        } else {
            Err(Error::PermissionDenied(
                "installing requires root (use --allow-non-root to install elsewhere)".into(),
            ))
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    true
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
