//! Configuration file model for zadmin
//!
//! The file is TOML. Every field has a default, so a missing file or a
//! partial file is valid. Command-line flags take precedence over values
//! loaded here.

use crate::error::{Error, Result};
use crate::types::{Ashift, Compression, DatasetName, PoolName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zadmin/config.toml";

/// Root configuration for zadmin
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub ssd: SsdConfig,
    #[serde(default)]
    pub install: InstallConfig,
}

impl Config {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Render as TOML (used when installing a default config file)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::configuration(e.to_string()))
    }
}

/// Paths of the external programs zadmin drives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_zpool")]
    pub zpool: PathBuf,
    #[serde(default = "default_zfs")]
    pub zfs: PathBuf,
    #[serde(default = "default_zstream")]
    pub zstream: PathBuf,
    #[serde(default = "default_mount")]
    pub mount: PathBuf,
    #[serde(default = "default_umount")]
    pub umount: PathBuf,
    #[serde(default = "default_mkdir")]
    pub mkdir: PathBuf,
    #[serde(default = "default_arch_chroot")]
    pub arch_chroot: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            zpool: default_zpool(),
            zfs: default_zfs(),
            zstream: default_zstream(),
            mount: default_mount(),
            umount: default_umount(),
            mkdir: default_mkdir(),
            arch_chroot: default_arch_chroot(),
        }
    }
}

fn default_zpool() -> PathBuf {
    PathBuf::from("zpool")
}

fn default_zfs() -> PathBuf {
    PathBuf::from("zfs")
}

fn default_zstream() -> PathBuf {
    PathBuf::from("zstream")
}

fn default_mount() -> PathBuf {
    PathBuf::from("mount")
}

fn default_umount() -> PathBuf {
    PathBuf::from("umount")
}

fn default_mkdir() -> PathBuf {
    PathBuf::from("mkdir")
}

fn default_arch_chroot() -> PathBuf {
    PathBuf::from("arch-chroot")
}

/// External command execution settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Seconds before a command is killed (0 = no limit)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    600
}

/// Defaults for the degraded-pool recovery workflow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_pool")]
    pub pool: PoolName,
    /// Alternate root the pool is imported under
    #[serde(default = "default_altroot")]
    pub altroot: PathBuf,
    /// Datasets that must be mounted before chrooting
    #[serde(default = "default_recovery_datasets")]
    pub datasets: Vec<DatasetName>,
    /// Boot partition mounted at `<altroot>/boot`
    #[serde(default)]
    pub boot_device: Option<String>,
    /// Package reinstalled inside the chroot
    #[serde(default = "default_package")]
    pub package: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pool: default_pool(),
            altroot: default_altroot(),
            datasets: default_recovery_datasets(),
            boot_device: None,
            package: default_package(),
        }
    }
}

fn default_pool() -> PoolName {
    PoolName::new("zroot").expect("static pool name is valid")
}

fn default_altroot() -> PathBuf {
    PathBuf::from("/mnt")
}

fn default_recovery_datasets() -> Vec<DatasetName> {
    vec![DatasetName::new("zroot/ROOT/default").expect("static dataset name is valid")]
}

fn default_package() -> String {
    "grub".to_string()
}

/// Snapshot manager defaults
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Prefix of generated snapshot names
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Directory send streams are written to when no output file is given
    #[serde(default = "default_send_dir")]
    pub send_dir: PathBuf,
    #[serde(default)]
    pub compression: Compression,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            send_dir: default_send_dir(),
            compression: Compression::None,
        }
    }
}

fn default_prefix() -> String {
    "zadmin".to_string()
}

fn default_send_dir() -> PathBuf {
    PathBuf::from("/var/backups/zfs")
}

/// SSD `ashift` tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsdConfig {
    #[serde(default = "default_pool")]
    pub pool: PoolName,
    #[serde(default)]
    pub target_ashift: Ashift,
    /// File holding the ashift value that `patch` replaced
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            pool: default_pool(),
            target_ashift: Ashift::SSD,
            state_file: default_state_file(),
        }
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/root/.old_ashift_value")
}

/// Installer settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,
    /// Binaries copied by `install`
    #[serde(default = "default_binaries")]
    pub binaries: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            config_path: default_config_path(),
            binaries: default_binaries(),
        }
    }
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/usr/local/sbin")
}

fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn default_binaries() -> Vec<String> {
    vec!["zadmin".to_string(), "zadmin-install".to_string()]
}
