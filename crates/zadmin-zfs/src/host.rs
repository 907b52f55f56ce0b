//! Non-ZFS system tools used by the recovery workflow: `mkdir`, `mount`,
//! `umount` and `arch-chroot`.

use crate::runner::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use zadmin_common::config::ToolsConfig;
use zadmin_common::{Error, Result};

#[derive(Clone)]
pub struct Host {
    runner: Arc<dyn CommandRunner>,
    mkdir: PathBuf,
    mount: PathBuf,
    umount: PathBuf,
    arch_chroot: PathBuf,
}

impl Host {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: &ToolsConfig) -> Self {
        Self {
            runner,
            mkdir: tools.mkdir.clone(),
            mount: tools.mount.clone(),
            umount: tools.umount.clone(),
            arch_chroot: tools.arch_chroot.clone(),
        }
    }

    /// `mkdir -p path`
    pub async fn mkdir_p(&self, path: &Path) -> Result<()> {
        let inv = Invocation::new(&self.mkdir)
            .arg("-p")
            .arg(path.display().to_string());
        self.runner.run_checked(&inv).await?;
        Ok(())
    }

    /// Mount a block device on `target`
    pub async fn mount(&self, device: &str, target: &Path) -> Result<()> {
        let inv = Invocation::new(&self.mount)
            .arg(device)
            .arg(target.display().to_string());
        info!("Mounting {} on {}", device, target.display());
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::MountFailed {
                target: target.display().to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    pub async fn umount(&self, target: &Path) -> Result<()> {
        let inv = Invocation::new(&self.umount).arg(target.display().to_string());
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::UnmountFailed {
                target: target.display().to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    /// Run `command` inside `root` with `arch-chroot`
    pub async fn chroot(&self, root: &Path, command: &[&str]) -> Result<String> {
        let inv = Invocation::new(&self.arch_chroot)
            .arg(root.display().to_string())
            .args(command.iter().copied());
        info!("Running in chroot {}: {}", root.display(), command.join(" "));
        let output = self
            .runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::ChrootFailed {
                root: root.display().to_string(),
                reason: e.reason(),
            })?;
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};

    #[tokio::test]
    async fn test_host_commands() {
        let runner = Arc::new(ScriptedRunner::new());
        let host = Host::new(runner.clone(), &ToolsConfig::default());
        let boot = Path::new("/mnt/boot");

        host.mkdir_p(boot).await.unwrap();
        host.mount("/dev/sda1", boot).await.unwrap();
        host.chroot(Path::new("/mnt"), &["pacman", "-S", "--noconfirm", "grub"])
            .await
            .unwrap();
        host.umount(boot).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "mkdir -p /mnt/boot",
                "mount /dev/sda1 /mnt/boot",
                "arch-chroot /mnt pacman -S --noconfirm grub",
                "umount /mnt/boot",
            ]
        );
    }

    #[tokio::test]
    async fn test_chroot_failure_exit_code() {
        let runner = Arc::new(
            ScriptedRunner::new().on("arch-chroot", CommandOutput::failed(1, "target not found")),
        );
        let host = Host::new(runner, &ToolsConfig::default());
        let err = host
            .chroot(Path::new("/mnt"), &["pacman", "-S", "grub"])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
