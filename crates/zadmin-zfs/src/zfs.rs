//! `zfs` wrapper

use crate::model::{DiffEntry, SnapshotInfo};
use crate::parse;
use crate::runner::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use zadmin_common::{Compression, DatasetName, Error, Result, SnapshotName};

/// Parameters of `zfs send` into a file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub snapshot: SnapshotName,
    /// Base snapshot for an incremental stream
    pub from: Option<SnapshotName>,
    /// Use `-I` (include intermediate snapshots) instead of `-i`
    pub intermediates: bool,
    /// `-R`: replication stream of the dataset and its descendants
    pub replicate: bool,
    pub output: PathBuf,
    pub compression: Compression,
}

#[derive(Clone)]
pub struct Zfs {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
}

impl Zfs {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: &Path) -> Self {
        Self {
            runner,
            binary: binary.to_path_buf(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(&self.binary)
    }

    pub async fn mount(&self, dataset: &DatasetName) -> Result<()> {
        let inv = self.command().args(["mount", dataset.as_str()]);
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::MountFailed {
                target: dataset.to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    pub async fn mount_all(&self) -> Result<()> {
        let inv = self.command().args(["mount", "-a"]);
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::MountFailed {
                target: "all datasets".to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    pub async fn unmount(&self, dataset: &DatasetName, force: bool) -> Result<()> {
        let inv = self
            .command()
            .arg("unmount")
            .flag_if(force, "-f")
            .arg(dataset.as_str());
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::UnmountFailed {
                target: dataset.to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    pub async fn unmount_all(&self, force: bool) -> Result<()> {
        let inv = self.command().arg("unmount").flag_if(force, "-f").arg("-a");
        self.runner
            .run_checked(&inv)
            .await
            .map_err(|e| Error::UnmountFailed {
                target: "all datasets".to_string(),
                reason: e.reason(),
            })?;
        Ok(())
    }

    /// Value of the `mounted` property
    pub async fn is_mounted(&self, dataset: &DatasetName) -> Result<bool> {
        let inv = self
            .command()
            .args(["get", "-H", "-o", "value", "mounted", dataset.as_str()])
            .query();
        let output = self.runner.run_checked(&inv).await?;
        Ok(parse::parse_yes_no(&output.stdout))
    }

    /// `zfs snapshot [-r] dataset@name`
    pub async fn snapshot(&self, name: &SnapshotName, recursive: bool) -> Result<()> {
        let inv = self
            .command()
            .arg("snapshot")
            .flag_if(recursive, "-r")
            .arg(name.to_string());
        info!("Creating snapshot {}", name);
        self.runner.run_checked(&inv).await?;
        Ok(())
    }

    /// `zfs destroy [-r] dataset@name`
    pub async fn destroy_snapshot(&self, name: &SnapshotName, recursive: bool) -> Result<()> {
        let inv = self
            .command()
            .arg("destroy")
            .flag_if(recursive, "-r")
            .arg(name.to_string());
        info!("Destroying snapshot {}", name);
        self.runner.run_checked(&inv).await?;
        Ok(())
    }

    /// Snapshots sorted by creation time.
    ///
    /// With a dataset and `recursive` unset only the dataset's own
    /// snapshots are listed.
    pub async fn list_snapshots(
        &self,
        dataset: Option<&DatasetName>,
        recursive: bool,
    ) -> Result<Vec<SnapshotInfo>> {
        let mut inv = self.command().args([
            "list",
            "-Hp",
            "-t",
            "snapshot",
            "-o",
            "name,used,refer,creation",
            "-s",
            "creation",
        ]);
        if let Some(dataset) = dataset {
            inv = if recursive {
                inv.arg("-r")
            } else {
                inv.args(["-d", "1"])
            };
            inv = inv.arg(dataset.as_str());
        }
        let output = self.runner.run_checked(&inv.query()).await?;
        parse::parse_snapshot_list(&output.stdout)
    }

    pub async fn snapshot_exists(&self, name: &SnapshotName) -> Result<bool> {
        let inv = self
            .command()
            .args(["list", "-H", "-t", "snapshot", "-o", "name"])
            .arg(name.to_string())
            .query();
        Ok(self.runner.run(&inv).await?.success())
    }

    /// Write a send stream to `request.output`, through a compressor when
    /// one is requested.
    ///
    /// The stream goes to `<output>.partial` first and is renamed over the
    /// output only once every stage succeeded, so a failed send leaves an
    /// existing file untouched.
    pub async fn send(&self, request: &SendRequest) -> Result<()> {
        let mut send = self
            .command()
            .arg("send")
            .flag_if(request.replicate, "-R");
        if let Some(from) = &request.from {
            let flag = if request.intermediates { "-I" } else { "-i" };
            send = send.arg(flag).arg(from.to_string());
        }
        let send = send.arg(request.snapshot.to_string());

        info!(
            "Sending {} to {} (compression: {})",
            request.snapshot,
            request.output.display(),
            request.compression
        );
        if self.runner.is_dry_run() {
            return self.write_stream(send, request, &request.output).await;
        }

        let staging = partial_path(&request.output);
        if let Err(e) = self.write_stream(send, request, &staging).await {
            if let Err(rm) = std::fs::remove_file(&staging) {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", staging.display(), rm);
                }
            }
            return Err(e);
        }
        std::fs::rename(&staging, &request.output)?;
        Ok(())
    }

    async fn write_stream(
        &self,
        send: Invocation,
        request: &SendRequest,
        target: &Path,
    ) -> Result<()> {
        match request.compression.program() {
            None => {
                self.runner.run_checked(&send.stdout_file(target)).await?;
            }
            Some(program) => {
                let compress = Invocation::new(program)
                    .args(request.compression.compress_args().iter().copied())
                    .stdout_file(target);
                self.runner.pipeline_checked(&[send, compress]).await?;
            }
        }
        Ok(())
    }

    /// `zfs diff -H from [to]`; without `to` the live dataset is compared
    pub async fn diff(&self, from: &SnapshotName, to: Option<&str>) -> Result<Vec<DiffEntry>> {
        let mut inv = self.command().args(["diff", "-H"]).arg(from.to_string());
        if let Some(to) = to {
            inv = inv.arg(to);
        }
        let output = self.runner.run_checked(&inv.query()).await?;
        parse::parse_diff(&output.stdout)
    }
}

/// Staging file a send stream is written to before it is complete
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use tempfile::tempdir;

    fn zfs(runner: &Arc<ScriptedRunner>) -> Zfs {
        Zfs::new(runner.clone(), Path::new("zfs"))
    }

    fn snap(name: &str) -> SnapshotName {
        SnapshotName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_mount_commands() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "zfs get -H -o value mounted zroot/home",
            CommandOutput::ok("yes\n"),
        ));
        let zfs = zfs(&runner);
        let home = DatasetName::new("zroot/home").unwrap();

        zfs.mount(&home).await.unwrap();
        zfs.mount_all().await.unwrap();
        assert!(zfs.is_mounted(&home).await.unwrap());
        zfs.unmount(&home, true).await.unwrap();
        zfs.unmount_all(false).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "zfs mount zroot/home",
                "zfs mount -a",
                "zfs get -H -o value mounted zroot/home",
                "zfs unmount -f zroot/home",
                "zfs unmount -a",
            ]
        );
    }

    #[tokio::test]
    async fn test_mount_failure_exit_code() {
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs mount", CommandOutput::failed(1, "filesystem busy")),
        );
        let err = zfs(&runner)
            .mount(&DatasetName::new("zroot/home").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("filesystem busy"));
    }

    #[tokio::test]
    async fn test_list_snapshots_depth() {
        let runner = Arc::new(ScriptedRunner::new());
        let zfs = zfs(&runner);
        let ds = DatasetName::new("zroot/home").unwrap();
        zfs.list_snapshots(Some(&ds), false).await.unwrap();
        zfs.list_snapshots(Some(&ds), true).await.unwrap();
        zfs.list_snapshots(None, false).await.unwrap();

        let calls = runner.calls();
        let base = "zfs list -Hp -t snapshot -o name,used,refer,creation -s creation";
        assert_eq!(calls[0], format!("{base} -d 1 zroot/home"));
        assert_eq!(calls[1], format!("{base} -r zroot/home"));
        assert_eq!(calls[2], base);
    }

    #[tokio::test]
    async fn test_send_plain_and_compressed() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("home.zfs");
        let packed = dir.path().join("root.zfs.zst");
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs send -i", CommandOutput::ok("stream\n")),
        );
        let zfs = zfs(&runner);

        zfs.send(&SendRequest {
            snapshot: snap("zroot/home@b"),
            from: Some(snap("zroot/home@a")),
            intermediates: false,
            replicate: false,
            output: plain.clone(),
            compression: Compression::None,
        })
        .await
        .unwrap();

        zfs.send(&SendRequest {
            snapshot: snap("zroot@full"),
            from: None,
            intermediates: false,
            replicate: true,
            output: packed.clone(),
            compression: Compression::Zstd,
        })
        .await
        .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                format!(
                    "zfs send -i zroot/home@a zroot/home@b > {}",
                    partial_path(&plain).display()
                ),
                format!(
                    "zfs send -R zroot@full | zstd -q -c > {}",
                    partial_path(&packed).display()
                ),
            ]
        );
        assert_eq!(std::fs::read_to_string(&plain).unwrap(), "stream\n");
        assert!(packed.exists());
        assert!(!partial_path(&plain).exists());
    }

    #[tokio::test]
    async fn test_send_failure_keeps_existing_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("a.zfs.gz");
        std::fs::write(&output, b"previous backup").unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs send", CommandOutput::failed(1, "dataset is busy")),
        );
        let err = zfs(&runner)
            .send(&SendRequest {
                snapshot: snap("zroot@a"),
                from: None,
                intermediates: true,
                replicate: false,
                output: output.clone(),
                compression: Compression::Gzip,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous backup");
        assert!(!partial_path(&output).exists());
    }

    #[cfg(unix)]
    fn fake_zfs(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("zfs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_send_with_real_process() {
        use crate::runner::SystemRunner;
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let failing = fake_zfs(dir.path(), "echo 'cannot send: dataset is busy' >&2\nexit 1");
        let runner = Arc::new(SystemRunner::new(Some(Duration::from_secs(10))));
        let zfs = Zfs::new(runner, &failing);

        let existing = dir.path().join("kept.zfs");
        std::fs::write(&existing, b"PREVIOUS GOOD BACKUP").unwrap();
        let fresh = dir.path().join("fresh.zfs");

        for output in [&existing, &fresh] {
            let err = zfs
                .send(&SendRequest {
                    snapshot: snap("zroot/home@b"),
                    from: None,
                    intermediates: false,
                    replicate: false,
                    output: output.clone(),
                    compression: Compression::None,
                })
                .await
                .unwrap_err();
            assert!(err.to_string().contains("dataset is busy"));
            assert!(!partial_path(output).exists());
        }
        assert_eq!(std::fs::read(&existing).unwrap(), b"PREVIOUS GOOD BACKUP");
        assert!(!fresh.exists());
    }

    #[tokio::test]
    async fn test_diff_parses_entries() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "zfs diff -H zroot/home@a zroot/home@b",
            CommandOutput::ok("+\t/home/new\n"),
        ));
        let entries = zfs(&runner)
            .diff(&snap("zroot/home@a"), Some("zroot/home@b"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, PathBuf::from("/home/new"));
    }
}
