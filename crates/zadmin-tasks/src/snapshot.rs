//! Snapshot manager: list, create, send, delete, dump, diff and history

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zadmin_common::config::SnapshotConfig;
use zadmin_common::{Compression, DatasetName, Error, Result, SnapshotName};
use zadmin_zfs::{DiffEntry, SendRequest, SnapshotInfo, Toolbox};

/// Options for [`SnapshotManager::send`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Base snapshot, either `name` or `dataset@name`
    pub from: Option<String>,
    /// Include intermediate snapshots of an incremental stream
    pub intermediates: bool,
    pub replicate: bool,
    /// Output file; generated under the configured send directory if unset
    pub output: Option<PathBuf>,
    /// Overrides the configured compression
    pub compression: Option<Compression>,
    /// Overwrite an existing output file
    pub force: bool,
}

pub struct SnapshotManager<'a> {
    tools: &'a Toolbox,
    config: &'a SnapshotConfig,
}

impl<'a> SnapshotManager<'a> {
    pub const fn new(tools: &'a Toolbox, config: &'a SnapshotConfig) -> Self {
        Self { tools, config }
    }

    /// Snapshots of `dataset` (or every snapshot), oldest first
    pub async fn list(
        &self,
        dataset: Option<&DatasetName>,
        recursive: bool,
    ) -> Result<Vec<SnapshotInfo>> {
        self.tools.zfs().list_snapshots(dataset, recursive).await
    }

    /// Create a snapshot. Without a name one is generated from the
    /// configured prefix and the current UTC time.
    pub async fn create(
        &self,
        dataset: &DatasetName,
        name: Option<&str>,
        recursive: bool,
    ) -> Result<SnapshotName> {
        let snapshot = match name {
            Some(name) => resolve(dataset, name)?,
            None => generate_name(dataset, &self.config.prefix, Utc::now())?,
        };
        if self.tools.zfs().snapshot_exists(&snapshot).await? {
            return Err(Error::SnapshotExists(snapshot.to_string()));
        }
        self.tools.zfs().snapshot(&snapshot, recursive).await?;
        info!("Created snapshot {}", snapshot);
        Ok(snapshot)
    }

    /// Write a full or incremental send stream to a file and return its path
    pub async fn send(&self, snapshot: &SnapshotName, options: &SendOptions) -> Result<PathBuf> {
        let from = options
            .from
            .as_deref()
            .map(|from| resolve(snapshot.dataset(), from))
            .transpose()?;
        if let Some(from) = &from {
            if from == snapshot {
                return Err(Error::invalid_argument(
                    "incremental base and target are the same snapshot",
                ));
            }
            self.require_exists(from).await?;
        }
        self.require_exists(snapshot).await?;

        let compression = options.compression.unwrap_or(self.config.compression);
        let output = match &options.output {
            Some(path) => path.clone(),
            None => default_output_path(&self.config.send_dir, snapshot, from.as_ref(), compression),
        };
        if output.exists() && !options.force {
            return Err(Error::OutputExists(output));
        }
        if !self.tools.is_dry_run() {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let request = SendRequest {
            snapshot: snapshot.clone(),
            from,
            intermediates: options.intermediates,
            replicate: options.replicate,
            output: output.clone(),
            compression,
        };
        self.tools.zfs().send(&request).await?;
        info!("Wrote send stream {}", output.display());
        Ok(output)
    }

    /// Destroy a snapshot. Plain dataset names are refused.
    pub async fn delete(&self, name: &str, recursive: bool) -> Result<SnapshotName> {
        if !name.contains('@') {
            return Err(Error::invalid_argument(format!(
                "refusing to destroy '{name}': not a snapshot name (dataset@snapshot)"
            )));
        }
        let snapshot = SnapshotName::new(name)?;
        self.require_exists(&snapshot).await?;
        self.tools.zfs().destroy_snapshot(&snapshot, recursive).await?;
        info!("Deleted snapshot {}", snapshot);
        Ok(snapshot)
    }

    /// Decode a stream file with `zstream dump`. The compression is
    /// guessed from the file extension unless given.
    pub async fn dump(
        &self,
        file: &Path,
        compression: Option<Compression>,
        verbose: bool,
    ) -> Result<String> {
        let compression = compression.unwrap_or_else(|| Compression::from_path(file));
        debug!("Dumping {} ({})", file.display(), compression);
        self.tools.zstream().dump(file, compression, verbose).await
    }

    /// Changes between `from` and `to`, or between `from` and the live
    /// dataset. `to` may be a short snapshot name of the same dataset.
    pub async fn diff(&self, from: &SnapshotName, to: Option<&str>) -> Result<Vec<DiffEntry>> {
        let to = match to {
            Some(to) => Some(resolve(from.dataset(), to)?.to_string()),
            None => None,
        };
        self.tools.zfs().diff(from, to.as_deref()).await
    }

    /// Snapshot-related entries of the pool history for `dataset`
    pub async fn history(&self, dataset: &DatasetName) -> Result<Vec<String>> {
        let history = self.tools.zpool().history(&dataset.pool(), false).await?;
        Ok(snapshot_history(&history, dataset))
    }

    async fn require_exists(&self, snapshot: &SnapshotName) -> Result<()> {
        if self.tools.zfs().snapshot_exists(snapshot).await? {
            Ok(())
        } else {
            Err(Error::SnapshotNotFound(snapshot.to_string()))
        }
    }
}

/// Accept either a full `dataset@snap` name, which must belong to
/// `dataset`, or a bare snapshot name.
fn resolve(dataset: &DatasetName, name: &str) -> Result<SnapshotName> {
    if name.contains('@') {
        let snapshot = SnapshotName::new(name)?;
        if snapshot.dataset() != dataset {
            return Err(Error::invalid_argument(format!(
                "snapshot {snapshot} does not belong to {dataset}"
            )));
        }
        Ok(snapshot)
    } else {
        SnapshotName::from_parts(dataset.clone(), name)
    }
}

/// `<dataset>@<prefix>-YYYY-MM-DD_HH-MM-SS`
pub fn generate_name(
    dataset: &DatasetName,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<SnapshotName> {
    let stamp = now.format("%Y-%m-%d_%H-%M-%S");
    let name = if prefix.is_empty() {
        stamp.to_string()
    } else {
        format!("{prefix}-{stamp}")
    };
    SnapshotName::from_parts(dataset.clone(), &name)
}

/// `<dir>/<dataset_stem>@<snap>[_from_<base>].zfs[.ext]`
pub fn default_output_path(
    dir: &Path,
    snapshot: &SnapshotName,
    from: Option<&SnapshotName>,
    compression: Compression,
) -> PathBuf {
    let mut file = format!("{}@{}", snapshot.dataset().to_file_stem(), snapshot.snapshot());
    if let Some(from) = from {
        file.push_str("_from_");
        file.push_str(from.snapshot());
    }
    file.push_str(".zfs");
    if let Some(ext) = compression.extension() {
        file.push('.');
        file.push_str(ext);
    }
    dir.join(file)
}

/// Keep `zfs snapshot`/`zfs destroy` history lines that name `dataset`
pub fn snapshot_history(history: &str, dataset: &DatasetName) -> Vec<String> {
    let needle = format!("{dataset}@");
    history
        .lines()
        .filter(|line| line.contains("zfs snapshot") || line.contains("zfs destroy"))
        .filter(|line| line.contains(&needle))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::tempdir;
    use zadmin_common::config::ToolsConfig;
    use zadmin_zfs::{CommandOutput, ScriptedRunner};

    fn toolbox(runner: &Arc<ScriptedRunner>) -> Toolbox {
        Toolbox::new(runner.clone(), &ToolsConfig::default())
    }

    fn home() -> DatasetName {
        DatasetName::new("zroot/home").unwrap()
    }

    #[test]
    fn test_generate_name() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 4, 5, 6).unwrap();
        let name = generate_name(&home(), "daily", now).unwrap();
        assert_eq!(name.to_string(), "zroot/home@daily-2026-03-01_04-05-06");
        let bare = generate_name(&home(), "", now).unwrap();
        assert_eq!(bare.snapshot(), "2026-03-01_04-05-06");
    }

    #[test]
    fn test_default_output_path() {
        let snap = SnapshotName::new("zroot/home@b").unwrap();
        let from = SnapshotName::new("zroot/home@a").unwrap();
        assert_eq!(
            default_output_path(Path::new("/backup"), &snap, None, Compression::None),
            PathBuf::from("/backup/zroot_home@b.zfs")
        );
        assert_eq!(
            default_output_path(Path::new("/backup"), &snap, Some(&from), Compression::Zstd),
            PathBuf::from("/backup/zroot_home@b_from_a.zfs.zst")
        );
    }

    #[test]
    fn test_snapshot_history_filter() {
        let history = "History for 'zroot':
2026-01-01.10:00:00 zpool create zroot /dev/sda2
2026-01-02.10:00:00 zfs snapshot zroot/home@a
2026-01-02.10:00:01 zfs snapshot zroot/var@a
2026-01-03.10:00:00 zfs destroy zroot/home@a
2026-01-03.10:00:00 zfs set compression=zstd zroot/home
";
        let lines = snapshot_history(history, &home());
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("zfs destroy zroot/home@a"));
    }

    #[tokio::test]
    async fn test_create_refuses_existing() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let err = SnapshotManager::new(&tools, &config)
            .create(&home(), Some("a"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotExists(_)));
    }

    #[tokio::test]
    async fn test_create_recursive() {
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs list -H -t snapshot", CommandOutput::failed(1, "")),
        );
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let snap = SnapshotManager::new(&tools, &config)
            .create(&home(), Some("zroot/home@weekly"), true)
            .await
            .unwrap();
        assert_eq!(snap.snapshot(), "weekly");
        assert_eq!(runner.calls()[1], "zfs snapshot -r zroot/home@weekly");
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_snapshot() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let err = SnapshotManager::new(&tools, &config)
            .create(&home(), Some("zroot/var@weekly"), false)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_send_incremental_default_path() {
        let dir = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig {
            send_dir: dir.path().join("streams"),
            compression: Compression::Gzip,
            ..Default::default()
        };
        let snap = SnapshotName::new("zroot/home@b").unwrap();
        let options = SendOptions {
            from: Some("a".into()),
            ..Default::default()
        };

        let out = SnapshotManager::new(&tools, &config)
            .send(&snap, &options)
            .await
            .unwrap();

        assert_eq!(out, dir.path().join("streams/zroot_home@b_from_a.zfs.gz"));
        assert!(dir.path().join("streams").is_dir());
        assert_eq!(
            runner.calls().last().unwrap(),
            &format!(
                "zfs send -i zroot/home@a zroot/home@b | gzip -c > {}.partial",
                out.display()
            )
        );
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_send_refuses_existing_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("home.zfs");
        std::fs::write(&output, b"old").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let manager = SnapshotManager::new(&tools, &config);
        let snap = SnapshotName::new("zroot/home@b").unwrap();
        let mut options = SendOptions {
            output: Some(output.clone()),
            ..Default::default()
        };

        let err = manager.send(&snap, &options).await.unwrap_err();
        assert!(matches!(err, Error::OutputExists(_)));

        options.force = true;
        assert_eq!(manager.send(&snap, &options).await.unwrap(), output);
    }

    #[tokio::test]
    async fn test_failed_send_can_be_retried() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("home.zfs");
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs send", CommandOutput::failed(1, "dataset is busy")),
        );
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let manager = SnapshotManager::new(&tools, &config);
        let snap = SnapshotName::new("zroot/home@b").unwrap();
        let options = SendOptions {
            output: Some(output.clone()),
            ..Default::default()
        };

        assert!(manager.send(&snap, &options).await.is_err());
        assert!(!output.exists());

        assert_eq!(manager.send(&snap, &options).await.unwrap(), output);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_send_missing_snapshot() {
        let runner = Arc::new(
            ScriptedRunner::new().on("zfs list -H -t snapshot", CommandOutput::failed(1, "")),
        );
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let err = SnapshotManager::new(&tools, &config)
            .send(&SnapshotName::new("zroot/home@b").unwrap(), &SendOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_refuses_dataset() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let manager = SnapshotManager::new(&tools, &config);

        let err = manager.delete("zroot/home", true).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(runner.calls().is_empty());

        manager.delete("zroot/home@a", true).await.unwrap();
        assert_eq!(runner.calls().last().unwrap(), "zfs destroy -r zroot/home@a");
    }

    #[tokio::test]
    async fn test_diff_expands_short_target() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = toolbox(&runner);
        let config = SnapshotConfig::default();
        let from = SnapshotName::new("zroot/home@a").unwrap();
        SnapshotManager::new(&tools, &config)
            .diff(&from, Some("b"))
            .await
            .unwrap();
        assert_eq!(runner.calls(), vec!["zfs diff -H zroot/home@a zroot/home@b"]);
    }
}
