//! SSD `ashift` tuning with a restorable state file

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zadmin_common::config::SsdConfig;
use zadmin_common::{Ashift, Error, PoolName, Result};
use zadmin_zfs::Toolbox;

/// Result of [`AshiftTuner::check`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AshiftStatus {
    pub pool: PoolName,
    pub current: Ashift,
    pub target: Ashift,
    /// `current == target`
    pub tuned: bool,
    /// Value recorded by a previous patch, if any
    pub saved: Option<Ashift>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum TuneOutcome {
    Changed { from: Ashift, to: Ashift },
    Unchanged { value: Ashift },
}

pub struct AshiftTuner<'a> {
    tools: &'a Toolbox,
    pool: PoolName,
    target: Ashift,
    state_file: PathBuf,
}

impl<'a> AshiftTuner<'a> {
    pub fn new(tools: &'a Toolbox, pool: PoolName, target: Ashift, state_file: PathBuf) -> Self {
        Self {
            tools,
            pool,
            target,
            state_file,
        }
    }

    pub fn from_config(tools: &'a Toolbox, config: &SsdConfig) -> Self {
        Self::new(
            tools,
            config.pool.clone(),
            config.target_ashift,
            config.state_file.clone(),
        )
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub async fn check(&self) -> Result<AshiftStatus> {
        let current = self.tools.zpool().ashift(&self.pool).await?;
        let saved = if self.state_file.exists() {
            Some(read_state(&self.state_file)?)
        } else {
            None
        };
        Ok(AshiftStatus {
            pool: self.pool.clone(),
            current,
            target: self.target,
            tuned: current == self.target,
            saved,
        })
    }

    /// Record the current value and switch to the target.
    ///
    /// An existing state file belongs to an earlier patch that was never
    /// restored; it is only replaced with `force`.
    pub async fn patch(&self, force: bool) -> Result<TuneOutcome> {
        if self.state_file.exists() && !force {
            return Err(Error::StateExists(self.state_file.clone()));
        }
        let current = self.tools.zpool().ashift(&self.pool).await?;
        if current == self.target {
            info!("Pool {} already uses ashift={}", self.pool, current);
            return Ok(TuneOutcome::Unchanged { value: current });
        }

        let dry_run = self.tools.is_dry_run();
        if dry_run {
            info!(
                "would write {} to {}",
                current,
                self.state_file.display()
            );
        } else {
            write_state(&self.state_file, current)?;
        }

        if let Err(e) = self.tools.zpool().set_ashift(&self.pool, self.target).await {
            if !dry_run {
                if let Err(rm) = std::fs::remove_file(&self.state_file) {
                    warn!("Failed to remove {}: {}", self.state_file.display(), rm);
                }
            }
            return Err(e);
        }
        info!(
            "Changed ashift of {} from {} to {}",
            self.pool, current, self.target
        );
        Ok(TuneOutcome::Changed {
            from: current,
            to: self.target,
        })
    }

    /// Put back the value recorded by [`patch`](Self::patch)
    pub async fn restore(&self) -> Result<TuneOutcome> {
        if !self.state_file.exists() {
            return Err(Error::StateMissing(self.state_file.clone()));
        }
        let saved = read_state(&self.state_file)?;
        let current = self.tools.zpool().ashift(&self.pool).await?;
        if current != saved {
            self.tools.zpool().set_ashift(&self.pool, saved).await?;
        }

        if self.tools.is_dry_run() {
            info!("would remove {}", self.state_file.display());
        } else {
            std::fs::remove_file(&self.state_file)?;
        }

        if current == saved {
            info!("Pool {} already uses ashift={}", self.pool, saved);
            Ok(TuneOutcome::Unchanged { value: saved })
        } else {
            info!("Restored ashift of {} to {}", self.pool, saved);
            Ok(TuneOutcome::Changed {
                from: current,
                to: saved,
            })
        }
    }
}

fn read_state(path: &Path) -> Result<Ashift> {
    let content = std::fs::read_to_string(path)?;
    content.trim().parse().map_err(|_| Error::InvalidState {
        path: path.to_path_buf(),
        content: content.trim().to_string(),
    })
}

fn write_state(path: &Path, value: Ashift) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{value}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use zadmin_common::config::ToolsConfig;
    use zadmin_zfs::{CommandOutput, DryRunRunner, ScriptedRunner};

    const GET: &str = "zpool get -Hp -o value ashift zroot";

    fn toolbox(runner: Arc<dyn zadmin_zfs::CommandRunner>) -> Toolbox {
        Toolbox::new(runner, &ToolsConfig::default())
    }

    fn tuner<'a>(tools: &'a Toolbox, state: &Path) -> AshiftTuner<'a> {
        AshiftTuner::new(
            tools,
            PoolName::new("zroot").unwrap(),
            Ashift::SSD,
            state.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_check_reports_saved_value() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        std::fs::write(&state, "9\n").unwrap();
        let runner = Arc::new(ScriptedRunner::new().on(GET, CommandOutput::ok("12\n")));
        let tools = toolbox(runner);

        let status = tuner(&tools, &state).check().await.unwrap();
        assert!(status.tuned);
        assert_eq!(status.saved, Some(Ashift::new(9).unwrap()));
    }

    #[tokio::test]
    async fn test_patch_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(GET, CommandOutput::ok("9\n"))
                .on(GET, CommandOutput::ok("12\n")),
        );
        let tools = toolbox(runner.clone());
        let tuner = tuner(&tools, &state);

        let patched = tuner.patch(false).await.unwrap();
        assert_eq!(
            patched,
            TuneOutcome::Changed {
                from: Ashift::new(9).unwrap(),
                to: Ashift::SSD
            }
        );
        assert_eq!(std::fs::read_to_string(&state).unwrap(), "9\n");

        let restored = tuner.restore().await.unwrap();
        assert_eq!(
            restored,
            TuneOutcome::Changed {
                from: Ashift::SSD,
                to: Ashift::new(9).unwrap()
            }
        );
        assert!(!state.exists());
        assert_eq!(
            runner.calls(),
            vec![
                GET,
                "zpool set ashift=12 zroot",
                GET,
                "zpool set ashift=9 zroot"
            ]
        );
    }

    #[tokio::test]
    async fn test_patch_refuses_existing_state() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        std::fs::write(&state, "9\n").unwrap();
        let runner = Arc::new(ScriptedRunner::new().on(GET, CommandOutput::ok("0\n")));
        let tools = toolbox(runner.clone());

        let err = tuner(&tools, &state).patch(false).await.unwrap_err();
        assert!(matches!(err, Error::StateExists(_)));
        assert_eq!(err.exit_code(), 5);
        assert!(runner.calls().is_empty());

        tuner(&tools, &state).patch(true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&state).unwrap(), "0\n");
    }

    #[tokio::test]
    async fn test_failed_set_removes_state() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(GET, CommandOutput::ok("9\n"))
                .on("zpool set", CommandOutput::failed(1, "permission denied")),
        );
        let tools = toolbox(runner);

        assert!(tuner(&tools, &state).patch(false).await.is_err());
        assert!(!state.exists());
    }

    #[tokio::test]
    async fn test_patch_when_already_tuned() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        let runner = Arc::new(ScriptedRunner::new().on(GET, CommandOutput::ok("12\n")));
        let tools = toolbox(runner.clone());

        let outcome = tuner(&tools, &state).patch(false).await.unwrap();
        assert_eq!(outcome, TuneOutcome::Unchanged { value: Ashift::SSD });
        assert!(!state.exists());
        assert_eq!(runner.calls(), vec![GET]);
    }

    #[tokio::test]
    async fn test_restore_errors() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        let tools = toolbox(Arc::new(ScriptedRunner::new()));

        let err = tuner(&tools, &state).restore().await.unwrap_err();
        assert!(matches!(err, Error::StateMissing(_)));

        std::fs::write(&state, "banana\n").unwrap();
        let err = tuner(&tools, &state).restore().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { ref content, .. } if content == "banana"));
        assert_eq!(err.exit_code(), 5);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("old_ashift");
        let scripted = Arc::new(
            ScriptedRunner::new()
                .on(GET, CommandOutput::ok("9\n"))
                .on(GET, CommandOutput::ok("12\n")),
        );
        let tools = toolbox(Arc::new(DryRunRunner::new(scripted.clone())));

        tuner(&tools, &state).patch(false).await.unwrap();
        assert!(!state.exists());

        std::fs::write(&state, "9\n").unwrap();
        tuner(&tools, &state).restore().await.unwrap();
        assert!(state.exists());
        assert!(scripted.calls().iter().all(|c| c.starts_with("zpool get")));
    }
}
