//! `zstream` wrapper

use crate::runner::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zadmin_common::{Compression, Error, Result};

#[derive(Clone)]
pub struct Zstream {
    runner: Arc<dyn CommandRunner>,
    binary: PathBuf,
}

impl Zstream {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: &Path) -> Self {
        Self {
            runner,
            binary: binary.to_path_buf(),
        }
    }

    /// Print the records of a send stream file. Compressed files are
    /// decompressed into `zstream dump` through a pipe.
    pub async fn dump(&self, file: &Path, compression: Compression, verbose: bool) -> Result<String> {
        if !file.exists() {
            return Err(Error::NotFound(file.display().to_string()));
        }
        let dump = Invocation::new(&self.binary)
            .arg("dump")
            .flag_if(verbose, "-v")
            .query();

        let output = match compression.program() {
            None => {
                self.runner
                    .run_checked(&dump.stdin_file(file))
                    .await?
            }
            Some(program) => {
                let decompress = Invocation::new(program)
                    .args(compression.decompress_args().iter().copied())
                    .arg(file.display().to_string())
                    .query();
                self.runner.pipeline_checked(&[decompress, dump]).await?
            }
        };
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_dump_plain_and_compressed() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("a.zfs");
        let packed = dir.path().join("a.zfs.xz");
        std::fs::write(&plain, b"stream").unwrap();
        std::fs::write(&packed, b"stream").unwrap();

        let runner = Arc::new(
            ScriptedRunner::new().on("zstream dump", CommandOutput::ok("BEGIN record\n")),
        );
        let zstream = Zstream::new(runner.clone(), Path::new("/usr/sbin/zstream"));

        let out = zstream.dump(&plain, Compression::None, false).await.unwrap();
        assert_eq!(out, "BEGIN record\n");
        zstream.dump(&packed, Compression::Xz, true).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0], format!("zstream dump < {}", plain.display()));
        assert_eq!(
            calls[1],
            format!("xz -d -c {} | zstream dump -v", packed.display())
        );
    }

    #[tokio::test]
    async fn test_dump_missing_file() {
        let runner = Arc::new(ScriptedRunner::new());
        let zstream = Zstream::new(runner.clone(), Path::new("zstream"));
        let err = zstream
            .dump(Path::new("/nonexistent/a.zfs"), Compression::None, false)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(runner.calls().is_empty());
    }
}
