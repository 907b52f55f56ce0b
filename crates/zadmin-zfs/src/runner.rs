//! Execution of external commands.
//!
//! Every wrapper in this crate describes a command as an [`Invocation`] and
//! hands it to a [`CommandRunner`]. The runner decides whether the command
//! really runs ([`SystemRunner`]), is only logged ([`DryRunRunner`]), or is
//! answered from a script ([`ScriptedRunner`]).

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use zadmin_common::config::RunnerConfig;
use zadmin_common::{Error, Result};

/// One external command with its arguments and optional file redirections
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Read stdin from this file instead of `/dev/null`
    pub stdin: Option<PathBuf>,
    /// Write stdout to this file instead of capturing it
    pub stdout: Option<PathBuf>,
    query: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout: None,
            query: false,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag` only when `enabled`
    #[must_use]
    pub fn flag_if(self, enabled: bool, flag: &str) -> Self {
        if enabled { self.arg(flag) } else { self }
    }

    #[must_use]
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    #[must_use]
    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Mark the command as read-only. Dry runs still execute queries.
    #[must_use]
    pub const fn query(mut self) -> Self {
        self.query = true;
        self
    }

    pub const fn is_query(&self) -> bool {
        self.query
    }

    /// Command line with the program reduced to its file name
    pub fn short_line(&self) -> String {
        self.render(&program_name(&self.program))
    }

    fn render(&self, program: &str) -> String {
        let mut line = program.to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        if let Some(path) = &self.stdin {
            line.push_str(&format!(" < {}", quote(&path.display().to_string())));
        }
        if let Some(path) = &self.stdout {
            line.push_str(&format!(" > {}", quote(&path.display().to_string())));
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&self.program.display().to_string()))
    }
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", arg.replace('\'', r"'\''"))
    } else {
        arg.to_string()
    }
}

fn pipeline_line(stages: &[Invocation], render: impl Fn(&Invocation) -> String) -> String {
    stages.iter().map(render).collect::<Vec<_>>().join(" | ")
}

/// Exit status and captured output of a finished command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given status and stderr
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub const fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit status into [`Error::CommandFailed`]
    pub fn check(self, command: impl fmt::Display) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    fn from_process(output: &std::process::Output) -> Self {
        Self {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Seam between the tool wrappers and process execution
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command and return its output, whatever the exit status
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run commands connected stdout-to-stdin. The status is the first
    /// non-zero stage status; stdout is the last stage's.
    async fn pipeline(&self, stages: &[Invocation]) -> Result<CommandOutput>;

    /// Whether mutating commands are skipped
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run one command and fail on a non-zero exit status
    async fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.run(invocation).await?.check(invocation)
    }

    /// Run a pipeline and fail on a non-zero exit status
    async fn pipeline_checked(&self, stages: &[Invocation]) -> Result<CommandOutput> {
        let output = self.pipeline(stages).await?;
        output.check(pipeline_line(stages, ToString::to_string))
    }
}

/// Runs commands as real child processes
#[derive(Clone, Debug, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub const fn from_config(config: &RunnerConfig) -> Self {
        let timeout = if config.command_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.command_timeout_secs))
        };
        Self::new(timeout)
    }

    async fn with_timeout<F: Future>(&self, command: &str, fut: F) -> Result<F::Output> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout {
                    command: command.to_string(),
                    secs: limit.as_secs(),
                }),
            None => Ok(fut.await),
        }
    }
}

fn open_stdin(invocation: &Invocation) -> Result<Stdio> {
    match &invocation.stdin {
        Some(path) => Ok(Stdio::from(File::open(path)?)),
        None => Ok(Stdio::null()),
    }
}

fn open_stdout(invocation: &Invocation) -> Result<Stdio> {
    match &invocation.stdout {
        Some(path) => Ok(Stdio::from(File::create(path)?)),
        None => Ok(Stdio::piped()),
    }
}

fn spawn(invocation: &Invocation, stdin: Stdio, stdout: Stdio) -> Result<Child> {
    Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation, "Running external command");
        let child = spawn(invocation, open_stdin(invocation)?, open_stdout(invocation)?)?;
        let output = self
            .with_timeout(&invocation.to_string(), child.wait_with_output())
            .await??;
        let output = CommandOutput::from_process(&output);
        debug!(status = output.status, "Command finished");
        Ok(output)
    }

    async fn pipeline(&self, stages: &[Invocation]) -> Result<CommandOutput> {
        if stages.is_empty() {
            return Err(Error::invalid_argument("empty pipeline"));
        }
        let line = pipeline_line(stages, ToString::to_string);
        debug!(command = %line, "Running pipeline");

        let mut children = Vec::with_capacity(stages.len());
        let mut upstream: Option<Stdio> = None;
        for (index, stage) in stages.iter().enumerate() {
            let is_last = index + 1 == stages.len();
            let stdin = match upstream.take() {
                Some(stdio) => stdio,
                None => open_stdin(stage)?,
            };
            let stdout = if is_last {
                open_stdout(stage)?
            } else {
                Stdio::piped()
            };
            let mut child = spawn(stage, stdin, stdout)?;
            if !is_last {
                let pipe = child
                    .stdout
                    .take()
                    .ok_or_else(|| Error::invalid_argument("pipeline stage stdout unavailable"))?;
                upstream = Some(pipe.try_into()?);
            }
            children.push(child);
        }

        let outputs = self
            .with_timeout(&line, join_all(children.into_iter().map(Child::wait_with_output)))
            .await?;

        let mut result = CommandOutput::default();
        let count = outputs.len();
        for (index, output) in outputs.into_iter().enumerate() {
            let output = CommandOutput::from_process(&output?);
            if result.status == 0 && output.status != 0 {
                result.status = output.status;
            }
            result.stderr.push_str(&output.stderr);
            if index + 1 == count {
                result.stdout = output.stdout;
            }
        }
        debug!(status = result.status, "Pipeline finished");
        Ok(result)
    }
}

/// Logs mutating commands instead of running them; queries still run
#[derive(Clone)]
pub struct DryRunRunner {
    inner: Arc<dyn CommandRunner>,
}

impl DryRunRunner {
    pub fn new(inner: Arc<dyn CommandRunner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        if invocation.is_query() {
            return self.inner.run(invocation).await;
        }
        info!("would run: {invocation}");
        Ok(CommandOutput::default())
    }

    async fn pipeline(&self, stages: &[Invocation]) -> Result<CommandOutput> {
        if stages.iter().all(Invocation::is_query) {
            return self.inner.pipeline(stages).await;
        }
        info!("would run: {}", pipeline_line(stages, ToString::to_string));
        Ok(CommandOutput::default())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Test double that records command lines and answers from a script.
///
/// Each scripted reply is consumed by the first command whose short line
/// starts with its prefix. Unmatched commands succeed with empty output.
/// A stdout redirection is honored like a shell would: the file is created
/// and receives the reply's stdout, whatever the exit status.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` for the next command starting with `prefix`
    #[must_use]
    pub fn on(self, prefix: impl Into<String>, output: CommandOutput) -> Self {
        self.replies.lock().push((prefix.into(), output));
        self
    }

    /// Short command lines seen so far, pipelines joined with ` | `
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn respond(&self, line: String) -> CommandOutput {
        let reply = {
            let mut replies = self.replies.lock();
            replies
                .iter()
                .position(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|index| replies.remove(index).1)
        };
        self.calls.lock().push(line);
        reply.unwrap_or_default()
    }

    fn redirect(target: Option<&PathBuf>, mut output: CommandOutput) -> Result<CommandOutput> {
        if let Some(path) = target {
            std::fs::write(path, std::mem::take(&mut output.stdout))?;
        }
        Ok(output)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.respond(invocation.short_line());
        Self::redirect(invocation.stdout.as_ref(), output)
    }

    async fn pipeline(&self, stages: &[Invocation]) -> Result<CommandOutput> {
        let output = self.respond(pipeline_line(stages, Invocation::short_line));
        Self::redirect(stages.last().and_then(|s| s.stdout.as_ref()), output)
    }
}

/// File name of a program path, for log messages and scripted matching
pub fn program_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
