//! Error types for zadmin
//!
//! This module defines the common error type used throughout the toolkit
//! and the mapping from errors to process exit codes.

use crate::types::NameError;
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for zadmin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for zadmin
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Argument errors
    #[error("invalid name '{name}': {source}")]
    InvalidName {
        name: String,
        #[source]
        source: NameError,
    },

    #[error("invalid ashift value {0}: expected 0 or 9..=16")]
    InvalidAshift(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    // External command errors
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("unexpected output from {command}: {detail}")]
    Parse { command: String, detail: String },

    // Pool errors
    #[error("failed to import pool {pool}: {reason}")]
    ImportFailed { pool: String, reason: String },

    #[error("failed to export pool {pool}: {reason}")]
    ExportFailed { pool: String, reason: String },

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    // Dataset errors
    #[error("failed to mount {target}: {reason}")]
    MountFailed { target: String, reason: String },

    #[error("failed to unmount {target}: {reason}")]
    UnmountFailed { target: String, reason: String },

    #[error("dataset {0} is not mounted")]
    NotMounted(String),

    #[error("chroot repair in {root} failed: {reason}")]
    ChrootFailed { root: String, reason: String },

    // Snapshot errors
    #[error("snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    // ashift state file errors
    #[error("saved ashift value already present at {}; restore it first or use --force", .0.display())]
    StateExists(PathBuf),

    #[error("no saved ashift value at {}", .0.display())]
    StateMissing(PathBuf),

    #[error("saved ashift value at {} is not a number: {content:?}", .path.display())]
    InvalidState { path: PathBuf, content: String },

    // Installation errors
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a parse error for the output of `command`
    pub fn parse(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Short reason string used when wrapping a command failure into a
    /// stage-specific error.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::CommandFailed { stderr, status, .. } if !stderr.trim().is_empty() => {
                format!("{} (exit code {status})", stderr.trim())
            }
            Self::CommandFailed { status, .. } => format!("exit code {status}"),
            other => other.to_string(),
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PoolNotFound(_)
                | Self::SnapshotNotFound(_)
                | Self::StateMissing(_)
                | Self::NotFound(_)
        )
    }

    /// Get the process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            // 1: usage
            Self::InvalidName { .. }
            | Self::InvalidAshift(_)
            | Self::InvalidArgument(_)
            | Self::Configuration(_) => 1,

            // 2: pool import/export
            Self::ImportFailed { .. } | Self::ExportFailed { .. } | Self::PoolNotFound(_) => 2,

            // 3: mounting
            Self::MountFailed { .. } | Self::UnmountFailed { .. } | Self::NotMounted(_) => 3,

            // 4: chroot repair
            Self::ChrootFailed { .. } => 4,

            // 5: ashift state file
            Self::StateExists(_) | Self::StateMissing(_) | Self::InvalidState { .. } => 5,

            Self::Timeout { .. } => 124,

            Self::Io(_)
            | Self::Spawn { .. }
            | Self::CommandFailed { .. }
            | Self::Parse { .. }
            | Self::SnapshotExists(_)
            | Self::SnapshotNotFound(_)
            | Self::OutputExists(_)
            | Self::PermissionDenied(_)
            | Self::NotFound(_) => 255,
        }
    }
}
