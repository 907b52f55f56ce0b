//! zadmin Tasks - administration workflows
//!
//! Each module drives the tool wrappers from `zadmin-zfs` through one
//! administrative job. Workflows run their commands strictly one after
//! another and stop at the first failure.

pub mod ashift;
pub mod dataset;
pub mod install;
pub mod pool;
pub mod recovery;
pub mod snapshot;

pub use ashift::{AshiftStatus, AshiftTuner, TuneOutcome};
pub use dataset::MountTarget;
pub use install::{InstallAction, InstallReport, Installer};
pub use recovery::{RecoveryPlan, RecoveryReport, Stage};
pub use snapshot::{SendOptions, SnapshotManager};
