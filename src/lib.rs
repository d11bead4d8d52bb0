//! zfs-backup - ZFS snapshot lifecycle management with offsite backup
//!
//! Creates point-in-time snapshots, exports them as chunked (optionally
//! checksummed and encrypted) intermediate artifacts, uploads them to a
//! remote store via rclone, and prunes snapshots and artifacts under
//! retention policy. A configured sequence of named steps drives each
//! run; the sequence engine executes it fail-fast under a filesystem
//! lock.

pub mod backend;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod export;
pub mod lock;
pub mod remote;
pub mod sequence;
pub mod snapshot;
pub mod step;

pub use config::{Context, LifecycleRule};
pub use error::{BackupError, Result};
pub use sequence::{PipelineRunner, RunState, SequenceEngine, StepRunner};
pub use step::{Step, StepName};
