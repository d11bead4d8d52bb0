//! Sequence execution engine.
//!
//! Interprets the configured ordered step list, resolves each step to
//! an operation, and executes them strictly in order with fail-fast
//! semantics: the first failing step runs the configured on-failure
//! hook exactly once and aborts the run. There is no retry and no
//! resume; a re-run always starts from the first step, which is why
//! the `lock` step is the re-entry guard.
//!
//! Dry-run is a behavioral flag threaded into every operation, never a
//! separate sequence: step resolution and ordering are exercised
//! identically, only the mutations are replaced by reporting no-ops.

use std::fmt;
use std::process::Command;

use tracing::{error, info, warn};

use crate::config::Context;
use crate::error::{BackupError, Result};
use crate::export::{Artifact, ExportPipeline};
use crate::lock::LockManager;
use crate::remote::RemoteSync;
use crate::snapshot::{SnapshotManager, SnapshotName};
use crate::step::{Step, StepName};
use crate::backend::{RemoteBackend, ZfsBackend};

/// Run lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Cursor at the first step, nothing executed yet
    Pending,
    /// Steps executing in order
    Running,
    /// Every step completed (terminal)
    Succeeded,
    /// A step failed; the failure hook is about to run
    Failed,
    /// Run terminated after a failure (terminal)
    Aborted,
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Maps a resolved step to its operation.
///
/// The engine owns the step list and drives a `StepRunner`; production
/// uses [`PipelineRunner`], tests substitute a fake catalogue.
pub trait StepRunner {
    fn run_step(&mut self, step: &Step, dry_run: bool) -> Result<()>;
}

/// One-shot executor over a configured step list.
pub struct SequenceEngine {
    steps: Vec<Step>,
    on_failure: String,
    dry_run: bool,
    state: RunState,
}

impl SequenceEngine {
    pub fn new(steps: Vec<Step>, on_failure: impl Into<String>, dry_run: bool) -> Self {
        Self {
            steps,
            on_failure: on_failure.into(),
            dry_run,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute every step in order; fail-fast on the first error.
    ///
    /// Returns the terminal state. The engine is single-use: calling
    /// `run` again after a terminal state returns it unchanged.
    pub fn run(&mut self, runner: &mut dyn StepRunner) -> RunState {
        if self.state != RunState::Pending {
            warn!("sequence already ran to {}", self.state);
            return self.state;
        }
        self.state = RunState::Running;

        for (i, step) in self.steps.iter().enumerate() {
            info!("step {}/{}: {}", i + 1, self.steps.len(), step);
            if let Err(e) = runner.run_step(step, self.dry_run) {
                error!("step {} failed: {e}", step.name);
                self.state = RunState::Failed;
                self.invoke_failure_hook(step.name, &e);
                self.state = RunState::Aborted;
                return self.state;
            }
        }

        self.state = RunState::Succeeded;
        info!("all {} step(s) succeeded", self.steps.len());
        self.state
    }

    /// Best-effort on-failure hook; its own failure is logged and never
    /// masks the step error. Skipped in dry-run (hooks are external
    /// commands, and dry-run mutates nothing).
    fn invoke_failure_hook(&self, step: StepName, cause: &BackupError) {
        if self.on_failure.is_empty() {
            return;
        }
        if self.dry_run {
            info!("dry-run: would invoke on_failure hook for step {step}");
            return;
        }

        info!("invoking on_failure hook: {}", self.on_failure);
        if let Err(e) = run_failure_hook(&self.on_failure, step, cause) {
            error!("on_failure hook failed: {e}");
        }
    }
}

/// Run the hook command via `sh -c` with the failure context exported
/// as `ZFS_BACKUP_FAILED_STEP` and `ZFS_BACKUP_ERROR`.
fn run_failure_hook(command: &str, step: StepName, cause: &BackupError) -> Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("ZFS_BACKUP_FAILED_STEP", step.to_string())
        .env("ZFS_BACKUP_ERROR", cause.to_string())
        .status()
        .map_err(|e| BackupError::hook(format!("failed to spawn hook: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(BackupError::hook(format!("hook exited with {status}")))
    }
}

/// Production step catalogue wired to the real managers.
///
/// Remembers the snapshot created and the artifact exported earlier in
/// the same run, so `export-intermediate` and `upload` operate on this
/// run's output; after a partial failure and re-run they fall back to
/// the newest existing snapshot/artifact.
pub struct PipelineRunner<'a> {
    ctx: &'a Context,
    lock: LockManager,
    snapshots: SnapshotManager<'a>,
    exports: ExportPipeline<'a>,
    remote: RemoteSync<'a>,
    created_snapshot: Option<SnapshotName>,
    exported_artifact: Option<Artifact>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(
        ctx: &'a Context,
        zfs: &'a dyn ZfsBackend,
        remote: &'a dyn RemoteBackend,
    ) -> Self {
        Self {
            ctx,
            lock: LockManager::new(ctx.lock_path()),
            snapshots: SnapshotManager::new(zfs, ctx.zfs_fs.clone()),
            exports: ExportPipeline::new(
                zfs,
                ctx.intermediate_basedir.clone(),
                ctx.split_size_bytes,
                ctx.intermediate_checksum,
            ),
            remote: RemoteSync::new(remote, ctx.remote.clone()),
            created_snapshot: None,
            exported_artifact: None,
        }
    }

    fn export_source(&self) -> Result<SnapshotName> {
        if let Some(snapshot) = &self.created_snapshot {
            return Ok(snapshot.clone());
        }
        self.snapshots
            .list_snapshots()?
            .pop()
            .ok_or_else(|| BackupError::export("no snapshot available to export"))
    }

    fn upload_source(&self) -> Result<Artifact> {
        if let Some(artifact) = &self.exported_artifact {
            return Ok(artifact.clone());
        }
        self.exports
            .list_artifacts()?
            .pop()
            .ok_or_else(|| BackupError::upload("no intermediate artifact to upload"))
    }
}

impl StepRunner for PipelineRunner<'_> {
    fn run_step(&mut self, step: &Step, dry_run: bool) -> Result<()> {
        match step.name {
            StepName::Lock => {
                if dry_run {
                    info!("dry-run: would create lock file");
                    return Ok(());
                }
                if !self.lock.try_lock()? {
                    return Err(BackupError::AlreadyLocked);
                }
                Ok(())
            }
            StepName::Unlock => {
                if dry_run {
                    info!("dry-run: would delete lock file");
                    return Ok(());
                }
                self.lock.unlock()
            }
            StepName::Snapshot => {
                let snapshot = self.snapshots.create_snapshot(dry_run)?;
                self.created_snapshot = Some(snapshot);
                Ok(())
            }
            StepName::ExportIntermediate => {
                let snapshot = self.export_source()?;
                let artifact = self.exports.export(&snapshot, dry_run)?;
                self.exported_artifact = Some(artifact);
                Ok(())
            }
            StepName::PruneIntermediate => {
                self.exports
                    .prune_intermediate(&self.ctx.lifecycle_intermediate, step.yes, dry_run)?;
                Ok(())
            }
            StepName::PruneSnapshots => {
                self.snapshots
                    .prune_snapshots(self.ctx.oldest_snapshot_days, step.yes, dry_run)?;
                Ok(())
            }
            StepName::Upload => {
                let artifact = self.upload_source()?;
                if dry_run {
                    info!("dry-run: would verify {}", artifact.name);
                } else {
                    self.exports.verify(&artifact)?;
                }
                self.remote.upload(&artifact, dry_run)
            }
            StepName::PruneRemote => {
                self.remote.prune_remote(
                    &self.ctx.lifecycle_remote,
                    self.ctx.remote_prune_disabled,
                    step.yes,
                    dry_run,
                )?;
                Ok(())
            }
        }
    }
}
