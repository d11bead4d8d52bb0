// Integration tests for zfs-backup
//
// These drive the real sequence engine and pipeline runner against the
// in-memory backends and a tempdir intermediate base directory, so a
// whole run is exercised end to end without touching zfs or rclone.

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use zfs_backup::backend::{MemoryRemote, MemoryZfs};
use zfs_backup::error::Result;
use zfs_backup::{
    Context, LifecycleRule, PipelineRunner, RunState, SequenceEngine, Step, StepName, StepRunner,
};

fn test_context(basedir: &Path) -> Context {
    Context {
        encryption_passphrase: "hunter2".to_string(),
        zfs_fs: "tank/data".to_string(),
        intermediate_basedir: basedir.to_path_buf(),
        split_size: "10K".to_string(),
        split_size_bytes: 10 * 1024,
        remote: "backups:zfs".to_string(),
        rclone_conf: basedir.join("rclone.conf"),
        rclone_bwlimit: String::new(),
        rclone_args: String::new(),
        oldest_snapshot_days: 120,
        on_failure: String::new(),
        remote_prune_disabled: true,
        intermediate_checksum: true,
        lifecycle_intermediate: LifecycleRule {
            days: Some(14),
            keep_last: None,
        },
        lifecycle_remote: LifecycleRule::default(),
        backup_sequences: default_steps(),
    }
}

fn default_steps() -> Vec<Step> {
    vec![
        Step::new(StepName::Lock),
        Step::new(StepName::Snapshot),
        Step::new(StepName::ExportIntermediate),
        Step::confirmed(StepName::PruneIntermediate),
        Step::confirmed(StepName::PruneSnapshots),
        Step::new(StepName::Unlock),
    ]
}

/// Delegating runner that forces one step to fail.
struct FailOn<'a> {
    inner: PipelineRunner<'a>,
    step: StepName,
}

impl StepRunner for FailOn<'_> {
    fn run_step(&mut self, step: &Step, dry_run: bool) -> Result<()> {
        if step.name == self.step {
            return Err(zfs_backup::BackupError::export("forced failure"));
        }
        self.inner.run_step(step, dry_run)
    }
}

#[test]
fn test_full_pipeline_succeeds_and_releases_lock() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();

    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    let mut engine = SequenceEngine::new(ctx.backup_sequences.clone(), "", false);

    assert_eq!(engine.run(&mut runner), RunState::Succeeded);

    // One snapshot exists, its artifact was exported, the lock is gone.
    assert_eq!(zfs.snapshot_names().len(), 1);
    let artifacts: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().unwrap().is_dir())
        .collect();
    assert_eq!(artifacts.len(), 1);
    assert!(!ctx.lock_path().exists());
}

#[test]
fn test_export_failure_aborts_and_keeps_lock() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(dir.path());
    let hook_log = dir.path().join("hook.log");
    ctx.on_failure = format!("echo \"$ZFS_BACKUP_FAILED_STEP\" >> {}", hook_log.display());

    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();
    let mut runner = FailOn {
        inner: PipelineRunner::new(&ctx, &zfs, &remote),
        step: StepName::ExportIntermediate,
    };
    let mut engine =
        SequenceEngine::new(ctx.backup_sequences.clone(), ctx.on_failure.clone(), false);

    assert_eq!(engine.run(&mut runner), RunState::Aborted);

    // The snapshot from step 2 survives: prune-snapshots never ran.
    assert_eq!(zfs.snapshot_names().len(), 1);
    // No artifact was produced and the lock marker remains present.
    let artifact_dirs = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().unwrap().is_dir())
        .count();
    assert_eq!(artifact_dirs, 0);
    assert!(ctx.lock_path().exists());
    // The hook ran exactly once, with the failing step's name.
    let contents = std::fs::read_to_string(&hook_log).unwrap();
    assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["export-intermediate"]);
}

#[test]
fn test_lock_contention_aborts_first_step() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    std::fs::write(ctx.lock_path(), b"").unwrap();

    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();
    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    let mut engine = SequenceEngine::new(ctx.backup_sequences.clone(), "", false);

    assert_eq!(engine.run(&mut runner), RunState::Aborted);
    // Nothing past the lock step executed.
    assert!(zfs.snapshot_names().is_empty());
}

#[test]
fn test_dry_run_mutates_nothing_but_matches_terminal_state() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();

    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    let mut engine = SequenceEngine::new(ctx.backup_sequences.clone(), "", true);
    assert_eq!(engine.run(&mut runner), RunState::Succeeded);

    // Zero mutations: no lock, no snapshots, no artifact directories.
    assert!(!ctx.lock_path().exists());
    assert!(zfs.snapshot_names().is_empty());
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 0);

    // A real run over the same starting conditions reaches the same
    // terminal state.
    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    let mut engine = SequenceEngine::new(ctx.backup_sequences.clone(), "", false);
    assert_eq!(engine.run(&mut runner), RunState::Succeeded);
}

#[test]
fn test_back_to_back_runs_produce_distinct_snapshot_ids() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();

    // Keep both snapshots: skip pruning in this sequence.
    let steps = vec![
        Step::new(StepName::Lock),
        Step::new(StepName::Snapshot),
        Step::new(StepName::ExportIntermediate),
        Step::new(StepName::Unlock),
    ];

    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    assert_eq!(
        SequenceEngine::new(steps.clone(), "", false).run(&mut runner),
        RunState::Succeeded
    );

    // Snapshot ids have second resolution.
    std::thread::sleep(Duration::from_millis(1100));

    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    assert_eq!(
        SequenceEngine::new(steps, "", false).run(&mut runner),
        RunState::Succeeded
    );

    let names = zfs.snapshot_names();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
}

#[test]
fn test_pipeline_with_upload_and_remote_prune() {
    let dir = TempDir::new().unwrap();
    let mut ctx = test_context(dir.path());
    ctx.remote_prune_disabled = false;
    ctx.lifecycle_remote = LifecycleRule {
        days: None,
        keep_last: Some(2),
    };

    let steps = vec![
        Step::new(StepName::Lock),
        Step::new(StepName::Snapshot),
        Step::new(StepName::ExportIntermediate),
        Step::new(StepName::Upload),
        Step::confirmed(StepName::PruneRemote),
        Step::new(StepName::Unlock),
    ];

    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();
    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    assert_eq!(
        SequenceEngine::new(steps, "", false).run(&mut runner),
        RunState::Succeeded
    );

    assert_eq!(remote.upload_count(), 1);
    assert_eq!(remote.artifact_names().len(), 1);
}

#[test]
fn test_rerun_after_abort_uses_existing_snapshot() {
    let dir = TempDir::new().unwrap();
    let ctx = test_context(dir.path());
    let zfs = MemoryZfs::new();
    let remote = MemoryRemote::new();

    // First run: snapshot succeeds, export is forced to fail, lock stays.
    let mut runner = FailOn {
        inner: PipelineRunner::new(&ctx, &zfs, &remote),
        step: StepName::ExportIntermediate,
    };
    assert_eq!(
        SequenceEngine::new(ctx.backup_sequences.clone(), "", false).run(&mut runner),
        RunState::Aborted
    );
    assert_eq!(zfs.snapshot_names().len(), 1);

    // Operator inspects, unlocks, and re-runs without a snapshot step;
    // export falls back to the newest existing snapshot.
    std::fs::remove_file(ctx.lock_path()).unwrap();
    let steps = vec![
        Step::new(StepName::Lock),
        Step::new(StepName::ExportIntermediate),
        Step::new(StepName::Unlock),
    ];
    let mut runner = PipelineRunner::new(&ctx, &zfs, &remote);
    assert_eq!(
        SequenceEngine::new(steps, "", false).run(&mut runner),
        RunState::Succeeded
    );

    let artifacts: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().unwrap().is_dir())
        .collect();
    assert_eq!(artifacts.len(), 1);
}
