//! Remote synchronization: upload and remote-lifecycle pruning.
//!
//! Uploads are chunk-granular idempotent (the backend skips files that
//! already match remotely), so re-running after a partial failure only
//! sends what is missing. Remote pruning operates on the remote store's
//! own listing and is gated by `remote_prune_disabled`.

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::backend::RemoteBackend;
use crate::config::LifecycleRule;
use crate::error::{BackupError, Result};
use crate::export::{rule_candidates, Artifact};
use crate::snapshot::SNAPSHOT_ID_FORMAT;

/// Uploads artifacts to the remote target and prunes remote artifacts.
pub struct RemoteSync<'a> {
    backend: &'a dyn RemoteBackend,
    remote: String,
}

impl<'a> RemoteSync<'a> {
    pub fn new(backend: &'a dyn RemoteBackend, remote: impl Into<String>) -> Self {
        Self {
            backend,
            remote: remote.into(),
        }
    }

    fn remote_path(&self, artifact_name: &str) -> String {
        format!("{}/{}", self.remote.trim_end_matches('/'), artifact_name)
    }

    /// Transfer an artifact's chunk set to the remote store.
    ///
    /// Stale artifacts (failed integrity verification) are never
    /// uploaded; callers verify first so corruption is caught here
    /// before any bytes leave the host.
    pub fn upload(&self, artifact: &Artifact, dry_run: bool) -> Result<()> {
        if self.remote.is_empty() {
            return Err(BackupError::upload("no remote configured"));
        }
        if artifact.is_stale() {
            return Err(BackupError::upload(format!(
                "artifact {} is marked stale, refusing to upload",
                artifact.name
            )));
        }

        let target = self.remote_path(&artifact.name);
        if dry_run {
            info!("dry-run: would upload {} to {target}", artifact.name);
            return Ok(());
        }

        info!("uploading {} to {target}", artifact.name);
        self.backend
            .upload(&artifact.dir, &target)
            .map_err(|e| BackupError::upload(e.to_string()))
    }

    /// Apply the remote lifecycle rule to the remote store's listing.
    ///
    /// No-op (with an info log) when disabled. Returns the affected
    /// remote artifact names.
    pub fn prune_remote(
        &self,
        rule: &LifecycleRule,
        disabled: bool,
        confirm: bool,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        if disabled {
            info!("remote pruning is disabled");
            return Ok(Vec::new());
        }
        if self.remote.is_empty() {
            return Err(BackupError::remote_prune("no remote configured"));
        }

        let mut names: Vec<(NaiveDateTime, String)> = Vec::new();
        for name in self
            .backend
            .list(&self.remote)
            .map_err(|e| BackupError::remote_prune(e.to_string()))?
        {
            let Some((_, id)) = name.split_once('@') else {
                warn!("skipping foreign remote entry: {name}");
                continue;
            };
            let Ok(stamp) = NaiveDateTime::parse_from_str(id, SNAPSHOT_ID_FORMAT) else {
                warn!("skipping foreign remote entry: {name}");
                continue;
            };
            names.push((stamp, name));
        }
        names.sort();

        let stamps: Vec<NaiveDateTime> = names.iter().map(|(s, _)| *s).collect();
        let now = Local::now().naive_local();

        let mut pruned = Vec::new();
        for index in rule_candidates(&stamps, rule, now) {
            let name = &names[index].1;
            if dry_run || !confirm {
                info!("would prune remote artifact {name}");
            } else {
                info!("pruning remote artifact {name}");
                self.backend
                    .delete(&self.remote_path(name))
                    .map_err(|e| BackupError::remote_prune(e.to_string()))?;
            }
            pruned.push(name.clone());
        }

        if pruned.is_empty() {
            info!("no remote artifacts to prune");
        }
        Ok(pruned)
    }
}
