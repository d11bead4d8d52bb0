//! Snapshot creation, listing, and age-based pruning.
//!
//! Snapshots are named `<filesystem>@<YYYYMMDDHHMMSS>` at second
//! resolution. The manager holds no bookkeeping of its own: the live
//! volume listing is the only source of truth. Pruning never touches
//! the single newest snapshot, whatever its age, so at least one
//! restore point always survives.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::backend::ZfsBackend;
use crate::error::{BackupError, Result};

/// Timestamp format embedded in snapshot identifiers.
pub const SNAPSHOT_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// A snapshot identity: filesystem plus timestamp id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotName {
    pub filesystem: String,
    pub id: String,
}

impl SnapshotName {
    pub fn new(filesystem: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            filesystem: filesystem.into(),
            id: id.into(),
        }
    }

    /// Build a name for `filesystem` stamped with the given time.
    pub fn at(filesystem: impl Into<String>, when: NaiveDateTime) -> Self {
        Self::new(filesystem, when.format(SNAPSHOT_ID_FORMAT).to_string())
    }

    /// The creation time embedded in the id.
    pub fn timestamp(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.id, SNAPSHOT_ID_FORMAT).map_err(|_| {
            BackupError::snapshot_prune(format!("{} has no parseable timestamp", self))
        })
    }

    /// Age in whole days relative to `now`.
    pub fn age_days(&self, now: NaiveDateTime) -> Result<i64> {
        Ok((now - self.timestamp()?).num_days())
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.filesystem, self.id)
    }
}

impl FromStr for SnapshotName {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let (filesystem, id) = s
            .split_once('@')
            .ok_or_else(|| BackupError::config(format!("not a snapshot name: {s}")))?;
        if filesystem.is_empty() || id.is_empty() {
            return Err(BackupError::config(format!("not a snapshot name: {s}")));
        }
        Ok(Self::new(filesystem, id))
    }
}

/// Creates, lists, and prunes snapshots of one filesystem.
pub struct SnapshotManager<'a> {
    backend: &'a dyn ZfsBackend,
    filesystem: String,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(backend: &'a dyn ZfsBackend, filesystem: impl Into<String>) -> Self {
        Self {
            backend,
            filesystem: filesystem.into(),
        }
    }

    /// Create a snapshot stamped with the current local time.
    pub fn create_snapshot(&self, dry_run: bool) -> Result<SnapshotName> {
        let name = SnapshotName::at(self.filesystem.clone(), Local::now().naive_local());

        if dry_run {
            info!("dry-run: would create snapshot {name}");
            return Ok(name);
        }

        info!("creating snapshot {name}");
        self.backend
            .create_snapshot(&name.to_string())
            .map_err(|e| BackupError::snapshot_create(e.to_string()))?;
        Ok(name)
    }

    /// Snapshots of this filesystem from the live volume, oldest first.
    ///
    /// Entries whose suffix is not a timestamp id are not ours to
    /// manage and are skipped.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotName>> {
        let mut snapshots = Vec::new();
        for raw in self.backend.list_snapshots(&self.filesystem)? {
            let Ok(name) = raw.parse::<SnapshotName>() else {
                debug!("skipping unparseable snapshot entry: {raw}");
                continue;
            };
            if name.timestamp().is_err() {
                debug!("skipping foreign snapshot: {raw}");
                continue;
            }
            snapshots.push(name);
        }
        snapshots.sort();
        Ok(snapshots)
    }

    /// Destroy snapshots strictly older than `older_than_days`.
    ///
    /// The newest snapshot is never a candidate. With `confirm` false
    /// this is a dry pass: candidates are reported and returned but
    /// nothing is destroyed. Returns the affected names.
    pub fn prune_snapshots(
        &self,
        older_than_days: u64,
        confirm: bool,
        dry_run: bool,
    ) -> Result<Vec<SnapshotName>> {
        let snapshots = self.list_snapshots()?;
        let now = Local::now().naive_local();
        let candidates: Vec<SnapshotName> =
            expired_snapshots(&snapshots, older_than_days, now)?
                .into_iter()
                .cloned()
                .collect();

        if candidates.is_empty() {
            info!("no snapshots to prune");
            return Ok(candidates);
        }

        for name in &candidates {
            if dry_run || !confirm {
                info!("would destroy snapshot {name}");
            } else {
                info!("destroying snapshot {name}");
                self.backend
                    .destroy_snapshot(&name.to_string())
                    .map_err(|e| BackupError::snapshot_prune(e.to_string()))?;
            }
        }

        Ok(candidates)
    }
}

/// Select snapshots strictly older than the threshold, always excluding
/// the single newest. `snapshots` must be ordered oldest first.
pub fn expired_snapshots<'s>(
    snapshots: &'s [SnapshotName],
    older_than_days: u64,
    now: NaiveDateTime,
) -> Result<Vec<&'s SnapshotName>> {
    let Some((_newest, rest)) = snapshots.split_last() else {
        return Ok(Vec::new());
    };

    let mut expired = Vec::new();
    for name in rest {
        if name.age_days(now)? > older_than_days as i64 {
            expired.push(name);
        }
    }
    Ok(expired)
}
