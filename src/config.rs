//! Configuration loading and validation.
//!
//! The config file is a sectioned key-value (TOML) file mirroring the
//! layout the scheduler job ships: `[main]`, `[backup-sequences]`,
//! `[lifecycle-intermediate]`, `[lifecycle-remote]`. All keys are read
//! into a strongly-typed [`Context`] by a single validating constructor
//! that reports every missing required key at once, so a broken config
//! never gets partway through a run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::export::parse_split_size;
use crate::step::{default_sequence, Step};

/// Retention rule for intermediate or remote artifacts.
///
/// Either bound may be set; an artifact is a prune candidate when it
/// violates any configured bound. An empty rule never selects anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleRule {
    /// Artifacts older than this many days are candidates
    pub days: Option<u64>,
    /// Keep at most this many artifacts (newest first)
    pub keep_last: Option<usize>,
}

impl LifecycleRule {
    pub fn is_empty(&self) -> bool {
        self.days.is_none() && self.keep_last.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMain {
    encryption_passphrase: Option<String>,
    zfs_fs: Option<String>,
    intermediate_basedir: Option<PathBuf>,
    split_size: Option<String>,
    remote: Option<String>,
    rclone_conf: Option<PathBuf>,
    rclone_bwlimit: Option<String>,
    rclone_args: Option<String>,
    oldest_snapshot_days: Option<u64>,
    on_failure: Option<String>,
    remote_prune_disabled: Option<bool>,
    intermediate_checksum: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    main: Option<RawMain>,
    #[serde(rename = "backup-sequences")]
    backup_sequences: Option<BTreeMap<String, String>>,
    #[serde(rename = "lifecycle-intermediate")]
    lifecycle_intermediate: Option<LifecycleRule>,
    #[serde(rename = "lifecycle-remote")]
    lifecycle_remote: Option<LifecycleRule>,
}

/// Immutable run context: the validated configuration, loaded once.
#[derive(Debug, Clone)]
pub struct Context {
    pub encryption_passphrase: String,
    pub zfs_fs: String,
    pub intermediate_basedir: PathBuf,
    /// Raw split size string, e.g. "1G" (kept for show-context)
    pub split_size: String,
    /// Parsed split size in bytes
    pub split_size_bytes: u64,
    pub remote: String,
    pub rclone_conf: PathBuf,
    pub rclone_bwlimit: String,
    pub rclone_args: String,
    pub oldest_snapshot_days: u64,
    pub on_failure: String,
    pub remote_prune_disabled: bool,
    pub intermediate_checksum: bool,
    pub lifecycle_intermediate: LifecycleRule,
    pub lifecycle_remote: LifecycleRule,
    /// Parsed step descriptors, ordered by sorted `stepN` key
    pub backup_sequences: Vec<Step>,
}

impl Context {
    /// Load and validate the configuration file.
    ///
    /// Fails with a `Config` error naming every missing required key and
    /// section, before any step can run.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("reading config file at {}", path.display());

        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let raw: RawConfig = toml::from_str(&contents)
            .map_err(|e| BackupError::config(format!("cannot parse {}: {e}", path.display())))?;

        let main = raw.main.unwrap_or_default();

        let mut missing = Vec::new();
        if main.encryption_passphrase.is_none() {
            missing.push("[main] encryption_passphrase");
        }
        if main.zfs_fs.is_none() {
            missing.push("[main] zfs_fs");
        }
        if main.intermediate_basedir.is_none() {
            missing.push("[main] intermediate_basedir");
        }
        if raw.lifecycle_intermediate.is_none() {
            missing.push("[lifecycle-intermediate] section");
        }
        if !missing.is_empty() {
            return Err(BackupError::config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        // Unwraps are guarded by the missing-key check above.
        let intermediate_basedir = main.intermediate_basedir.unwrap();
        if !intermediate_basedir.is_dir() {
            return Err(BackupError::config(format!(
                "{} is not a valid directory",
                intermediate_basedir.display()
            )));
        }

        let remote = main.remote.unwrap_or_default();
        if remote.is_empty() {
            warn!("no remote defined, uploading will not work");
        }

        let split_size = main.split_size.unwrap_or_else(|| "1G".to_string());
        let split_size_bytes = parse_split_size(&split_size)?;

        let rclone_conf = main.rclone_conf.unwrap_or_else(default_rclone_conf);

        let backup_sequences = match raw.backup_sequences {
            // BTreeMap iteration gives the lexically sorted key order the
            // original step1..stepN contract relies on.
            Some(map) => map
                .values()
                .map(|s| s.parse::<Step>())
                .collect::<Result<Vec<_>>>()?,
            None => default_sequence(),
        };
        if backup_sequences.is_empty() {
            return Err(BackupError::config("empty [backup-sequences] section"));
        }

        Ok(Context {
            encryption_passphrase: main.encryption_passphrase.unwrap(),
            zfs_fs: main.zfs_fs.unwrap(),
            intermediate_basedir,
            split_size,
            split_size_bytes,
            remote,
            rclone_conf,
            rclone_bwlimit: main.rclone_bwlimit.unwrap_or_default(),
            rclone_args: main.rclone_args.unwrap_or_default(),
            oldest_snapshot_days: main.oldest_snapshot_days.unwrap_or(120),
            on_failure: main.on_failure.unwrap_or_default(),
            remote_prune_disabled: main.remote_prune_disabled.unwrap_or(true),
            intermediate_checksum: main.intermediate_checksum.unwrap_or(false),
            lifecycle_intermediate: raw.lifecycle_intermediate.unwrap(),
            lifecycle_remote: raw.lifecycle_remote.unwrap_or_default(),
            backup_sequences,
        })
    }

    /// Path of the lock marker owned by this context.
    pub fn lock_path(&self) -> PathBuf {
        self.intermediate_basedir.join("_lock")
    }

    /// Log the full context, one aligned `key = value` line per entry.
    ///
    /// The passphrase is masked unless `mask_passphrase` is false.
    pub fn show(&self, mask_passphrase: bool) {
        let passphrase = if mask_passphrase {
            "********".to_string()
        } else {
            self.encryption_passphrase.clone()
        };

        let main: Vec<(&str, String)> = vec![
            ("encryption_passphrase", passphrase),
            ("zfs_fs", self.zfs_fs.clone()),
            (
                "intermediate_basedir",
                self.intermediate_basedir.display().to_string(),
            ),
            ("split_size", self.split_size.clone()),
            ("remote", self.remote.clone()),
            ("rclone_conf", self.rclone_conf.display().to_string()),
            ("rclone_bwlimit", self.rclone_bwlimit.clone()),
            ("rclone_args", self.rclone_args.clone()),
            (
                "oldest_snapshot_days",
                self.oldest_snapshot_days.to_string(),
            ),
            ("on_failure", self.on_failure.clone()),
            (
                "remote_prune_disabled",
                self.remote_prune_disabled.to_string(),
            ),
            (
                "intermediate_checksum",
                self.intermediate_checksum.to_string(),
            ),
        ];

        let sequences: Vec<(String, String)> = self
            .backup_sequences
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("step_{}", i + 1), s.to_string()))
            .collect();

        let internals: Vec<(&str, String)> = vec![
            ("lock_path", self.lock_path().display().to_string()),
            ("locked", self.lock_path().exists().to_string()),
        ];

        let width = main
            .iter()
            .map(|(k, _)| k.len())
            .chain(sequences.iter().map(|(k, _)| k.len()))
            .chain(internals.iter().map(|(k, _)| k.len()))
            .max()
            .unwrap_or(0);

        info!("Configuration");
        info!("=============");
        info!("[main]");
        for (k, v) in &main {
            info!("{k: <width$} = {v}");
        }
        info!("[backup-sequences]");
        for (k, v) in &sequences {
            info!("{k: <width$} = {v}");
        }
        info!("[lifecycle-intermediate]");
        Self::show_rule(&self.lifecycle_intermediate, width);
        info!("[lifecycle-remote]");
        Self::show_rule(&self.lifecycle_remote, width);
        info!("[_internals]");
        for (k, v) in &internals {
            info!("{k: <width$} = {v}");
        }
    }

    fn show_rule(rule: &LifecycleRule, width: usize) {
        if let Some(days) = rule.days {
            info!("{: <width$} = {days}", "days");
        }
        if let Some(keep) = rule.keep_last {
            info!("{: <width$} = {keep}", "keep_last");
        }
    }
}

fn default_rclone_conf() -> PathBuf {
    if let Ok(conf) = std::env::var("RCLONE_CONFIG") {
        return PathBuf::from(conf);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".rclone.conf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepName;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("backup.toml");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn minimal_config(basedir: &Path) -> String {
        format!(
            r#"
[main]
encryption_passphrase = "hunter2"
zfs_fs = "tank/data"
intermediate_basedir = "{}"

[lifecycle-intermediate]
days = 14
"#,
            basedir.display()
        )
    }

    #[test]
    fn test_load_minimal_config_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &minimal_config(dir.path()));

        let ctx = Context::load(&path).unwrap();
        assert_eq!(ctx.zfs_fs, "tank/data");
        assert_eq!(ctx.split_size, "1G");
        assert_eq!(ctx.split_size_bytes, 1 << 30);
        assert_eq!(ctx.oldest_snapshot_days, 120);
        assert!(ctx.remote_prune_disabled);
        assert!(!ctx.intermediate_checksum);
        assert_eq!(ctx.backup_sequences.len(), 6);
        assert_eq!(ctx.backup_sequences[0].name, StepName::Lock);
        assert_eq!(ctx.lock_path(), dir.path().join("_lock"));
    }

    #[test]
    fn test_missing_keys_all_reported_at_once() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[main]\nsplit_size = \"1G\"\n");

        let err = Context::load(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("encryption_passphrase"));
        assert!(msg.contains("zfs_fs"));
        assert!(msg.contains("intermediate_basedir"));
        assert!(msg.contains("lifecycle-intermediate"));
    }

    #[test]
    fn test_basedir_must_exist() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            r#"
[main]
encryption_passphrase = "x"
zfs_fs = "tank/data"
intermediate_basedir = "{}/nope"

[lifecycle-intermediate]
days = 1
"#,
            dir.path().display()
        );
        let path = write_config(&dir, &body);

        let err = Context::load(&path).unwrap_err();
        assert!(err.to_string().contains("not a valid directory"));
    }

    #[test]
    fn test_sequences_sorted_by_key() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            r#"
{}
[backup-sequences]
step2 = "unlock"
step1 = "lock"
"#,
            minimal_config(dir.path())
        );
        let path = write_config(&dir, &body);

        let ctx = Context::load(&path).unwrap();
        let names: Vec<StepName> = ctx.backup_sequences.iter().map(|s| s.name).collect();
        assert_eq!(names, vec![StepName::Lock, StepName::Unlock]);
    }

    #[test]
    fn test_unknown_step_fails_at_load() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            r#"
{}
[backup-sequences]
step1 = "defragment-the-cloud"
"#,
            minimal_config(dir.path())
        );
        let path = write_config(&dir, &body);

        let err = Context::load(&path).unwrap_err();
        assert!(err.to_string().contains("unknown step name"));
    }

    #[test]
    fn test_invalid_split_size_fails_at_load() {
        let dir = TempDir::new().unwrap();
        let body = minimal_config(dir.path()).replace(
            "[lifecycle-intermediate]",
            "split_size = \"a lot\"\n\n[lifecycle-intermediate]",
        );
        let path = write_config(&dir, &body);

        assert!(Context::load(&path).is_err());
    }

    #[test]
    fn test_step_flags_parsed_once() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            r#"
{}
[backup-sequences]
step1 = "prune-snapshots -y"
"#,
            minimal_config(dir.path())
        );
        let path = write_config(&dir, &body);

        let ctx = Context::load(&path).unwrap();
        assert_eq!(ctx.backup_sequences[0].name, StepName::PruneSnapshots);
        assert!(ctx.backup_sequences[0].yes);
    }

    #[test]
    fn test_lifecycle_rule_empty() {
        assert!(LifecycleRule::default().is_empty());
        assert!(!LifecycleRule { days: Some(7), keep_last: None }.is_empty());
    }
}
