//! `rclone` command-line backend.
//!
//! Uploads use `rclone copy`, which skips files already present
//! remotely with identical size/mtime, giving chunk-granular resume for
//! free. Listing parses `rclone lsjson` output; deletion uses
//! `rclone purge`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::command::run_command;
use crate::error::{BackupError, Result};

use super::RemoteBackend;

/// Production backend invoking the `rclone` binary.
#[derive(Debug, Clone)]
pub struct RcloneCli {
    conf: PathBuf,
    bwlimit: String,
    extra_args: Vec<String>,
}

impl RcloneCli {
    pub fn new(conf: PathBuf, bwlimit: impl Into<String>, extra_args: &str) -> Self {
        Self {
            conf,
            bwlimit: bwlimit.into(),
            extra_args: extra_args.split_whitespace().map(str::to_string).collect(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--config".to_string(), self.conf.display().to_string()]
    }
}

#[derive(Debug, Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "IsDir")]
    is_dir: bool,
}

impl RemoteBackend for RcloneCli {
    fn upload(&self, local: &Path, remote_path: &str) -> Result<()> {
        let mut args = vec!["copy".to_string(), local.display().to_string(), remote_path.to_string()];
        args.extend(self.base_args());
        if !self.bwlimit.is_empty() {
            args.push("--bwlimit".to_string());
            args.push(self.bwlimit.clone());
        }
        args.extend(self.extra_args.iter().cloned());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command("rclone", &args)?.ensure_success("rclone copy")
    }

    fn list(&self, remote_path: &str) -> Result<Vec<String>> {
        let mut args = vec!["lsjson".to_string(), remote_path.to_string()];
        args.extend(self.base_args());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = run_command("rclone", &args)?;
        out.ensure_success("rclone lsjson")?;

        let entries: Vec<LsJsonEntry> = serde_json::from_str(&out.stdout)
            .map_err(|e| BackupError::command(format!("cannot parse rclone lsjson output: {e}")))?;
        Ok(entries
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.name)
            .collect())
    }

    fn delete(&self, remote_path: &str) -> Result<()> {
        let mut args = vec!["purge".to_string(), remote_path.to_string()];
        args.extend(self.base_args());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command("rclone", &args)?.ensure_success("rclone purge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsjson_parsing() {
        let json = r#"[
            {"Path":"tank_data@20250101000000","Name":"tank_data@20250101000000","Size":-1,"MimeType":"inode/directory","ModTime":"2025-01-01T00:00:00Z","IsDir":true},
            {"Path":"readme.txt","Name":"readme.txt","Size":12,"MimeType":"text/plain","ModTime":"2025-01-01T00:00:00Z","IsDir":false}
        ]"#;
        let entries: Vec<LsJsonEntry> = serde_json::from_str(json).unwrap();
        let dirs: Vec<String> = entries
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.name)
            .collect();
        assert_eq!(dirs, vec!["tank_data@20250101000000"]);
    }

    #[test]
    fn test_extra_args_split_on_whitespace() {
        let cli = RcloneCli::new(PathBuf::from("/tmp/rclone.conf"), "1M", "--transfers 4");
        assert_eq!(cli.extra_args, vec!["--transfers", "4"]);
    }
}
