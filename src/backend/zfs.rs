//! `zfs` command-line backend.
//!
//! Exporting pipes `zfs send` through symmetric `gpg` encryption when a
//! passphrase is configured; the two children are wired stdout-to-stdin
//! directly, no shell involved. The reader surfaces a non-zero exit of
//! either child as an IO error at end of stream, so a truncated send
//! never looks like a successful export.

use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::info;

use crate::command::run_command;
use crate::error::{BackupError, Result};

use super::ZfsBackend;

/// Production backend invoking the `zfs` (and optionally `gpg`) binaries.
#[derive(Debug, Clone)]
pub struct ZfsCli {
    /// Symmetric encryption passphrase; empty disables encryption.
    passphrase: String,
}

impl ZfsCli {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }
}

impl ZfsBackend for ZfsCli {
    fn create_snapshot(&self, name: &str) -> Result<()> {
        run_command("zfs", &["snapshot", name])?.ensure_success("zfs snapshot")
    }

    fn list_snapshots(&self, filesystem: &str) -> Result<Vec<String>> {
        let out = run_command(
            "zfs",
            &["list", "-H", "-d", "1", "-t", "snapshot", "-o", "name", filesystem],
        )?;
        out.ensure_success("zfs list")?;
        Ok(out
            .stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn destroy_snapshot(&self, name: &str) -> Result<()> {
        run_command("zfs", &["destroy", name])?.ensure_success("zfs destroy")
    }

    fn export_stream(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        info!("+ zfs send {name}");
        let mut zfs = Command::new("zfs")
            .args(["send", name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BackupError::export(format!("failed to spawn zfs send: {e}")))?;

        let zfs_stdout = zfs
            .stdout
            .take()
            .ok_or_else(|| BackupError::export("zfs send produced no stdout handle"))?;

        if self.passphrase.is_empty() {
            return Ok(Box::new(ExportStream::new(vec![zfs], zfs_stdout)));
        }

        info!("+ gpg --symmetric (pipeline)");
        let mut gpg = Command::new("gpg")
            .args([
                "--batch",
                "--yes",
                "--symmetric",
                "--cipher-algo",
                "AES256",
                "--passphrase",
                &self.passphrase,
                "-o",
                "-",
            ])
            .stdin(Stdio::from(zfs_stdout))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BackupError::export(format!("failed to spawn gpg: {e}")))?;

        let gpg_stdout = gpg
            .stdout
            .take()
            .ok_or_else(|| BackupError::export("gpg produced no stdout handle"))?;

        Ok(Box::new(ExportStream::new(vec![zfs, gpg], gpg_stdout)))
    }
}

/// Reader over the tail of an export pipeline.
///
/// After the stream ends, each child is reaped and a non-zero exit turns
/// the final read into an error instead of a silent short stream.
struct ExportStream {
    children: Vec<Child>,
    reader: ChildStdout,
    finished: bool,
}

impl ExportStream {
    fn new(children: Vec<Child>, reader: ChildStdout) -> Self {
        Self {
            children,
            reader,
            finished: false,
        }
    }

    fn reap(&mut self) -> io::Result<()> {
        self.finished = true;
        for child in &mut self.children {
            let status = child.wait()?;
            if !status.success() {
                return Err(io::Error::other(format!(
                    "export pipeline child exited with {status}"
                )));
            }
        }
        Ok(())
    }
}

impl Read for ExportStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n == 0 && !self.finished {
            self.reap()?;
        }
        Ok(n)
    }
}

impl Drop for ExportStream {
    fn drop(&mut self) {
        if !self.finished {
            for child in &mut self.children {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
