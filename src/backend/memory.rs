//! In-memory backends for tests and dry-run rehearsal.
//!
//! These are complete implementations of the primitive traits over
//! plain data structures: snapshots are a name set, the remote store is
//! a map of artifact directories to file contents. Failure injection
//! flags let the engine tests force a step to fail deterministically.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{BackupError, Result};

use super::{RemoteBackend, ZfsBackend};

/// In-memory volume: a snapshot name list plus per-snapshot stream bytes.
#[derive(Debug, Default)]
pub struct MemoryZfs {
    state: Mutex<MemoryZfsState>,
}

#[derive(Debug, Default)]
struct MemoryZfsState {
    snapshots: Vec<String>,
    streams: BTreeMap<String, Vec<u8>>,
    fail_create: bool,
    fail_destroy: bool,
}

impl MemoryZfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a snapshot, optionally with export-stream bytes.
    pub fn seed_snapshot(&self, name: &str, stream: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.snapshots.push(name.to_string());
        state.streams.insert(name.to_string(), stream.to_vec());
    }

    /// Make the next `create_snapshot` calls fail.
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    /// Make the next `destroy_snapshot` calls fail.
    pub fn fail_destroy(&self, fail: bool) {
        self.state.lock().unwrap().fail_destroy = fail;
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.state.lock().unwrap().snapshots.clone()
    }
}

impl ZfsBackend for MemoryZfs {
    fn create_snapshot(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(BackupError::command("injected create failure"));
        }
        if state.snapshots.iter().any(|s| s == name) {
            return Err(BackupError::command(format!("snapshot {name} already exists")));
        }
        state.snapshots.push(name.to_string());
        state.streams.insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn list_snapshots(&self, filesystem: &str) -> Result<Vec<String>> {
        let prefix = format!("{filesystem}@");
        Ok(self
            .state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| s.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn destroy_snapshot(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_destroy {
            return Err(BackupError::command("injected destroy failure"));
        }
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s != name);
        if state.snapshots.len() == before {
            return Err(BackupError::command(format!("no such snapshot: {name}")));
        }
        state.streams.remove(name);
        Ok(())
    }

    fn export_stream(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let state = self.state.lock().unwrap();
        let bytes = state
            .streams
            .get(name)
            .cloned()
            .ok_or_else(|| BackupError::export(format!("no such snapshot: {name}")))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// In-memory remote store: artifact directory name -> file name -> bytes.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryRemoteState>,
}

#[derive(Debug, Default)]
struct MemoryRemoteState {
    artifacts: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    fail_upload: bool,
    uploads: usize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_upload(&self, fail: bool) {
        self.state.lock().unwrap().fail_upload = fail;
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.state.lock().unwrap().artifacts.keys().cloned().collect()
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads
    }

    pub fn files_of(&self, artifact: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .artifacts
            .get(artifact)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl RemoteBackend for MemoryRemote {
    fn upload(&self, local: &Path, remote_path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upload {
            return Err(BackupError::command("injected upload failure"));
        }

        // Remote path layout mirrors rclone: <target>/<artifact-name>.
        let name = remote_path
            .rsplit('/')
            .next()
            .unwrap_or(remote_path)
            .to_string();
        let entry = state.artifacts.entry(name).or_default();

        for dirent in std::fs::read_dir(local)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            let file_name = dirent.file_name().to_string_lossy().to_string();
            let contents = std::fs::read(dirent.path())?;
            // Size-identical files are skipped, like rclone's copy.
            if entry.get(&file_name).map(|v| v.len()) == Some(contents.len()) {
                continue;
            }
            entry.insert(file_name, contents);
        }
        state.uploads += 1;
        Ok(())
    }

    fn list(&self, _remote_path: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().artifacts.keys().cloned().collect())
    }

    fn delete(&self, remote_path: &str) -> Result<()> {
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let mut state = self.state.lock().unwrap();
        if state.artifacts.remove(name).is_none() {
            return Err(BackupError::command(format!("no such remote artifact: {name}")));
        }
        Ok(())
    }
}
