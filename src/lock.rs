//! Cross-run mutual exclusion via a sentinel file.
//!
//! The lock marker is the only on-disk state the engine itself owns.
//! Acquisition uses exclusive create (`create_new`), never
//! check-then-create, so two concurrent invocations cannot both win.
//! The lock is deliberately not released on failure; a human (or an
//! explicit `unlock` invocation) must clear it after inspecting the
//! failed state.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{BackupError, Result};

/// Exclusive-execution guard over a lock marker file.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically create the lock marker if absent.
    ///
    /// Returns `Ok(true)` iff this call created the marker (the caller
    /// now holds the lock), `Ok(false)` if it already existed.
    pub fn try_lock(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                debug!("lock acquired at {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(BackupError::lock(format!(
                "cannot create {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Remove the lock marker. Already-absent is a no-op, not an error.
    pub fn unlock(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("lock file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::lock(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Whether the marker currently exists.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_try_lock_twice_fails_second() {
        let dir = TempDir::new().unwrap();
        let lock = LockManager::new(dir.path().join("_lock"));

        assert!(lock.try_lock().unwrap());
        assert!(!lock.try_lock().unwrap());
        assert!(lock.is_locked());
    }

    #[test]
    fn test_unlock_then_relock() {
        let dir = TempDir::new().unwrap();
        let lock = LockManager::new(dir.path().join("_lock"));

        assert!(lock.try_lock().unwrap());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
        assert!(lock.try_lock().unwrap());
    }

    #[test]
    fn test_double_unlock_is_noop() {
        let dir = TempDir::new().unwrap();
        let lock = LockManager::new(dir.path().join("_lock"));

        lock.unlock().unwrap();
        lock.unlock().unwrap();
    }

    #[test]
    fn test_concurrent_acquisition_exactly_one_winner() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(LockManager::new(dir.path().join("_lock")));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || lock.try_lock().unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1, "exactly one caller may acquire the lock");
    }
}
