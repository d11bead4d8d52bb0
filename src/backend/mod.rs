//! External-primitive interfaces.
//!
//! The snapshot, export, and remote-store primitives are behind traits
//! so the sequence engine and its managers can be exercised against an
//! in-memory implementation without invoking real tools. The production
//! implementations shell out to `zfs`/`gpg` ([`ZfsCli`]) and `rclone`
//! ([`RcloneCli`]).

pub mod memory;
pub mod rclone;
pub mod zfs;

use std::io::Read;
use std::path::Path;

use crate::error::Result;

pub use memory::{MemoryRemote, MemoryZfs};
pub use rclone::RcloneCli;
pub use zfs::ZfsCli;

/// Volume-snapshot primitives: create, list, destroy, export.
pub trait ZfsBackend {
    /// Create the named snapshot (`<filesystem>@<id>`).
    fn create_snapshot(&self, name: &str) -> Result<()>;

    /// List snapshot names belonging to `filesystem`, as reported by
    /// the live volume, in no guaranteed order.
    fn list_snapshots(&self, filesystem: &str) -> Result<Vec<String>>;

    /// Destroy the named snapshot.
    fn destroy_snapshot(&self, name: &str) -> Result<()>;

    /// Open a byte stream over the snapshot's serialized form.
    fn export_stream(&self, name: &str) -> Result<Box<dyn Read + Send>>;
}

/// Remote-store primitives: upload, list, delete.
pub trait RemoteBackend {
    /// Transfer the local directory `local` to `remote_path`, resumable
    /// at chunk granularity (already-identical files are not re-sent).
    fn upload(&self, local: &Path, remote_path: &str) -> Result<()>;

    /// List artifact directory names directly under `remote_path`.
    fn list(&self, remote_path: &str) -> Result<Vec<String>>;

    /// Delete `remote_path` and everything under it.
    fn delete(&self, remote_path: &str) -> Result<()>;
}
