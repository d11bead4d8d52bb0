//! Error handling for zfs-backup
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every failure a step can hit maps to one variant here so the sequence
//! engine can report a precise cause before aborting the run.

use thiserror::Error;

/// Main error type for zfs-backup
#[derive(Error, Debug)]
pub enum BackupError {
    /// IO errors (file operations, chunk writes, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The lock marker already exists; another run is in progress
    #[error("lockfile already exists")]
    AlreadyLocked,

    /// Lock marker could not be created or removed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Snapshot creation failed (name collision, filesystem busy)
    #[error("Snapshot creation failed: {0}")]
    SnapshotCreate(String),

    /// Snapshot destruction failed during pruning
    #[error("Snapshot prune failed: {0}")]
    SnapshotPrune(String),

    /// Export stream or chunk write failed
    #[error("Export failed: {0}")]
    Export(String),

    /// A chunk's recorded checksum no longer matches its contents
    #[error("Checksum mismatch in artifact {artifact}, chunk {chunk}")]
    ChecksumMismatch { artifact: String, chunk: String },

    /// Upload to the remote store failed
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Remote artifact pruning failed
    #[error("Remote prune failed: {0}")]
    RemotePrune(String),

    /// The on-failure hook itself failed (logged, never masks the step error)
    #[error("Failure hook error: {0}")]
    Hook(String),

    /// External command failed (non-zero exit, spawn failure)
    #[error("Command failed: {0}")]
    Command(String),
}

/// Result type alias for zfs-backup operations
pub type Result<T> = std::result::Result<T, BackupError>;

// Convenient error constructors
impl BackupError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a lock error
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    /// Create a snapshot creation error
    pub fn snapshot_create(msg: impl Into<String>) -> Self {
        Self::SnapshotCreate(msg.into())
    }

    /// Create a snapshot prune error
    pub fn snapshot_prune(msg: impl Into<String>) -> Self {
        Self::SnapshotPrune(msg.into())
    }

    /// Create an export error
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Create an upload error
    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a remote prune error
    pub fn remote_prune(msg: impl Into<String>) -> Self {
        Self::RemotePrune(msg.into())
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }
}
