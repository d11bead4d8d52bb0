use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ZFS backup with snapshot management
#[derive(Parser)]
#[command(name = "zfs-backup")]
#[command(about = "ZFS snapshot lifecycle management with encrypted offsite backup")]
#[command(version)]
pub struct Cli {
    /// The config file path (could also be specified by ZFS_BACKUP_CONFIG env var)
    #[arg(short, long, env = "ZFS_BACKUP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Only print out what needs to be done instead of actually doing things
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Print verbosely
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full configured backup sequence (the default)
    Perform,
    /// Show the context as seen by zfs-backup
    ShowContext,
    /// Attempt to create a lock file and thus disallow other calls to perform
    Lock,
    /// Remove the lock file and thus allow other calls to perform
    Unlock,
    /// Call ZFS and create a snapshot
    Snapshot,
    /// Remove ZFS snapshots based on oldest_snapshot_days
    PruneSnapshot {
        /// Actually destroy candidates instead of reporting them
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
