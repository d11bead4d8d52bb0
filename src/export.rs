//! Export pipeline: snapshot stream to chunked intermediate artifact.
//!
//! An artifact is one directory per snapshot under the intermediate
//! base directory, named `<fs-with-slashes-as-underscores>@<id>`. The
//! snapshot stream is split into fixed-size chunks `<id>.zstream.0000`,
//! `.0001`, ... so reassembly order is unambiguous from a lexical sort.
//! With checksumming enabled a `SHA256SUMS` file (sha256sum format) is
//! written alongside; verification failures mark the artifact stale via
//! a `.stale` marker and are never auto-corrected.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::backend::ZfsBackend;
use crate::config::LifecycleRule;
use crate::error::{BackupError, Result};
use crate::snapshot::{SnapshotName, SNAPSHOT_ID_FORMAT};

/// Name of the per-artifact checksum file.
pub const CHECKSUM_FILE: &str = "SHA256SUMS";

/// Name of the stale marker written on verification failure.
pub const STALE_MARKER: &str = ".stale";

const COPY_BUF_SIZE: usize = 128 * 1024;

/// Parse a split size such as `"1G"`, `"10M"`, `"512"` into bytes.
///
/// Binary units, suffixes K/M/G/T with an optional trailing B,
/// case-insensitive. Zero and garbage are configuration errors.
pub fn parse_split_size(s: &str) -> Result<u64> {
    let normalized = s.trim().to_ascii_uppercase();
    let trimmed = normalized.strip_suffix('B').unwrap_or(&normalized);

    let (digits, multiplier) = match trimmed.chars().last() {
        Some('K') => (&trimmed[..trimmed.len() - 1], 1u64 << 10),
        Some('M') => (&trimmed[..trimmed.len() - 1], 1u64 << 20),
        Some('G') => (&trimmed[..trimmed.len() - 1], 1u64 << 30),
        Some('T') => (&trimmed[..trimmed.len() - 1], 1u64 << 40),
        _ => (trimmed, 1u64),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| BackupError::config(format!("invalid split_size: {s}")))?;
    let bytes = value
        .checked_mul(multiplier)
        .ok_or_else(|| BackupError::config(format!("split_size overflows: {s}")))?;
    if bytes == 0 {
        return Err(BackupError::config("split_size must be non-zero"));
    }
    Ok(bytes)
}

/// An intermediate artifact on disk: the chunked export of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Directory holding the chunk files
    pub dir: PathBuf,
    /// Directory name, `<fs-underscored>@<id>`
    pub name: String,
    /// Snapshot timestamp id
    pub id: String,
}

impl Artifact {
    /// Interpret `dir` as an artifact directory; `None` if its name
    /// does not carry a timestamp id.
    pub fn from_dir(dir: PathBuf) -> Option<Self> {
        let name = dir.file_name()?.to_str()?.to_string();
        let (_, id) = name.split_once('@')?;
        NaiveDateTime::parse_from_str(id, SNAPSHOT_ID_FORMAT).ok()?;
        Some(Self {
            id: id.to_string(),
            name,
            dir,
        })
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        // Guarded at construction.
        NaiveDateTime::parse_from_str(&self.id, SNAPSHOT_ID_FORMAT)
            .unwrap_or_default()
    }

    /// Chunk files in reassembly (lexical) order.
    pub fn chunks(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.zstream.", self.id);
        let mut chunks = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                if file_name.starts_with(&prefix) {
                    chunks.push(path);
                }
            }
        }
        chunks.sort();
        Ok(chunks)
    }

    pub fn checksum_path(&self) -> PathBuf {
        self.dir.join(CHECKSUM_FILE)
    }

    pub fn is_stale(&self) -> bool {
        self.dir.join(STALE_MARKER).exists()
    }

    /// Flag this artifact as failing integrity verification.
    pub fn mark_stale(&self) -> Result<()> {
        fs::write(self.dir.join(STALE_MARKER), b"")?;
        Ok(())
    }
}

/// Materializes snapshots as intermediate artifacts and prunes them.
pub struct ExportPipeline<'a> {
    backend: &'a dyn ZfsBackend,
    basedir: PathBuf,
    split_size: u64,
    checksum: bool,
}

impl<'a> ExportPipeline<'a> {
    pub fn new(
        backend: &'a dyn ZfsBackend,
        basedir: PathBuf,
        split_size: u64,
        checksum: bool,
    ) -> Self {
        Self {
            backend,
            basedir,
            split_size,
            checksum,
        }
    }

    /// The artifact location a snapshot exports to.
    pub fn artifact_for(&self, snapshot: &SnapshotName) -> Artifact {
        let name = format!("{}@{}", snapshot.filesystem.replace('/', "_"), snapshot.id);
        Artifact {
            dir: self.basedir.join(&name),
            name,
            id: snapshot.id.clone(),
        }
    }

    /// Stream the snapshot into chunk files, checksumming as it writes.
    ///
    /// A leftover directory from an earlier failed export is replaced
    /// wholesale so stale chunks cannot pollute the new artifact.
    pub fn export(&self, snapshot: &SnapshotName, dry_run: bool) -> Result<Artifact> {
        let artifact = self.artifact_for(snapshot);

        if dry_run {
            info!("dry-run: would export {snapshot} to {}", artifact.dir.display());
            return Ok(artifact);
        }

        info!("exporting {snapshot} to {}", artifact.dir.display());
        if artifact.dir.exists() {
            warn!("replacing leftover artifact directory {}", artifact.dir.display());
            fs::remove_dir_all(&artifact.dir)?;
        }
        fs::create_dir_all(&artifact.dir)?;

        let stream = self
            .backend
            .export_stream(&snapshot.to_string())
            .map_err(|e| BackupError::export(e.to_string()))?;

        let checksums = self
            .write_chunks(stream, &artifact)
            .map_err(|e| BackupError::export(e.to_string()))?;

        if self.checksum {
            let mut sums = BufWriter::new(File::create(artifact.checksum_path())?);
            for (digest, chunk_name) in &checksums {
                writeln!(sums, "{digest}  {chunk_name}")?;
            }
            sums.flush()?;
        }

        Ok(artifact)
    }

    /// Chunking loop; returns `(hex digest, chunk file name)` per chunk.
    fn write_chunks(
        &self,
        mut stream: Box<dyn Read + Send>,
        artifact: &Artifact,
    ) -> Result<Vec<(String, String)>> {
        let mut checksums = Vec::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut chunk_index = 0u32;
        let mut chunk: Option<(BufWriter<File>, Sha256, u64, String)> = None;

        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let mut data = &buf[..n];

            while !data.is_empty() {
                if chunk.is_none() {
                    let chunk_name = format!("{}.zstream.{:04}", artifact.id, chunk_index);
                    chunk_index += 1;
                    debug!("opening chunk {chunk_name}");
                    let file = File::create(artifact.dir.join(&chunk_name))?;
                    chunk = Some((BufWriter::new(file), Sha256::new(), 0, chunk_name));
                }
                let Some((writer, hasher, written, _)) = chunk.as_mut() else {
                    unreachable!()
                };

                let room = (self.split_size - *written) as usize;
                let take = room.min(data.len());
                writer.write_all(&data[..take])?;
                hasher.update(&data[..take]);
                *written += take as u64;
                data = &data[take..];

                if *written == self.split_size {
                    if let Some((mut writer, hasher, _, chunk_name)) = chunk.take() {
                        writer.flush()?;
                        checksums.push((hex::encode(hasher.finalize()), chunk_name));
                    }
                }
            }
        }

        if let Some((mut writer, hasher, _, chunk_name)) = chunk.take() {
            writer.flush()?;
            checksums.push((hex::encode(hasher.finalize()), chunk_name));
        }

        info!("exported {} chunk(s)", checksums.len());
        Ok(checksums)
    }

    /// Re-hash every chunk against the recorded checksums.
    ///
    /// A mismatch (or missing chunk) marks the artifact stale and fails
    /// with `ChecksumMismatch`; an artifact with no checksum file has
    /// nothing to verify.
    pub fn verify(&self, artifact: &Artifact) -> Result<()> {
        let checksum_path = artifact.checksum_path();
        if !checksum_path.exists() {
            debug!("no {CHECKSUM_FILE} for {}, skipping verification", artifact.name);
            return Ok(());
        }

        for line in fs::read_to_string(&checksum_path)?.lines() {
            let Some((expected, chunk_name)) = line.split_once("  ") else {
                continue;
            };
            let chunk_path = artifact.dir.join(chunk_name);
            let actual = match hash_file(&chunk_path) {
                Ok(digest) => digest,
                Err(_) => String::new(), // missing chunk counts as corrupt
            };
            if actual != expected {
                warn!("checksum mismatch: {} / {chunk_name}", artifact.name);
                artifact.mark_stale()?;
                return Err(BackupError::ChecksumMismatch {
                    artifact: artifact.name.clone(),
                    chunk: chunk_name.to_string(),
                });
            }
        }

        debug!("artifact {} verified", artifact.name);
        Ok(())
    }

    /// Artifact directories under the base directory, oldest first.
    pub fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for dirent in fs::read_dir(&self.basedir)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_dir() {
                continue;
            }
            if let Some(artifact) = Artifact::from_dir(dirent.path()) {
                artifacts.push(artifact);
            }
        }
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(artifacts)
    }

    /// Apply the intermediate lifecycle rule.
    ///
    /// Same discipline as snapshot pruning: candidates ordered oldest
    /// first, the newest artifact always kept, dry pass unless
    /// confirmed. Returns the affected artifacts.
    pub fn prune_intermediate(
        &self,
        rule: &LifecycleRule,
        confirm: bool,
        dry_run: bool,
    ) -> Result<Vec<Artifact>> {
        let artifacts = self.list_artifacts()?;
        let stamps: Vec<NaiveDateTime> = artifacts.iter().map(Artifact::timestamp).collect();
        let now = Local::now().naive_local();

        let mut pruned = Vec::new();
        for index in rule_candidates(&stamps, rule, now) {
            let artifact = &artifacts[index];
            if dry_run || !confirm {
                info!("would prune intermediate artifact {}", artifact.name);
            } else {
                info!("pruning intermediate artifact {}", artifact.name);
                fs::remove_dir_all(&artifact.dir)
                    .map_err(|e| BackupError::export(format!("cannot prune {}: {e}", artifact.name)))?;
            }
            pruned.push(artifact.clone());
        }

        if pruned.is_empty() {
            info!("no intermediate artifacts to prune");
        }
        Ok(pruned)
    }
}

/// Indices into `stamps` (ordered oldest first) selected by the rule.
///
/// The last (newest) entry is never selected. An entry is selected when
/// it violates the age bound or falls outside the keep-last window.
pub fn rule_candidates(
    stamps: &[NaiveDateTime],
    rule: &LifecycleRule,
    now: NaiveDateTime,
) -> Vec<usize> {
    if rule.is_empty() || stamps.is_empty() {
        return Vec::new();
    }

    let newest = stamps.len() - 1;
    let mut selected = Vec::new();
    for (i, stamp) in stamps.iter().enumerate() {
        if i == newest {
            continue;
        }
        let too_old = rule
            .days
            .is_some_and(|days| (now - *stamp).num_days() > days as i64);
        let beyond_count = rule
            .keep_last
            .is_some_and(|keep| i + keep < stamps.len());
        if too_old || beyond_count {
            selected.push(i);
        }
    }
    selected
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
