use std::fmt::{Display, Formatter};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::context::DeploymentContext;
use crate::FatalError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Second-resolution capture time, used for the snapshot directory and for
/// every artifact a run leaves beside the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureTimestamp(String);

impl CaptureTimestamp {
    /// Local wall-clock time, or UTC when the local offset is unknown.
    ///
    /// # Errors
    /// Returns an error when the timestamp cannot be formatted.
    pub fn now() -> Result<Self> {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self::from_datetime(now)
    }

    /// # Errors
    /// Returns an error when the timestamp cannot be formatted.
    pub fn from_datetime(value: OffsetDateTime) -> Result<Self> {
        let format = format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
        let formatted = value.format(&format).context("failed to format capture timestamp")?;
        Ok(Self(formatted))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CaptureTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupFile {
    pub name: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupManifest {
    pub captured_at: String,
    pub source_dir: PathBuf,
    pub files: Vec<BackupFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub directory: PathBuf,
    pub manifest: BackupManifest,
}

/// Copy the database family into `<backup_root>/<timestamp>/` and verify it.
///
/// The snapshot directory must not exist yet; a snapshot is never written twice.
///
/// # Errors
/// Returns [`FatalError::Backup`] when the directory cannot be created, a copy
/// fails, or a copied file's digest differs from its source.
pub fn create_snapshot(
    context: &DeploymentContext,
    backup_root: &Path,
    timestamp: &CaptureTimestamp,
) -> Result<BackupSnapshot, FatalError> {
    snapshot_files(context, backup_root, timestamp)
        .map_err(|err| FatalError::Backup(format!("{err:#}")))
}

fn snapshot_files(
    context: &DeploymentContext,
    backup_root: &Path,
    timestamp: &CaptureTimestamp,
) -> Result<BackupSnapshot> {
    fs::create_dir_all(backup_root).with_context(|| {
        format!("failed to create backup root {}", backup_root.display())
    })?;
    let directory = backup_root.join(timestamp.as_str());
    fs::create_dir(&directory)
        .with_context(|| format!("failed to create snapshot directory {}", directory.display()))?;

    let mut files = Vec::new();
    for source in context.family_files() {
        if !source.exists() {
            debug!(path = %source.display(), "side file absent, nothing to back up");
            continue;
        }
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("unsupported file name {}", source.display()))?
            .to_string();
        let target = directory.join(&name);
        copy_preserving(&source, &target)?;

        let source_digest = sha256_file(&source)?;
        let target_digest = sha256_file(&target)?;
        if source_digest != target_digest {
            return Err(anyhow!(
                "copy of {} does not match its source (sha256 {} != {})",
                source.display(),
                target_digest,
                source_digest
            ));
        }

        let bytes = fs::metadata(&target)
            .with_context(|| format!("failed to stat {}", target.display()))?
            .len();
        info!(file = %name, bytes, "backed up");
        files.push(BackupFile { name, bytes, sha256: source_digest });
    }

    let manifest = BackupManifest {
        captured_at: timestamp.to_string(),
        source_dir: context.database_dir().to_path_buf(),
        files,
    };
    let manifest_path = directory.join(MANIFEST_FILE);
    let body = serde_json::to_vec_pretty(&manifest).context("failed to serialize backup manifest")?;
    fs::write(&manifest_path, body)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    Ok(BackupSnapshot { directory, manifest })
}

/// Copy contents and mode, then carry over mtime and (when permitted) ownership.
fn copy_preserving(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target).with_context(|| {
        format!("failed to copy {} to {}", source.display(), target.display())
    })?;

    let metadata =
        fs::metadata(source).with_context(|| format!("failed to stat {}", source.display()))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("failed to read mtime of {}", source.display()))?;
    File::options()
        .write(true)
        .open(target)
        .and_then(|file| file.set_modified(modified))
        .with_context(|| format!("failed to set mtime on {}", target.display()))?;

    if let Err(err) = std::os::unix::fs::chown(target, Some(metadata.uid()), Some(metadata.gid()))
    {
        debug!(path = %target.display(), error = %err, "ownership not preserved");
    }
    Ok(())
}

/// # Errors
/// Returns an error when `path` cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// # Errors
/// Returns an error when the manifest is missing or malformed.
pub fn read_manifest(snapshot_dir: &Path) -> Result<BackupManifest> {
    let path = snapshot_dir.join(MANIFEST_FILE);
    let body = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("failed to parse {}", path.display()))
}
