use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PipeLensError, Result};
use crate::models::PipelineExecution;

use super::aggregate::{PipelineStats, TaskStats};

pub(super) const FORMAT_VERSION: u32 = 1;

/// On-disk layout of the statistics store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct StoreDocument {
    pub format_version: u32,
    pub last_updated: Option<DateTime<Utc>>,
    /// Pipeline name -> stats
    pub pipelines: IndexMap<String, PipelineStats>,
    /// Pipeline name -> task identity -> stats
    pub tasks: IndexMap<String, IndexMap<String, TaskStats>>,
    /// Execution history in ingestion order
    pub executions: Vec<PipelineExecution>,
    /// Identity keys of executions evicted from a bounded history
    #[serde(default)]
    pub retired_keys: IndexSet<String>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            last_updated: None,
            pipelines: IndexMap::new(),
            tasks: IndexMap::new(),
            executions: Vec::new(),
            retired_keys: IndexSet::new(),
        }
    }
}

/// How the store came up when it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No store file existed yet
    Created,
    /// Existing store loaded
    Loaded { executions: usize },
    /// Existing file was unusable; an empty store was started in its place
    Reset {
        reason: String,
        backup: Option<PathBuf>,
    },
}

/// Reads the store document, falling back to an empty one when the file is
/// missing, unreadable, from another format version or internally
/// inconsistent. Unusable files are moved aside rather than overwritten.
pub(super) fn load(path: &Path) -> (StoreDocument, LoadOutcome) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No statistics store at {}, starting fresh", path.display());
            return (StoreDocument::default(), LoadOutcome::Created);
        }
        Err(e) => return reset(path, format!("unreadable store file: {e}")),
    };

    match decode(&content) {
        Ok(document) => {
            debug!(
                "Loaded {} executions from {}",
                document.executions.len(),
                path.display()
            );
            let executions = document.executions.len();
            (document, LoadOutcome::Loaded { executions })
        }
        Err(reason) => reset(path, reason),
    }
}

fn decode(content: &str) -> std::result::Result<StoreDocument, String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("corrupt store file: {e}"))?;

    match value.get("format_version").and_then(serde_json::Value::as_u64) {
        Some(version) if version == u64::from(FORMAT_VERSION) => {}
        Some(version) => {
            return Err(format!(
                "unsupported store format version {version} (expected {FORMAT_VERSION})"
            ))
        }
        None => return Err("store file has no format version".to_string()),
    }

    let document: StoreDocument =
        serde_json::from_value(value).map_err(|e| format!("corrupt store file: {e}"))?;

    let consistent = document
        .pipelines
        .values()
        .map(|p| &p.stats.counts)
        .chain(document.tasks.values().flat_map(|t| t.values()).map(|t| &t.stats.counts))
        .all(|counts| counts.is_consistent());
    if !consistent {
        return Err("store counters are inconsistent".to_string());
    }

    Ok(document)
}

fn reset(path: &Path, reason: String) -> (StoreDocument, LoadOutcome) {
    let backup_path = free_backup_path(path);
    let backup = match fs::rename(path, &backup_path) {
        Ok(()) => Some(backup_path),
        Err(e) => {
            warn!("Could not move unusable store aside: {e}");
            None
        }
    };

    warn!(
        "Statistics store at {} reset: {reason}",
        path.display()
    );
    (StoreDocument::default(), LoadOutcome::Reset { reason, backup })
}

/// Exclusive hold on a store, released on drop.
///
/// The lock lives on `<path>.lock` rather than the store file itself, since
/// the store file is replaced by rename on every write.
#[derive(Debug)]
pub(super) struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Takes the lock without waiting; fails if another process holds it.
    pub(super) fn acquire(path: &Path) -> Result<Self> {
        let lock_path = sibling(path, ".lock");
        let open = || -> io::Result<File> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)
        };
        let file = open().map_err(|source| PipeLensError::Persist {
            path: lock_path.clone(),
            source,
        })?;

        if !matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
            return Err(PipeLensError::StoreLocked {
                path: path.to_path_buf(),
            });
        }
        debug!("Locked {}", lock_path.display());
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// `<path>.corrupt`, or a timestamped variant when earlier backups exist.
/// Never names a file that is already there.
fn free_backup_path(path: &Path) -> PathBuf {
    let plain = sibling(path, ".corrupt");
    if !plain.exists() {
        return plain;
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let mut candidate = sibling(path, &format!(".corrupt.{stamp}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = sibling(path, &format!(".corrupt.{stamp}-{n}"));
        n += 1;
    }
    candidate
}

/// `<path><suffix>` next to the original file.
pub(super) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map_or_else(|| OsString::from("store"), OsString::from);
    name.push(suffix);
    path.with_file_name(name)
}

/// Serializes `value` to pretty JSON and replaces `path` atomically.
///
/// The content is written to a staging file that is synced and then renamed
/// over the destination, so readers see either the old or the new file.
pub(super) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    let staging = sibling(path, ".tmp");

    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&staging)?;
        file.write_all(&content)?;
        file.sync_all()?;
        fs::rename(&staging, path)
    };

    write().map_err(|source| {
        let _ = fs::remove_file(&staging);
        PipeLensError::Persist {
            path: path.to_path_buf(),
            source,
        }
    })?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}
