//! Generated wallpaper storage with keep-last-K retention.
//!
//! Every render is written to a new, uniquely named file; an existing file is
//! never overwritten. Writes go to a hidden temp sibling that is synced and
//! then renamed, so the background setter only ever sees complete files.
//!
//! A JSON ledger next to the images records creation order and which file is
//! currently applied. Retention decisions come from the ledger, never from
//! directory listing order.

use crate::error::{PaperError, Result};
use crate::gateway::{BackgroundSetter, DisplayId, GatewayError, RenderedImage, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const LEDGER_VERSION: u32 = 1;
const PREFIX: &str = "wall-";
const EXTENSION: &str = "png";

/// One wallpaper file tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Unknown for files adopted from disk.
    pub resolution: Option<Resolution>,
    pub is_current: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    artifacts: Vec<ArtifactRecord>,
}

/// Why `persist_and_apply` did not produce a current wallpaper.
#[derive(Debug, Clone)]
pub struct ApplyFailure {
    /// The written file, when the failure came after the write.
    pub artifact: Option<PathBuf>,
    pub error: GatewayError,
}

/// Wallpaper directory plus its ledger.
///
/// Records are kept in creation order, oldest first.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    ledger_path: PathBuf,
    keep: usize,
    records: Mutex<Vec<ArtifactRecord>>,
}

impl ArtifactStore {
    /// Open (or create) the store in `dir`, keeping `keep` artifacts (minimum 1).
    ///
    /// The ledger is reconciled with the directory: entries whose file is gone
    /// are dropped and untracked `wall-*.png` files are adopted by mtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or scanned.
    pub fn open(dir: impl Into<PathBuf>, keep: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PaperError::Artifact(format!(
                "failed to create wallpaper directory {}: {e}",
                dir.display()
            ))
        })?;
        let ledger_path = crate::paper_dirs::ledger_file_in(&dir);

        let mut records = load_ledger(&ledger_path);
        let before = records.len();
        records.retain(|r| r.path.is_file());
        let dropped = before - records.len();

        let adopted = adopt_untracked(&dir, &mut records)?;
        remove_stale_temp_files(&dir);

        let store = Self {
            dir,
            ledger_path,
            keep: keep.max(1),
            records: Mutex::new(records),
        };
        if dropped > 0 || adopted > 0 {
            tracing::info!(dropped, adopted, "reconciled wallpaper ledger with disk");
            store.save(&store.ledger())?;
        }
        Ok(store)
    }

    /// Read the ledger in `dir` without touching the directory.
    ///
    /// Unlike [`ArtifactStore::open`] this never creates the directory,
    /// adopts files, removes temp files or rewrites the ledger, so it is
    /// safe to call while another process owns the store. Entries whose file
    /// is gone are left out.
    #[must_use]
    pub fn inspect(dir: impl AsRef<Path>) -> Vec<ArtifactRecord> {
        let mut records = load_ledger(&crate::paper_dirs::ledger_file_in(dir.as_ref()));
        records.retain(|r| r.path.is_file());
        records
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Snapshot of tracked artifacts, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<ArtifactRecord> {
        self.ledger().clone()
    }

    /// Path of the applied wallpaper, if any.
    #[must_use]
    pub fn current(&self) -> Option<PathBuf> {
        self.ledger()
            .iter()
            .find(|r| r.is_current)
            .map(|r| r.path.clone())
    }

    fn ledger(&self) -> MutexGuard<'_, Vec<ArtifactRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, records: &[ArtifactRecord]) -> Result<()> {
        let ledger = LedgerFile {
            version: LEDGER_VERSION,
            artifacts: records.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&ledger)
            .map_err(|e| PaperError::Artifact(format!("failed to serialize ledger: {e}")))?;
        let tmp_path = self.ledger_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            PaperError::Artifact(format!("failed to write ledger temp file: {e}"))
        })?;
        std::fs::rename(&tmp_path, &self.ledger_path)
            .map_err(|e| PaperError::Artifact(format!("failed to finalize ledger: {e}")))?;
        Ok(())
    }

    /// Write `image` to a new unique file and record it (not current).
    ///
    /// # Errors
    ///
    /// Returns an error if the file or the ledger cannot be written.
    pub fn write_artifact(&self, image: &RenderedImage, seq: u64) -> Result<PathBuf> {
        let created_at = Utc::now();
        let path = self.unique_path(created_at, seq);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = self.dir.join(format!(".{file_name}.tmp"));

        write_synced(&tmp_path, &image.png).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            PaperError::Artifact(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            PaperError::Artifact(format!("failed to finalize {}: {e}", path.display()))
        })?;

        let mut records = self.ledger();
        records.push(ArtifactRecord {
            path: path.clone(),
            created_at,
            resolution: Some(image.resolution),
            is_current: false,
        });
        self.save(&records)?;
        tracing::debug!(path = %path.display(), bytes = image.png.len(), "wrote wallpaper");
        Ok(path)
    }

    fn unique_path(&self, created_at: DateTime<Utc>, seq: u64) -> PathBuf {
        let stem = format!("{PREFIX}{}-{seq}", created_at.timestamp_millis());
        let mut candidate = self.dir.join(format!("{stem}.{EXTENSION}"));
        let mut n = 1u32;
        while candidate.exists() {
            candidate = self.dir.join(format!("{stem}-{n}.{EXTENSION}"));
            n += 1;
        }
        candidate
    }

    /// Mark `path` as the applied wallpaper.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not tracked or the ledger cannot be written.
    pub fn mark_current(&self, path: &Path) -> Result<()> {
        let mut records = self.ledger();
        if !records.iter().any(|r| r.path == path) {
            return Err(PaperError::Artifact(format!(
                "{} is not a tracked artifact",
                path.display()
            )));
        }
        for record in records.iter_mut() {
            record.is_current = record.path == path;
        }
        self.save(&records)
    }

    /// Write, apply to every display, then prune.
    ///
    /// All displays are attempted even when one fails; any failure fails the
    /// whole apply and nothing is rolled back. On success the new file
    /// becomes current and retention drops to `keep`. On failure the new
    /// file stays on disk alongside the current one, so the directory holds
    /// at most `keep + 1` files.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyFailure`] carrying the written path (if any) and the
    /// first failure's kind with every failing display in the message.
    pub async fn persist_and_apply(
        &self,
        image: &RenderedImage,
        seq: u64,
        displays: &[DisplayId],
        setter: &dyn BackgroundSetter,
    ) -> std::result::Result<PathBuf, ApplyFailure> {
        let path = self.write_artifact(image, seq).map_err(|e| ApplyFailure {
            artifact: None,
            error: GatewayError::os(e.to_string()),
        })?;

        let mut failures: Vec<(DisplayId, GatewayError)> = Vec::new();
        for target in displays {
            if let Err(e) = setter.set_background(&path, target).await {
                tracing::warn!(display = %target, error = %e, "failed to set background");
                failures.push((target.clone(), e));
            }
        }

        if let Some((_, first)) = failures.first() {
            let detail: Vec<String> = failures
                .iter()
                .map(|(display, e)| format!("{display}: {}", e.message))
                .collect();
            let error = GatewayError::new(
                first.kind,
                format!(
                    "{} of {} displays failed: {}",
                    failures.len(),
                    displays.len(),
                    detail.join("; ")
                ),
            );
            self.prune(self.keep, Some(&path));
            return Err(ApplyFailure {
                artifact: Some(path),
                error,
            });
        }

        if let Err(e) = self.mark_current(&path) {
            tracing::warn!(error = %e, "wallpaper applied but ledger update failed");
        }
        self.evict_old_artifacts(self.keep);
        Ok(path)
    }

    /// Keep the current artifact plus the newest `keep - 1` others; delete the rest.
    ///
    /// Returns the deleted paths. A file that is already gone counts as
    /// deleted; any other delete error is logged and the entry is retried on
    /// the next pass.
    pub fn evict_old_artifacts(&self, keep: usize) -> Vec<PathBuf> {
        self.prune(keep, None)
    }

    fn prune(&self, keep: usize, also_protect: Option<&Path>) -> Vec<PathBuf> {
        let keep_others = keep.max(1) - 1;
        let mut records = self.ledger();

        let mut kept_others = 0;
        let mut doomed = Vec::new();
        for (index, record) in records.iter().enumerate().rev() {
            if record.is_current || Some(record.path.as_path()) == also_protect {
                continue;
            }
            if kept_others < keep_others {
                kept_others += 1;
                continue;
            }
            doomed.push(index);
        }
        if doomed.is_empty() {
            return Vec::new();
        }

        let mut deleted = Vec::new();
        for index in doomed {
            // Indices are descending, so removal keeps the rest valid.
            let path = records[index].path.clone();
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete old wallpaper");
                    continue;
                }
            }
            records.remove(index);
            deleted.push(path);
        }

        if let Err(e) = self.save(&records) {
            tracing::warn!(error = %e, "failed to save ledger after eviction");
        }
        tracing::debug!(count = deleted.len(), "evicted old wallpapers");
        deleted
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn load_ledger(path: &Path) -> Vec<ArtifactRecord> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read ledger, rebuilding");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<LedgerFile>(&bytes) {
        Ok(ledger) => ledger.artifacts,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt ledger, rebuilding");
            Vec::new()
        }
    }
}

fn is_artifact_name(name: &str) -> bool {
    name.starts_with(PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION))
}

/// Add untracked artifact files to `records`, then re-sort by creation time.
fn adopt_untracked(dir: &Path, records: &mut Vec<ArtifactRecord>) -> Result<usize> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        PaperError::Artifact(format!("failed to scan {}: {e}", dir.display()))
    })?;

    let mut adopted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_artifact_name(&name) || !path.is_file() || records.iter().any(|r| r.path == path) {
            continue;
        }
        let created_at = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        records.push(ArtifactRecord {
            path,
            created_at,
            resolution: None,
            is_current: false,
        });
        adopted += 1;
    }
    if adopted > 0 {
        records.sort_by_key(|r| r.created_at);
    }
    Ok(adopted)
}

fn remove_stale_temp_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&format!(".{PREFIX}")) && name.ends_with(".tmp") {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                tracing::debug!(file = %name, error = %e, "could not remove stale temp file");
            }
        }
    }
}
