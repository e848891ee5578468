//! Conflict resolution between local files and the remote manifest.
//!
//! Every remote record goes through [`plan_resolution`]: content hashes are
//! compared before timestamps, so byte-identical files never transfer. When
//! local content differs and is newer, the local bytes are preserved under a
//! `_conflict<mtime>` sibling before the remote version is downloaded.
//!
//! Operations on one path are serialized by a per-path lock; different paths
//! resolve concurrently.

use crate::sync::clock::ClockOffset;
use crate::sync::file_times::{modified_millis, set_mtime};
use crate::sync::hash::{compute_file_hash, hashes_match};
use crate::sync::listener::WorkspaceListener;
use crate::sync::manifest::Manifest;
use crate::sync::transport::{Remote, TransportError};
use crate::sync::types::{CompileInfo, FileEntry, FileOp, FileRecord, RepoInfo, Severity};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Could not preserve conflicting file {path}: {source}")]
    ConflictFork {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Refusing path outside the workspace: {0}")]
    InvalidPath(String),
}

/// Local file facts the resolution decision needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalState {
    pub hash: String,
    pub mtime: i64,
}

/// What to do with one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// Fetch the remote bytes; `op` is ADDED for new files, UPDATED otherwise
    Download { op: FileOp },
    /// Content already matches; only stamp the remote time
    Touch { mtime: i64 },
    /// Content matches and the remote time is unknown
    Keep,
    /// Local is newer and differs: move it aside, then download
    ForkThenDownload { local_mtime: i64 },
}

/// Decide how to converge a local file on `record`.
///
/// `remote_time` is the record's timestamp already shifted onto the local
/// clock. `None` means unknown, which always lets the remote win.
pub fn plan_resolution(
    local: Option<&LocalState>,
    record: &FileRecord,
    remote_time: Option<i64>,
) -> ResolutionPlan {
    let Some(local) = local else {
        return ResolutionPlan::Download { op: FileOp::Added };
    };
    if hashes_match(&local.hash, &record.content_hash) {
        return match remote_time {
            Some(mtime) => ResolutionPlan::Touch { mtime },
            None => ResolutionPlan::Keep,
        };
    }
    match remote_time {
        Some(remote) if local.mtime >= remote => ResolutionPlan::ForkThenDownload {
            local_mtime: local.mtime,
        },
        _ => ResolutionPlan::Download {
            op: FileOp::Updated,
        },
    }
}

/// Outcome of resolving one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Downloaded(FileOp),
    Touched,
    Unchanged,
    Forked { backup: PathBuf },
}

/// Outcome of checking one local file for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCheck {
    Unchanged,
    /// Same content with a bumped mtime; the timestamp was reset
    TimestampReset,
    Uploaded,
    /// The file vanished and the delete was sent to the server
    Deleted,
    /// The file vanished but was never tracked
    Missing,
}

/// Name for the preserved copy of a conflicting local file.
pub fn conflict_path(target: &Path, local_mtime: i64) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!("{}_conflict{}", name, local_mtime))
}

/// Map a `/`-separated relative path into the workspace root.
pub fn local_path(root: &Path, rel_path: &str) -> Result<PathBuf, SyncError> {
    let rel = Path::new(rel_path);
    let safe = !rel_path.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(SyncError::InvalidPath(rel_path.to_string()));
    }
    Ok(rel_path.split('/').fold(root.to_path_buf(), |p, s| p.join(s)))
}

/// Remove `path`, then every directory above it that became empty.
///
/// Walks upward one level at a time and stops at the first non-empty
/// directory. `root` itself is never removed.
pub async fn remove_with_empty_parents(root: &Path, path: &Path) -> io::Result<()> {
    fs::remove_file(path).await?;
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        let mut entries = fs::read_dir(current).await?;
        if entries.next_entry().await?.is_some() {
            break;
        }
        debug!("Removing empty directory {}", current.display());
        fs::remove_dir(current).await?;
        dir = current.parent();
    }
    Ok(())
}

pub struct SyncEngine {
    root: PathBuf,
    manifest: Arc<Manifest>,
    remote: Arc<dyn Remote>,
    offset: Arc<ClockOffset>,
    listener: Arc<dyn WorkspaceListener>,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        root: PathBuf,
        manifest: Arc<Manifest>,
        remote: Arc<dyn Remote>,
        offset: Arc<ClockOffset>,
        listener: Arc<dyn WorkspaceListener>,
    ) -> Self {
        Self {
            root,
            manifest,
            remote,
            offset,
            listener,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    pub fn offset(&self) -> &Arc<ClockOffset> {
        &self.offset
    }

    pub fn listener(&self) -> &Arc<dyn WorkspaceListener> {
        &self.listener
    }

    async fn lock_path(&self, rel_path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.path_locks.lock().await;
            locks
                .entry(rel_path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Converge the local copy of `record` on the remote version.
    pub async fn resolve(&self, record: &FileRecord) -> Result<Resolution, SyncError> {
        let _guard = self.lock_path(&record.rel_path).await;
        self.resolve_locked(record).await
    }

    async fn resolve_locked(&self, record: &FileRecord) -> Result<Resolution, SyncError> {
        let target = local_path(&self.root, &record.rel_path)?;
        let remote_time = self.offset.to_local(record.last_modified);

        let local = match fs::metadata(&target).await {
            Ok(meta) => Some(LocalState {
                hash: compute_file_hash(&target).await?,
                mtime: modified_millis(&meta),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match plan_resolution(local.as_ref(), record, remote_time) {
            ResolutionPlan::Keep => Ok(Resolution::Unchanged),
            ResolutionPlan::Touch { mtime } => {
                if local.as_ref().map(|l| l.mtime) == Some(mtime) {
                    return Ok(Resolution::Unchanged);
                }
                set_mtime(&target, mtime)?;
                Ok(Resolution::Touched)
            }
            ResolutionPlan::Download { op } => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }
                self.download(&target, record, remote_time, op).await?;
                Ok(Resolution::Downloaded(op))
            }
            ResolutionPlan::ForkThenDownload { local_mtime } => {
                let backup = conflict_path(&target, local_mtime);
                fs::rename(&target, &backup)
                    .await
                    .map_err(|source| SyncError::ConflictFork {
                        path: target.clone(),
                        source,
                    })?;
                if let Err(e) = self
                    .download(&target, record, remote_time, FileOp::Updated)
                    .await
                {
                    // The canonical path must not look deleted to the next scan.
                    if let Err(restore) = fs::rename(&backup, &target).await {
                        self.listener.log(
                            Severity::Error,
                            &format!(
                                "Could not restore {} from {}: {}",
                                target.display(),
                                backup.display(),
                                restore
                            ),
                        );
                    }
                    return Err(e);
                }
                self.listener.log(
                    Severity::Warning,
                    &format!(
                        "Local file {} is newer than the server version, kept as {}",
                        target.display(),
                        backup.display()
                    ),
                );
                Ok(Resolution::Forked { backup })
            }
        }
    }

    async fn download(
        &self,
        target: &Path,
        record: &FileRecord,
        remote_time: Option<i64>,
        op: FileOp,
    ) -> Result<(), SyncError> {
        self.remote
            .download_file(target, record.download_source(), remote_time)
            .await?;
        self.listener.file_operation(op, target);
        Ok(())
    }

    /// Record a remote entry and converge the file plus its build outputs.
    pub async fn apply_remote_entry(&self, entry: &FileEntry) -> Result<Resolution, SyncError> {
        let resolution = {
            let _guard = self.lock_path(entry.rel_path()).await;
            self.manifest.upsert(entry.clone()).await;
            self.resolve_locked(&entry.record).await?
        };
        if let Some(info) = &entry.build_result {
            self.apply_compile_info(info).await;
        }
        Ok(resolution)
    }

    /// Resolve every output of a build result. Returns how many failed.
    pub async fn apply_compile_info(&self, info: &CompileInfo) -> usize {
        let mut failures = 0;
        for output in &info.outputs {
            if let Err(e) = self.resolve(output).await {
                failures += 1;
                self.report_failure(&output.rel_path, &e);
            }
        }
        failures
    }

    /// Replace the manifest with a snapshot and converge every file in it.
    ///
    /// One failing file never stops the others. Returns how many failed.
    pub async fn apply_snapshot(&self, repo: &RepoInfo) -> usize {
        self.manifest.snapshot_replace(repo.files.clone()).await;
        let mut failures = 0;
        for entry in &repo.files {
            let result = {
                let _guard = self.lock_path(entry.rel_path()).await;
                self.resolve_locked(&entry.record).await
            };
            if let Err(e) = result {
                failures += 1;
                self.report_failure(entry.rel_path(), &e);
            }
            if let Some(info) = &entry.build_result {
                failures += self.apply_compile_info(info).await;
            }
        }
        failures
    }

    /// Handle a file deleted on the server.
    ///
    /// A local copy newer than the deleted record is kept. Build outputs are
    /// removed either way, and the path stops being tracked.
    pub async fn apply_remote_delete(&self, entry: &FileEntry) -> Result<(), SyncError> {
        let rel = entry.rel_path();
        let target = local_path(&self.root, rel)?;

        let known = {
            let _guard = self.lock_path(rel).await;
            let known = self.manifest.remove(rel).await;
            self.manifest.forget(rel).await;

            match fs::metadata(&target).await {
                Ok(meta) => {
                    let local_mtime = modified_millis(&meta);
                    let remote_time = self.offset.to_local(entry.record.last_modified);
                    if remote_time.is_some_and(|t| local_mtime > t) {
                        self.listener.log(
                            Severity::Warning,
                            &format!(
                                "Not deleting {} because it was modified after the deletion",
                                target.display()
                            ),
                        );
                    } else {
                        remove_with_empty_parents(&self.root, &target).await?;
                        self.listener.file_operation(FileOp::Removed, &target);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if known.is_some() {
                        self.listener.log(
                            Severity::Warning,
                            &format!("Deleted file {} does not exist locally", target.display()),
                        );
                    } else {
                        debug!("Delete for untracked {} ignored", rel);
                    }
                }
                Err(e) => return Err(e.into()),
            }
            known
        };

        let mut outputs: Vec<&FileRecord> = entry.cascade_outputs().iter().collect();
        if let Some(known) = &known {
            for output in known.cascade_outputs() {
                if !outputs.iter().any(|o| o.rel_path == output.rel_path) {
                    outputs.push(output);
                }
            }
        }
        for output in outputs {
            if output.rel_path == rel {
                continue;
            }
            if let Err(e) = self.delete_output(output).await {
                self.report_failure(&output.rel_path, &e);
            }
        }
        Ok(())
    }

    async fn delete_output(&self, output: &FileRecord) -> Result<(), SyncError> {
        let path = local_path(&self.root, &output.rel_path)?;
        let _guard = self.lock_path(&output.rel_path).await;
        self.manifest.forget(&output.rel_path).await;
        match fs::metadata(&path).await {
            Ok(_) => {
                remove_with_empty_parents(&self.root, &path).await?;
                self.listener.file_operation(FileOp::Removed, &path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Push a local change to the server, or propagate a local deletion.
    pub async fn check_local_file(&self, rel_path: &str) -> Result<LocalCheck, SyncError> {
        let path = local_path(&self.root, rel_path)?;
        let _guard = self.lock_path(rel_path).await;

        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.manifest.forget(rel_path).await {
                    return Ok(LocalCheck::Missing);
                }
                self.remote.delete_file(rel_path).await?;
                self.manifest.remove(rel_path).await;
                self.listener.file_operation(FileOp::Removed, &path);
                return Ok(LocalCheck::Deleted);
            }
            Err(e) => return Err(e.into()),
        };

        let local_mtime = modified_millis(&meta);
        let known = self.manifest.get(rel_path).await;
        let known_time = known
            .as_ref()
            .and_then(|e| self.offset.to_local(e.record.last_modified));
        if let Some(t) = known_time {
            if local_mtime <= t {
                return Ok(LocalCheck::Unchanged);
            }
        }

        let hash = compute_file_hash(&path).await?;
        if let Some(mut entry) = known {
            if hashes_match(&hash, &entry.record.content_hash) {
                match known_time {
                    Some(t) => set_mtime(&path, t)?,
                    None => {
                        entry.record.last_modified = Some(self.offset.to_remote(local_mtime));
                        self.manifest.upsert(entry).await;
                    }
                }
                debug!("{} unchanged, timestamp reset", rel_path);
                return Ok(LocalCheck::TimestampReset);
            }
        }

        self.remote.upload_file(&path, rel_path).await?;
        let record = FileRecord {
            rel_path: rel_path.to_string(),
            content_hash: hash,
            last_modified: Some(self.offset.to_remote(local_mtime)),
            source_uri: String::new(),
        };
        self.manifest.upsert(FileEntry::new(record)).await;
        self.listener.file_operation(FileOp::Uploaded, &path);
        Ok(LocalCheck::Uploaded)
    }

    /// Start tracking a local path. Returns `true` if it was new.
    pub async fn track_local(&self, rel_path: &str) -> bool {
        self.manifest.observe(rel_path).await
    }

    pub async fn tracked_paths(&self) -> Vec<String> {
        self.manifest.observed().await
    }

    fn report_failure(&self, rel_path: &str, err: &SyncError) {
        self.listener.log(
            Severity::Error,
            &format!("Failed to synchronize {}: {}", rel_path, err),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(hash: &str) -> FileRecord {
        FileRecord {
            rel_path: "a.vhdl".to_string(),
            content_hash: hash.to_string(),
            last_modified: Some(1000),
            source_uri: String::new(),
        }
    }

    fn local(hash: &str, mtime: i64) -> LocalState {
        LocalState {
            hash: hash.to_string(),
            mtime,
        }
    }

    #[test]
    fn test_missing_local_is_added() {
        assert_eq!(
            plan_resolution(None, &record("h1"), Some(1000)),
            ResolutionPlan::Download { op: FileOp::Added }
        );
    }

    #[test]
    fn test_hash_match_only_touches() {
        let plan = plan_resolution(Some(&local("H1", 5)), &record("h1"), Some(1000));
        assert_eq!(plan, ResolutionPlan::Touch { mtime: 1000 });
        let plan = plan_resolution(Some(&local("h1", 5000)), &record("h1"), None);
        assert_eq!(plan, ResolutionPlan::Keep);
    }

    #[test]
    fn test_older_local_is_replaced() {
        assert_eq!(
            plan_resolution(Some(&local("h2", 500)), &record("h1"), Some(1000)),
            ResolutionPlan::Download {
                op: FileOp::Updated
            }
        );
    }

    #[test]
    fn test_unknown_remote_time_always_downloads() {
        assert_eq!(
            plan_resolution(Some(&local("h2", i64::MAX)), &record("h1"), None),
            ResolutionPlan::Download {
                op: FileOp::Updated
            }
        );
    }

    #[test]
    fn test_newer_local_is_forked() {
        assert_eq!(
            plan_resolution(Some(&local("h2", 2000)), &record("h1"), Some(1000)),
            ResolutionPlan::ForkThenDownload { local_mtime: 2000 }
        );
    }

    #[test]
    fn test_conflict_path() {
        assert_eq!(
            conflict_path(Path::new("/w/src/a.vhdl"), 2000),
            PathBuf::from("/w/src/a.vhdl_conflict2000")
        );
    }

    #[test]
    fn test_local_path_rejects_escapes() {
        let root = Path::new("/w");
        assert_eq!(
            local_path(root, "src/a.vhdl").unwrap(),
            PathBuf::from("/w/src/a.vhdl")
        );
        assert!(local_path(root, "../etc/passwd").is_err());
        assert!(local_path(root, "/etc/passwd").is_err());
        assert!(local_path(root, "").is_err());
    }

    #[tokio::test]
    async fn test_prune_stops_at_non_empty_dir_and_root() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("gen/deep/er")).unwrap();
        std::fs::write(root.join("gen/keep.txt"), "k").unwrap();
        std::fs::write(root.join("gen/deep/er/out.vhdl"), "o").unwrap();

        remove_with_empty_parents(root, &root.join("gen/deep/er/out.vhdl"))
            .await
            .unwrap();
        assert!(!root.join("gen/deep").exists());
        assert!(root.join("gen/keep.txt").exists());

        std::fs::write(root.join("top.vhdl"), "t").unwrap();
        remove_with_empty_parents(root, &root.join("top.vhdl"))
            .await
            .unwrap();
        remove_with_empty_parents(root, &root.join("gen/keep.txt"))
            .await
            .unwrap();
        assert!(root.exists());
        assert!(!root.join("gen").exists());
    }
}
