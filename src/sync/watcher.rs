//! Polling watcher for local changes.
//!
//! The loop alternates one full scan of the workspace tree with a number of
//! one-second ticks. A scan picks up new files; a tick re-checks every
//! tracked file. All changes go through [`SyncEngine::check_local_file`].

use crate::sync::engine::{LocalCheck, SyncEngine};
use crate::sync::transport::normalize_path;
use crate::sync::types::Severity;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Which files the watcher considers and how often it looks.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Watched extensions, without the dot, compared case-insensitively
    pub extensions: Vec<String>,
    /// Directory names that are never descended into
    pub skip_dirs: Vec<String>,
    pub tick: Duration,
    /// Ticks between two full scans
    pub ticks_per_scan: u32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            extensions: ["pshdl", "vhd", "vhdl", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_dirs: vec!["src-gen".to_string()],
            tick: Duration::from_secs(1),
            ticks_per_scan: 10,
        }
    }
}

impl WatchOptions {
    pub fn is_watched(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }
}

/// Watched files found by one walk of the tree.
#[derive(Debug, Default)]
pub struct TreeScan {
    /// Relative paths, sorted
    pub files: Vec<String>,
    /// Directories and entries that could not be read; their siblings were
    /// still scanned
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Walk `root` and collect the relative paths of every watched file.
///
/// Symlinks and hidden entries are skipped, as are `skip_dirs`. Only an
/// unreadable `root` fails the whole walk.
pub fn scan_tree(root: &Path, options: &WatchOptions) -> io::Result<TreeScan> {
    let mut scan = TreeScan::default();
    scan_recursive(root, root, options, &mut scan)?;
    scan.files.sort();
    Ok(scan)
}

fn scan_recursive(
    root: &Path,
    current: &Path,
    options: &WatchOptions,
    scan: &mut TreeScan,
) -> io::Result<()> {
    for entry_result in fs::read_dir(current)? {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                scan.failures.push((current.to_path_buf(), e));
                continue;
            }
        };
        let entry_path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                scan.failures.push((entry_path, e));
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();

        if file_type.is_symlink() || name.starts_with('.') {
            continue;
        }

        if file_type.is_dir() {
            if options.skip_dirs.iter().any(|d| *d == name) {
                continue;
            }
            scan_subdir(root, &entry_path, options, scan);
        } else if file_type.is_file() && options.is_watched(&entry_path) {
            let relative = entry_path
                .strip_prefix(root)
                .map(|p| normalize_path(&p.to_string_lossy()))
                .unwrap_or(name);
            scan.files.push(relative);
        }
    }
    Ok(())
}

/// Descend into `dir`, recording it as a failure if it cannot be listed.
fn scan_subdir(root: &Path, dir: &Path, options: &WatchOptions, scan: &mut TreeScan) {
    if let Err(e) = scan_recursive(root, dir, options, scan) {
        scan.failures.push((dir.to_path_buf(), e));
    }
}

pub struct FileWatcher {
    engine: Arc<SyncEngine>,
    options: WatchOptions,
    stop: Arc<AtomicBool>,
}

impl FileWatcher {
    pub fn new(engine: Arc<SyncEngine>, options: WatchOptions) -> Self {
        Self {
            engine,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the polling loop on its own task.
    pub fn spawn(self) -> WatcherHandle {
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move { self.run().await });
        WatcherHandle { stop, handle }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        info!("Watching {}", self.engine.root().display());
        while !self.stopped() {
            self.scan_pass().await;
            for _ in 0..self.options.ticks_per_scan {
                if self.stopped() {
                    break;
                }
                tokio::time::sleep(self.options.tick).await;
                if self.stopped() {
                    break;
                }
                self.tick().await;
            }
        }
        debug!("Watcher for {} stopped", self.engine.root().display());
    }

    /// Scan the tree and check every watched file. Returns how many changed.
    pub async fn scan_pass(&self) -> usize {
        let root = self.engine.root().to_path_buf();
        let options = self.options.clone();
        let scanned = tokio::task::spawn_blocking(move || scan_tree(&root, &options)).await;
        let paths = match scanned {
            Ok(Ok(scan)) => {
                for (path, e) in &scan.failures {
                    self.engine.listener().log(
                        Severity::Error,
                        &format!("Failed to scan {}: {}", path.display(), e),
                    );
                }
                scan.files
            }
            Ok(Err(e)) => {
                self.engine
                    .listener()
                    .log(Severity::Error, &format!("Failed to scan workspace: {}", e));
                return 0;
            }
            Err(e) => {
                self.engine
                    .listener()
                    .log(Severity::Error, &format!("Workspace scan aborted: {}", e));
                return 0;
            }
        };

        let mut changed = 0;
        for rel_path in paths {
            if self.stopped() {
                break;
            }
            if self.engine.track_local(&rel_path).await {
                debug!("Tracking {}", rel_path);
            }
            changed += self.check(&rel_path).await;
        }
        changed
    }

    /// Re-check every tracked file. Returns how many changed.
    pub async fn tick(&self) -> usize {
        let mut changed = 0;
        for rel_path in self.engine.tracked_paths().await {
            changed += self.check(&rel_path).await;
        }
        changed
    }

    async fn check(&self, rel_path: &str) -> usize {
        match self.engine.check_local_file(rel_path).await {
            Ok(LocalCheck::Unchanged) | Ok(LocalCheck::Missing) => 0,
            Ok(result) => {
                debug!("{}: {:?}", rel_path, result);
                1
            }
            Err(e) => {
                self.engine.listener().log(
                    Severity::Error,
                    &format!("Failed to check {}: {}", rel_path, e),
                );
                0
            }
        }
    }
}

/// Handle to a running watcher.
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WatcherHandle {
    /// Ask the loop to stop at its next tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(self) {
        self.stop();
        let _ = self.handle.await;
    }
}
