//! In-memory record of every remote file the client knows about.
//!
//! The manifest never touches disk. Deleting the files behind a removed
//! entry is the engine's job; the manifest only hands the entry back.

use crate::sync::types::FileEntry;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct Manifest {
    entries: RwLock<HashMap<String, FileEntry>>,
    /// Local paths the watcher currently tracks
    observed: RwLock<BTreeSet<String>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all entries with a fresh snapshot.
    pub async fn snapshot_replace(&self, entries: Vec<FileEntry>) {
        let mut map = self.entries.write().await;
        map.clear();
        for entry in entries {
            map.insert(entry.rel_path().to_string(), entry);
        }
    }

    /// Insert or replace an entry. Returns `false` when an identical entry
    /// was already present and nothing changed.
    pub async fn upsert(&self, entry: FileEntry) -> bool {
        let mut map = self.entries.write().await;
        match map.get(entry.rel_path()) {
            Some(existing) if *existing == entry => false,
            _ => {
                map.insert(entry.rel_path().to_string(), entry);
                true
            }
        }
    }

    pub async fn remove(&self, rel_path: &str) -> Option<FileEntry> {
        self.entries.write().await.remove(rel_path)
    }

    pub async fn get(&self, rel_path: &str) -> Option<FileEntry> {
        self.entries.read().await.get(rel_path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All known relative paths, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Start tracking a local path. Returns `true` if it was not tracked yet.
    pub async fn observe(&self, rel_path: &str) -> bool {
        self.observed.write().await.insert(rel_path.to_string())
    }

    pub async fn forget(&self, rel_path: &str) -> bool {
        self.observed.write().await.remove(rel_path)
    }

    pub async fn is_observed(&self, rel_path: &str) -> bool {
        self.observed.read().await.contains(rel_path)
    }

    pub async fn observed(&self) -> Vec<String> {
        self.observed.read().await.iter().cloned().collect()
    }
}
