//! In-memory server stand-in shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use workspace_sync::sync::clock::ClockOffset;
use workspace_sync::sync::file_times::set_mtime;
use workspace_sync::sync::types::{
    CompileInfo, ConnectionStatus, FileOp, FileRecord, Message, Severity,
};
use workspace_sync::sync::{
    compute_content_hash, Manifest, Remote, SyncEngine, TransportError, WorkspaceListener,
};

#[derive(Default)]
pub struct FakeRemote {
    /// Bytes served per download source
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub downloads: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub derived_uploads: Mutex<Vec<(String, CompileInfo, String)>>,
    pub deletes: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeRemote {
    pub fn serve(&self, source: &str, bytes: &[u8]) -> String {
        self.files
            .lock()
            .unwrap()
            .insert(source.to_string(), bytes.to_vec());
        compute_content_hash(bytes)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn posted_subjects(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn post_message(
        &self,
        subject: &str,
        _payload_type: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        self.posts
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(())
    }

    async fn upload_file(&self, local: &Path, rel_path: &str) -> Result<(), TransportError> {
        let bytes = std::fs::read(local)?;
        self.uploads
            .lock()
            .unwrap()
            .push((rel_path.to_string(), bytes));
        Ok(())
    }

    async fn upload_derived_file(
        &self,
        _local: &Path,
        rel_path: &str,
        info: &CompileInfo,
        info_source: &str,
    ) -> Result<(), TransportError> {
        self.derived_uploads.lock().unwrap().push((
            rel_path.to_string(),
            info.clone(),
            info_source.to_string(),
        ));
        Ok(())
    }

    async fn download_file(
        &self,
        target: &Path,
        source: &str,
        modified: Option<i64>,
    ) -> Result<(), TransportError> {
        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .ok_or_else(|| TransportError::UnexpectedStatus {
                operation: format!("Downloading {}", source),
                status: 404,
                body: String::new(),
            })?;
        std::fs::write(target, bytes)?;
        if let Some(ms) = modified {
            set_mtime(target, ms)?;
        }
        self.downloads.lock().unwrap().push(source.to_string());
        Ok(())
    }

    async fn delete_file(&self, rel_path: &str) -> Result<(), TransportError> {
        self.deletes.lock().unwrap().push(rel_path.to_string());
        Ok(())
    }
}

/// Listener that records everything for assertions.
#[derive(Default)]
pub struct RecordingListener {
    pub statuses: Mutex<Vec<ConnectionStatus>>,
    pub logs: Mutex<Vec<(Severity, String)>>,
    pub file_ops: Mutex<Vec<(FileOp, String)>>,
    pub messages: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn logs_at(&self, severity: Severity) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn ops(&self) -> Vec<FileOp> {
        self.file_ops.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }
}

impl WorkspaceListener for RecordingListener {
    fn connection_status(&self, status: ConnectionStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn log(&self, severity: Severity, message: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }

    fn incoming_message(&self, message: &Message) {
        self.messages.lock().unwrap().push(message.subject.clone());
    }

    fn file_operation(&self, op: FileOp, local_file: &Path) {
        self.file_ops
            .lock()
            .unwrap()
            .push((op, local_file.display().to_string()));
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub remote: Arc<FakeRemote>,
    pub listener: Arc<RecordingListener>,
    pub offset: Arc<ClockOffset>,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    pub fn with_offset(offset_ms: i64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(FakeRemote::default());
        let listener = Arc::new(RecordingListener::default());
        let offset = Arc::new(ClockOffset::new(offset_ms));
        let engine = Arc::new(SyncEngine::new(
            dir.path().to_path_buf(),
            Arc::new(Manifest::new()),
            remote.clone(),
            offset.clone(),
            listener.clone(),
        ));
        Self {
            dir,
            remote,
            listener,
            offset,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a local file with a fixed mtime.
    pub fn write_local(&self, rel_path: &str, bytes: &[u8], mtime: i64) {
        let path = self.root().join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        set_mtime(&path, mtime).unwrap();
    }

    pub fn read_local(&self, rel_path: &str) -> Vec<u8> {
        std::fs::read(self.root().join(rel_path)).unwrap()
    }

    pub fn mtime(&self, rel_path: &str) -> i64 {
        let meta = std::fs::metadata(self.root().join(rel_path)).unwrap();
        workspace_sync::sync::file_times::modified_millis(&meta)
    }
}

pub fn record(rel_path: &str, hash: &str, last_modified: Option<i64>) -> FileRecord {
    FileRecord {
        rel_path: rel_path.to_string(),
        content_hash: hash.to_string(),
        last_modified,
        source_uri: String::new(),
    }
}
