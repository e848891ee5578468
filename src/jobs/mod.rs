//! Build jobs triggered from the server: synthesis runs and device
//! programming.
//!
//! Jobs run as supervised subprocesses on a bounded pool and talk back to
//! the server only through a [`ProgressReporter`].

pub mod handlers;
pub mod reporter;
pub mod supervisor;
pub mod tools;

use crate::sync::engine::SyncError;
use crate::sync::transport::TransportError;
use crate::sync::types::{CompileInfo, FileRecord, ProgressKind};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::error;

pub use handlers::{BuildRequestHandler, ProgramDeviceHandler};
pub use reporter::RemoteReporter;
pub use supervisor::{run_supervised, SupervisedRun};
pub use tools::{BuildTool, ScriptTool, SynthesisRequest, ToolRegistry};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Did not find tool for vendor {vendor}. Only know tools for {known:?}")]
    NoTool { vendor: String, known: Vec<String> },

    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Channel from a running job back to the server.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// `progress` is a fraction in `0..=1`, or `None` for errors and output.
    async fn report_progress(
        &self,
        kind: ProgressKind,
        progress: Option<f64>,
        message: Option<String>,
    ) -> Result<(), JobError>;

    /// Register a generated artifact with `info` and upload it.
    async fn report_file(
        &self,
        info: &mut CompileInfo,
        local: &Path,
        rel_path: &str,
    ) -> Result<FileRecord, JobError>;

    /// Publish the finished build result. Called once per job.
    async fn report_result(&self, info: CompileInfo) -> Result<(), JobError>;
}

/// Background jobs owned by the session, joined or aborted on close.
#[derive(Default)]
pub struct JobSet {
    tasks: Mutex<JoinSet<()>>,
}

impl JobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        // Reap finished jobs so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(job);
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every running job to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Build job panicked: {}", e);
                }
            }
        }
    }

    /// Abort every running job. Supervised processes die with their task.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}
